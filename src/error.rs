//! Core error type shared by the cache engine, the git executor and the
//! provider layer.
//!
//! `FileNotFound` is the only variant with caller-visible semantics (the HTTP
//! layer maps it to 404); everything else surfaces as a server-side error.
//! Executor failures carry the combined stdout/stderr of the git invocation
//! for diagnostics.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    /// The requested path does not exist in the branch working tree.
    #[error("file not found")]
    FileNotFound,

    #[error("git clone failed: {output}")]
    CloneFailed { output: String },

    #[error("git update failed: {output}")]
    UpdateFailed { output: String },

    #[error("git ls-tree failed: {output}")]
    ListTreeFailed { output: String },

    /// Any other git invocation that exited non-zero.
    #[error("git command failed: {output}")]
    CommandFailed { output: String },

    #[error("failed to delete cached files: {0}")]
    DeleteFailed(#[source] std::io::Error),

    /// A filesystem stat other than not-exists while probing for a working tree.
    #[error("presence probe failed: {0}")]
    PresenceProbeFailed(#[source] std::io::Error),

    /// Returned only from [`GitCache::start`](crate::cache::GitCache::start).
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// The lifecycle context was cancelled while an operation was in flight.
    #[error("operation cancelled")]
    Cancelled,

    #[error("token validation failed: {0}")]
    TokenValidation(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CacheError>;
