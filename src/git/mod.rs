//! Git executor abstraction.
//!
//! The cache engine never touches the git binary or the filesystem directly;
//! everything goes through [`GitExecutor`].  The production implementation is
//! [`shell::ShellGit`], which shells out to the system `git`.  Tests plug in
//! doubles that return bytes without spawning processes.

pub mod shell;

use std::path::Path;

use crate::error::Result;

/// A branch rediscovered on disk by [`GitExecutor::scan_cached_branches`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedBranch {
    /// Repository identity (the storage directory name).
    pub hash: String,
    /// Branch name (the branch directory name).
    pub branch: String,
    /// Clone URL recorded as the working tree's `origin` remote.
    pub git_url: String,
}

/// External git and filesystem operations consumed by the cache engine.
///
/// All paths are branch or repository directories under the storage root.
/// Operations that run the git binary surface non-zero exits as errors
/// carrying the combined stdout/stderr.
#[async_trait::async_trait]
pub trait GitExecutor: Send + Sync {
    /// `git clone --depth=1 --branch <branch> <url> <dest>`.
    async fn clone_branch(&self, git_url: &str, branch: &str, dest: &Path) -> Result<()>;

    /// `git fetch origin <branch> --depth=1` followed by
    /// `git reset --hard origin/<branch>`, both inside `dir`.
    async fn update_branch(&self, dir: &Path, branch: &str) -> Result<()>;

    /// Recursively remove the branch directory.  Removing a directory that is
    /// already gone is not an error.
    async fn delete_branch(&self, dir: &Path) -> Result<()>;

    /// Remove the repository directory only when it is empty.  Returns `true`
    /// when the directory is gone afterwards (removed now or already absent).
    async fn delete_repo(&self, dir: &Path) -> Result<bool>;

    /// `true` iff `dir` is a directory containing a `.git` subdirectory.
    async fn contains_branch(&self, dir: &Path) -> Result<bool>;

    /// Read a file under the branch working tree.  A missing path is
    /// [`CacheError::FileNotFound`](crate::error::CacheError::FileNotFound).
    async fn read_file(&self, dir: &Path, file_path: &str) -> Result<Vec<u8>>;

    /// Raw output of `git ls-tree -l HEAD:<path>` for an existing directory
    /// under the working tree; a missing or non-directory path is
    /// [`CacheError::FileNotFound`](crate::error::CacheError::FileNotFound).
    async fn list_tree(&self, dir: &Path, path: &str) -> Result<Vec<u8>>;

    /// Enumerate `<root>/<hash>/<branch>` directory pairs and resolve each
    /// working tree's `origin` remote URL.
    async fn scan_cached_branches(&self, root: &Path) -> Result<Vec<CachedBranch>>;
}
