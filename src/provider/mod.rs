//! Hosting provider abstraction.
//!
//! A [`Provider`] turns request parameters into a [`ProviderRepo`]: the
//! stable repository identity, the clone URL, and an upstream token check.
//! The cache engine consumes only these interfaces; no provider-specific URL
//! construction leaks outside this module.

pub mod github;

use std::sync::Arc;

use sha1::{Digest, Sha1};

use crate::error::Result;

/// Salt mixed into every repository identity.
const REPO_HASH_SALT: &str = "d57bbdf3b5614008a74b20891834d223";

/// Length of the hex identity prefix used as the cache key.
const REPO_HASH_LEN: usize = 24;

/// Parameters extracted from a request by the routing layer.
#[derive(Debug, Clone)]
pub struct RepoRequest {
    pub owner: String,
    pub repo: String,
    /// Caller token; `None` for anonymous access.
    pub token: Option<String>,
}

/// One repository as seen through a provider, bound to the caller's token.
#[async_trait::async_trait]
pub trait ProviderRepo: Send + Sync {
    /// Stable identity: hex SHA-1 prefix over provider, owner, repo and
    /// (when present) the caller token.  A credentialed request therefore
    /// never shares a cache entry with an anonymous one.
    fn hash(&self) -> String;

    /// Human-facing repository URL.
    fn repo_url(&self) -> String;

    /// HTTPS clone URL ending in `.git`; embeds the token in the userinfo
    /// component for credentialed requests.
    fn git_url(&self) -> String;

    /// Check the token against the upstream API.  `Ok(false)` means the
    /// upstream rejected it; errors mean the upstream could not be asked.
    async fn validate_token(&self, client: &reqwest::Client, token: &str) -> Result<bool>;
}

pub trait Provider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Route template consumed by the HTTP layer, e.g. `/github/{owner}/{repo}`.
    fn url_path(&self) -> &'static str;

    fn get_repo(&self, request: RepoRequest) -> Result<Box<dyn ProviderRepo>>;
}

/// The providers wired into the service.
pub fn default_providers() -> Vec<Arc<dyn Provider>> {
    vec![Arc::new(github::GithubProvider)]
}

/// Derive the repository identity hash (see [`ProviderRepo::hash`]).
pub(crate) fn compute_repo_hash(provider: &str, owner: &str, repo: &str, token: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(provider.as_bytes());
    hasher.update(owner.as_bytes());
    hasher.update(repo.as_bytes());
    if !token.is_empty() {
        hasher.update(token.as_bytes());
    }
    hasher.update(REPO_HASH_SALT.as_bytes());

    let mut hash = hex::encode(hasher.finalize());
    hash.truncate(REPO_HASH_LEN);
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic_and_truncated() {
        let a = compute_repo_hash("github", "owner", "repo", "");
        let b = compute_repo_hash("github", "owner", "repo", "");
        assert_eq!(a, b);
        assert_eq!(a.len(), REPO_HASH_LEN);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn hash_depends_on_every_component() {
        let base = compute_repo_hash("github", "owner", "repo", "");
        assert_ne!(base, compute_repo_hash("gitlab", "owner", "repo", ""));
        assert_ne!(base, compute_repo_hash("github", "other", "repo", ""));
        assert_ne!(base, compute_repo_hash("github", "owner", "other", ""));
    }

    #[test]
    fn token_yields_a_distinct_identity() {
        let anonymous = compute_repo_hash("github", "owner", "repo", "");
        let credentialed = compute_repo_hash("github", "owner", "repo", "secret");
        assert_ne!(anonymous, credentialed);
    }
}
