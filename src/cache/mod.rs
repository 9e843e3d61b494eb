//! Git cache engine.
//!
//! [`GitCache`] is the process-wide façade: it owns the index mapping
//! repository identities to [`repo::Repo`] records, the bounded
//! [`token::TokenCache`], and the lifecycle of the background maintenance
//! loop.  Locking is two-tier: the index lock here is held only for map
//! lookups and insertions, never across I/O; each repository's own lock
//! serializes clones, updates, deletes and file reads (see [`repo`]).

pub mod listing;
pub mod maintenance;
pub mod repo;
pub mod token;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{Config, DeletePolicy};
use crate::error::{CacheError, Result};
use crate::git::GitExecutor;

use listing::parse_ls_tree;
pub use listing::TreeEntry;
use repo::{Branch, Repo};
use token::TokenCache;

pub struct GitCache {
    config: Arc<Config>,
    exec: Arc<dyn GitExecutor>,
    repos: RwLock<HashMap<String, Arc<Repo>>>,
    tokens: TokenCache,
    cancel: CancellationToken,
    running: AtomicBool,
}

impl GitCache {
    /// Build the cache.  `cancel` is the lifecycle context: [`stop`] cancels
    /// it, the maintenance loop observes it, and the executor should be
    /// constructed over the same token so in-flight git processes die with
    /// the service.
    ///
    /// [`stop`]: GitCache::stop
    pub fn new(config: Arc<Config>, exec: Arc<dyn GitExecutor>, cancel: CancellationToken) -> Self {
        let tokens = TokenCache::new(config.token_ttl());
        Self {
            config,
            exec,
            repos: RwLock::new(HashMap::new()),
            tokens,
            cancel,
            running: AtomicBool::new(false),
        }
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn executor(&self) -> &dyn GitExecutor {
        &*self.exec
    }

    pub(crate) fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Validate the settings and launch the maintenance loop.  Fails with
    /// [`CacheError::ConfigInvalid`] when the storage root is missing or the
    /// check interval is too coarse for the configured TTL.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        self.verify_settings()?;

        self.running.store(true, Ordering::Release);
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            maintenance::run(Arc::clone(&cache)).await;
            cache.running.store(false, Ordering::Release);
            info!("maintenance loop stopped");
        });

        Ok(())
    }

    /// Cancel the lifecycle context.  Idempotent; the maintenance loop and
    /// any in-flight git processes wind down shortly after.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn verify_settings(&self) -> Result<()> {
        let storage = &self.config.storage_folder;
        if !storage.is_dir() {
            return Err(CacheError::ConfigInvalid(format!(
                "storage folder does not exist: {}",
                storage.display()
            )));
        }

        let ttl = self.config.repo_ttl();
        let interval = self.config.repo_check_interval();
        if !ttl.is_zero() && interval > ttl / 4 {
            return Err(CacheError::ConfigInvalid(format!(
                "repo check interval ({interval:?}) should be at most 1/4 of repo TTL ({ttl:?}) for timely eviction"
            )));
        }

        Ok(())
    }

    // -----------------------------------------------------------------------
    // Read paths
    // -----------------------------------------------------------------------

    /// Read a file at the branch HEAD, cloning the branch on first access.
    pub async fn get_file_content(
        &self,
        hash: &str,
        git_url: &str,
        branch: &str,
        file_path: &str,
    ) -> Result<Vec<u8>> {
        let repo = self.get_or_create_repo(hash, git_url).await;
        let branch = repo.get_or_create_branch(branch).await;
        let content = repo.read_file(&branch, file_path, &*self.exec).await?;
        branch.touch();
        Ok(content)
    }

    /// List a directory of the branch working tree, parsed into entries in
    /// git's own order.
    pub async fn get_tree_listing(
        &self,
        hash: &str,
        git_url: &str,
        branch: &str,
        path: &str,
    ) -> Result<Vec<TreeEntry>> {
        let repo = self.get_or_create_repo(hash, git_url).await;
        let branch = repo.get_or_create_branch(branch).await;
        let raw = repo.list_tree(&branch, path, &*self.exec).await?;
        branch.touch();
        parse_ls_tree(path, &raw)
    }

    // -----------------------------------------------------------------------
    // Token access
    // -----------------------------------------------------------------------

    pub async fn has_access(&self, token: &str, hash: &str) -> bool {
        self.tokens.has(token, hash).await
    }

    pub async fn set_access(&self, token: &str, hash: &str) {
        self.tokens.set(token, hash).await;
    }

    pub async fn remove_access(&self, token: &str, hash: &str) {
        self.tokens.remove(token, hash).await;
    }

    // -----------------------------------------------------------------------
    // Index
    // -----------------------------------------------------------------------

    /// Look up or lazily create the repository record, double-checked under
    /// the index lock.  The clone URL supplied on first creation is retained;
    /// a conflicting URL on a later call is ignored (the identity already
    /// encodes the credential).
    pub(crate) async fn get_or_create_repo(&self, hash: &str, git_url: &str) -> Arc<Repo> {
        {
            let repos = self.repos.read().await;
            if let Some(repo) = repos.get(hash) {
                return Arc::clone(repo);
            }
        }

        let mut repos = self.repos.write().await;
        Arc::clone(repos.entry(hash.to_string()).or_insert_with(|| {
            Arc::new(Repo::new(&self.config.storage_folder, hash, git_url))
        }))
    }

    /// Delete a branch and then attempt to retire its repository.  The
    /// repository directory is removed only when empty, and the index entry
    /// only when the directory is actually gone.
    pub(crate) async fn delete_branch(&self, repo: &Arc<Repo>, branch: &Branch) -> Result<()> {
        if !repo.delete_branch(branch, &*self.exec).await? {
            return Ok(());
        }
        self.try_remove_repo(repo).await;
        Ok(())
    }

    /// Best-effort repository removal; a failure is logged and, under the
    /// `retry` policy, retried by the maintenance loop.
    async fn try_remove_repo(&self, repo: &Arc<Repo>) {
        // The repository lock is released before re-entering the index.
        match repo.delete_dir_if_empty(&*self.exec).await {
            Ok(true) => {
                self.repos.write().await.remove(repo.hash());
                debug!(hash = %repo.hash(), "repository removed from cache");
            }
            Ok(false) => {}
            Err(e) => {
                warn!(hash = %repo.hash(), error = %e, "failed to remove repository directory");
            }
        }
    }

    /// Retry deletion of repositories whose branch map has emptied out.
    /// Called by the maintenance loop under [`DeletePolicy::Retry`].
    pub(crate) async fn sweep_branchless_repos(&self) {
        if self.config.delete_policy != DeletePolicy::Retry {
            return;
        }

        let snapshot: Vec<Arc<Repo>> = self.repos.read().await.values().cloned().collect();
        for repo in snapshot {
            if repo.branch_count().await == 0 {
                self.try_remove_repo(&repo).await;
            }
        }
    }

    #[cfg(test)]
    pub(crate) async fn repo_count(&self) -> usize {
        self.repos.read().await.len()
    }
}
