//! Repository and branch records.
//!
//! A [`Repo`] groups the branches cached for one repository identity and owns
//! the per-repository read/write lock.  That single lock serializes branch
//! map changes and all disk operations for the repository: clone, update and
//! delete run under the write half, file reads and presence probes under the
//! read half.  Exactly-one-clone under concurrent cold reads falls out of the
//! double-checked write acquisition in [`Repo::ensure_cached`].
//!
//! Branch flags are atomics so a read path holding only the read lock can
//! touch the last-accessed timestamp without re-entering the lock.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::debug;

use crate::error::Result;
use crate::git::GitExecutor;

// ---------------------------------------------------------------------------
// Branch
// ---------------------------------------------------------------------------

/// Per-branch state: on-disk path, sticky cached flag, last-accessed time.
pub struct Branch {
    name: String,
    path: PathBuf,
    cached: AtomicBool,
    last_accessed: StdMutex<Instant>,
}

impl Branch {
    fn new(repo_path: &Path, name: &str) -> Self {
        Self {
            name: name.to_string(),
            path: repo_path.join(name),
            cached: AtomicBool::new(false),
            last_accessed: StdMutex::new(Instant::now()),
        }
    }

    /// Record an access now.  `Instant::now()` is monotonic, so the stored
    /// timestamp never moves backwards.
    pub fn touch(&self) {
        let mut last = self.last_accessed.lock().expect("last_accessed poisoned");
        *last = Instant::now();
    }

    /// True when the branch has not been accessed for longer than `ttl`.
    pub fn is_expired(&self, ttl: Duration) -> bool {
        let last = *self.last_accessed.lock().expect("last_accessed poisoned");
        last.elapsed() > ttl
    }
}

// ---------------------------------------------------------------------------
// Repo
// ---------------------------------------------------------------------------

/// A repository record: identity, clone URL, on-disk root and branch map.
pub struct Repo {
    hash: String,
    git_url: String,
    path: PathBuf,
    branches: RwLock<HashMap<String, Arc<Branch>>>,
}

impl Repo {
    pub(crate) fn new(storage_root: &Path, hash: &str, git_url: &str) -> Self {
        Self {
            hash: hash.to_string(),
            git_url: git_url.to_string(),
            path: storage_root.join(hash),
            branches: RwLock::new(HashMap::new()),
        }
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn git_url(&self) -> &str {
        &self.git_url
    }

    pub(crate) async fn branch_count(&self) -> usize {
        self.branches.read().await.len()
    }

    /// Look up or lazily create the branch record, double-checked under the
    /// repository lock.
    pub async fn get_or_create_branch(&self, name: &str) -> Arc<Branch> {
        {
            let branches = self.branches.read().await;
            if let Some(branch) = branches.get(name) {
                return Arc::clone(branch);
            }
        }

        let mut branches = self.branches.write().await;
        Arc::clone(
            branches
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Branch::new(&self.path, name))),
        )
    }

    /// True when the sticky flag is set or a working tree is present on disk.
    pub async fn is_cached(&self, branch: &Branch, exec: &dyn GitExecutor) -> Result<bool> {
        if branch.cached.load(Ordering::Acquire) {
            return Ok(true);
        }
        let _guard = self.branches.read().await;
        exec.contains_branch(&branch.path).await
    }

    /// Make sure the branch working tree exists, cloning it if necessary.
    /// Concurrent callers race for the write lock; exactly one clone runs.
    pub async fn ensure_cached(&self, branch: &Branch, exec: &dyn GitExecutor) -> Result<()> {
        if self.is_cached(branch, exec).await? {
            return Ok(());
        }

        let _guard = self.branches.write().await;
        // Another caller may have cloned while we waited for the lock.
        if branch.cached.load(Ordering::Acquire) || exec.contains_branch(&branch.path).await? {
            branch.cached.store(true, Ordering::Release);
            return Ok(());
        }

        exec.clone_branch(&self.git_url, &branch.name, &branch.path)
            .await?;
        branch.cached.store(true, Ordering::Release);
        debug!(hash = %self.hash, branch = %branch.name, "branch cloned into cache");
        Ok(())
    }

    /// Read a file from the branch working tree, cloning first on a cold
    /// branch.  The read itself runs under the read lock so it never observes
    /// a half-applied update.
    pub async fn read_file(
        &self,
        branch: &Branch,
        file_path: &str,
        exec: &dyn GitExecutor,
    ) -> Result<Vec<u8>> {
        self.ensure_cached(branch, exec).await?;
        let _guard = self.branches.read().await;
        exec.read_file(&branch.path, file_path).await
    }

    /// Raw `ls-tree` output for a directory of the branch working tree.
    pub async fn list_tree(
        &self,
        branch: &Branch,
        path: &str,
        exec: &dyn GitExecutor,
    ) -> Result<Vec<u8>> {
        self.ensure_cached(branch, exec).await?;
        let _guard = self.branches.read().await;
        exec.list_tree(&branch.path, path).await
    }

    /// Fetch and hard-reset the working tree.  No-op for a branch that was
    /// never cloned; this path never creates new entries.
    pub async fn update(&self, branch: &Branch, exec: &dyn GitExecutor) -> Result<()> {
        if !self.is_cached(branch, exec).await? {
            return Ok(());
        }

        let _guard = self.branches.write().await;
        exec.update_branch(&branch.path, &branch.name).await
    }

    /// Remove the branch working tree and drop the branch from the map.
    /// No-op when the branch is not cached.  The caller is responsible for
    /// attempting repository deletion afterwards, outside this lock.
    pub async fn delete_branch(&self, branch: &Branch, exec: &dyn GitExecutor) -> Result<bool> {
        if !self.is_cached(branch, exec).await? {
            return Ok(false);
        }

        let mut branches = self.branches.write().await;
        exec.delete_branch(&branch.path).await?;
        branches.remove(&branch.name);
        branch.cached.store(false, Ordering::Release);
        debug!(hash = %self.hash, branch = %branch.name, "branch evicted from cache");
        Ok(true)
    }

    /// Ask the executor to remove the repository root (only when empty),
    /// under the write lock.  Returns whether the directory is gone.
    pub(crate) async fn delete_dir_if_empty(&self, exec: &dyn GitExecutor) -> Result<bool> {
        let _guard = self.branches.write().await;
        exec.delete_repo(&self.path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_paths_nest_under_repo_root() {
        let repo = Repo::new(Path::new("/var/cache/repos"), "abc123", "https://x/y.git");
        assert_eq!(repo.path, Path::new("/var/cache/repos/abc123"));

        let branch = Branch::new(&repo.path, "main");
        assert_eq!(branch.path, Path::new("/var/cache/repos/abc123/main"));
    }

    #[test]
    fn touch_resets_expiry() {
        let branch = Branch::new(Path::new("/tmp"), "main");
        assert!(!branch.is_expired(Duration::from_secs(60)));
        assert!(branch.is_expired(Duration::ZERO));

        branch.touch();
        assert!(!branch.is_expired(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn get_or_create_branch_returns_the_same_record() {
        let repo = Repo::new(Path::new("/tmp"), "abc", "https://x/y.git");
        let a = repo.get_or_create_branch("main").await;
        let b = repo.get_or_create_branch("main").await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(repo.branch_count().await, 1);

        repo.get_or_create_branch("dev").await;
        assert_eq!(repo.branch_count().await, 2);
    }
}
