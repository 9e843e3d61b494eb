//! Production [`GitExecutor`] that shells out to the system `git` binary via
//! [`tokio::process::Command`].
//!
//! Every spawned process is raced against the lifecycle cancellation token;
//! `kill_on_drop` ensures an in-flight child is terminated when the race is
//! lost.  Working trees live at `<storage-root>/<hash>/<branch>` and are
//! shallow, single-branch clones.

use std::path::Path;
use std::process::{Output, Stdio};

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{CacheError, Result};

use super::{CachedBranch, GitExecutor};

pub struct ShellGit {
    cancel: CancellationToken,
}

impl ShellGit {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// Spawn `git <args>` and wait for it, racing against cancellation.
    async fn run_git(&self, cwd: Option<&Path>, args: &[&str]) -> Result<Output> {
        let mut cmd = Command::new("git");
        if let Some(dir) = cwd {
            cmd.arg("-C").arg(dir);
        }
        cmd.args(args);
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        debug!(?args, "spawning git");

        tokio::select! {
            output = cmd.output() => Ok(output?),
            () = self.cancel.cancelled() => Err(CacheError::Cancelled),
        }
    }
}

/// Combined stdout + stderr of a finished process, for error reporting.
fn combined_output(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(stderr.trim());
    }
    text
}

#[async_trait::async_trait]
impl GitExecutor for ShellGit {
    async fn clone_branch(&self, git_url: &str, branch: &str, dest: &Path) -> Result<()> {
        let dest_str = dest.to_string_lossy();
        let output = self
            .run_git(
                None,
                &["clone", "--depth=1", "--branch", branch, git_url, &dest_str],
            )
            .await?;
        if !output.status.success() {
            return Err(CacheError::CloneFailed {
                output: combined_output(&output),
            });
        }
        debug!(%branch, dest = %dest.display(), "branch cloned");
        Ok(())
    }

    async fn update_branch(&self, dir: &Path, branch: &str) -> Result<()> {
        let output = self
            .run_git(Some(dir), &["fetch", "origin", branch, "--depth=1"])
            .await?;
        if !output.status.success() {
            return Err(CacheError::UpdateFailed {
                output: combined_output(&output),
            });
        }

        let target = format!("origin/{branch}");
        let output = self
            .run_git(Some(dir), &["reset", "--hard", &target])
            .await?;
        if !output.status.success() {
            return Err(CacheError::UpdateFailed {
                output: combined_output(&output),
            });
        }
        Ok(())
    }

    async fn delete_branch(&self, dir: &Path) -> Result<()> {
        match tokio::fs::remove_dir_all(dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::DeleteFailed(e)),
        }
    }

    async fn delete_repo(&self, dir: &Path) -> Result<bool> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(CacheError::DeleteFailed(e)),
        };

        if entries.next_entry().await.map_err(CacheError::DeleteFailed)?.is_some() {
            return Ok(false);
        }

        tokio::fs::remove_dir_all(dir)
            .await
            .map_err(CacheError::DeleteFailed)?;
        Ok(true)
    }

    async fn contains_branch(&self, dir: &Path) -> Result<bool> {
        if !stat_is_dir(dir).await? {
            return Ok(false);
        }
        stat_is_dir(&dir.join(".git")).await
    }

    async fn read_file(&self, dir: &Path, file_path: &str) -> Result<Vec<u8>> {
        let full = dir.join(file_path.trim_start_matches('/'));
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(CacheError::FileNotFound),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_tree(&self, dir: &Path, path: &str) -> Result<Vec<u8>> {
        let rel = path.trim_start_matches('/');
        let full = dir.join(rel);
        match tokio::fs::metadata(&full).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(CacheError::FileNotFound),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CacheError::FileNotFound)
            }
            Err(e) => return Err(e.into()),
        }

        let spec = format!("HEAD:{rel}");
        let output = self.run_git(Some(dir), &["ls-tree", "-l", &spec]).await?;
        if !output.status.success() {
            return Err(CacheError::ListTreeFailed {
                output: combined_output(&output),
            });
        }
        Ok(output.stdout)
    }

    async fn scan_cached_branches(&self, root: &Path) -> Result<Vec<CachedBranch>> {
        let mut list = Vec::new();

        let mut repos = tokio::fs::read_dir(root).await?;
        while let Some(repo_entry) = repos.next_entry().await? {
            if !repo_entry.file_type().await?.is_dir() {
                continue;
            }
            let hash = repo_entry.file_name().to_string_lossy().into_owned();
            let repo_path = repo_entry.path();

            let mut branches = tokio::fs::read_dir(&repo_path).await?;
            while let Some(branch_entry) = branches.next_entry().await? {
                if !branch_entry.file_type().await?.is_dir() {
                    continue;
                }
                let branch = branch_entry.file_name().to_string_lossy().into_owned();
                let branch_path = branch_entry.path();

                match self.remote_url(&branch_path).await {
                    Ok(git_url) => list.push(CachedBranch {
                        hash: hash.clone(),
                        branch,
                        git_url,
                    }),
                    Err(CacheError::Cancelled) => return Err(CacheError::Cancelled),
                    Err(e) => {
                        // A broken tree should not block rediscovery of its
                        // siblings.
                        warn!(
                            path = %branch_path.display(),
                            error = %e,
                            "skipping on-disk branch without a resolvable origin"
                        );
                    }
                }
            }
        }

        Ok(list)
    }
}

impl ShellGit {
    /// `git remote get-url origin` inside a working tree.
    async fn remote_url(&self, dir: &Path) -> Result<String> {
        let output = self
            .run_git(Some(dir), &["remote", "get-url", "origin"])
            .await?;
        if !output.status.success() {
            return Err(CacheError::CommandFailed {
                output: combined_output(&output),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// `Ok(true)` when the path is a directory, `Ok(false)` when it does not
/// exist or is not a directory; any other stat failure is a probe error.
async fn stat_is_dir(path: &Path) -> Result<bool> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta.is_dir()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(CacheError::PresenceProbeFailed(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> ShellGit {
        ShellGit::new(CancellationToken::new())
    }

    #[tokio::test]
    async fn contains_branch_requires_git_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let branch_dir = tmp.path().join("main");

        let git = executor();
        assert!(!git.contains_branch(&branch_dir).await.unwrap());

        std::fs::create_dir_all(&branch_dir).unwrap();
        assert!(!git.contains_branch(&branch_dir).await.unwrap());

        std::fs::create_dir(branch_dir.join(".git")).unwrap();
        assert!(git.contains_branch(&branch_dir).await.unwrap());
    }

    #[tokio::test]
    async fn contains_branch_rejects_plain_files() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("main");
        std::fs::write(&file, b"not a dir").unwrap();

        assert!(!executor().contains_branch(&file).await.unwrap());
    }

    #[tokio::test]
    async fn read_file_maps_missing_paths() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("file.txt"), b"hello").unwrap();

        let git = executor();
        let bytes = git.read_file(tmp.path(), "/file.txt").await.unwrap();
        assert_eq!(bytes, b"hello");

        let err = git.read_file(tmp.path(), "/missing.txt").await.unwrap_err();
        assert!(matches!(err, CacheError::FileNotFound));
    }

    #[tokio::test]
    async fn list_tree_rejects_files_and_missing_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("file.txt"), b"x").unwrap();

        let git = executor();
        let err = git.list_tree(tmp.path(), "file.txt").await.unwrap_err();
        assert!(matches!(err, CacheError::FileNotFound));

        let err = git.list_tree(tmp.path(), "nope").await.unwrap_err();
        assert!(matches!(err, CacheError::FileNotFound));
    }

    #[tokio::test]
    async fn delete_repo_only_removes_empty_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = tmp.path().join("abc123");
        std::fs::create_dir(&repo).unwrap();
        std::fs::create_dir(repo.join("main")).unwrap();

        let git = executor();
        assert!(!git.delete_repo(&repo).await.unwrap());
        assert!(repo.exists());

        std::fs::remove_dir(repo.join("main")).unwrap();
        assert!(git.delete_repo(&repo).await.unwrap());
        assert!(!repo.exists());

        // Already gone counts as removed.
        assert!(git.delete_repo(&repo).await.unwrap());
    }

    #[tokio::test]
    async fn delete_branch_tolerates_missing_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let branch = tmp.path().join("gone");

        executor().delete_branch(&branch).await.unwrap();

        std::fs::create_dir_all(branch.join(".git")).unwrap();
        executor().delete_branch(&branch).await.unwrap();
        assert!(!branch.exists());
    }

    #[tokio::test]
    async fn remote_url_failures_surface_the_git_output() {
        let tmp = tempfile::tempdir().unwrap();

        // Not a repository, so `git remote get-url origin` exits non-zero.
        let err = executor().remote_url(tmp.path()).await.unwrap_err();
        assert!(matches!(err, CacheError::CommandFailed { .. }));
    }

    #[tokio::test]
    async fn cancelled_token_aborts_git_invocations() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let git = ShellGit::new(cancel);

        let tmp = tempfile::tempdir().unwrap();
        let err = git
            .clone_branch("https://example.invalid/repo.git", "main", &tmp.path().join("main"))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Cancelled));
    }
}
