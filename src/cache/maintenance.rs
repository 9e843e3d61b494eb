//! Background maintenance loop.
//!
//! Each tick walks the on-disk storage root to reconcile it with the
//! in-memory index (so working trees left by a previous process lifetime are
//! re-adopted), evicts branches idle past the configured TTL, and refreshes
//! the rest.  A failing branch is logged and skipped; a failing tick is
//! retried after a short back-off.  Cancellation of the lifecycle context is
//! the only clean exit and is observed both before each tick and inside the
//! inter-tick sleep.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};

use crate::error::{CacheError, Result};
use crate::git::CachedBranch;

use super::GitCache;

/// Sleep between retries after a failed tick.
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

pub(crate) async fn run(cache: Arc<GitCache>) {
    info!(
        interval = ?cache.config().repo_check_interval(),
        ttl = ?cache.config().repo_ttl(),
        "maintenance loop started"
    );

    loop {
        if cache.cancellation().is_cancelled() {
            return;
        }

        if let Err(e) = tick(&cache).await {
            if matches!(e, CacheError::Cancelled) {
                return;
            }
            error!(error = %e, "maintenance tick failed");
            tokio::select! {
                () = cache.cancellation().cancelled() => return,
                () = tokio::time::sleep(RETRY_BACKOFF) => {}
            }
            continue;
        }

        tokio::select! {
            () = cache.cancellation().cancelled() => return,
            () = tokio::time::sleep(cache.config().repo_check_interval()) => {}
        }
    }
}

/// One maintenance pass: rediscover disk state, evict or refresh each branch.
#[instrument(skip(cache))]
async fn tick(cache: &GitCache) -> Result<()> {
    let branches = cache
        .executor()
        .scan_cached_branches(&cache.config().storage_folder)
        .await?;
    debug!(branch_count = branches.len(), "maintenance tick: scanning cached branches");

    for found in &branches {
        if let Err(e) = process_branch(cache, found).await {
            if matches!(e, CacheError::Cancelled) {
                return Err(e);
            }
            warn!(
                hash = %found.hash,
                branch = %found.branch,
                error = %e,
                "failed to process cached branch"
            );
        }
    }

    cache.sweep_branchless_repos().await;

    Ok(())
}

/// Materialize the in-memory records for one on-disk branch, then either
/// evict it (expired and eviction enabled) or refresh it.
async fn process_branch(cache: &GitCache, found: &CachedBranch) -> Result<()> {
    let repo = cache.get_or_create_repo(&found.hash, &found.git_url).await;
    let branch = repo.get_or_create_branch(&found.branch).await;

    let ttl = cache.config().repo_ttl();
    if !ttl.is_zero() && branch.is_expired(ttl) {
        debug!(hash = %found.hash, branch = %found.branch, "evicting expired branch");
        return cache.delete_branch(&repo, &branch).await;
    }

    repo.update(&branch, cache.executor()).await
}
