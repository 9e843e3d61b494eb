//! Bounded token-access cache.
//!
//! Caches the fact that a given token was recently accepted by the upstream
//! provider for a given repository identity, so credentials are not
//! revalidated on every request.  Entries carry a TTL that is extended on
//! every hit; the container is bounded and evicts the least-recently-used
//! entry when full.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use tokio::sync::Mutex;
use tracing::trace;

/// Upper bound on tracked (token, identity) pairs.
const CAPACITY: usize = 10_000;

/// Joins token and identity in the cache key.  Identities are hex strings,
/// so the separator can never occur inside one.
const KEY_SEPARATOR: char = '|';

pub struct TokenCache {
    entries: Mutex<LruCache<String, Instant>>,
    ttl: Duration,
}

impl TokenCache {
    pub fn new(ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(CAPACITY).expect("capacity is non-zero");
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Record that `token` is valid for `hash` until now + TTL.
    pub async fn set(&self, token: &str, hash: &str) {
        let key = build_key(token, hash);
        let mut entries = self.entries.lock().await;
        entries.put(key, Instant::now() + self.ttl);
        trace!(hash, "token access cached");
    }

    /// True when an unexpired entry exists; a hit extends the entry's expiry
    /// by the full TTL.
    pub async fn has(&self, token: &str, hash: &str) -> bool {
        let key = build_key(token, hash);
        let mut entries = self.entries.lock().await;
        match entries.get(&key) {
            Some(expiry) if *expiry > Instant::now() => {
                entries.put(key, Instant::now() + self.ttl);
                true
            }
            Some(_) => {
                entries.pop(&key);
                false
            }
            None => false,
        }
    }

    pub async fn remove(&self, token: &str, hash: &str) {
        let key = build_key(token, hash);
        self.entries.lock().await.pop(&key);
    }
}

fn build_key(token: &str, hash: &str) -> String {
    format!("{token}{KEY_SEPARATOR}{hash}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_has_then_remove() {
        let cache = TokenCache::new(Duration::from_secs(60));

        assert!(!cache.has("tok", "abc123").await);

        cache.set("tok", "abc123").await;
        assert!(cache.has("tok", "abc123").await);
        assert!(!cache.has("tok", "other").await);
        assert!(!cache.has("other", "abc123").await);

        cache.remove("tok", "abc123").await;
        assert!(!cache.has("tok", "abc123").await);
    }

    #[tokio::test]
    async fn expired_entries_miss() {
        let cache = TokenCache::new(Duration::from_millis(30));
        cache.set("tok", "abc123").await;
        assert!(cache.has("tok", "abc123").await);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!cache.has("tok", "abc123").await);
    }

    #[tokio::test]
    async fn hit_extends_the_ttl() {
        let cache = TokenCache::new(Duration::from_millis(80));
        cache.set("tok", "abc123").await;

        // Keep hitting past the original expiry; each hit pushes it out.
        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            assert!(cache.has("tok", "abc123").await);
        }
    }

    #[tokio::test]
    async fn overflow_evicts_the_oldest_entry() {
        let cache = TokenCache::new(Duration::from_secs(60));
        cache.set("tok", "first").await;
        for i in 0..CAPACITY {
            cache.set("tok", &format!("{i:x}")).await;
        }
        // "first" was the least recently used entry and fell out.
        assert!(!cache.has("tok", "first").await);
        assert!(cache.has("tok", &format!("{:x}", CAPACITY - 1)).await);
    }
}
