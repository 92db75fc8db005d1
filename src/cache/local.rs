//! In-process tier: bounded LRU with TTL

use moka::future::Cache;
use moka::policy::EvictionPolicy;
use std::sync::Arc;
use std::time::Duration;

use super::entry::CacheEntry;

/// Bounded LRU + TTL map from fingerprint keys to entries.
///
/// moka's own TTL is the physical layer. Entries it still holds may already be
/// logically stale; the caller applies the staleness check.
pub struct LocalTier<T> {
    entries: Cache<String, Arc<CacheEntry<T>>>,
    max_entries: u64,
    ttl: Duration,
}

impl<T> LocalTier<T>
where
    T: Send + Sync + 'static,
{
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        let ttl = ttl.max(Duration::from_millis(1));
        let entries = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .eviction_policy(EvictionPolicy::lru())
            .build();

        Self {
            entries,
            max_entries,
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn max_entries(&self) -> u64 {
        self.max_entries
    }

    pub async fn get(&self, key: &str) -> Option<Arc<CacheEntry<T>>> {
        self.entries.get(key).await
    }

    /// Insert or replace; replacing resets the entry's timestamp and hits
    pub async fn insert(&self, key: String, entry: CacheEntry<T>) {
        self.entries.insert(key, Arc::new(entry)).await;
    }

    pub async fn remove(&self, key: &str) {
        self.entries.invalidate(key).await;
    }

    /// Whether the structure still holds `key`, regardless of logical staleness
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Exact entry count after applying pending evictions
    pub async fn len(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every entry; returns how many were held
    pub async fn clear(&self) -> u64 {
        let held = self.len().await;
        self.entries.invalidate_all();
        self.entries.run_pending_tasks().await;
        held
    }
}
