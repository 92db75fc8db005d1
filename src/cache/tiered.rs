//! Two-tier cache: local LRU+TTL in front of an optional shared tier

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use super::entry::{CacheEntry, CacheKind, Clock};
use super::local::LocalTier;
use super::shared::SharedTier;
use super::stats::{CacheStats, StatsSnapshot};
use crate::config::CacheKindConfig;
use crate::metrics::METRICS;

/// Tier layout, chosen once at construction
pub enum Tiering {
    LocalOnly,
    Layered {
        shared: Arc<SharedTier>,
        /// Fall back to shared reads on a local miss; writes reach the shared tier either way
        local_first: bool,
    },
}

impl Tiering {
    pub fn new(shared: Option<Arc<SharedTier>>, local_first: bool) -> Self {
        match shared {
            Some(shared) => Tiering::Layered {
                shared,
                local_first,
            },
            None => Tiering::LocalOnly,
        }
    }
}

/// Tier that answered a hit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Local,
    Shared,
}

/// Result of a cache read
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Hit { data: T, tier: Tier },
    Miss,
}

impl<T> Lookup<T> {
    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit { .. })
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            Lookup::Hit { data, .. } => Some(data),
            Lookup::Miss => None,
        }
    }

    pub fn into_data(self) -> Option<T> {
        match self {
            Lookup::Hit { data, .. } => Some(data),
            Lookup::Miss => None,
        }
    }
}

/// Reporting view of one cache kind
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KindSnapshot {
    pub enabled: bool,
    pub size: u64,
    pub max_entries: u64,
    pub ttl_ms: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub hit_rate_percent: f64,
}

/// Shared-tier value: the data plus the time it was first written, so a
/// backfilled local entry ages from the original write
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SharedPayload<T> {
    stored_at: i64,
    data: T,
}

/// Memoizes one kind of expensive computation behind fingerprint keys
pub struct TwoTierCache<T> {
    kind: CacheKind,
    config: CacheKindConfig,
    local: LocalTier<T>,
    tiering: Tiering,
    stats: CacheStats,
    clock: Arc<dyn Clock>,
}

impl<T> TwoTierCache<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(
        kind: CacheKind,
        config: CacheKindConfig,
        tiering: Tiering,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let local = LocalTier::new(config.max_entries, config.ttl());
        Self {
            kind,
            config,
            local,
            tiering,
            stats: CacheStats::new(),
            clock,
        }
    }

    pub fn kind(&self) -> CacheKind {
        self.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn local(&self) -> &LocalTier<T> {
        &self.local
    }

    /// Read `key`. Every read on an enabled cache counts exactly one hit or miss.
    ///
    /// The local tier always answers first; a live local entry wins over
    /// whatever the shared tier holds.
    pub async fn get(&self, key: &str) -> Lookup<T> {
        if !self.config.enabled {
            METRICS.record_cache_lookup(self.kind.as_str(), "disabled");
            return Lookup::Miss;
        }

        let found = match self.read_local(key).await {
            Some(data) => Some((data, Tier::Local)),
            None => match &self.tiering {
                Tiering::Layered {
                    shared,
                    local_first: true,
                } => self.read_shared(shared, key).await.map(|d| (d, Tier::Shared)),
                _ => None,
            },
        };

        match found {
            Some((data, tier)) => {
                self.stats.record_hit();
                let outcome = match tier {
                    Tier::Local => "local_hit",
                    Tier::Shared => "shared_hit",
                };
                METRICS.record_cache_lookup(self.kind.as_str(), outcome);
                Lookup::Hit { data, tier }
            }
            None => {
                self.stats.record_miss();
                METRICS.record_cache_lookup(self.kind.as_str(), "miss");
                Lookup::Miss
            }
        }
    }

    /// Store `value` locally and, best-effort, in the shared tier
    pub async fn set(&self, key: &str, value: T) {
        if !self.config.enabled {
            return;
        }

        let now = self.clock.now_millis();
        let shared_payload = match &self.tiering {
            Tiering::LocalOnly => None,
            Tiering::Layered { shared, .. } => {
                let payload = SharedPayload {
                    stored_at: now,
                    data: &value,
                };
                match serde_json::to_string(&payload) {
                    Ok(json) => Some((shared, json)),
                    Err(e) => {
                        warn!(kind = %self.kind, "Value not serializable for shared tier: {}", e);
                        None
                    }
                }
            }
        };

        self.local
            .insert(key.to_string(), CacheEntry::new(value, now))
            .await;
        METRICS.record_cache_write(self.kind.as_str(), "local");

        if let Some((shared, json)) = shared_payload {
            if shared.set(key, &json, self.config.shared_ttl_secs()).await {
                METRICS.record_cache_write(self.kind.as_str(), "shared");
            }
        }
    }

    /// Return the cached value or compute and store it.
    ///
    /// The store runs on its own task, so it completes even if the caller is
    /// dropped after `compute` finished. Concurrent misses on one key all
    /// compute; the last write wins.
    pub async fn get_or_compute<F, Fut, E>(self: &Arc<Self>, key: &str, compute: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Lookup::Hit { data, .. } = self.get(key).await {
            return Ok(data);
        }

        let value = compute().await?;

        let cache = Arc::clone(self);
        let key = key.to_string();
        let stored = value.clone();
        let write = tokio::spawn(async move { cache.set(&key, stored).await });
        if let Err(e) = write.await {
            warn!(kind = %self.kind, "Cache write task failed: {}", e);
        }

        Ok(value)
    }

    /// Entries physically held by the local tier
    pub async fn size(&self) -> u64 {
        self.local.len().await
    }

    /// Empty the local tier; statistics are kept
    pub async fn clear(&self) -> u64 {
        self.local.clear().await
    }

    pub async fn snapshot(&self) -> KindSnapshot {
        let StatsSnapshot {
            hits,
            misses,
            hit_rate,
        } = self.stats.snapshot();

        KindSnapshot {
            enabled: self.config.enabled,
            size: self.size().await,
            max_entries: self.config.max_entries,
            ttl_ms: self.config.ttl_ms,
            hits,
            misses,
            hit_rate,
            hit_rate_percent: hit_rate * 100.0,
        }
    }

    async fn read_local(&self, key: &str) -> Option<T> {
        let entry = self.local.get(key).await?;

        if entry.is_stale(self.clock.now_millis(), self.config.ttl()) {
            debug!(kind = %self.kind, key, "Local entry is stale");
            return None;
        }

        entry.record_hit();
        Some(entry.data.clone())
    }

    /// Shared hit, backfilled locally with its original write time. A shared
    /// value older than the local TTL is a miss, so the two tiers together
    /// never serve a value past one TTL.
    async fn read_shared(&self, shared: &SharedTier, key: &str) -> Option<T> {
        let raw = shared.get(key).await?;

        let payload = match serde_json::from_str::<SharedPayload<T>>(&raw) {
            Ok(payload) => payload,
            Err(e) => {
                METRICS.record_shared_error("decode");
                warn!(kind = %self.kind, key, "Malformed shared cache payload: {}", e);
                return None;
            }
        };

        // Another process's clock may run ahead of ours
        let now = self.clock.now_millis();
        let entry = CacheEntry::new(payload.data, payload.stored_at.min(now));
        if entry.is_stale(now, self.config.ttl()) {
            debug!(kind = %self.kind, key, "Shared entry is older than the TTL");
            return None;
        }

        let data = entry.data.clone();
        self.local.insert(key.to_string(), entry).await;
        Some(data)
    }
}
