//! Two-tier cache for embeddings and query results
//!
//! A bounded in-process tier (LRU + TTL) in front of an optional shared tier.
//! Shared-tier failures never reach callers; they turn into misses.

pub mod entry;
pub mod fingerprint;
pub mod invalidation;
pub mod local;
pub mod service;
pub mod shared;
pub mod stats;
pub mod tiered;

pub use entry::{CacheEntry, CacheKind, Clock, ManualClock, SystemClock};
pub use invalidation::{CacheInvalidator, InvalidationReport, InvalidationScope};
pub use service::{CacheService, CacheSnapshot};
pub use shared::{SharedCacheBackend, SharedCacheConnector, SharedCacheError, SharedTier, UpstashConnector};
pub use stats::{CacheStats, StatsSnapshot};
pub use tiered::{KindSnapshot, Lookup, Tier, Tiering, TwoTierCache};
