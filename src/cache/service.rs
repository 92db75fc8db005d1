//! Process-wide cache service: both cache kinds, the shared tier and invalidation

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::info;

use super::entry::{CacheKind, Clock, SystemClock};
use super::invalidation::{CacheInvalidator, InvalidationReport, InvalidationScope};
use super::shared::{SharedCacheConnector, SharedTier, UpstashConnector};
use super::tiered::{KindSnapshot, Tiering, TwoTierCache};
use crate::config::AppConfig;
use crate::context::models::ContextChunk;

/// Statistics reported by the stats and invalidation endpoints
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSnapshot {
    pub embedding: KindSnapshot,
    pub query: KindSnapshot,
    pub shared_tier_configured: bool,
    pub shared_tier_connected: bool,
}

impl CacheSnapshot {
    /// Preformatted plain-text report
    pub fn render_text(&self) -> String {
        let mut out = String::from("Cache statistics\n================\n");

        for (label, kind) in [("Embedding cache", &self.embedding), ("Query cache", &self.query)] {
            let state = if kind.enabled { "enabled" } else { "disabled" };
            let _ = writeln!(out, "{label} ({state})");
            let _ = writeln!(out, "  size:     {} / {}", kind.size, kind.max_entries);
            let _ = writeln!(out, "  ttl:      {} ms", kind.ttl_ms);
            let _ = writeln!(out, "  hits:     {}", kind.hits);
            let _ = writeln!(out, "  misses:   {}", kind.misses);
            let _ = writeln!(out, "  hit rate: {:.2}%", kind.hit_rate_percent);
        }

        let shared = match (self.shared_tier_configured, self.shared_tier_connected) {
            (false, _) => "not configured",
            (true, true) => "connected",
            (true, false) => "disconnected",
        };
        let _ = writeln!(out, "Shared tier: {shared}");
        out
    }
}

/// Built once at startup and handed to request handlers
pub struct CacheService {
    embeddings: Arc<TwoTierCache<Vec<f32>>>,
    queries: Arc<TwoTierCache<Vec<ContextChunk>>>,
    shared: Option<Arc<SharedTier>>,
    invalidator: CacheInvalidator,
}

impl CacheService {
    /// Build from configuration; the shared tier exists only when its URL and token are set
    pub fn from_config(config: &AppConfig) -> Self {
        let connector: Option<Arc<dyn SharedCacheConnector>> =
            match (&config.shared_cache.url, &config.shared_cache.token) {
                (Some(url), Some(token)) if config.shared_cache.is_configured() => {
                    info!("Shared cache tier configured");
                    let token = SecretString::new(token.expose_secret().to_string());
                    Some(Arc::new(UpstashConnector::new(url.clone(), token)))
                }
                _ => {
                    info!("Shared cache tier not configured; using local tier only");
                    None
                }
            };

        Self::with_connector(config, connector, Arc::new(SystemClock))
    }

    pub fn with_connector(
        config: &AppConfig,
        connector: Option<Arc<dyn SharedCacheConnector>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let shared = connector.map(|c| Arc::new(SharedTier::new(c)));
        let local_first = config.performance.local_first;

        let embeddings = Arc::new(TwoTierCache::new(
            CacheKind::Embedding,
            config.embedding_cache.clone(),
            Tiering::new(shared.clone(), local_first),
            Arc::clone(&clock),
        ));
        let queries = Arc::new(TwoTierCache::new(
            CacheKind::Query,
            config.query_cache.clone(),
            Tiering::new(shared.clone(), local_first),
            clock,
        ));

        let invalidator = CacheInvalidator::new(
            config.invalidation.clone(),
            Arc::clone(&embeddings),
            Arc::clone(&queries),
            shared.clone(),
        );

        Self {
            embeddings,
            queries,
            shared,
            invalidator,
        }
    }

    pub fn embeddings(&self) -> &Arc<TwoTierCache<Vec<f32>>> {
        &self.embeddings
    }

    pub fn queries(&self) -> &Arc<TwoTierCache<Vec<ContextChunk>>> {
        &self.queries
    }

    pub fn invalidator(&self) -> &CacheInvalidator {
        &self.invalidator
    }

    /// Try to open the shared tier ahead of the first request
    pub async fn warm_up(&self) -> bool {
        match &self.shared {
            Some(shared) => shared.ensure_connected().await,
            None => false,
        }
    }

    pub async fn invalidate(&self, scope: InvalidationScope, id: &str) -> InvalidationReport {
        self.invalidator.invalidate(scope, id).await
    }

    pub async fn snapshot(&self) -> CacheSnapshot {
        let shared_tier_connected = match &self.shared {
            Some(shared) => shared.is_connected().await,
            None => false,
        };

        let (embedding, query) =
            futures::join!(self.embeddings.snapshot(), self.queries.snapshot());

        CacheSnapshot {
            embedding,
            query,
            shared_tier_configured: self.shared.is_some(),
            shared_tier_connected,
        }
    }
}
