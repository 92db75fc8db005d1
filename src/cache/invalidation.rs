//! Coarse invalidation on user deletion and document updates
//!
//! Local entries carry no owner, so both scopes clear whole local caches.
//! The shared tier is narrowed by key pattern where the key naming allows it.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::entry::CacheKind;
use super::fingerprint::{namespace_pattern, user_pattern};
use super::shared::SharedTier;
use super::tiered::TwoTierCache;
use crate::config::InvalidationConfig;
use crate::context::models::ContextChunk;
use crate::metrics::METRICS;

/// External event that triggers invalidation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidationScope {
    User,
    Document,
}

impl InvalidationScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvalidationScope::User => "user",
            InvalidationScope::Document => "document",
        }
    }
}

/// Entries removed by one invalidation. Informational only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationReport {
    /// Exact count of local entries cleared
    pub local: u64,
    /// Shared-tier keys deleted; approximate
    pub shared: u64,
    pub total: u64,
}

impl InvalidationReport {
    fn new(local: u64, shared: u64) -> Self {
        Self {
            local,
            shared,
            total: local + shared,
        }
    }
}

pub struct CacheInvalidator {
    config: InvalidationConfig,
    embeddings: Arc<TwoTierCache<Vec<f32>>>,
    queries: Arc<TwoTierCache<Vec<ContextChunk>>>,
    shared: Option<Arc<SharedTier>>,
}

impl CacheInvalidator {
    pub fn new(
        config: InvalidationConfig,
        embeddings: Arc<TwoTierCache<Vec<f32>>>,
        queries: Arc<TwoTierCache<Vec<ContextChunk>>>,
        shared: Option<Arc<SharedTier>>,
    ) -> Self {
        Self {
            config,
            embeddings,
            queries,
            shared,
        }
    }

    pub async fn invalidate(&self, scope: InvalidationScope, id: &str) -> InvalidationReport {
        match scope {
            InvalidationScope::User => self.invalidate_user(id).await,
            InvalidationScope::Document => self.invalidate_document(id).await,
        }
    }

    /// Clear both local caches and every shared key embedding `user_id`
    pub async fn invalidate_user(&self, user_id: &str) -> InvalidationReport {
        if !self.config.on_user_delete {
            info!(user_id, "User invalidation disabled; nothing cleared");
            return InvalidationReport::default();
        }

        let local = self.embeddings.clear().await + self.queries.clear().await;
        let shared = match &self.shared {
            Some(shared) => shared.delete_matching(&user_pattern(user_id)).await,
            None => 0,
        };

        let report = InvalidationReport::new(local, shared);
        METRICS.record_invalidation(InvalidationScope::User.as_str(), report.total as usize);
        info!(
            user_id,
            local = report.local,
            shared = report.shared,
            "Invalidated caches for user"
        );
        report
    }

    /// Clear the local query cache and every shared query key.
    ///
    /// Results are not indexed by the documents they cite, so one document
    /// update invalidates all query results.
    pub async fn invalidate_document(&self, document_id: &str) -> InvalidationReport {
        if !self.config.on_document_update {
            info!(document_id, "Document invalidation disabled; nothing cleared");
            return InvalidationReport::default();
        }

        let local = self.queries.clear().await;
        let shared = match &self.shared {
            Some(shared) => {
                shared
                    .delete_matching(&namespace_pattern(CacheKind::Query))
                    .await
            }
            None => 0,
        };

        let report = InvalidationReport::new(local, shared);
        METRICS.record_invalidation(InvalidationScope::Document.as_str(), report.total as usize);
        info!(
            document_id,
            local = report.local,
            shared = report.shared,
            "Invalidated query cache for document update"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::ManualClock;
    use crate::cache::shared::{SharedCacheBackend, SharedCacheConnector, SharedCacheError};
    use crate::cache::tiered::Tiering;
    use crate::config::CacheKindConfig;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingBackend {
        patterns: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SharedCacheBackend for RecordingBackend {
        async fn get(&self, _key: &str) -> Result<Option<String>, SharedCacheError> {
            Ok(None)
        }

        async fn set_with_expiry(&self, _: &str, _: &str, _: u64) -> Result<(), SharedCacheError> {
            Ok(())
        }

        async fn delete_matching(&self, pattern: &str) -> Result<u64, SharedCacheError> {
            self.patterns.lock().unwrap().push(pattern.to_string());
            Ok(3)
        }
    }

    struct FixedConnector(Arc<RecordingBackend>);

    #[async_trait]
    impl SharedCacheConnector for FixedConnector {
        async fn connect(&self) -> Result<Arc<dyn SharedCacheBackend>, SharedCacheError> {
            Ok(self.0.clone())
        }
    }

    fn cache<T>(kind: CacheKind) -> Arc<TwoTierCache<T>>
    where
        T: Clone + Serialize + serde::de::DeserializeOwned + Send + Sync + 'static,
    {
        Arc::new(TwoTierCache::new(
            kind,
            CacheKindConfig {
                enabled: true,
                ttl_ms: 60_000,
                max_entries: 10,
            },
            Tiering::LocalOnly,
            Arc::new(ManualClock::new(0)),
        ))
    }

    async fn seeded(
        config: InvalidationConfig,
        shared: Option<Arc<SharedTier>>,
    ) -> (
        CacheInvalidator,
        Arc<TwoTierCache<Vec<f32>>>,
        Arc<TwoTierCache<Vec<ContextChunk>>>,
    ) {
        let embeddings = cache(CacheKind::Embedding);
        let queries = cache(CacheKind::Query);
        embeddings.set("embedding:a", vec![1.0]).await;
        embeddings.set("embedding:b", vec![2.0]).await;
        queries.set("query:u1:x", vec![ContextChunk::new("c")]).await;

        let invalidator =
            CacheInvalidator::new(config, embeddings.clone(), queries.clone(), shared);
        (invalidator, embeddings, queries)
    }

    #[tokio::test]
    async fn test_user_invalidation_clears_both_kinds() {
        let (invalidator, embeddings, queries) =
            seeded(InvalidationConfig::default(), None).await;

        let report = invalidator.invalidate_user("u1").await;

        assert_eq!(report, InvalidationReport::new(3, 0));
        assert_eq!(embeddings.size().await, 0);
        assert_eq!(queries.size().await, 0);
    }

    #[tokio::test]
    async fn test_document_invalidation_keeps_embeddings() {
        let (invalidator, embeddings, queries) =
            seeded(InvalidationConfig::default(), None).await;

        let report = invalidator.invalidate_document("doc-9").await;

        assert_eq!(report.local, 1);
        assert_eq!(embeddings.size().await, 2);
        assert_eq!(queries.size().await, 0);
    }

    #[tokio::test]
    async fn test_disabled_flags_are_no_ops() {
        let config = InvalidationConfig {
            on_user_delete: false,
            on_document_update: false,
        };
        let (invalidator, embeddings, queries) = seeded(config, None).await;

        assert_eq!(invalidator.invalidate_user("u1").await.total, 0);
        assert_eq!(invalidator.invalidate_document("d1").await.total, 0);
        assert_eq!(embeddings.size().await, 2);
        assert_eq!(queries.size().await, 1);
    }

    #[tokio::test]
    async fn test_shared_patterns() {
        let backend = Arc::new(RecordingBackend::default());
        let shared = Arc::new(SharedTier::new(Arc::new(FixedConnector(backend.clone()))));
        let (invalidator, _, _) = seeded(InvalidationConfig::default(), Some(shared)).await;

        let user = invalidator
            .invalidate(InvalidationScope::User, "user*1")
            .await;
        let document = invalidator
            .invalidate(InvalidationScope::Document, "doc-1")
            .await;

        assert_eq!(user.shared, 3);
        assert_eq!(user.total, user.local + 3);
        assert_eq!(document.shared, 3);
        assert_eq!(
            *backend.patterns.lock().unwrap(),
            vec!["*:user\\*1:*".to_string(), "query:*".to_string()]
        );
    }
}
