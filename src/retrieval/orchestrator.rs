//! Serves one query: cached embedding, cached search, then a bounded prompt

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::provider::{EmbeddingProvider, ProviderError, SearchProvider, SearchRequest};
use crate::cache::fingerprint::{embedding_key, query_key};
use crate::cache::CacheService;
use crate::config::RetrievalConfig;
use crate::context::models::{ChatMessage, ContextChunk, TokenBreakdown, TruncationSummary};
use crate::context::token_budget::ContextBudgetManager;

/// Prompt material ready to send to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparedContext {
    pub messages: Vec<ChatMessage>,
    pub chunks: Vec<ContextChunk>,
    pub breakdown: TokenBreakdown,
    pub truncation: TruncationSummary,
}

pub struct RetrievalOrchestrator {
    cache: Arc<CacheService>,
    budget: Arc<ContextBudgetManager>,
    embedder: Arc<dyn EmbeddingProvider>,
    searcher: Arc<dyn SearchProvider>,
    timeout: Duration,
    default_top_k: usize,
}

impl RetrievalOrchestrator {
    pub fn new(
        cache: Arc<CacheService>,
        budget: Arc<ContextBudgetManager>,
        embedder: Arc<dyn EmbeddingProvider>,
        searcher: Arc<dyn SearchProvider>,
        timeout: Duration,
    ) -> Self {
        Self {
            cache,
            budget,
            embedder,
            searcher,
            timeout,
            default_top_k: RetrievalConfig::default().top_k,
        }
    }

    pub fn from_config(
        config: &RetrievalConfig,
        cache: Arc<CacheService>,
        budget: Arc<ContextBudgetManager>,
        embedder: Arc<dyn EmbeddingProvider>,
        searcher: Arc<dyn SearchProvider>,
    ) -> Self {
        Self {
            default_top_k: config.top_k,
            ..Self::new(cache, budget, embedder, searcher, config.provider_timeout())
        }
    }

    /// Request over all of the user's documents with the configured `top_k`
    pub fn request(&self, user_id: impl Into<String>, query: impl Into<String>) -> SearchRequest {
        SearchRequest::new(user_id, query, self.default_top_k)
    }

    /// Retrieved chunks for `request`, memoized per user, query and document set
    pub async fn retrieve(&self, request: &SearchRequest) -> Result<Vec<ContextChunk>, ProviderError> {
        request.validate()?;

        let key = query_key(
            &request.user_id,
            &request.query,
            request.top_k,
            &request.document_ids,
        );

        self.cache
            .queries()
            .get_or_compute(&key, move || async move {
                let embedding = self.embed(request.query.trim()).await?;
                let mut chunks = self
                    .bounded("search", self.searcher.search(request, &embedding))
                    .await?;
                chunks.truncate(request.top_k);
                debug!(user_id = %request.user_id, chunks = chunks.len(), "Search completed");
                Ok(chunks)
            })
            .await
    }

    /// Retrieve, then fit `history` next to the chunks
    pub async fn prepare(
        &self,
        request: &SearchRequest,
        history: &[ChatMessage],
    ) -> Result<PreparedContext, ProviderError> {
        let chunks = self.retrieve(request).await?;
        let (messages, truncation) = self.budget.optimize_with_summary(history, &chunks);
        let breakdown = self.budget.breakdown(&messages, &chunks);

        Ok(PreparedContext {
            messages,
            chunks,
            breakdown,
            truncation,
        })
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.cache
            .embeddings()
            .get_or_compute(&embedding_key(text), move || {
                self.bounded("embedding", self.embedder.embed(text))
            })
            .await
    }

    async fn bounded<T, F>(&self, operation: &'static str, call: F) -> Result<T, ProviderError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout {
                operation,
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }
}
