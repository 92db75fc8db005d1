//! Embedding and search providers consumed by the orchestrator

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::models::ContextChunk;
use crate::error::{AppError, ErrorKind};

/// Upstream provider failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("Invalid retrieval request: {0}")]
    InvalidRequest(String),

    #[error("Embedding provider failed: {0}")]
    Embedding(String),

    #[error("Search provider failed: {0}")]
    Search(String),

    #[error("{operation} timed out after {timeout_ms} ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("Provider rate limited, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },
}

impl From<ProviderError> for AppError {
    fn from(err: ProviderError) -> Self {
        match &err {
            ProviderError::InvalidRequest(_) => AppError::validation(err.to_string()),
            ProviderError::Embedding(_) => AppError::new(ErrorKind::EmbeddingFailed, err.to_string()),
            ProviderError::Search(_) => AppError::new(ErrorKind::SearchFailed, err.to_string()),
            ProviderError::Timeout { .. } => AppError::new(ErrorKind::Timeout, err.to_string()),
            ProviderError::RateLimited { retry_after } => {
                AppError::rate_limited(err.to_string(), *retry_after)
            }
        }
    }
}

/// One retrieval request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub user_id: String,
    pub query: String,
    pub top_k: usize,
    /// Restrict the search to these documents; empty searches everything the user owns
    #[serde(default)]
    pub document_ids: Vec<String>,
}

impl SearchRequest {
    pub fn new(user_id: impl Into<String>, query: impl Into<String>, top_k: usize) -> Self {
        Self {
            user_id: user_id.into(),
            query: query.into(),
            top_k,
            document_ids: Vec::new(),
        }
    }

    pub fn with_documents(mut self, document_ids: Vec<String>) -> Self {
        self.document_ids = document_ids;
        self
    }

    pub fn validate(&self) -> Result<(), ProviderError> {
        if self.user_id.trim().is_empty() {
            return Err(ProviderError::InvalidRequest("user id is empty".to_string()));
        }
        if self.query.trim().is_empty() {
            return Err(ProviderError::InvalidRequest("query is empty".to_string()));
        }
        if self.top_k == 0 {
            return Err(ProviderError::InvalidRequest(
                "top_k must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Turns text into a vector
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;
}

/// Finds the passages closest to an embedded query
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(
        &self,
        request: &SearchRequest,
        embedding: &[f32],
    ) -> Result<Vec<ContextChunk>, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        let cases = [
            (ProviderError::InvalidRequest("x".into()), ErrorKind::ValidationError),
            (ProviderError::Embedding("x".into()), ErrorKind::EmbeddingFailed),
            (ProviderError::Search("x".into()), ErrorKind::SearchFailed),
            (
                ProviderError::Timeout {
                    operation: "search",
                    timeout_ms: 10,
                },
                ErrorKind::Timeout,
            ),
        ];

        for (err, kind) in cases {
            let app: AppError = err.into();
            assert_eq!(app.kind, kind);
            assert_eq!(app.retry_after, None);
        }
    }

    #[test]
    fn test_rate_limit_carries_delay() {
        let app: AppError = ProviderError::RateLimited { retry_after: 30 }.into();
        assert_eq!(app.kind, ErrorKind::RateLimited);
        assert_eq!(app.retry_after, Some(30));
    }

    #[test]
    fn test_request_validation() {
        assert!(SearchRequest::new("u", "what is rag", 5).validate().is_ok());
        assert!(SearchRequest::new("u", "   ", 5).validate().is_err());
        assert!(SearchRequest::new("", "q", 5).validate().is_err());
        assert!(SearchRequest::new("u", "q", 0).validate().is_err());
    }
}
