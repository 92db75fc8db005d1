//! Token counting using tiktoken
//!
//! [`TokenEstimator`] counts raw text. [`TokenCounter`] layers the message and
//! chunk accounting on top; the budget manager and every reporting path go
//! through the same [`TokenCounter`] so the per-message overhead never diverges.

use std::sync::Arc;
use tiktoken_rs::{cl100k_base, CoreBPE};
use tracing::warn;

use super::models::{ChatMessage, ContextChunk};
use crate::error::{ContextError, Result};

/// Token estimator trait for different tokenization strategies
pub trait TokenEstimator: Send + Sync {
    /// Estimate the number of tokens in the given text
    fn estimate(&self, text: &str) -> usize;

    /// Estimate tokens for multiple texts
    fn estimate_batch(&self, texts: &[&str]) -> Vec<usize> {
        texts.iter().map(|t| self.estimate(t)).collect()
    }
}

/// Tiktoken-based token estimator using cl100k_base (GPT-4, GPT-3.5-turbo)
#[derive(Clone)]
pub struct TiktokenEstimator {
    bpe: Arc<CoreBPE>,
}

impl TiktokenEstimator {
    /// Load the cl100k_base tables
    pub fn new() -> Result<Self> {
        let bpe = cl100k_base().map_err(|e| ContextError::Encoder(e.to_string()))?;
        Ok(Self { bpe: Arc::new(bpe) })
    }
}

impl TokenEstimator for TiktokenEstimator {
    fn estimate(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        self.bpe.encode_with_special_tokens(text).len()
    }
}

/// Word-based token estimator (fallback, ~1.3 tokens per word)
#[derive(Debug, Clone, Copy)]
pub struct WordBasedEstimator {
    tokens_per_word: f64,
}

impl WordBasedEstimator {
    pub fn new(tokens_per_word: f64) -> Self {
        Self { tokens_per_word }
    }
}

impl Default for WordBasedEstimator {
    fn default() -> Self {
        Self::new(1.3)
    }
}

impl TokenEstimator for WordBasedEstimator {
    fn estimate(&self, text: &str) -> usize {
        let word_count = text.split_whitespace().count();
        (word_count as f64 * self.tokens_per_word).ceil() as usize
    }
}

/// Message- and chunk-aware counter shared by budgeting and reporting.
///
/// Cloning is cheap: clones share the estimator, and the encoder tables are
/// released when the last clone is dropped.
#[derive(Clone)]
pub struct TokenCounter {
    estimator: Arc<dyn TokenEstimator>,
    message_overhead: usize,
}

impl TokenCounter {
    pub fn new(estimator: Arc<dyn TokenEstimator>, message_overhead: usize) -> Self {
        Self {
            estimator,
            message_overhead,
        }
    }

    /// cl100k_base counter, falling back to word estimation if the tables fail to load
    pub fn tiktoken_or_fallback(message_overhead: usize) -> Self {
        let estimator: Arc<dyn TokenEstimator> = match TiktokenEstimator::new() {
            Ok(estimator) => Arc::new(estimator),
            Err(e) => {
                warn!("tiktoken initialization failed, falling back to word estimation: {}", e);
                Arc::new(WordBasedEstimator::default())
            }
        };
        Self::new(estimator, message_overhead)
    }

    pub fn message_overhead(&self) -> usize {
        self.message_overhead
    }

    /// Tokens in raw text; 0 for empty input
    pub fn count(&self, text: &str) -> usize {
        self.estimator.estimate(text)
    }

    /// Content + role marker + fixed structural overhead
    pub fn count_message(&self, message: &ChatMessage) -> usize {
        self.count(&message.content) + self.count(message.role.as_str()) + self.message_overhead
    }

    pub fn count_messages(&self, messages: &[ChatMessage]) -> usize {
        messages.iter().map(|m| self.count_message(m)).sum()
    }

    /// Chunk content plus serialized metadata, when present
    pub fn count_context(&self, chunks: &[ContextChunk]) -> usize {
        chunks
            .iter()
            .map(|chunk| {
                let metadata = chunk
                    .serialized_metadata()
                    .map(|m| self.count(&m))
                    .unwrap_or(0);
                self.count(&chunk.content) + metadata
            })
            .sum()
    }
}

impl std::fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCounter")
            .field("message_overhead", &self.message_overhead)
            .finish_non_exhaustive()
    }
}
