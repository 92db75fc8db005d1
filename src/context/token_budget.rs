//! Context window budgeting
//!
//! Decides which conversation messages fit next to the retrieved chunks and the
//! response reservation. Policy:
//! - If everything fits, the history is returned unchanged
//! - A leading system message is kept whenever it fits on its own
//! - Otherwise the most recent messages win; dropped messages are always the oldest

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::models::{ChatMessage, ContextChunk, TokenBreakdown, TruncationSummary};
use super::token_estimator::TokenCounter;
use crate::config::BudgetSettings;
use crate::metrics::METRICS;

/// Token budget configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetConfig {
    pub max_total_tokens: usize,
    pub response_reserve: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_total_tokens: 128_000,
            response_reserve: 2_000,
        }
    }
}

impl BudgetConfig {
    /// Validate that the budget leaves room for anything besides the response
    pub fn validate(&self) -> Result<(), BudgetError> {
        if self.max_total_tokens == 0 {
            return Err(BudgetError::ConfigurationInvalid(
                "max_total_tokens must be greater than zero".to_string(),
            ));
        }

        if self.response_reserve >= self.max_total_tokens {
            return Err(BudgetError::ConfigurationInvalid(format!(
                "response reserve {} leaves no room in a {} token window",
                self.response_reserve, self.max_total_tokens
            )));
        }

        Ok(())
    }
}

impl From<&BudgetSettings> for BudgetConfig {
    fn from(settings: &BudgetSettings) -> Self {
        Self {
            max_total_tokens: settings.max_total_tokens,
            response_reserve: settings.response_reserve,
        }
    }
}

/// Token budget errors
#[derive(Debug, Error)]
pub enum BudgetError {
    #[error("Budget configuration invalid: {0}")]
    ConfigurationInvalid(String),
}

/// Fits conversation history into the context window
#[derive(Debug, Clone)]
pub struct ContextBudgetManager {
    counter: TokenCounter,
    config: BudgetConfig,
}

impl ContextBudgetManager {
    pub fn new(counter: TokenCounter, config: BudgetConfig) -> Result<Self, BudgetError> {
        config.validate()?;
        Ok(Self { counter, config })
    }

    pub fn counter(&self) -> &TokenCounter {
        &self.counter
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    /// Largest recent suffix of `history` (plus a leading system message when
    /// it fits) that fits next to `chunks` and the response reservation.
    pub fn optimize(&self, history: &[ChatMessage], chunks: &[ContextChunk]) -> Vec<ChatMessage> {
        let context_tokens = self.counter.count_context(chunks);

        if self.fits(self.counter.count_messages(history), context_tokens) {
            return history.to_vec();
        }

        let available = self.config.max_total_tokens as i64
            - context_tokens as i64
            - self.config.response_reserve as i64;

        if available <= 0 {
            debug!(
                "Retrieved context ({} tokens) leaves no room for messages",
                context_tokens
            );
            return Vec::new();
        }

        let mut remaining = available as usize;
        let mut head: Option<&ChatMessage> = None;
        let mut rest = history;

        if let Some((first, tail)) = history.split_first() {
            if first.is_system() {
                let cost = self.counter.count_message(first);
                if cost < remaining {
                    head = Some(first);
                    remaining -= cost;
                } else {
                    debug!("System message ({} tokens) dropped: does not fit", cost);
                }
                rest = tail;
            }
        }

        let mut used = 0usize;
        let mut keep_from = rest.len();
        for (idx, message) in rest.iter().enumerate().rev() {
            let cost = self.counter.count_message(message);
            if used + cost > remaining {
                break;
            }
            used += cost;
            keep_from = idx;
        }

        let mut kept = Vec::with_capacity(rest.len() - keep_from + 1);
        if let Some(system) = head {
            kept.push(system.clone());
        }
        kept.extend_from_slice(&rest[keep_from..]);

        debug!(
            "Truncated history: kept {}/{} messages within {} available tokens",
            kept.len(),
            history.len(),
            available
        );

        kept
    }

    /// [`optimize`](Self::optimize) plus a diagnostic summary, recorded in metrics
    pub fn optimize_with_summary(
        &self,
        history: &[ChatMessage],
        chunks: &[ContextChunk],
    ) -> (Vec<ChatMessage>, TruncationSummary) {
        let kept = self.optimize(history, chunks);
        let summary = self.truncation_summary(history, &kept);
        let breakdown = self.breakdown(&kept, chunks);

        METRICS.record_context_budget(breakdown.total, summary.was_truncated());

        (kept, summary)
    }

    /// Whether `messages` and `chunks` fit with the response reservation
    pub fn fits_in_context(&self, messages: &[ChatMessage], chunks: &[ContextChunk]) -> bool {
        self.fits(
            self.counter.count_messages(messages),
            self.counter.count_context(chunks),
        )
    }

    /// Tokens left for retrieved context once `messages` and the response are accounted for
    pub fn available_tokens(&self, messages: &[ChatMessage]) -> usize {
        self.config
            .max_total_tokens
            .saturating_sub(self.counter.count_messages(messages))
            .saturating_sub(self.config.response_reserve)
    }

    pub fn truncation_summary(
        &self,
        original: &[ChatMessage],
        truncated: &[ChatMessage],
    ) -> TruncationSummary {
        let original_tokens = self.counter.count_messages(original);
        let kept_tokens = self.counter.count_messages(truncated);

        TruncationSummary {
            original_messages: original.len(),
            kept_messages: truncated.len(),
            removed_messages: original.len().saturating_sub(truncated.len()),
            original_tokens,
            kept_tokens,
            removed_tokens: original_tokens.saturating_sub(kept_tokens),
        }
    }

    pub fn breakdown(&self, messages: &[ChatMessage], chunks: &[ContextChunk]) -> TokenBreakdown {
        let messages = self.counter.count_messages(messages);
        let context = self.counter.count_context(chunks);
        let response = self.config.response_reserve;

        TokenBreakdown {
            messages,
            context,
            response,
            total: messages + context + response,
        }
    }

    fn fits(&self, message_tokens: usize, context_tokens: usize) -> bool {
        message_tokens + context_tokens + self.config.response_reserve
            <= self.config.max_total_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::token_estimator::WordBasedEstimator;
    use std::sync::Arc;

    /// One token per word, one for the role, one overhead: "w w w w w w w w" costs 10
    fn manager(max_total_tokens: usize, response_reserve: usize) -> ContextBudgetManager {
        let counter = TokenCounter::new(Arc::new(WordBasedEstimator::new(1.0)), 1);
        ContextBudgetManager::new(
            counter,
            BudgetConfig {
                max_total_tokens,
                response_reserve,
            },
        )
        .unwrap()
    }

    fn words(n: usize) -> String {
        vec!["w"; n].join(" ")
    }

    fn ten_token_history(n: usize) -> Vec<ChatMessage> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    ChatMessage::user(format!("u{i} {}", words(7)))
                } else {
                    ChatMessage::assistant(format!("a{i} {}", words(7)))
                }
            })
            .collect()
    }

    fn chunks_costing(tokens: usize) -> Vec<ContextChunk> {
        vec![ContextChunk::new(words(tokens))]
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(BudgetConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let counter = TokenCounter::new(Arc::new(WordBasedEstimator::default()), 1);
        let result = ContextBudgetManager::new(
            counter,
            BudgetConfig {
                max_total_tokens: 100,
                response_reserve: 100,
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_keeps_most_recent_messages() {
        let manager = manager(100, 20);
        let history = ten_token_history(10);
        assert_eq!(manager.counter().count_message(&history[0]), 10);

        let kept = manager.optimize(&history, &chunks_costing(30));
        assert_eq!(kept, history[5..].to_vec());
    }

    #[test]
    fn test_context_exceeding_budget_returns_empty() {
        let manager = manager(100, 20);
        let kept = manager.optimize(&ten_token_history(10), &chunks_costing(90));
        assert!(kept.is_empty());
    }

    #[test]
    fn test_empty_history() {
        let manager = manager(100, 20);
        assert!(manager.optimize(&[], &chunks_costing(30)).is_empty());
        assert!(manager.optimize(&[], &chunks_costing(500)).is_empty());
    }

    #[test]
    fn test_fitting_history_returned_unchanged() {
        let manager = manager(1000, 20);
        let history = ten_token_history(10);
        assert_eq!(manager.optimize(&history, &chunks_costing(30)), history);
    }

    #[test]
    fn test_system_message_preserved() {
        let manager = manager(100, 20);
        let mut history = vec![ChatMessage::system(words(8))];
        history.extend(ten_token_history(10));

        let kept = manager.optimize(&history, &chunks_costing(30));
        // 50 available: system (10) + four most recent (40)
        assert_eq!(kept.len(), 5);
        assert!(kept[0].is_system());
        assert_eq!(&kept[1..], &history[7..]);
    }

    #[test]
    fn test_system_message_dropped_when_too_large() {
        let manager = manager(100, 20);
        let mut history = vec![ChatMessage::system(words(60))];
        history.extend(ten_token_history(2));

        let kept = manager.optimize(&history, &chunks_costing(30));
        assert_eq!(kept, history[1..].to_vec());
    }

    #[test]
    fn test_system_message_needs_strictly_less_than_available() {
        let manager = manager(100, 20);
        // 48 content words + role + overhead = 50 = available
        let mut history = vec![ChatMessage::system(words(48))];
        history.extend(ten_token_history(6));

        let kept = manager.optimize(&history, &chunks_costing(30));
        assert!(kept.iter().all(|m| !m.is_system()));
        assert_eq!(kept, history[2..].to_vec());
    }

    #[test]
    fn test_oversized_messages_leave_only_system() {
        let manager = manager(100, 20);
        let history = vec![
            ChatMessage::system(words(3)),
            ChatMessage::user(words(80)),
            ChatMessage::assistant(words(90)),
        ];

        let kept = manager.optimize(&history, &chunks_costing(30));
        assert_eq!(kept, vec![history[0].clone()]);

        let kept = manager.optimize(&history[1..], &chunks_costing(30));
        assert!(kept.is_empty());
    }

    #[test]
    fn test_walk_stops_at_first_overflow() {
        let manager = manager(100, 20);
        let history = vec![
            ChatMessage::user(words(3)),   // 5
            ChatMessage::user(words(38)),  // 40
            ChatMessage::user(words(18)),  // 20
            ChatMessage::user(words(18)),  // 20
        ];

        let kept = manager.optimize(&history, &chunks_costing(30));
        // 50 available: 20 + 20 fit, 40 overflows; the small oldest message is not
        // pulled in across the gap
        assert_eq!(kept, history[2..].to_vec());
    }

    #[test]
    fn test_optimize_is_idempotent() {
        let manager = manager(100, 20);
        let mut history = vec![ChatMessage::system(words(8))];
        history.extend(ten_token_history(10));
        let chunks = chunks_costing(30);

        let once = manager.optimize(&history, &chunks);
        let twice = manager.optimize(&once, &chunks);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_budget_invariant_holds() {
        let manager = manager(120, 25);
        for context in [0, 10, 40, 80, 95, 200] {
            for n in [0, 1, 3, 9, 20] {
                let mut history = vec![ChatMessage::system(words(4))];
                history.extend(ten_token_history(n));
                let chunks = chunks_costing(context);

                let kept = manager.optimize(&history, &chunks);
                assert!(
                    kept.is_empty() || manager.fits_in_context(&kept, &chunks),
                    "context={context} n={n}"
                );
            }
        }
    }

    #[test]
    fn test_fits_in_context() {
        let manager = manager(100, 20);
        let history = ten_token_history(5);
        assert!(manager.fits_in_context(&history, &chunks_costing(30)));
        assert!(!manager.fits_in_context(&history, &chunks_costing(31)));
    }

    #[test]
    fn test_available_tokens() {
        let manager = manager(100, 20);
        assert_eq!(manager.available_tokens(&ten_token_history(3)), 50);
        assert_eq!(manager.available_tokens(&ten_token_history(10)), 0);
    }

    #[test]
    fn test_truncation_summary() {
        let manager = manager(100, 20);
        let history = ten_token_history(10);
        let (kept, summary) = manager.optimize_with_summary(&history, &chunks_costing(30));

        assert_eq!(kept.len(), 5);
        assert_eq!(summary.original_messages, 10);
        assert_eq!(summary.kept_messages, 5);
        assert_eq!(summary.removed_messages, 5);
        assert_eq!(summary.original_tokens, 100);
        assert_eq!(summary.removed_tokens, 50);
        assert!(summary.was_truncated());
    }

    #[test]
    fn test_breakdown() {
        let manager = manager(100, 20);
        let breakdown = manager.breakdown(&ten_token_history(2), &chunks_costing(30));
        assert_eq!(breakdown.messages, 20);
        assert_eq!(breakdown.context, 30);
        assert_eq!(breakdown.response, 20);
        assert_eq!(breakdown.total, 70);
    }
}
