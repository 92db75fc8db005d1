//! Token counting and context window budgeting
//!
//! The same per-message cost formula is used for counting and for budgeting.

pub mod models;
pub mod token_budget;
pub mod token_estimator;

pub use models::{ChatMessage, ContextChunk, Role, TokenBreakdown, TruncationSummary};
pub use token_budget::{BudgetConfig, BudgetError, ContextBudgetManager};
pub use token_estimator::{TiktokenEstimator, TokenCounter, TokenEstimator, WordBasedEstimator};
