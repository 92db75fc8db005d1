//! Retrieval context and cache pipeline
//!
//! Fits conversation history and retrieved passages into a fixed token budget,
//! and memoizes embedding and search results in a two-tier cache with TTL,
//! statistics and invalidation.

pub mod api;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod retrieval;

pub use cache::{CacheService, CacheSnapshot, TwoTierCache};
pub use config::AppConfig;
pub use context::{ChatMessage, ContextBudgetManager, ContextChunk, TokenCounter};
pub use error::{AppError, ContextError, ErrorKind, Result};
pub use retrieval::{RetrievalOrchestrator, SearchRequest};
