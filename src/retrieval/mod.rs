//! Retrieval: memoized embedding and search calls feeding the context budget

pub mod orchestrator;
pub mod provider;

pub use orchestrator::{PreparedContext, RetrievalOrchestrator};
pub use provider::{EmbeddingProvider, ProviderError, SearchProvider, SearchRequest};
