//! HTTP API: cache statistics, invalidation and metrics

pub mod auth;
pub mod handlers;
pub mod models;
pub mod routes;

pub use auth::{ApiKeyAuth, CallerIdentity};
pub use handlers::AppState;
pub use routes::build_router;
