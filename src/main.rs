use anyhow::Context as _;
use std::sync::Arc;
use tracing::{info, warn};

use rag_context_cache::{
    api::{build_router, ApiKeyAuth, AppState},
    cache::CacheService,
    config::{AppConfig, DEFAULT_CONFIG_PATH},
    context::{BudgetConfig, ContextBudgetManager, TokenCounter},
    logging,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config_path =
        std::env::var("RAG_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let mut config = AppConfig::load(Some(&config_path))
        .with_context(|| format!("Failed to load configuration from {config_path}"))?;

    logging::init(&config.logging);

    let counter = TokenCounter::tiktoken_or_fallback(config.budget.message_overhead);
    let budget = ContextBudgetManager::new(counter, BudgetConfig::from(&config.budget))
        .context("Invalid context budget")?;
    info!(
        max_total_tokens = budget.config().max_total_tokens,
        response_reserve = budget.config().response_reserve,
        "Context budget ready"
    );

    let cache = Arc::new(CacheService::from_config(&config));
    if config.shared_cache.is_configured() && !cache.warm_up().await {
        warn!("Shared cache tier unreachable at startup; will retry on first use");
    }

    let auth = ApiKeyAuth::new(std::mem::take(&mut config.auth.api_keys));
    if auth.is_empty() {
        warn!("No API keys configured; cache invalidation requests will be rejected");
    }

    let router = build_router(AppState::new(cache, Arc::new(auth)));

    let addr = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
