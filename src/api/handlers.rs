use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Query, State},
    http::header,
    response::{IntoResponse, Response},
    Extension, Json,
};
use std::sync::Arc;
use tracing::info;

use super::auth::{ApiKeyAuth, CallerIdentity};
use super::models::{HealthResponse, InvalidateRequest, InvalidateResponse, StatsFormat, StatsQuery};
use crate::cache::CacheService;
use crate::error::AppError;
use crate::metrics::METRICS;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<CacheService>,
    pub auth: Arc<ApiKeyAuth>,
}

impl AppState {
    pub fn new(cache: Arc<CacheService>, auth: Arc<ApiKeyAuth>) -> Self {
        Self { cache, auth }
    }
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::ok())
}

/// Cache statistics as JSON, or as a text report with `?format=text`
///
/// GET /api/cache/stats
pub async fn cache_stats(
    State(state): State<AppState>,
    query: Result<Query<StatsQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    let Query(query) = query.map_err(|e| AppError::validation(e.body_text()))?;
    let format = query.format()?;
    let snapshot = state.cache.snapshot().await;

    Ok(match format {
        StatsFormat::Json => Json(snapshot).into_response(),
        StatsFormat::Text => (
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            snapshot.render_text(),
        )
            .into_response(),
    })
}

/// Invalidate cache state after a user deletion or a document update
///
/// POST /api/cache/invalidate
pub async fn invalidate_cache(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    payload: Result<Json<InvalidateRequest>, JsonRejection>,
) -> Result<Json<InvalidateResponse>, AppError> {
    let Json(request) = payload.map_err(|e| AppError::validation(e.body_text()))?;
    let (scope, id) = request.validate()?;

    info!(
        scope = scope.as_str(),
        id,
        caller = caller.key_index,
        "Cache invalidation requested"
    );

    let details = state.cache.invalidate(scope, id).await;
    let stats = state.cache.snapshot().await;

    Ok(Json(InvalidateResponse {
        invalidated: details.total,
        details,
        stats,
    }))
}

/// Prometheus text exposition
///
/// GET /metrics
pub async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        METRICS.export_prometheus(),
    )
}
