//! HTTP router

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use super::auth::require_api_key;
use super::handlers::{self, AppState};

/// Request bodies are tiny JSON documents
const MAX_BODY_BYTES: usize = 64 * 1024;

pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/cache/invalidate", post(handlers::invalidate_cache))
        .route_layer(middleware::from_fn_with_state(
            state.auth.clone(),
            require_api_key,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/cache/stats", get(handlers::cache_stats))
        .route("/metrics", get(handlers::metrics))
        .merge(protected)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::auth::ApiKeyAuth;
    use crate::cache::{CacheService, ManualClock};
    use crate::config::AppConfig;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn state() -> AppState {
        let cache = CacheService::with_connector(
            &AppConfig::default(),
            None,
            Arc::new(ManualClock::new(0)),
        );
        AppState::new(Arc::new(cache), Arc::new(ApiKeyAuth::from_strs(&["secret"])))
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn invalidate(token: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/cache/invalidate")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = build_router(state())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_stats_json_and_text() {
        let state = state();
        state.cache.embeddings().set("embedding:a", vec![1.0]).await;

        let response = build_router(state.clone())
            .oneshot(Request::builder().uri("/api/cache/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["embedding"]["size"], 1);
        assert_eq!(json["sharedTierConnected"], false);

        let response = build_router(state)
            .oneshot(
                Request::builder()
                    .uri("/api/cache/stats?format=text")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.starts_with("Cache statistics"));
    }

    #[tokio::test]
    async fn test_stats_unknown_format() {
        let response = build_router(state())
            .oneshot(
                Request::builder()
                    .uri("/api/cache/stats?format=yaml")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["type"], "validation_error");
    }

    #[tokio::test]
    async fn test_invalidate_requires_auth() {
        let body = json!({"type": "user", "id": "u1"}).to_string();

        for token in [None, Some("wrong")] {
            let response = build_router(state())
                .oneshot(invalidate(token, &body))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            let json = body_json(response).await;
            assert_eq!(json["type"], "unauthorized");
            assert_eq!(json["recoverable"], false);
        }
    }

    #[tokio::test]
    async fn test_invalidate_rejects_bad_bodies() {
        for body in [
            "not json",
            r#"{"id": "u1"}"#,
            r#"{"type": "everything", "id": "u1"}"#,
            r#"{"type": "user"}"#,
        ] {
            let response = build_router(state())
                .oneshot(invalidate(Some("secret"), body))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body: {body}");
            assert_eq!(body_json(response).await["type"], "validation_error");
        }
    }

    #[tokio::test]
    async fn test_invalidate_user() {
        let state = state();
        state.cache.embeddings().set("embedding:a", vec![1.0]).await;
        state.cache.queries().set("query:u1:x", Vec::new()).await;

        let body = json!({"type": "user", "id": "u1"}).to_string();
        let response = build_router(state)
            .oneshot(invalidate(Some("secret"), &body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["invalidated"], 2);
        assert_eq!(json["stats"]["embedding"]["size"], 0);
        assert_eq!(json["stats"]["query"]["size"], 0);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let state = state();
        state.cache.queries().get("query:u:missing").await;

        let response = build_router(state)
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("cache_lookups_total"));
    }
}
