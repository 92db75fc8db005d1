//! Two-tier behavior against a mocked Redis REST endpoint

use mockito::{Matcher, Server, ServerGuard};
use rag_context_cache::cache::{fingerprint::embedding_key, CacheService, InvalidationScope, Tier};
use chrono::Utc;
use rag_context_cache::config::AppConfig;
use secrecy::SecretString;
use serde_json::json;

fn config_for(server: &ServerGuard) -> AppConfig {
    let mut config = AppConfig::default();
    config.shared_cache.url = Some(server.url());
    config.shared_cache.token = Some(SecretString::new("test-token".to_string()));
    config
}

async fn mock_ping(server: &mut ServerGuard) -> mockito::Mock {
    server
        .mock("POST", "/")
        .match_header("authorization", "Bearer test-token")
        .match_body(Matcher::Json(json!(["PING"])))
        .with_status(200)
        .with_body(r#"{"result":"PONG"}"#)
        .create_async()
        .await
}

#[tokio::test]
async fn scenario_d_failing_shared_get_degrades_to_local() {
    let mut server = Server::new_async().await;
    let _ping = mock_ping(&mut server).await;
    let _get = server
        .mock("POST", "/")
        .match_body(Matcher::Regex(r#"^\["GET""#.to_string()))
        .with_status(500)
        .with_body("upstream exploded")
        .create_async()
        .await;
    let _set = server
        .mock("POST", "/")
        .match_body(Matcher::Regex(r#"^\["SET""#.to_string()))
        .with_status(200)
        .with_body(r#"{"result":"OK"}"#)
        .create_async()
        .await;

    let service = CacheService::from_config(&config_for(&server));
    let key = embedding_key("some passage");

    // Empty local tier and a broken shared read: a plain miss
    assert!(!service.embeddings().get(&key).await.is_hit());
    assert!(!service.snapshot().await.shared_tier_connected);

    // The next write reconnects; reads are then served locally
    service.embeddings().set(&key, vec![0.25]).await;
    let lookup = service.embeddings().get(&key).await;
    assert!(lookup.is_hit());
    assert_eq!(lookup.into_data(), Some(vec![0.25]));
}

#[tokio::test]
async fn shared_hit_is_backfilled_locally() {
    let mut server = Server::new_async().await;
    let _ping = mock_ping(&mut server).await;
    let payload = json!({ "storedAt": Utc::now().timestamp_millis(), "data": [1.5, 2.5] });
    let get = server
        .mock("POST", "/")
        .match_body(Matcher::Regex(r#"^\["GET""#.to_string()))
        .with_status(200)
        .with_body(json!({ "result": payload.to_string() }).to_string())
        .expect(1)
        .create_async()
        .await;

    let service = CacheService::from_config(&config_for(&server));
    assert!(service.warm_up().await);
    assert!(service.snapshot().await.shared_tier_connected);

    let key = embedding_key("warm elsewhere");
    let first = service.embeddings().get(&key).await;
    let second = service.embeddings().get(&key).await;

    assert!(matches!(first, rag_context_cache::cache::Lookup::Hit { tier: Tier::Shared, .. }));
    assert!(matches!(second, rag_context_cache::cache::Lookup::Hit { tier: Tier::Local, .. }));
    assert_eq!(second.into_data(), Some(vec![1.5, 2.5]));
    get.assert_async().await;
}

#[tokio::test]
async fn writes_carry_write_time_and_ttl_in_seconds() {
    let mut server = Server::new_async().await;
    let _ping = mock_ping(&mut server).await;
    let set = server
        .mock("POST", "/")
        .match_body(Matcher::Regex(
            r#"^\["SET","query:u1:abc","\{\\"storedAt\\":\d+,\\"data\\":\[\]\}","EX",3600\]$"#
                .to_string(),
        ))
        .with_status(200)
        .with_body(r#"{"result":"OK"}"#)
        .expect(1)
        .create_async()
        .await;

    let service = CacheService::from_config(&config_for(&server));
    service.queries().set("query:u1:abc", Vec::new()).await;

    set.assert_async().await;
}

#[tokio::test]
async fn user_invalidation_deletes_matching_shared_keys() {
    let mut server = Server::new_async().await;
    let _ping = mock_ping(&mut server).await;
    let _scan = server
        .mock("POST", "/")
        .match_body(Matcher::Json(json!(["SCAN", "0", "MATCH", "*:u1:*", "COUNT", 100])))
        .with_status(200)
        .with_body(r#"{"result":["0",["query:u1:a","query:u1:b"]]}"#)
        .create_async()
        .await;
    let _del = server
        .mock("POST", "/")
        .match_body(Matcher::Json(json!(["DEL", "query:u1:a", "query:u1:b"])))
        .with_status(200)
        .with_body(r#"{"result":2}"#)
        .create_async()
        .await;

    let service = CacheService::from_config(&config_for(&server));
    let report = service.invalidate(InvalidationScope::User, "u1").await;

    assert_eq!(report.shared, 2);
    assert_eq!(report.total, 2);
}

#[tokio::test]
async fn unreachable_shared_tier_never_fails_callers() {
    let mut config = AppConfig::default();
    config.shared_cache.url = Some("http://127.0.0.1:9".to_string());
    config.shared_cache.token = Some(SecretString::new("t".to_string()));

    let service = CacheService::from_config(&config);
    assert!(!service.warm_up().await);

    service.embeddings().set("embedding:x", vec![1.0]).await;
    assert!(service.embeddings().get("embedding:x").await.is_hit());
    assert_eq!(
        service.invalidate(InvalidationScope::Document, "d1").await.shared,
        0
    );

    let snapshot = service.snapshot().await;
    assert!(snapshot.shared_tier_configured);
    assert!(!snapshot.shared_tier_connected);
}
