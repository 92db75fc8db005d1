//! Shared (cross-process) tier
//!
//! Every failure here is downgraded by [`SharedTier`]: reads become misses,
//! writes and deletes are logged and dropped. A failed operation discards the
//! backend handle; the next call connects afresh. There is no retry loop.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::metrics::METRICS;

/// Keys fetched per SCAN round during pattern deletes
const SCAN_BATCH: u64 = 100;

/// Upper bound on SCAN rounds for one pattern delete
const MAX_SCAN_ROUNDS: usize = 10_000;

#[derive(Debug, Error)]
pub enum SharedCacheError {
    #[error("Shared cache connection failed: {0}")]
    Connect(String),

    #[error("Shared cache request failed: {0}")]
    Request(String),

    #[error("Shared cache returned an error: {0}")]
    Backend(String),

    #[error("Unexpected shared cache response: {0}")]
    Protocol(String),
}

/// Key-value store reachable by every process
#[async_trait]
pub trait SharedCacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, SharedCacheError>;

    async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl_secs: u64,
    ) -> Result<(), SharedCacheError>;

    /// Delete keys matching a glob pattern; returns the number deleted
    async fn delete_matching(&self, pattern: &str) -> Result<u64, SharedCacheError>;
}

/// Creates backend handles; called lazily and again after every failure
#[async_trait]
pub trait SharedCacheConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn SharedCacheBackend>, SharedCacheError>;
}

/// Connector for a Redis REST endpoint (Upstash protocol)
pub struct UpstashConnector {
    url: String,
    token: Arc<SecretString>,
}

impl UpstashConnector {
    pub fn new(url: impl Into<String>, token: SecretString) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            token: Arc::new(token),
        }
    }
}

#[async_trait]
impl SharedCacheConnector for UpstashConnector {
    async fn connect(&self) -> Result<Arc<dyn SharedCacheBackend>, SharedCacheError> {
        let http = Client::builder()
            .build()
            .map_err(|e| SharedCacheError::Connect(e.to_string()))?;

        let backend = UpstashBackend {
            http,
            url: self.url.clone(),
            token: Arc::clone(&self.token),
        };
        backend.ping().await?;

        Ok(Arc::new(backend))
    }
}

#[derive(Debug, Deserialize)]
struct RestResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Redis commands sent as JSON arrays over HTTPS with bearer auth
pub struct UpstashBackend {
    http: Client,
    url: String,
    token: Arc<SecretString>,
}

impl UpstashBackend {
    async fn command(&self, args: Value) -> Result<Value, SharedCacheError> {
        let response = self
            .http
            .post(&self.url)
            .bearer_auth(self.token.expose_secret())
            .json(&args)
            .send()
            .await
            .map_err(|e| SharedCacheError::Request(e.to_string()))?;

        let status = response.status();
        let body: RestResponse = response
            .json()
            .await
            .map_err(|e| SharedCacheError::Protocol(format!("status {}: {}", status, e)))?;

        if let Some(error) = body.error {
            return Err(SharedCacheError::Backend(error));
        }
        if !status.is_success() {
            return Err(SharedCacheError::Request(format!("status {}", status)));
        }

        Ok(body.result.unwrap_or(Value::Null))
    }

    async fn ping(&self) -> Result<(), SharedCacheError> {
        match self.command(json!(["PING"])).await {
            Ok(Value::String(pong)) if pong.eq_ignore_ascii_case("pong") => Ok(()),
            Ok(other) => Err(SharedCacheError::Connect(format!(
                "unexpected PING reply: {}",
                other
            ))),
            Err(e) => Err(SharedCacheError::Connect(e.to_string())),
        }
    }

    async fn scan(&self, cursor: &str, pattern: &str) -> Result<(String, Vec<String>), SharedCacheError> {
        let reply = self
            .command(json!(["SCAN", cursor, "MATCH", pattern, "COUNT", SCAN_BATCH]))
            .await?;

        let parts = reply
            .as_array()
            .filter(|parts| parts.len() == 2)
            .ok_or_else(|| SharedCacheError::Protocol(format!("SCAN reply: {}", reply)))?;

        let next = match &parts[0] {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            other => {
                return Err(SharedCacheError::Protocol(format!("SCAN cursor: {}", other)));
            }
        };
        let keys = parts[1]
            .as_array()
            .map(|keys| {
                keys.iter()
                    .filter_map(|k| k.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        Ok((next, keys))
    }
}

#[async_trait]
impl SharedCacheBackend for UpstashBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, SharedCacheError> {
        match self.command(json!(["GET", key])).await? {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(s)),
            other => Err(SharedCacheError::Protocol(format!("GET reply: {}", other))),
        }
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl_secs: u64,
    ) -> Result<(), SharedCacheError> {
        match self
            .command(json!(["SET", key, value, "EX", ttl_secs]))
            .await?
        {
            Value::String(ok) if ok == "OK" => Ok(()),
            other => Err(SharedCacheError::Protocol(format!("SET reply: {}", other))),
        }
    }

    async fn delete_matching(&self, pattern: &str) -> Result<u64, SharedCacheError> {
        let mut cursor = "0".to_string();
        let mut deleted = 0u64;

        for _ in 0..MAX_SCAN_ROUNDS {
            let (next, keys) = self.scan(&cursor, pattern).await?;

            if !keys.is_empty() {
                let mut args = vec![Value::String("DEL".to_string())];
                args.extend(keys.into_iter().map(Value::String));
                deleted += self.command(Value::Array(args)).await?.as_u64().unwrap_or(0);
            }

            if next == "0" {
                return Ok(deleted);
            }
            cursor = next;
        }

        warn!(
            "Pattern delete for {} stopped after {} SCAN rounds",
            pattern, MAX_SCAN_ROUNDS
        );
        Ok(deleted)
    }
}

/// Failure-tolerant wrapper around a lazily connected backend
pub struct SharedTier {
    connector: Arc<dyn SharedCacheConnector>,
    handle: Mutex<Option<Arc<dyn SharedCacheBackend>>>,
}

impl SharedTier {
    pub fn new(connector: Arc<dyn SharedCacheConnector>) -> Self {
        Self {
            connector,
            handle: Mutex::new(None),
        }
    }

    /// Whether a live handle is currently held
    pub async fn is_connected(&self) -> bool {
        self.handle.lock().await.is_some()
    }

    /// Connect now unless already connected
    pub async fn ensure_connected(&self) -> bool {
        self.backend().await.is_some()
    }

    /// Read `key`; any failure is a miss
    pub async fn get(&self, key: &str) -> Option<String> {
        let backend = self.backend().await?;
        match backend.get(key).await {
            Ok(value) => value,
            Err(e) => {
                self.fail("get", &backend, &e).await;
                None
            }
        }
    }

    /// Best-effort write; returns whether it was stored
    pub async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> bool {
        let Some(backend) = self.backend().await else {
            return false;
        };
        match backend.set_with_expiry(key, value, ttl_secs).await {
            Ok(()) => true,
            Err(e) => {
                self.fail("set", &backend, &e).await;
                false
            }
        }
    }

    /// Best-effort pattern delete; returns the (approximate) number deleted
    pub async fn delete_matching(&self, pattern: &str) -> u64 {
        let Some(backend) = self.backend().await else {
            return 0;
        };
        match backend.delete_matching(pattern).await {
            Ok(deleted) => deleted,
            Err(e) => {
                self.fail("delete", &backend, &e).await;
                0
            }
        }
    }

    /// Current handle, connecting if there is none. The lock is never held
    /// across `connect`; concurrent connects race and the last one is kept.
    async fn backend(&self) -> Option<Arc<dyn SharedCacheBackend>> {
        if let Some(backend) = self.handle.lock().await.as_ref() {
            return Some(Arc::clone(backend));
        }

        match self.connector.connect().await {
            Ok(backend) => {
                info!("Shared cache tier connected");
                *self.handle.lock().await = Some(Arc::clone(&backend));
                Some(backend)
            }
            Err(e) => {
                METRICS.record_shared_error("connect");
                warn!("Shared cache tier unavailable: {}", e);
                None
            }
        }
    }

    /// Drop the failed handle unless another task already replaced it
    async fn fail(&self, operation: &str, failed: &Arc<dyn SharedCacheBackend>, error: &SharedCacheError) {
        METRICS.record_shared_error(operation);
        warn!(operation, "Shared cache operation failed, discarding connection: {}", error);

        let mut handle = self.handle.lock().await;
        if handle
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, failed))
        {
            *handle = None;
            debug!("Shared cache handle discarded");
        }
    }
}
