//! Layered service configuration
//!
//! Sources, lowest precedence first: built-in defaults, an optional TOML file,
//! `RAG__SECTION__KEY` environment variables, then the shared-tier credentials
//! (`UPSTASH_REDIS_REST_URL` / `UPSTASH_REDIS_REST_TOKEN`).

use config::{builder::DefaultState, ConfigBuilder, Environment, File, FileFormat};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;

use crate::error::{ContextError, Result};

/// Default config file, resolved relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Settings for one cache kind (embedding or query)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CacheKindConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Entry time-to-live in milliseconds
    pub ttl_ms: u64,

    /// Local tier capacity
    pub max_entries: u64,
}

impl CacheKindConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// Shared-tier expiry in whole seconds, rounded up, never zero
    pub fn shared_ttl_secs(&self) -> u64 {
        self.ttl_ms.div_ceil(1000).max(1)
    }
}

fn default_embedding_cache() -> CacheKindConfig {
    CacheKindConfig {
        enabled: true,
        ttl_ms: 24 * 60 * 60 * 1000,
        max_entries: 1000,
    }
}

fn default_query_cache() -> CacheKindConfig {
    CacheKindConfig {
        enabled: true,
        ttl_ms: 60 * 60 * 1000,
        max_entries: 500,
    }
}

/// Which external events clear cache state
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InvalidationConfig {
    #[serde(default = "default_true")]
    pub on_user_delete: bool,

    #[serde(default = "default_true")]
    pub on_document_update: bool,
}

impl Default for InvalidationConfig {
    fn default() -> Self {
        Self {
            on_user_delete: true,
            on_document_update: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PerformanceConfig {
    /// Fall back to the shared tier when a read misses locally
    #[serde(default = "default_true")]
    pub local_first: bool,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self { local_first: true }
    }
}

/// Context window budget
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BudgetSettings {
    #[serde(default = "default_max_total_tokens")]
    pub max_total_tokens: usize,

    #[serde(default = "default_response_reserve")]
    pub response_reserve: usize,

    /// Structural tokens added to every message on top of content and role
    #[serde(default = "default_message_overhead")]
    pub message_overhead: usize,
}

impl Default for BudgetSettings {
    fn default() -> Self {
        Self {
            max_total_tokens: default_max_total_tokens(),
            response_reserve: default_response_reserve(),
            message_overhead: default_message_overhead(),
        }
    }
}

/// Shared (out-of-process) cache tier; disabled unless both fields are present
#[derive(Debug, Default, Deserialize)]
pub struct SharedCacheConfig {
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub token: Option<SecretString>,
}

impl SharedCacheConfig {
    pub fn is_configured(&self) -> bool {
        let has_url = self.url.as_deref().is_some_and(|u| !u.trim().is_empty());
        let has_token = self
            .token
            .as_ref()
            .is_some_and(|t| !t.expose_secret().trim().is_empty());
        has_url && has_token
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default = "default_provider_timeout_ms")]
    pub provider_timeout_ms: u64,
}

impl RetrievalConfig {
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            provider_timeout_ms: default_provider_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Bearer keys accepted by authenticated endpoints
#[derive(Debug, Default, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub api_keys: Vec<SecretString>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_embedding_cache")]
    pub embedding_cache: CacheKindConfig,

    #[serde(default = "default_query_cache")]
    pub query_cache: CacheKindConfig,

    #[serde(default)]
    pub invalidation: InvalidationConfig,

    #[serde(default)]
    pub performance: PerformanceConfig,

    #[serde(default)]
    pub budget: BudgetSettings,

    #[serde(default)]
    pub shared_cache: SharedCacheConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

// Default value functions
fn default_true() -> bool { true }
fn default_max_total_tokens() -> usize { 128_000 }
fn default_response_reserve() -> usize { 2_000 }
fn default_message_overhead() -> usize { 1 }
fn default_top_k() -> usize { 5 }
fn default_provider_timeout_ms() -> u64 { 30_000 }
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_log_level() -> String { "info".to_string() }

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            embedding_cache: default_embedding_cache(),
            query_cache: default_query_cache(),
            invalidation: InvalidationConfig::default(),
            performance: PerformanceConfig::default(),
            budget: BudgetSettings::default(),
            shared_cache: SharedCacheConfig::default(),
            retrieval: RetrievalConfig::default(),
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Builder pre-seeded with the per-kind cache defaults, so a source that sets
/// only some keys of a cache section still deserializes.
fn seeded_builder() -> Result<ConfigBuilder<DefaultState>> {
    let embedding = default_embedding_cache();
    let query = default_query_cache();

    Ok(config::Config::builder()
        .set_default("embedding_cache.enabled", embedding.enabled)?
        .set_default("embedding_cache.ttl_ms", embedding.ttl_ms as i64)?
        .set_default("embedding_cache.max_entries", embedding.max_entries as i64)?
        .set_default("query_cache.enabled", query.enabled)?
        .set_default("query_cache.ttl_ms", query.ttl_ms as i64)?
        .set_default("query_cache.max_entries", query.max_entries as i64)?)
}

impl AppConfig {
    /// Load from file (if present) and `RAG__*` environment variables
    pub fn load(path: Option<&str>) -> Result<Self> {
        let path = path.unwrap_or(DEFAULT_CONFIG_PATH);

        let settings = seeded_builder()?
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("RAG")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        let config = config.from_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document; missing sections fall back to defaults
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let settings = seeded_builder()?
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Override shared-tier credentials and API keys from well-known variables
    pub fn from_env(mut self) -> Self {
        if let Ok(val) = std::env::var("UPSTASH_REDIS_REST_URL") {
            self.shared_cache.url = Some(val);
        }

        if let Ok(val) = std::env::var("UPSTASH_REDIS_REST_TOKEN") {
            self.shared_cache.token = Some(SecretString::new(val));
        }

        if let Ok(val) = std::env::var("RAG_API_KEYS") {
            self.auth.api_keys = val
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(|k| SecretString::new(k.to_string()))
                .collect();
        }

        self
    }

    /// Reject settings that would make the caches or the budget unusable
    pub fn validate(&self) -> Result<()> {
        for (name, cache) in [
            ("embedding_cache", &self.embedding_cache),
            ("query_cache", &self.query_cache),
        ] {
            if cache.ttl_ms == 0 {
                return Err(ContextError::Configuration(format!(
                    "{name}.ttl_ms must be greater than zero"
                )));
            }
            if cache.max_entries == 0 {
                return Err(ContextError::Configuration(format!(
                    "{name}.max_entries must be greater than zero"
                )));
            }
        }

        if self.budget.response_reserve >= self.budget.max_total_tokens {
            return Err(ContextError::Configuration(format!(
                "budget.response_reserve ({}) must be below budget.max_total_tokens ({})",
                self.budget.response_reserve, self.budget.max_total_tokens
            )));
        }

        Ok(())
    }
}
