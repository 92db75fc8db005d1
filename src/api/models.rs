//! Request and response bodies for the HTTP API

use serde::{Deserialize, Serialize};

use crate::cache::{CacheSnapshot, InvalidationReport, InvalidationScope};
use crate::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl HealthResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Representation of the stats report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatsFormat {
    #[default]
    Json,
    Text,
}

/// `GET /api/cache/stats` query string
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatsQuery {
    #[serde(default)]
    pub format: Option<String>,
}

impl StatsQuery {
    pub fn format(&self) -> Result<StatsFormat, AppError> {
        match self.format.as_deref().map(str::trim) {
            None | Some("") | Some("json") => Ok(StatsFormat::Json),
            Some("text") => Ok(StatsFormat::Text),
            Some(other) => Err(AppError::validation(format!(
                "Unknown format '{other}', expected 'json' or 'text'"
            ))),
        }
    }
}

/// `POST /api/cache/invalidate` body. Fields are optional here so that
/// missing ones surface as validation errors rather than parse failures.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvalidateRequest {
    #[serde(rename = "type", default)]
    pub scope: Option<String>,

    #[serde(default)]
    pub id: Option<String>,
}

impl InvalidateRequest {
    pub fn validate(&self) -> Result<(InvalidationScope, &str), AppError> {
        let scope = match self.scope.as_deref() {
            Some("user") => InvalidationScope::User,
            Some("document") => InvalidationScope::Document,
            Some(other) => {
                return Err(AppError::validation(format!(
                    "Invalid type '{other}', expected 'user' or 'document'"
                )))
            }
            None => return Err(AppError::validation("Missing field 'type'")),
        };

        let id = self.id.as_deref().map(str::trim).unwrap_or_default();
        if id.is_empty() {
            return Err(AppError::validation("Missing field 'id'"));
        }

        Ok((scope, id))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidateResponse {
    pub invalidated: u64,
    pub details: InvalidationReport,
    pub stats: CacheSnapshot,
}
