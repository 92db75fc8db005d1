//! Bearer API-key authentication

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::warn;

use crate::error::AppError;

/// Accepted API keys. With no keys configured every request is rejected.
pub struct ApiKeyAuth {
    keys: Vec<SecretString>,
}

/// Identifies the key a request authenticated with, without exposing it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerIdentity {
    pub key_index: usize,
}

impl ApiKeyAuth {
    pub fn new(keys: Vec<SecretString>) -> Self {
        Self { keys }
    }

    pub fn from_strs(keys: &[&str]) -> Self {
        Self::new(
            keys.iter()
                .map(|k| SecretString::new((*k).to_string()))
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn identify(&self, token: &str) -> Option<CallerIdentity> {
        self.keys
            .iter()
            .position(|key| constant_time_eq(key.expose_secret().as_bytes(), token.as_bytes()))
            .map(|key_index| CallerIdentity { key_index })
    }
}

/// Byte comparison whose running time depends only on the lengths, so a
/// wrong key leaks nothing about how many leading bytes matched. Only the
/// length check exits early.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Rejects requests without a known bearer key; tags the rest with [`CallerIdentity`]
pub async fn require_api_key(
    State(auth): State<Arc<ApiKeyAuth>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(token) = bearer_token(&request) else {
        return Err(AppError::unauthorized("Missing bearer token"));
    };

    match auth.identify(token) {
        Some(identity) => {
            request.extensions_mut().insert(identity);
            Ok(next.run(request).await)
        }
        None => {
            warn!(path = %request.uri().path(), "Rejected request with unknown API key");
            Err(AppError::unauthorized("Invalid API key"))
        }
    }
}
