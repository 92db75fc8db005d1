//! Data models for context assembly

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Speaker of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One turn of the conversation, in chronological order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn is_system(&self) -> bool {
        self.role == Role::System
    }
}

/// A retrieved passage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextChunk {
    pub content: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl ContextChunk {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }

    /// Metadata rendered the way it is counted against the budget
    pub fn serialized_metadata(&self) -> Option<String> {
        self.metadata
            .as_ref()
            .filter(|m| !m.is_empty())
            .map(|m| Value::Object(m.clone()).to_string())
    }
}

/// Where the token budget of a request goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBreakdown {
    pub messages: usize,
    pub context: usize,
    pub response: usize,
    pub total: usize,
}

impl TokenBreakdown {
    /// Fraction of `max_total` in use
    pub fn utilization(&self, max_total: usize) -> f64 {
        if max_total == 0 {
            return 0.0;
        }
        self.total as f64 / max_total as f64
    }
}

/// Diagnostics for one truncation pass; never feeds back into behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruncationSummary {
    pub original_messages: usize,
    pub kept_messages: usize,
    pub removed_messages: usize,
    pub original_tokens: usize,
    pub kept_tokens: usize,
    pub removed_tokens: usize,
}

impl TruncationSummary {
    pub fn was_truncated(&self) -> bool {
        self.removed_messages > 0
    }
}
