//! Session and stored-message records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use coda_llm::Message;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a stored message.
pub type MessageId = Uuid;

/// Identifier of a conversation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

impl From<Uuid> for SessionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Metadata for one conversation session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub title: String,
    /// Running summary of messages folded out of the working history.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Number of stored messages already folded into `summary`.
    #[serde(default)]
    pub compacted_through: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            title: title.into(),
            summary: None,
            compacted_through: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Advance the watermark so only the last `keep` of `total` messages remain
    /// in the working history. Never moves backwards.
    pub(crate) fn retain_recent(&mut self, total: usize, keep: usize) {
        let watermark = total.saturating_sub(keep);
        if watermark > self.compacted_through {
            self.compacted_through = watermark;
        }
        self.updated_at = Utc::now();
    }
}

/// A message as persisted, with storage metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: MessageId,
    #[serde(flatten)]
    pub message: Message,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<u64>,
    /// Wall-clock duration of the turn in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<serde_json::Value>,
}

impl StoredMessage {
    pub fn new(message: Message) -> Self {
        Self {
            id: Uuid::new_v4(),
            message,
            created_at: Utc::now(),
            token_count: None,
            execution_time: None,
            decision_count: None,
            feedback: None,
        }
    }

    pub fn with_token_count(mut self, tokens: u64) -> Self {
        self.token_count = Some(tokens);
        self
    }

    pub fn with_execution_time(mut self, seconds: f64) -> Self {
        self.execution_time = Some(seconds);
        self
    }

    pub fn with_decision_count(mut self, count: u32) -> Self {
        self.decision_count = Some(count);
        self
    }

    pub fn with_feedback(mut self, feedback: serde_json::Value) -> Self {
        self.feedback = Some(feedback);
        self
    }

    /// Fold `patch` into the feedback object, creating it if needed, and
    /// return the merged value.
    pub fn merge_feedback(
        &mut self,
        patch: serde_json::Map<String, serde_json::Value>,
    ) -> serde_json::Value {
        let mut merged = match self.feedback.take() {
            Some(serde_json::Value::Object(existing)) => existing,
            _ => serde_json::Map::new(),
        };
        merged.extend(patch);
        let merged = serde_json::Value::Object(merged);
        self.feedback = Some(merged.clone());
        merged
    }
}

impl From<Message> for StoredMessage {
    fn from(message: Message) -> Self {
        Self::new(message)
    }
}
