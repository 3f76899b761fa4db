//! The persistence seam used by the session orchestrator.

use std::sync::Arc;

use async_trait::async_trait;
use coda_llm::Message;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::types::{MessageId, SessionId, SessionRecord, StoredMessage};

/// Longest title a forked session gets, in characters.
const FORK_TITLE_MAX_CHARS: usize = 100;

/// Durable storage for sessions and their message transcripts.
///
/// A write is complete when its future resolves; callers rely on this to keep
/// stored order identical to emission order.
///
/// Each session keeps a full append-only transcript plus a watermark
/// (`compacted_through`). Messages before the watermark have been folded into
/// the running summary; the ones after it form the working history that is
/// replayed to the model.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a session with the given title.
    async fn create_session(&self, title: &str) -> Result<SessionId>;

    /// Fetch a session's metadata. Fails with `NotFound` for unknown ids.
    async fn get_session(&self, id: SessionId) -> Result<SessionRecord>;

    /// All sessions, most recently updated first.
    async fn list_sessions(&self) -> Result<Vec<SessionRecord>>;

    /// Append a message to the session transcript.
    async fn append_message(&self, id: SessionId, message: StoredMessage) -> Result<MessageId>;

    /// The working history: messages after the compaction watermark, in
    /// append order.
    async fn load_history(&self, id: SessionId) -> Result<Vec<Message>>;

    /// Every stored message with its metadata, in append order.
    async fn load_transcript(&self, id: SessionId) -> Result<Vec<StoredMessage>>;

    /// Replace the running summary.
    async fn update_summary(&self, id: SessionId, summary: &str) -> Result<()>;

    /// Advance the watermark so that only the last `keep` messages remain in
    /// the working history.
    async fn retain_recent(&self, id: SessionId, keep: usize) -> Result<()>;

    /// Remove a session and its transcript.
    async fn delete_session(&self, id: SessionId) -> Result<()>;

    /// Merge `patch` into a message's feedback object and return the result.
    /// Keys already present and not in `patch` are kept.
    async fn merge_feedback(
        &self,
        message_id: MessageId,
        patch: Map<String, Value>,
    ) -> Result<Value>;

    /// Copy a session into a new one titled `Fork of <title>`.
    ///
    /// Messages are cloned in order up to and including `through`, or all of
    /// them when `through` is `None` or not part of the session. Clones get
    /// fresh ids and no feedback. The summary is carried over, and so is the
    /// watermark as far as the cloned messages reach.
    async fn fork_session(&self, id: SessionId, through: Option<MessageId>) -> Result<SessionId> {
        let source = self.get_session(id).await?;
        let mut transcript = self.load_transcript(id).await?;
        if let Some(cutoff) = through.and_then(|m| transcript.iter().position(|s| s.id == m)) {
            transcript.truncate(cutoff + 1);
        }

        let title: String = format!("Fork of {}", source.title)
            .chars()
            .take(FORK_TITLE_MAX_CHARS)
            .collect();
        let fork = self.create_session(&title).await?;

        let cloned = transcript.len();
        for original in transcript {
            let mut copy = StoredMessage::new(original.message);
            copy.token_count = original.token_count;
            copy.execution_time = original.execution_time;
            copy.decision_count = original.decision_count;
            self.append_message(fork, copy).await?;
        }

        if let Some(summary) = &source.summary {
            self.update_summary(fork, summary).await?;
        }
        let folded = source.compacted_through.min(cloned);
        if folded > 0 {
            self.retain_recent(fork, cloned - folded).await?;
        }

        tracing::debug!(session_id = %id, fork_id = %fork, messages = cloned, "Forked session");
        Ok(fork)
    }
}

/// A store that can be shared across tasks.
pub type SharedStore = Arc<dyn SessionStore>;
