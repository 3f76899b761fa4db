//! In-memory session store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use coda_llm::Message;
use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::error::{Result, SessionError};
use crate::store::SessionStore;
use crate::types::{MessageId, SessionId, SessionRecord, StoredMessage};

#[derive(Debug)]
struct Entry {
    record: SessionRecord,
    messages: Vec<StoredMessage>,
}

/// Non-durable store backed by a map. Used for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<SessionId, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    fn with_entry<T>(&self, id: SessionId, f: impl FnOnce(&mut Entry) -> T) -> Result<T> {
        let mut sessions = self.sessions.write();
        let entry = sessions
            .get_mut(&id)
            .ok_or_else(|| SessionError::not_found(id))?;
        Ok(f(entry))
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(&self, title: &str) -> Result<SessionId> {
        let record = SessionRecord::new(title);
        let id = record.id;
        self.sessions.write().insert(
            id,
            Entry {
                record,
                messages: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn get_session(&self, id: SessionId) -> Result<SessionRecord> {
        self.sessions
            .read()
            .get(&id)
            .map(|e| e.record.clone())
            .ok_or_else(|| SessionError::not_found(id))
    }

    async fn list_sessions(&self) -> Result<Vec<SessionRecord>> {
        let mut records: Vec<_> = self
            .sessions
            .read()
            .values()
            .map(|e| e.record.clone())
            .collect();
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(records)
    }

    async fn append_message(&self, id: SessionId, message: StoredMessage) -> Result<MessageId> {
        self.with_entry(id, |entry| {
            let message_id = message.id;
            entry.messages.push(message);
            entry.record.updated_at = Utc::now();
            message_id
        })
    }

    async fn load_history(&self, id: SessionId) -> Result<Vec<Message>> {
        self.with_entry(id, |entry| {
            entry
                .messages
                .iter()
                .skip(entry.record.compacted_through)
                .map(|m| m.message.clone())
                .collect()
        })
    }

    async fn load_transcript(&self, id: SessionId) -> Result<Vec<StoredMessage>> {
        self.with_entry(id, |entry| entry.messages.clone())
    }

    async fn update_summary(&self, id: SessionId, summary: &str) -> Result<()> {
        self.with_entry(id, |entry| {
            entry.record.summary = Some(summary.to_string());
            entry.record.updated_at = Utc::now();
        })
    }

    async fn retain_recent(&self, id: SessionId, keep: usize) -> Result<()> {
        self.with_entry(id, |entry| {
            let total = entry.messages.len();
            entry.record.retain_recent(total, keep);
        })
    }

    async fn delete_session(&self, id: SessionId) -> Result<()> {
        self.sessions
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| SessionError::not_found(id))
    }

    async fn merge_feedback(
        &self,
        message_id: MessageId,
        patch: Map<String, Value>,
    ) -> Result<Value> {
        let mut sessions = self.sessions.write();
        let message = sessions
            .values_mut()
            .flat_map(|entry| entry.messages.iter_mut())
            .find(|m| m.id == message_id)
            .ok_or_else(|| SessionError::MessageNotFound(message_id.to_string()))?;
        Ok(message.merge_feedback(patch))
    }
}
