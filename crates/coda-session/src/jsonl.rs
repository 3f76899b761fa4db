//! File-backed session store.
//!
//! Layout under the data directory:
//!
//! ```text
//! sessions/
//!   {session_id}/
//!     session.json     metadata, replaced atomically on every change
//!     messages.jsonl   append-only transcript, one StoredMessage per line
//! ```
//!
//! Feedback is the one edit made to stored messages; it rewrites the
//! transcript through a temp file.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use coda_llm::Message;
use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::error::{Result, SessionError};
use crate::store::SessionStore;
use crate::types::{MessageId, SessionId, SessionRecord, StoredMessage};

const SESSION_FILE: &str = "session.json";
const MESSAGES_FILE: &str = "messages.jsonl";

/// Append-only JSONL session store. One directory per session.
///
/// All file I/O runs on the blocking thread pool. Metadata updates are
/// serialized through a store-wide lock so concurrent turns never lose a
/// read-modify-write of `session.json`.
#[derive(Clone)]
pub struct JsonlStore {
    inner: Arc<Inner>,
}

struct Inner {
    data_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            inner: Arc::new(Inner {
                data_dir: data_dir.as_ref().to_path_buf(),
                write_lock: Mutex::new(()),
            }),
        }
    }

    /// Root data directory.
    pub fn data_dir(&self) -> &Path {
        &self.inner.data_dir
    }

    /// Path to a session's directory.
    pub fn session_dir(&self, id: SessionId) -> PathBuf {
        self.inner.session_dir(id)
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Inner) -> Result<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || f(&inner)).await?
    }
}

impl Inner {
    fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }

    fn session_dir(&self, id: SessionId) -> PathBuf {
        self.sessions_dir().join(id.to_string())
    }

    fn read_record(&self, id: SessionId) -> Result<SessionRecord> {
        let path = self.session_dir(id).join(SESSION_FILE);
        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SessionError::not_found(id));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&data)?)
    }

    /// Write metadata to a temp file and rename it over the old one.
    fn write_record(&self, record: &SessionRecord) -> Result<()> {
        let dir = self.session_dir(record.id);
        fs::create_dir_all(&dir)?;

        let tmp = dir.join(format!("{SESSION_FILE}.tmp"));
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&serde_json::to_vec_pretty(record)?)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, dir.join(SESSION_FILE))?;
        Ok(())
    }

    fn update_record(&self, id: SessionId, f: impl FnOnce(&mut SessionRecord)) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut record = self.read_record(id)?;
        f(&mut record);
        record.updated_at = Utc::now();
        self.write_record(&record)
    }

    fn read_messages(&self, id: SessionId) -> Result<Vec<StoredMessage>> {
        let path = self.session_dir(id).join(MESSAGES_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(fs::File::open(&path)?);
        let mut messages = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            messages.push(serde_json::from_str(&line)?);
        }
        Ok(messages)
    }

    fn append(&self, id: SessionId, message: &StoredMessage) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut record = self.read_record(id)?;

        let path = self.session_dir(id).join(MESSAGES_FILE);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut line = serde_json::to_string(message)?;
        line.push('\n');
        file.write_all(line.as_bytes())?;
        // Persisted before the caller moves on
        file.sync_all()?;

        record.updated_at = Utc::now();
        self.write_record(&record)
    }

    fn delete(&self, id: SessionId) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.read_record(id)?;
        fs::remove_dir_all(self.session_dir(id))?;
        Ok(())
    }

    /// Find the session holding `message_id`, merge the feedback and rewrite
    /// that session's transcript.
    fn merge_feedback(&self, message_id: MessageId, patch: Map<String, Value>) -> Result<Value> {
        let _guard = self.write_lock.lock();
        for record in self.list()? {
            let mut messages = self.read_messages(record.id)?;
            let Some(message) = messages.iter_mut().find(|m| m.id == message_id) else {
                continue;
            };
            let merged = message.merge_feedback(patch);
            self.write_messages(record.id, &messages)?;
            return Ok(merged);
        }
        Err(SessionError::MessageNotFound(message_id.to_string()))
    }

    fn write_messages(&self, id: SessionId, messages: &[StoredMessage]) -> Result<()> {
        let dir = self.session_dir(id);
        let tmp = dir.join(format!("{MESSAGES_FILE}.tmp"));
        {
            let mut file = fs::File::create(&tmp)?;
            for message in messages {
                let mut line = serde_json::to_string(message)?;
                line.push('\n');
                file.write_all(line.as_bytes())?;
            }
            file.sync_all()?;
        }
        fs::rename(&tmp, dir.join(MESSAGES_FILE))?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<SessionRecord>> {
        let dir = self.sessions_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path().join(SESSION_FILE);
            let parsed = fs::read_to_string(&path)
                .map_err(SessionError::from)
                .and_then(|data| Ok(serde_json::from_str::<SessionRecord>(&data)?));
            match parsed {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable session")
                }
            }
        }
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(records)
    }
}

#[async_trait]
impl SessionStore for JsonlStore {
    async fn create_session(&self, title: &str) -> Result<SessionId> {
        let record = SessionRecord::new(title);
        let id = record.id;
        self.blocking(move |inner| inner.write_record(&record))
            .await?;
        tracing::debug!(session_id = %id, "Created session");
        Ok(id)
    }

    async fn get_session(&self, id: SessionId) -> Result<SessionRecord> {
        self.blocking(move |inner| inner.read_record(id)).await
    }

    async fn list_sessions(&self) -> Result<Vec<SessionRecord>> {
        self.blocking(|inner| inner.list()).await
    }

    async fn append_message(&self, id: SessionId, message: StoredMessage) -> Result<MessageId> {
        let message_id = message.id;
        self.blocking(move |inner| inner.append(id, &message))
            .await?;
        Ok(message_id)
    }

    async fn load_history(&self, id: SessionId) -> Result<Vec<Message>> {
        self.blocking(move |inner| {
            let record = inner.read_record(id)?;
            Ok(inner
                .read_messages(id)?
                .into_iter()
                .skip(record.compacted_through)
                .map(|m| m.message)
                .collect())
        })
        .await
    }

    async fn load_transcript(&self, id: SessionId) -> Result<Vec<StoredMessage>> {
        self.blocking(move |inner| {
            inner.read_record(id)?;
            inner.read_messages(id)
        })
        .await
    }

    async fn update_summary(&self, id: SessionId, summary: &str) -> Result<()> {
        let summary = summary.to_string();
        self.blocking(move |inner| inner.update_record(id, |r| r.summary = Some(summary)))
            .await
    }

    async fn retain_recent(&self, id: SessionId, keep: usize) -> Result<()> {
        self.blocking(move |inner| {
            let total = inner.read_messages(id)?.len();
            inner.update_record(id, |r| r.retain_recent(total, keep))
        })
        .await
    }

    async fn delete_session(&self, id: SessionId) -> Result<()> {
        self.blocking(move |inner| inner.delete(id)).await?;
        tracing::debug!(session_id = %id, "Deleted session");
        Ok(())
    }

    async fn merge_feedback(
        &self,
        message_id: MessageId,
        patch: Map<String, Value>,
    ) -> Result<Value> {
        self.blocking(move |inner| inner.merge_feedback(message_id, patch))
            .await
    }
}
