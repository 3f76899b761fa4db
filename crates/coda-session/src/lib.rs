//! Session persistence for Coda.
//!
//! A session is an append-only transcript of neutral [`coda_llm::Message`]s
//! with storage metadata, a running summary, and a compaction watermark that
//! separates summarized messages from the working history.
//!
//! Two [`SessionStore`] implementations are provided:
//!
//! - [`MemoryStore`]: a map behind a lock, for tests and ephemeral runs
//! - [`JsonlStore`]: one directory per session with a JSONL transcript

pub mod error;
pub mod jsonl;
pub mod memory;
pub mod store;
pub mod types;

pub use error::{Result, SessionError};
pub use jsonl::JsonlStore;
pub use memory::MemoryStore;
pub use store::{SessionStore, SharedStore};
pub use types::{MessageId, SessionId, SessionRecord, StoredMessage};
