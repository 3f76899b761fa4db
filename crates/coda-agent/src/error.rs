//! Error types for the agent crate.

use thiserror::Error;

/// Result type alias using the agent error type.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Error type for agent operations.
///
/// Tool faults never show up here: the registry turns them into result
/// values that the model sees. Everything below ends the current turn.
#[derive(Debug, Error)]
pub enum AgentError {
    /// LLM backend error, at stream start or mid-stream.
    #[error("LLM error: {0}")]
    Llm(#[from] coda_llm::LlmError),

    /// Summarizing older history failed.
    #[error("Compaction failed: {0}")]
    Compaction(String),

    /// Persistence error.
    #[error("Session error: {0}")]
    Session(#[from] coda_session::SessionError),

    /// Tool loading error.
    #[error("Tool error: {0}")]
    Tool(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The turn was cancelled by the caller.
    #[error("Turn cancelled")]
    Cancelled,

    /// The model kept calling tools past the iteration limit.
    #[error("Maximum iterations exceeded: {0}")]
    MaxIterations(u32),
}

impl AgentError {
    /// Create a compaction error.
    pub fn compaction(msg: impl Into<String>) -> Self {
        Self::Compaction(msg.into())
    }

    /// Create a tool error.
    pub fn tool(msg: impl Into<String>) -> Self {
        Self::Tool(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error means the session does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Session(coda_session::SessionError::NotFound(_))
        )
    }
}
