//! Agent core for Coda.
//!
//! This crate provides the tool registry, the agent loop, context compaction
//! and the session orchestrator that ties them to persistence.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  SessionOrchestrator                                        │
//! │  - Resolves backend and session                             │
//! │  - Compacts history, assembles the prompt                   │
//! │  - Persists messages, reports metrics                       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!              ┌───────────────┼───────────────┐
//!              ▼               ▼               ▼
//!       ┌──────────┐    ┌──────────┐    ┌──────────────┐
//!       │AgentLoop │    │Compactor │    │ SessionStore │
//!       │+ToolReg  │    │          │    │(coda-session)│
//!       └──────────┘    └──────────┘    └──────────────┘
//!              │
//!              ▼
//!       ┌──────────┐
//!       │LlmClient │
//!       │(coda-llm)│
//!       └──────────┘
//! ```

pub mod assembler;
pub mod compaction;
pub mod error;
pub mod openapi;
pub mod orchestrator;
pub mod prompt;
pub mod stream;
pub mod tool;

pub use error::{AgentError, Result};

// Tools
pub use openapi::{DEFAULT_TOOL_TIMEOUT, HttpTool, load_tools_dir};
pub use tool::{Tool, ToolError, ToolRegistry, result_status};

// Agent loop
pub use assembler::ToolCallAssembler;
pub use stream::{AgentEvent, AgentLoop, AgentStream, DEFAULT_MAX_ITERATIONS};

// Compaction
pub use compaction::{Compaction, CompactorConfig, ContextCompactor};

// Orchestration
pub use orchestrator::{
    ChatTurn, OrchestratorConfig, SessionOrchestrator, TurnEvent, TurnStream, session_title,
};
pub use prompt::{DEFAULT_SYSTEM_PROMPT, resolve_system_prompt};

pub use tokio_util::sync::CancellationToken;
