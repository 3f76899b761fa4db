//! LLM provider abstraction for Coda.
//!
//! This crate defines the neutral conversation model (OpenAI chat shape) and
//! the [`LlmBackend`] trait every provider adapter implements. Adapters turn
//! a provider's streaming response into a sequence of [`ProviderEvent`]s:
//! text deltas, tool-call fragments keyed by position index, and usage
//! reports.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  LlmBackend trait                            │
//! │  - stream(history, model, tools) -> events   │
//! │  - count_tokens(text)                        │
//! └──────────────────────────────────────────────┘
//!                      │
//!      ┌───────────────┼───────────────┐
//!      ▼               ▼               ▼
//! ┌─────────┐    ┌───────────┐    ┌────────┐
//! │ OpenAI  │    │ Anthropic │    │ Gemini │
//! │ (tools) │    │  (text)   │    │ (text) │
//! └─────────┘    └───────────┘    └────────┘
//! ```
//!
//! [`LlmClient`] chooses the adapter from the model identifier.

pub mod backend;
pub mod client;
pub mod error;
pub mod types;

mod http;
mod sse;

// Provider implementations
pub mod anthropic;
pub mod gemini;
pub mod openai;

pub use backend::{
    LlmBackend, MockBackend, MockRequest, ProviderEvent, ResponseStream, SharedBackend,
    estimate_tokens, with_retry,
};
pub use error::{LlmError, Result};
pub use types::{Message, Role, ToolCall, ToolDefinition, ToolStatus};

// Re-export provider configs
pub use anthropic::{AnthropicBackend, AnthropicConfig};
pub use gemini::{GeminiBackend, GeminiConfig};
pub use openai::{OpenAiBackend, OpenAiConfig};

// Re-export client
pub use client::{ApiKeys, LlmClient, LlmClientConfig, Provider};
