//! API routes.

pub mod chat;
pub mod health;
pub mod messages;
pub mod sessions;
pub mod tools;

pub use chat::{ChatRequest, chat_stream_handler};
pub use health::{HealthResponse, health_routes};
pub use messages::{FeedbackRequest, FeedbackResponse, feedback_handler};
pub use sessions::{
    ForkSessionRequest, ListSessionsResponse, SessionDetail, delete_session_handler,
    fork_session_handler, get_session_handler, list_sessions_handler,
};
pub use tools::{ListToolsResponse, list_tools_handler};
