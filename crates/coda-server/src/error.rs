//! HTTP-facing errors and their JSON bodies.
//!
//! Errors only surface this way before a chat stream starts. Once SSE is
//! flowing, failures travel as `error` events instead.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use coda_agent::AgentError;
use coda_llm::LlmError;
use coda_session::SessionError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Internal(String),

    #[error(transparent)]
    Agent(AgentError),

    #[error(transparent)]
    Session(SessionError),

    /// Provider failed before the first byte was streamed.
    #[error(transparent)]
    Llm(LlmError),
}

impl From<SessionError> for ServerError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound(id) => Self::NotFound(format!("Session {id} not found")),
            SessionError::MessageNotFound(id) => Self::NotFound(format!("Message {id} not found")),
            other => Self::Session(other),
        }
    }
}

impl From<LlmError> for ServerError {
    fn from(err: LlmError) -> Self {
        match err {
            // No key for the model's provider: the caller can fix this.
            LlmError::Config(msg) => Self::BadRequest(msg),
            other => Self::Llm(other),
        }
    }
}

impl From<AgentError> for ServerError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::Session(inner) => inner.into(),
            AgentError::Llm(inner) => inner.into(),
            other => Self::Agent(other),
        }
    }
}

/// JSON body of every non-2xx response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable machine-readable code, e.g. `not_found`.
    pub code: String,
    pub message: String,
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Llm(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) | Self::Agent(_) | Self::Session(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Internal(_) => "internal_error",
            Self::Agent(_) => "agent_error",
            Self::Session(_) => "storage_error",
            Self::Llm(_) => "llm_error",
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };

        if status.is_server_error() {
            tracing::error!(%status, code = %body.code, error = %body.message, "request failed");
        } else {
            tracing::warn!(%status, code = %body.code, error = %body.message, "request rejected");
        }
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_error_classification() {
        let missing: ServerError = AgentError::Session(SessionError::not_found("abc")).into();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        assert_eq!(missing.to_string(), "Session abc not found");

        let no_key: ServerError =
            AgentError::Llm(LlmError::Config("ANTHROPIC_API_KEY not set".into())).into();
        assert_eq!(no_key.status(), StatusCode::BAD_REQUEST);
        assert_eq!(no_key.to_string(), "ANTHROPIC_API_KEY not set");

        let upstream: ServerError = AgentError::Llm(LlmError::Backend("503".into())).into();
        assert_eq!((upstream.status(), upstream.code()), (StatusCode::BAD_GATEWAY, "llm_error"));

        let message: ServerError = SessionError::MessageNotFound("m1".into()).into();
        assert_eq!((message.status(), message.to_string().as_str()), (StatusCode::NOT_FOUND, "Message m1 not found"));

        let other: ServerError = AgentError::compaction("empty").into();
        assert_eq!(other.code(), "agent_error");
    }

    #[tokio::test]
    async fn test_error_body() {
        let response = ServerError::BadRequest("messages must not be empty".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = axum::body::to_bytes(response.into_body(), 4096).await.unwrap();
        let body: ErrorResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.code, "bad_request");
        assert_eq!(body.message, "messages must not be empty");
    }
}
