//! Streaming chat endpoint.
//!
//! `POST /api/v1/chat/stream` runs one turn and relays its events as
//! Server-Sent Events. Each `data:` line carries one JSON object, and a
//! successful turn ends with `data: [DONE]`.
//!
//! The turn runs in its own task and forwards events over a channel. When
//! the client goes away the task cancels the turn but keeps draining it, so
//! a tool call already in flight still finishes and is stored.

use std::convert::Infallible;

use axum::{
    Json,
    extract::State,
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
};
use coda_agent::{ChatTurn, TurnEvent, TurnStream};
use coda_llm::{ApiKeys, Message};
use coda_session::SessionId;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ServerError;
use crate::state::AppState;

/// Per-request OpenAI key header.
pub const OPENAI_KEY_HEADER: &str = "x-openai-api-key";
/// Per-request Anthropic key header.
pub const ANTHROPIC_KEY_HEADER: &str = "x-anthropic-api-key";
/// Per-request Google key header.
pub const GOOGLE_KEY_HEADER: &str = "x-google-api-key";

const EVENT_BUFFER: usize = 64;

// ─────────────────────────────────────────────────────────────────────────────
// Request Types
// ─────────────────────────────────────────────────────────────────────────────

/// Request body for the chat stream endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Session to continue. A new session is created when absent.
    #[serde(default)]
    pub session_id: Option<String>,

    /// New messages for this turn.
    pub messages: Vec<Message>,

    /// Model identifier. Falls back to the server's default model.
    #[serde(default)]
    pub model: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/chat/stream
pub async fn chat_stream_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ServerError> {
    if request.messages.is_empty() {
        return Err(ServerError::BadRequest(
            "messages must not be empty".to_string(),
        ));
    }

    let model = request
        .model
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| state.config.default_model.clone());

    let mut turn = ChatTurn::new(model, request.messages).with_api_keys(api_keys(&headers));
    if let Some(raw) = request.session_id.as_deref() {
        // A malformed id can never name a stored session.
        let id: SessionId = raw
            .parse()
            .map_err(|_| ServerError::NotFound(format!("Session {raw} not found")))?;
        turn = turn.with_session(id);
    }

    let cancellation = CancellationToken::new();
    let events = state
        .orchestrator
        .start_turn(turn, cancellation.clone())
        .await?;

    let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
    tokio::spawn(forward_events(events, tx, cancellation));

    let sse_stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            yield Ok(Event::default().data(event.to_data()));
        }
    };

    Ok(Sse::new(sse_stream).keep_alive(KeepAlive::default()))
}

/// Drive a turn to completion, relaying events while the client listens.
async fn forward_events(
    mut events: TurnStream,
    tx: mpsc::Sender<TurnEvent>,
    cancellation: CancellationToken,
) {
    while let Some(event) = events.next().await {
        if cancellation.is_cancelled() {
            continue;
        }
        if tx.send(event).await.is_err() {
            tracing::info!("Client disconnected, cancelling turn");
            cancellation.cancel();
        }
    }
}

/// Per-request provider keys from request headers.
fn api_keys(headers: &HeaderMap) -> ApiKeys {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    ApiKeys {
        openai: header(OPENAI_KEY_HEADER),
        anthropic: header(ANTHROPIC_KEY_HEADER),
        google: header(GOOGLE_KEY_HEADER),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
