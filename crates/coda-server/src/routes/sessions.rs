//! Session endpoints: list, read, delete and fork.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use coda_session::{MessageId, SessionId, SessionRecord, StoredMessage};
use serde::{Deserialize, Serialize};

use crate::error::ServerError;
use crate::state::AppState;

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// Response for list sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListSessionsResponse {
    /// Sessions, most recently updated first.
    pub sessions: Vec<SessionRecord>,
    pub total: usize,
}

/// A session with its full transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDetail {
    #[serde(flatten)]
    pub session: SessionRecord,
    /// Every stored message, including those folded into the summary.
    pub messages: Vec<StoredMessage>,
}

/// Body of a fork request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForkSessionRequest {
    /// Last message to copy. The whole transcript is copied when absent.
    #[serde(default)]
    pub message_id: Option<MessageId>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Malformed ids name no session, so they are reported as missing.
fn parse_session_id(raw: &str) -> Result<SessionId, ServerError> {
    raw.parse()
        .map_err(|_| ServerError::NotFound(format!("Session {raw} not found")))
}

/// GET /api/v1/sessions
pub async fn list_sessions_handler(
    State(state): State<AppState>,
) -> Result<Json<ListSessionsResponse>, ServerError> {
    let sessions = state.store().list_sessions().await?;
    let total = sessions.len();
    Ok(Json(ListSessionsResponse { sessions, total }))
}

/// GET /api/v1/sessions/{id}
pub async fn get_session_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionDetail>, ServerError> {
    let id = parse_session_id(&session_id)?;

    let session = state.store().get_session(id).await?;
    let messages = state.store().load_transcript(id).await?;

    Ok(Json(SessionDetail { session, messages }))
}

/// DELETE /api/v1/sessions/{id}
pub async fn delete_session_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ServerError> {
    let id = parse_session_id(&session_id)?;
    state.store().delete_session(id).await?;
    tracing::info!(session_id = %id, "Session deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/sessions/{id}/fork
pub async fn fork_session_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<ForkSessionRequest>,
) -> Result<Json<SessionRecord>, ServerError> {
    let id = parse_session_id(&session_id)?;
    let fork = state.store().fork_session(id, request.message_id).await?;
    tracing::info!(session_id = %id, fork_id = %fork, "Session forked");
    Ok(Json(state.store().get_session(fork).await?))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_state;
    use axum::{
        Router,
        body::Body,
        http::Request,
        routing::{get, post},
    };
    use coda_llm::{Message, MockBackend};
    use coda_session::SessionStore;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn router(state: AppState) -> Router {
        Router::new()
            .route("/sessions", get(list_sessions_handler))
            .route("/sessions/{id}", get(get_session_handler).delete(delete_session_handler))
            .route("/sessions/{id}/fork", post(fork_session_handler))
            .with_state(state)
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_list_sessions() {
        let (state, store) = test_state(Arc::new(MockBackend::with_text("unused")));
        store.create_session("First").await.unwrap();
        let second = store.create_session("Second").await.unwrap();
        store
            .append_message(second, StoredMessage::new(Message::user("bump")))
            .await
            .unwrap();

        let response = router(state).oneshot(get_request("/sessions")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let list: ListSessionsResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(list.total, 2);
        assert_eq!(list.sessions[0].title, "Second");
    }

    #[tokio::test]
    async fn test_get_session_with_transcript() {
        let (state, store) = test_state(Arc::new(MockBackend::with_text("unused")));
        let id = store.create_session("Routing").await.unwrap();
        store
            .append_message(id, StoredMessage::new(Message::user("route 3 trucks")))
            .await
            .unwrap();
        store
            .append_message(
                id,
                StoredMessage::new(Message::assistant("done")).with_token_count(7),
            )
            .await
            .unwrap();

        let response = router(state)
            .oneshot(get_request(&format!("/sessions/{id}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let detail: SessionDetail = serde_json::from_slice(&body).unwrap();
        assert_eq!(detail.session.id, id);
        assert_eq!(detail.session.title, "Routing");
        assert_eq!(detail.messages.len(), 2);
        assert_eq!(detail.messages[1].token_count, Some(7));
    }

    #[tokio::test]
    async fn test_get_unknown_session() {
        let (state, _store) = test_state(Arc::new(MockBackend::with_text("unused")));
        let app = router(state);

        let response = app
            .clone()
            .oneshot(get_request(&format!("/sessions/{}", SessionId::new())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app.oneshot(get_request("/sessions/garbage")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_session() {
        let (state, store) = test_state(Arc::new(MockBackend::with_text("unused")));
        let id = store.create_session("Old").await.unwrap();
        let app = router(state);

        let request = Request::builder()
            .method("DELETE")
            .uri(format!("/sessions/{id}"))
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(store.is_empty());

        let request = Request::builder()
            .method("DELETE")
            .uri(format!("/sessions/{id}"))
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_fork_session() {
        let (state, store) = test_state(Arc::new(MockBackend::with_text("unused")));
        let id = store.create_session("Routing").await.unwrap();
        let first = store
            .append_message(id, StoredMessage::new(Message::user("route 3 trucks")))
            .await
            .unwrap();
        store
            .append_message(id, StoredMessage::new(Message::assistant("done")))
            .await
            .unwrap();
        let app = router(state);

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                &format!("/sessions/{id}/fork"),
                serde_json::json!({"message_id": first}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let fork: SessionRecord = serde_json::from_slice(&body).unwrap();
        assert_ne!(fork.id, id);
        assert_eq!(fork.title, "Fork of Routing");
        assert_eq!(store.load_transcript(fork.id).await.unwrap().len(), 1);

        let response = app
            .oneshot(json_request(
                "POST",
                &format!("/sessions/{}/fork", SessionId::new()),
                serde_json::json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
