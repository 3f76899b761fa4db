//! Message feedback endpoint.

use axum::{
    Json,
    extract::{Path, State},
};
use coda_session::MessageId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ServerError;
use crate::state::AppState;

/// A rating for one assistant answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRequest {
    /// 1 for thumbs up, -1 for thumbs down.
    pub score: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackResponse {
    pub status: String,
    /// The stored feedback after merging, `thoughts` included.
    pub feedback: Value,
}

/// POST /api/v1/messages/{id}/feedback
pub async fn feedback_handler(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    Json(request): Json<FeedbackRequest>,
) -> Result<Json<FeedbackResponse>, ServerError> {
    let id: MessageId = message_id
        .parse()
        .map_err(|_| ServerError::NotFound(format!("Message {message_id} not found")))?;

    let mut patch = Map::new();
    patch.insert("score".to_string(), request.score.into());
    if let Some(comment) = request.comment {
        patch.insert("comment".to_string(), comment.into());
    }

    let feedback = state.store().merge_feedback(id, patch).await?;
    tracing::info!(message_id = %id, score = request.score, "Feedback recorded");
    Ok(Json(FeedbackResponse {
        status: "success".to_string(),
        feedback,
    }))
}
