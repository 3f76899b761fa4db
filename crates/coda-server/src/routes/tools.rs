//! Tool catalog endpoint.

use axum::{Json, extract::State};
use coda_llm::ToolDefinition;
use serde::{Deserialize, Serialize};

use crate::state::AppState;

/// Response for the tool catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListToolsResponse {
    /// Callable tools in name order, as offered to the model.
    pub tools: Vec<ToolDefinition>,
}

/// GET /api/v1/tools
pub async fn list_tools_handler(State(state): State<AppState>) -> Json<ListToolsResponse> {
    Json(ListToolsResponse {
        tools: state.tools().list_callable_tools(),
    })
}
