//! search_progress tool implementation.
//!
//! Reads the latest progress record of a search session.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use fieldtally_core::ProgressBoard;

use super::json_result;
use crate::error::ToolError;

/// Parameters for the search_progress tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SearchProgressParams {
    /// Session id passed to `search`.
    pub session_id: String,
}

/// Output from the search_progress tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SearchProgressOutput {
    pub session_id: String,
    /// Requests planned so far; grows once entity expansion is known.
    pub total: u64,
    /// Requests attempted, including failed ones.
    pub completed: u64,
    /// `completed >= total`.
    pub complete: bool,
}

pub async fn progress_impl(board: &ProgressBoard, params: SearchProgressParams) -> Result<CallToolResult, McpError> {
    let state = board
        .read(&params.session_id)
        .await?
        .ok_or_else(|| ToolError::SessionNotFound(params.session_id.clone()))?;

    json_result(&SearchProgressOutput {
        session_id: params.session_id,
        total: state.expected,
        completed: state.completed,
        complete: state.is_complete(),
    })
}
