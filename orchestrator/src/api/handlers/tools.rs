//! Tool invocation handlers

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};
use tracing::debug;

use crate::api::error::success_envelope;
use crate::api::ApiError;
use crate::error::KernelError;
use crate::mcp::get_mcp_tools;
use crate::service::dispatch;
use crate::AppState;

/// Run one tool; the body holds its JSON arguments
pub async fn call_tool(
    State(state): State<Arc<AppState>>,
    Path(tool): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let arguments: Value = if body.iter().all(u8::is_ascii_whitespace) {
        json!({})
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| KernelError::invalid(format!("request body is not valid JSON: {}", e)))?
    };
    debug!(tool = %tool, "Tool call");

    let payload = dispatch(&state.service, &tool, arguments).await?;
    Ok(Json(success_envelope(payload)))
}

/// Tool names, descriptions and argument schemas
pub async fn list_tools() -> Json<Value> {
    Json(json!({ "tools": get_mcp_tools() }))
}
