//! MCP JSON-RPC handler

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::api::error::{error_envelope, success_envelope};
use crate::service::dispatch;
use crate::AppState;

use super::{codes, methods, MCPRequest, MCPResponse};

const PROTOCOL_VERSION: &str = "2024-11-05";

/// Handle one JSON-RPC message posted to `/mcp`
pub async fn mcp_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let request: MCPRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(e) => {
            let response =
                MCPResponse::error(None, codes::PARSE_ERROR, format!("Parse error: {}", e));
            return Json(response).into_response();
        }
    };
    debug!(method = %request.method, "MCP request received");

    // Notifications carry no id and get no body
    if request.id.is_none() && request.method.starts_with("notifications/") {
        return StatusCode::ACCEPTED.into_response();
    }

    Json(handle_mcp_request(request, &state).await).into_response()
}

/// Handle individual MCP request
pub async fn handle_mcp_request(request: MCPRequest, state: &AppState) -> MCPResponse {
    if request.jsonrpc != "2.0" {
        return MCPResponse::error(
            request.id,
            codes::INVALID_REQUEST,
            "jsonrpc must be \"2.0\"".to_string(),
        );
    }

    match request.method.as_str() {
        methods::INITIALIZE => {
            info!("MCP client initialized");
            MCPResponse::success(
                request.id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {
                        "tools": {}
                    },
                    "serverInfo": {
                        "name": "datashell",
                        "version": env!("CARGO_PKG_VERSION")
                    }
                }),
            )
        }

        methods::INITIALIZED | methods::PING => MCPResponse::success(request.id, json!({})),

        methods::LIST_TOOLS => {
            MCPResponse::success(request.id, json!({ "tools": super::get_mcp_tools() }))
        }

        methods::CALL_TOOL => handle_tool_call(request, state).await,

        _ => MCPResponse::error(
            request.id,
            codes::METHOD_NOT_FOUND,
            format!("Method not found: {}", request.method),
        ),
    }
}

/// Handle MCP tool call; service failures come back as `isError` results
async fn handle_tool_call(request: MCPRequest, state: &AppState) -> MCPResponse {
    let params = match &request.params {
        Some(p) => p,
        None => {
            return MCPResponse::error(request.id, codes::INVALID_PARAMS, "Invalid params".to_string())
        }
    };

    let tool_name = match params.get("name").and_then(|v| v.as_str()) {
        Some(n) => n.to_string(),
        None => {
            return MCPResponse::error(
                request.id,
                codes::INVALID_PARAMS,
                "Missing tool name".to_string(),
            )
        }
    };

    let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

    let (body, is_error) = match dispatch(&state.service, &tool_name, arguments).await {
        Ok(payload) => (success_envelope(payload), false),
        Err(e) => {
            debug!(tool = %tool_name, kind = e.kind(), "Tool call failed");
            (error_envelope(&e), true)
        }
    };
    let text = serde_json::to_string_pretty(&body).unwrap_or_else(|_| body.to_string());

    MCPResponse::success(
        request.id,
        json!({
            "content": [{
                "type": "text",
                "text": text
            }],
            "isError": is_error
        }),
    )
}
