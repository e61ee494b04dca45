//! Model Context Protocol (MCP) surface for datashell
//!
//! JSON-RPC 2.0 over a single HTTP endpoint; every data service operation is
//! exposed as a tool.

pub mod handler;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// MCP JSON-RPC 2.0 Request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MCPRequest {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

/// MCP JSON-RPC 2.0 Response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MCPResponse {
    pub jsonrpc: String,
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<MCPError>,
}

/// MCP Error object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MCPError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl MCPResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(MCPError {
                code,
                message,
                data: None,
            }),
        }
    }
}

/// JSON-RPC error codes
pub mod codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
}

/// MCP method names
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const PING: &str = "ping";
    pub const LIST_TOOLS: &str = "tools/list";
    pub const CALL_TOOL: &str = "tools/call";
}

/// MCP Tool definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MCPTool {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

fn tool(name: &str, description: &str, properties: Value, required: &[&str]) -> MCPTool {
    MCPTool {
        name: name.to_string(),
        description: description.to_string(),
        input_schema: json!({
            "type": "object",
            "properties": properties,
            "required": required,
        }),
    }
}

fn session_id() -> Value {
    json!({ "type": "string", "description": "Target session" })
}

fn variable_name() -> Value {
    json!({ "type": "string", "description": "Variable bound in the session" })
}

/// Tools exposed by datashell, one per data service operation
pub fn get_mcp_tools() -> Vec<MCPTool> {
    vec![
        tool(
            "create_session",
            "Create an isolated execution session",
            json!({
                "session_id": { "type": "string", "description": "Requested ID; generated when omitted" },
                "auto_import": { "type": "boolean", "default": true, "description": "Bind the configured modules" }
            }),
            &[],
        ),
        tool("list_sessions", "List live sessions", json!({}), &[]),
        tool(
            "get_session_status",
            "Detailed state of one session",
            json!({ "session_id": session_id() }),
            &["session_id"],
        ),
        tool(
            "delete_session",
            "Delete a session and stop its worker",
            json!({ "session_id": session_id() }),
            &["session_id"],
        ),
        tool(
            "execute",
            "Run code, a %magic command or a !shell escape in a session",
            json!({
                "code": { "type": "string", "description": "Text to run" },
                "session_id": session_id(),
                "capture_output": { "type": "boolean", "default": true },
                "timeout": { "type": "integer", "minimum": 1, "description": "Seconds" }
            }),
            &["code", "session_id"],
        ),
        tool(
            "get_history",
            "Execution history of a session, most recent last",
            json!({
                "session_id": session_id(),
                "limit": { "type": "integer", "default": 10, "description": "0 returns everything" },
                "include_output": { "type": "boolean", "default": false }
            }),
            &["session_id"],
        ),
        tool(
            "load_file",
            "Load a CSV, Excel or JSON file into a table variable",
            json!({
                "file_path": { "type": "string", "description": "Relative paths resolve against the session directory" },
                "session_id": session_id(),
                "format": { "type": "string", "enum": ["csv", "excel", "json"], "default": "csv" },
                "variable_name": { "type": "string", "description": "Derived from the file name when omitted" },
                "options": {
                    "type": "object",
                    "properties": {
                        "encoding": { "type": "string", "default": "auto" },
                        "delimiter": { "type": "string", "default": "," },
                        "has_header": { "type": "boolean", "default": true },
                        "sheet": { "type": ["string", "integer"], "default": 0 }
                    }
                }
            }),
            &["file_path", "session_id"],
        ),
        tool(
            "list_tables",
            "List table variables in a session",
            json!({ "session_id": session_id() }),
            &["session_id"],
        ),
        tool(
            "describe_table",
            "Shape, columns, dtypes, memory and null counts of a table",
            json!({ "variable_name": variable_name(), "session_id": session_id() }),
            &["variable_name", "session_id"],
        ),
        tool(
            "preview_table",
            "Rows of a table as records",
            json!({
                "variable_name": variable_name(),
                "session_id": session_id(),
                "method": { "type": "string", "enum": ["head", "tail", "sample"], "default": "head" },
                "n_rows": { "type": "integer", "default": 5 }
            }),
            &["variable_name", "session_id"],
        ),
        tool(
            "summarize_table",
            "Descriptive statistics of a table's columns",
            json!({
                "variable_name": variable_name(),
                "session_id": session_id(),
                "include_categorical": { "type": "boolean", "default": true }
            }),
            &["variable_name", "session_id"],
        ),
        tool(
            "sample_column",
            "Bounded sample of one column with optional statistics",
            json!({
                "variable_name": variable_name(),
                "column_name": { "type": "string" },
                "session_id": session_id(),
                "method": { "type": "string", "enum": ["head", "tail", "unique", "random", "mixed"], "default": "mixed" },
                "sample_size": { "type": "integer", "default": 20 },
                "max_text_length": { "type": "integer", "default": 100 },
                "include_stats": { "type": "boolean", "default": true },
                "seed": { "type": "integer" }
            }),
            &["variable_name", "column_name", "session_id"],
        ),
        tool(
            "check_memory",
            "Memory used by a session's variables",
            json!({ "session_id": session_id() }),
            &["session_id"],
        ),
        tool(
            "describe_variable",
            "Type, size and preview of one variable",
            json!({
                "variable_name": variable_name(),
                "session_id": session_id(),
                "include_preview": { "type": "boolean", "default": true }
            }),
            &["variable_name", "session_id"],
        ),
        tool(
            "clear_variables",
            "Remove named variables, or everything",
            json!({
                "session_id": session_id(),
                "variable_names": { "type": "array", "items": { "type": "string" } },
                "clear_all": { "type": "boolean", "default": false },
                "keep_imports": { "type": "boolean", "default": true }
            }),
            &["session_id"],
        ),
    ]
}
