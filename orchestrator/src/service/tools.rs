//! Tool-name dispatch shared by the HTTP routes and the MCP endpoint

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as Json;

use crate::error::{KernelError, KernelResult};
use crate::models::{
    ClearRequest, CreateSessionRequest, ExecuteRequest, HistoryRequest, LoadFileRequest,
    PreviewRequest, SampleRequest, SessionRequest, SummaryRequest, VariableRequest,
};

use super::DataService;

pub const TOOL_NAMES: [&str; 15] = [
    "create_session",
    "list_sessions",
    "get_session_status",
    "delete_session",
    "execute",
    "get_history",
    "load_file",
    "list_tables",
    "describe_table",
    "preview_table",
    "summarize_table",
    "sample_column",
    "check_memory",
    "describe_variable",
    "clear_variables",
];

fn args<T: DeserializeOwned>(tool: &str, arguments: Json) -> KernelResult<T> {
    let arguments = match arguments {
        Json::Null => Json::Object(Default::default()),
        other => other,
    };
    serde_json::from_value(arguments)
        .map_err(|e| KernelError::invalid(format!("invalid arguments for '{}': {}", tool, e)))
}

fn payload<T: Serialize>(value: T) -> KernelResult<Json> {
    serde_json::to_value(value).map_err(|e| KernelError::Internal(e.to_string()))
}

/// Run `tool` with JSON `arguments` and return its JSON payload
pub async fn dispatch(service: &DataService, tool: &str, arguments: Json) -> KernelResult<Json> {
    match tool {
        "create_session" => {
            let req: CreateSessionRequest = args(tool, arguments)?;
            payload(service.create_session(req.session_id, req.auto_import).await?)
        }
        "list_sessions" => payload(service.list_sessions().await?),
        "get_session_status" => {
            let req: SessionRequest = args(tool, arguments)?;
            payload(service.get_session_status(&req.session_id).await?)
        }
        "delete_session" => {
            let req: SessionRequest = args(tool, arguments)?;
            payload(service.delete_session(&req.session_id).await?)
        }
        "execute" => {
            let req: ExecuteRequest = args(tool, arguments)?;
            payload(
                service
                    .execute(&req.code, &req.session_id, req.capture_output, req.timeout)
                    .await?,
            )
        }
        "get_history" => {
            let req: HistoryRequest = args(tool, arguments)?;
            payload(
                service
                    .get_history(&req.session_id, req.limit, req.include_output)
                    .await?,
            )
        }
        "load_file" => {
            let req: LoadFileRequest = args(tool, arguments)?;
            payload(
                service
                    .load_file(
                        &req.file_path,
                        &req.session_id,
                        &req.format,
                        req.variable_name,
                        req.options,
                    )
                    .await?,
            )
        }
        "list_tables" => {
            let req: SessionRequest = args(tool, arguments)?;
            payload(service.list_tables(&req.session_id).await?)
        }
        "describe_table" => {
            let req: VariableRequest = args(tool, arguments)?;
            payload(
                service
                    .describe_table(&req.variable_name, &req.session_id)
                    .await?,
            )
        }
        "preview_table" => {
            let req: PreviewRequest = args(tool, arguments)?;
            payload(
                service
                    .preview_table(&req.variable_name, &req.session_id, req.method, req.n_rows)
                    .await?,
            )
        }
        "summarize_table" => {
            let req: SummaryRequest = args(tool, arguments)?;
            payload(
                service
                    .summarize_table(&req.variable_name, &req.session_id, req.include_categorical)
                    .await?,
            )
        }
        "sample_column" => {
            let req: SampleRequest = args(tool, arguments)?;
            payload(
                service
                    .sample_column(
                        &req.variable_name,
                        &req.column_name,
                        &req.session_id,
                        req.method,
                        req.sample_size,
                        &req.options,
                    )
                    .await?,
            )
        }
        "check_memory" => {
            let req: SessionRequest = args(tool, arguments)?;
            payload(service.check_memory(&req.session_id).await?)
        }
        "describe_variable" => {
            let req: VariableRequest = args(tool, arguments)?;
            payload(
                service
                    .describe_variable(&req.variable_name, &req.session_id, req.include_preview)
                    .await?,
            )
        }
        "clear_variables" => {
            let req: ClearRequest = args(tool, arguments)?;
            payload(
                service
                    .clear_variables(
                        &req.session_id,
                        req.variable_names,
                        req.clear_all,
                        req.keep_imports,
                    )
                    .await?,
            )
        }
        other => Err(KernelError::invalid(format!("unknown tool '{}'", other))),
    }
}
