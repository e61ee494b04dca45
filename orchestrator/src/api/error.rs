//! Response envelopes

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Map, Value};

use crate::error::KernelError;

/// `{"success": true, ...payload}`; non-object payloads land under `result`
pub fn success_envelope(payload: Value) -> Value {
    let mut body = Map::new();
    body.insert("success".to_string(), Value::Bool(true));
    match payload {
        Value::Object(fields) => body.extend(fields),
        other => {
            body.insert("result".to_string(), other);
        }
    }
    Value::Object(body)
}

/// `{"success": false, "error": {kind, message, context}}`
pub fn error_envelope(err: &KernelError) -> Value {
    json!({
        "success": false,
        "error": {
            "kind": err.kind(),
            "message": err.to_string(),
            "context": err.context(),
        }
    })
}

/// A service failure rendered as an HTTP response
#[derive(Debug)]
pub struct ApiError(pub KernelError);

impl From<KernelError> for ApiError {
    fn from(err: KernelError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            KernelError::SessionNotFound { .. }
            | KernelError::VariableNotFound { .. }
            | KernelError::ColumnNotFound { .. }
            | KernelError::FileNotFound { .. } => StatusCode::NOT_FOUND,
            KernelError::DuplicateSession { .. } | KernelError::Busy { .. } => {
                StatusCode::CONFLICT
            }
            KernelError::NotATable { .. }
            | KernelError::UnsupportedFormat { .. }
            | KernelError::Parse { .. }
            | KernelError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            KernelError::Timeout { .. } => StatusCode::REQUEST_TIMEOUT,
            KernelError::Execution { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            KernelError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Internal error");
        }
        (status, Json(error_envelope(&self.0))).into_response()
    }
}
