//! Error taxonomy of the data service

use std::path::PathBuf;

use serde_json::{json, Map, Value as Json};
use thiserror::Error;

use crate::ingest::IngestError;

/// Structural failures returned by every service operation.
///
/// Failures inside user code are not errors at this level: they are recorded
/// in the execution history with kind `ExecutionError` or `TimeoutError`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum KernelError {
    #[error("Session '{session_id}' not found")]
    SessionNotFound { session_id: String },

    #[error("Session '{session_id}' already exists")]
    DuplicateSession { session_id: String },

    #[error("Variable(s) not found in session '{session_id}': {}", names.join(", "))]
    VariableNotFound {
        session_id: String,
        names: Vec<String>,
    },

    #[error("Column '{column}' not found in '{table}'. Available columns: {available:?}")]
    ColumnNotFound {
        session_id: String,
        table: String,
        column: String,
        available: Vec<String>,
    },

    #[error("Variable '{name}' is not a table (found {type_name})")]
    NotATable {
        session_id: String,
        name: String,
        type_name: String,
    },

    #[error("File not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    #[error("Unsupported format '{format}': expected csv, excel or json")]
    UnsupportedFormat { format: String },

    #[error("Failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("Execution in session '{session_id}' timed out after {timeout_secs} seconds")]
    Timeout {
        session_id: String,
        timeout_secs: u64,
    },

    #[error("{message}")]
    Execution { session_id: String, message: String },

    #[error("Session '{session_id}' is busy: {reason}")]
    Busy { session_id: String, reason: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type KernelResult<T> = Result<T, KernelError>;

impl KernelError {
    pub fn session_not_found(session_id: impl Into<String>) -> Self {
        KernelError::SessionNotFound {
            session_id: session_id.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        KernelError::InvalidRequest(message.into())
    }

    /// Stable kind tag used in envelopes and history records
    pub fn kind(&self) -> &'static str {
        match self {
            KernelError::SessionNotFound { .. } => "SessionNotFoundError",
            KernelError::DuplicateSession { .. } => "DuplicateSessionError",
            KernelError::VariableNotFound { .. } => "VariableNotFoundError",
            KernelError::ColumnNotFound { .. } => "ColumnNotFoundError",
            KernelError::NotATable { .. } => "NotATableError",
            KernelError::FileNotFound { .. } => "FileNotFoundError",
            KernelError::UnsupportedFormat { .. } => "UnsupportedFormatError",
            KernelError::Parse { .. } => "ParseError",
            KernelError::Timeout { .. } => "TimeoutError",
            KernelError::Execution { .. } => "ExecutionError",
            KernelError::Busy { .. } => "BusyError",
            KernelError::InvalidRequest(_) => "InvalidRequest",
            KernelError::Internal(_) => "InternalError",
        }
    }

    /// Identifiers involved in the failure
    pub fn context(&self) -> Json {
        let mut context = Map::new();
        let mut put = |key: &str, value: Json| {
            context.insert(key.to_string(), value);
        };
        match self {
            KernelError::SessionNotFound { session_id }
            | KernelError::DuplicateSession { session_id }
            | KernelError::Execution { session_id, .. } => put("session_id", json!(session_id)),
            KernelError::VariableNotFound { session_id, names } => {
                put("session_id", json!(session_id));
                put("variables", json!(names));
            }
            KernelError::ColumnNotFound {
                session_id,
                table,
                column,
                available,
            } => {
                put("session_id", json!(session_id));
                put("table", json!(table));
                put("column", json!(column));
                put("available_columns", json!(available));
            }
            KernelError::NotATable {
                session_id,
                name,
                type_name,
            } => {
                put("session_id", json!(session_id));
                put("variable", json!(name));
                put("type", json!(type_name));
            }
            KernelError::FileNotFound { path } | KernelError::Parse { path, .. } => {
                put("path", json!(path.display().to_string()));
            }
            KernelError::UnsupportedFormat { format } => put("format", json!(format)),
            KernelError::Timeout {
                session_id,
                timeout_secs,
            } => {
                put("session_id", json!(session_id));
                put("timeout_secs", json!(timeout_secs));
            }
            KernelError::Busy { session_id, .. } => put("session_id", json!(session_id)),
            KernelError::InvalidRequest(_) | KernelError::Internal(_) => {}
        }
        Json::Object(context)
    }
}

impl From<IngestError> for KernelError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::NotFound(path) => KernelError::FileNotFound { path },
            IngestError::UnsupportedFormat(format) => KernelError::UnsupportedFormat { format },
            IngestError::InvalidOption(message) => KernelError::InvalidRequest(message),
            IngestError::Parse { path, message } => KernelError::Parse { path, message },
        }
    }
}

impl From<tokio::task::JoinError> for KernelError {
    fn from(err: tokio::task::JoinError) -> Self {
        tracing::error!(error = %err, "Blocking task failed");
        KernelError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_kind_and_context() {
        let err = KernelError::ColumnNotFound {
            session_id: "s1".into(),
            table: "df".into(),
            column: "price".into(),
            available: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.kind(), "ColumnNotFoundError");
        assert_eq!(
            err.context(),
            json!({
                "session_id": "s1",
                "table": "df",
                "column": "price",
                "available_columns": ["a", "b"],
            })
        );
        assert!(err.to_string().contains("Available columns"));
    }

    #[test]
    fn test_variable_not_found_lists_every_name() {
        let err = KernelError::VariableNotFound {
            session_id: "s1".into(),
            names: vec!["x".into(), "y".into()],
        };
        assert_eq!(
            err.to_string(),
            "Variable(s) not found in session 's1': x, y"
        );
    }

    #[test]
    fn test_ingest_errors_map_to_kinds() {
        let missing: KernelError = IngestError::NotFound(PathBuf::from("/nope.csv")).into();
        assert_eq!(missing.kind(), "FileNotFoundError");
        let format: KernelError = IngestError::UnsupportedFormat("parquet".into()).into();
        assert_eq!(format.kind(), "UnsupportedFormatError");
        let option: KernelError = IngestError::InvalidOption("bad".into()).into();
        assert_eq!(option.kind(), "InvalidRequest");
    }
}
