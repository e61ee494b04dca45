//! Interpreter error types.

use std::fmt;

/// A failure raised while running a cell.
///
/// `Raised` carries the Python exception class name; `Interrupted` is produced
/// when the cancel flag of the running job was observed.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    Raised { kind: String, message: String },
    Interrupted,
}

impl EvalError {
    pub fn raise(kind: impl Into<String>, message: impl Into<String>) -> Self {
        EvalError::Raised {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::raise("UsageError", message)
    }

    /// Failure of the embedded runtime itself rather than of user code
    pub fn system(message: impl Into<String>) -> Self {
        Self::raise("SystemError", message)
    }

    pub fn os_error(err: &std::io::Error, path: &str) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::raise(
                "FileNotFoundError",
                format!("[Errno 2] No such file or directory: '{}'", path),
            ),
            _ => Self::raise("OSError", format!("{}: '{}'", err, path)),
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            EvalError::Raised { kind, .. } => kind,
            EvalError::Interrupted => "KeyboardInterrupt",
        }
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::Raised { kind, message } if message.is_empty() => f.write_str(kind),
            EvalError::Raised { kind, message } => write!(f, "{}: {}", kind, message),
            EvalError::Interrupted => write!(f, "KeyboardInterrupt: execution cancelled"),
        }
    }
}

impl std::error::Error for EvalError {}

pub type EvalResult<T> = Result<T, EvalError>;
