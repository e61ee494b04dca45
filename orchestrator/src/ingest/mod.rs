//! File ingestion: CSV, Excel and JSON into [`Table`] values.
//!
//! Everything here is synchronous and lock-free; callers run it on a
//! blocking thread and bind the result afterwards.

mod delimited;
mod encoding;
mod excel;
mod json;
pub mod naming;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::table::Table;

pub use self::delimited::read_csv;
pub use self::encoding::{decode, resolve_label, DEFAULT_ENCODINGS};
pub use self::excel::read_excel;
pub use self::json::{read_json, table_from_json};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("No such file or directory: '{}'", .0.display())]
    NotFound(PathBuf),

    #[error("unsupported file format '{0}' (expected csv, excel or json)")]
    UnsupportedFormat(String),

    #[error("{0}")]
    InvalidOption(String),

    #[error("failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },
}

impl IngestError {
    pub fn parse(path: &Path, message: impl fmt::Display) -> Self {
        IngestError::Parse {
            path: path.to_path_buf(),
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Csv,
    Excel,
    Json,
}

impl SourceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::Csv => "csv",
            SourceFormat::Excel => "excel",
            SourceFormat::Json => "json",
        }
    }
}

impl FromStr for SourceFormat {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(SourceFormat::Csv),
            "excel" | "xlsx" | "xls" => Ok(SourceFormat::Excel),
            "json" => Ok(SourceFormat::Json),
            other => Err(IngestError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Worksheet selector for Excel sources
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SheetSelector {
    Index(usize),
    Name(String),
}

impl Default for SheetSelector {
    fn default() -> Self {
        SheetSelector::Index(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadOptions {
    /// Text encoding label, or `auto`
    pub encoding: String,
    pub delimiter: char,
    pub has_header: bool,
    pub sheet: SheetSelector,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            encoding: "auto".to_string(),
            delimiter: ',',
            has_header: true,
            sheet: SheetSelector::default(),
        }
    }
}

/// A parsed source, not yet bound to a name
#[derive(Debug, Clone)]
pub struct ParsedTable {
    pub table: Table,
    pub encoding: Option<String>,
    pub sheet: Option<String>,
}

/// Read `path` as `format`. `encodings` is the priority list tried for `auto`.
pub fn read_table(
    path: &Path,
    format: SourceFormat,
    options: &LoadOptions,
    encodings: &[String],
) -> Result<ParsedTable, IngestError> {
    if !path.is_file() {
        return Err(IngestError::NotFound(path.to_path_buf()));
    }
    debug!(path = %path.display(), format = format.as_str(), "reading table source");

    match format {
        SourceFormat::Csv => {
            if !options.encoding.eq_ignore_ascii_case("auto")
                && resolve_label(&options.encoding).is_none()
            {
                return Err(IngestError::InvalidOption(format!(
                    "unknown encoding: {}",
                    options.encoding
                )));
            }
            if !options.delimiter.is_ascii() {
                return Err(IngestError::InvalidOption(format!(
                    "delimiter must be a single ASCII character, got {:?}",
                    options.delimiter
                )));
            }
            let bytes = std::fs::read(path).map_err(|e| IngestError::parse(path, e))?;
            let (table, encoding) = read_csv(&bytes, options, encodings)
                .map_err(|message| IngestError::parse(path, message))?;
            Ok(ParsedTable {
                table,
                encoding: Some(encoding),
                sheet: None,
            })
        }
        SourceFormat::Excel => {
            let (table, sheet) = read_excel(path, &options.sheet)?;
            Ok(ParsedTable {
                table,
                encoding: None,
                sheet: Some(sheet),
            })
        }
        SourceFormat::Json => {
            let bytes = std::fs::read(path).map_err(|e| IngestError::parse(path, e))?;
            let table = read_json(&bytes).map_err(|message| IngestError::parse(path, message))?;
            Ok(ParsedTable {
                table,
                encoding: None,
                sheet: None,
            })
        }
    }
}
