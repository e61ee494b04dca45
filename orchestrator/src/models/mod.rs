//! Data models for the datashell orchestrator
//!
//! Tool arguments and the payloads every data service operation returns.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use crate::ingest::LoadOptions;
use crate::interp::{CellMode, Classification};
use crate::table::Table;

/// Bytes to megabytes, rounded to `places` decimals
pub fn to_mb(bytes: u64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (bytes as f64 / 1024.0 / 1024.0 * factor).round() / factor
}

/// Column name → dtype, in column order
pub fn dtype_map(table: &Table) -> Map<String, Json> {
    table
        .columns()
        .iter()
        .map(|c| (c.name.clone(), Json::from(c.dtype.as_str())))
        .collect()
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Session Models
// ============================================================================

/// Arguments of `create_session`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub session_id: Option<String>,

    #[serde(default = "default_true")]
    pub auto_import: bool,
}

/// A module that could not be bound at session creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportFailure {
    pub module: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionResult {
    pub session_id: String,
    pub auto_imported: Vec<String>,
    pub import_failures: Vec<ImportFailure>,
}

/// Session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Active,
    Busy,
}

/// One row of `list_sessions`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub status: SessionState,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    pub execution_count: u64,
    pub error_count: u64,
    /// `None` while a cell is running
    pub variable_count: Option<usize>,
    pub memory_usage_mb: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionList {
    pub sessions: Vec<SessionSummary>,
    pub total_sessions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryUsage {
    pub total_mb: f64,
    pub total_bytes: u64,
    pub breakdown: BTreeMap<Classification, f64>,
}

/// Detailed state of one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatusReport {
    pub session_id: String,
    pub status: SessionState,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    pub execution_count: u64,
    pub error_count: u64,
    pub working_dir: String,
    pub auto_imported: Vec<String>,
    pub memory_usage: MemoryUsage,
    /// Visible variables per classification
    pub variable_summary: BTreeMap<Classification, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteSessionResult {
    pub session_id: String,
}

/// Arguments of the tools that only name a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRequest {
    pub session_id: String,
}

// ============================================================================
// Execution Models
// ============================================================================

/// Arguments of `execute`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    /// Code, magic command or shell escape to run
    pub code: String,

    pub session_id: String,

    #[serde(default = "default_true")]
    pub capture_output: bool,

    /// Seconds; the configured default applies when absent
    #[serde(default)]
    pub timeout: Option<u64>,
}

/// Failure class of an execution attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionErrorKind {
    ExecutionError,
    TimeoutError,
}

/// Immutable log entry of one execution attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_count: u64,
    pub timestamp: DateTime<Utc>,
    pub code: String,
    pub mode: CellMode,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub result: Option<String>,
    pub error: Option<String>,
    pub error_kind: Option<ExecutionErrorKind>,
    pub duration_ms: u64,
    /// Signed change of the session's variable footprint
    pub memory_delta: i64,
}

/// Arguments of `get_history`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRequest {
    pub session_id: String,

    #[serde(default = "default_history_limit")]
    pub limit: usize,

    #[serde(default)]
    pub include_output: bool,
}

fn default_history_limit() -> usize {
    10
}

/// History entry as returned to callers; output fields are omitted on request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub execution_count: u64,
    pub timestamp: DateTime<Utc>,
    pub code: String,
    pub mode: CellMode,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    pub error: Option<String>,
    pub error_kind: Option<ExecutionErrorKind>,
    pub duration_ms: u64,
    pub memory_delta: i64,
}

impl HistoryEntry {
    pub fn from_record(record: &ExecutionRecord, include_output: bool) -> Self {
        let output = |text: &str| include_output.then(|| text.to_string());
        Self {
            execution_count: record.execution_count,
            timestamp: record.timestamp,
            code: record.code.clone(),
            mode: record.mode,
            success: record.success,
            stdout: output(&record.stdout),
            stderr: output(&record.stderr),
            result: record.result.clone().filter(|_| include_output),
            error: record.error.clone(),
            error_kind: record.error_kind,
            duration_ms: record.duration_ms,
            memory_delta: record.memory_delta,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryResult {
    pub history: Vec<HistoryEntry>,
    pub total_executions: usize,
}

// ============================================================================
// Data Models
// ============================================================================

/// Arguments of `load_file`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadFileRequest {
    pub file_path: String,
    pub session_id: String,

    /// `csv`, `excel` or `json`
    #[serde(default = "default_format")]
    pub format: String,

    #[serde(default)]
    pub variable_name: Option<String>,

    #[serde(default)]
    pub options: LoadOptions,
}

fn default_format() -> String {
    "csv".to_string()
}

/// Outcome of binding a file into a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableLoadResult {
    pub variable_name: String,
    pub file_path: String,
    pub format: String,
    pub shape: [usize; 2],
    pub columns: Vec<String>,
    pub dtypes: Map<String, Json>,
    pub memory_bytes: u64,
    pub memory_usage_mb: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sheet_name: Option<String>,
    pub load_time_ms: u64,
}

/// One table in `list_tables`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub shape: [usize; 2],
    pub memory_bytes: u64,
    pub memory_mb: f64,
    /// First ten column names
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableList {
    pub tables: Vec<TableInfo>,
    pub total_tables: usize,
    pub total_memory_mb: f64,
}

/// Arguments of the tools that name one variable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableRequest {
    pub variable_name: String,
    pub session_id: String,

    #[serde(default = "default_true")]
    pub include_preview: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMemory {
    pub total_mb: f64,
    pub total_bytes: u64,
    pub per_column_kb: Map<String, Json>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexInfo {
    #[serde(rename = "type")]
    pub kind: String,
    pub start: Option<usize>,
    pub stop: Option<usize>,
    pub step: usize,
}

/// Metadata of one table variable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub variable_name: String,
    pub shape: [usize; 2],
    pub columns: Vec<String>,
    pub dtypes: Map<String, Json>,
    pub memory_usage: TableMemory,
    pub null_counts: Map<String, Json>,
    pub index_info: IndexInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PreviewMethod {
    #[default]
    Head,
    Tail,
    Sample,
}

impl PreviewMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreviewMethod::Head => "head",
            PreviewMethod::Tail => "tail",
            PreviewMethod::Sample => "sample",
        }
    }
}

/// Arguments of `preview_table`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewRequest {
    pub variable_name: String,
    pub session_id: String,

    #[serde(default)]
    pub method: PreviewMethod,

    #[serde(default = "default_preview_rows")]
    pub n_rows: usize,
}

fn default_preview_rows() -> usize {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewResult {
    pub variable_name: String,
    pub method: PreviewMethod,
    pub n_rows: usize,
    pub data: Vec<Map<String, Json>>,
    pub total_rows: usize,
}

/// Arguments of `summarize_table`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryRequest {
    pub variable_name: String,
    pub session_id: String,

    #[serde(default = "default_true")]
    pub include_categorical: bool,
}

/// `describe()` of a table, split by column kind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSummaryStats {
    pub variable_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numeric_summary: Option<Map<String, Json>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categorical_summary: Option<Map<String, Json>>,
}

// ============================================================================
// Sampling Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SampleMethod {
    Head,
    Tail,
    Unique,
    Random,
    #[default]
    Mixed,
}

impl SampleMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleMethod::Head => "head",
            SampleMethod::Tail => "tail",
            SampleMethod::Unique => "unique",
            SampleMethod::Random => "random",
            SampleMethod::Mixed => "mixed",
        }
    }
}

/// Arguments of `sample_column`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleRequest {
    pub variable_name: String,
    pub column_name: String,
    pub session_id: String,

    #[serde(default)]
    pub method: SampleMethod,

    #[serde(default = "default_sample_size")]
    pub sample_size: usize,

    #[serde(flatten)]
    pub options: SampleOptions,
}

fn default_sample_size() -> usize {
    20
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleOptions {
    /// Truncation length for rendered values; the configured default applies when absent
    pub max_text_length: Option<usize>,
    pub include_stats: bool,
    /// Makes `random` and `mixed` deterministic
    pub seed: Option<u64>,
}

impl Default for SampleOptions {
    fn default() -> Self {
        Self {
            max_text_length: None,
            include_stats: true,
            seed: None,
        }
    }
}

/// One sampled cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampledValue {
    /// Row position in the column
    pub index: usize,
    pub value: Option<String>,
    pub original_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub std: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextStats {
    pub min_length: usize,
    pub max_length: usize,
    pub avg_length: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnStatistics {
    pub non_null_count: usize,
    pub unique_count: usize,
    pub duplicate_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numeric_stats: Option<NumericStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_stats: Option<TextStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleResult {
    pub variable_name: String,
    pub column_name: String,
    pub method: SampleMethod,
    pub dtype: String,
    pub total_rows: usize,
    pub null_count: usize,
    pub sample_size: usize,
    pub sample_data: Vec<SampledValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistics: Option<ColumnStatistics>,
}

// ============================================================================
// Variable Models
// ============================================================================

/// One visible binding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableInfo {
    pub name: String,
    pub classification: Classification,
    #[serde(rename = "type")]
    pub type_name: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizeInfo {
    pub size_bytes: u64,
    pub memory_mb: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<Vec<usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_count: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDescriptor {
    pub variable_name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub classification: Classification,
    pub size_info: SizeInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_preview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_info: Option<Json>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableMemory {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub classification: Classification,
    pub size_bytes: u64,
    pub memory_mb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMemory {
    pub available_mb: f64,
    pub used_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryReport {
    pub session_id: String,
    pub total_bytes: u64,
    pub total_memory_mb: f64,
    /// Megabytes per classification
    pub breakdown: BTreeMap<Classification, f64>,
    pub top_variables: Vec<VariableMemory>,
    pub system_memory: SystemMemory,
}

/// Arguments of `clear_variables`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearRequest {
    pub session_id: String,

    #[serde(default)]
    pub variable_names: Option<Vec<String>>,

    #[serde(default)]
    pub clear_all: bool,

    #[serde(default = "default_true")]
    pub keep_imports: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClearResult {
    pub cleared_variables: Vec<String>,
    pub memory_freed_bytes: u64,
    pub memory_freed_mb: f64,
    pub remaining_variables: usize,
}

// ============================================================================
// Health Models
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub active_sessions: usize,
}
