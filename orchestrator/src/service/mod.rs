//! The caller-facing data service.
//!
//! Every operation resolves its session through the registry first, so a
//! deleted or unknown session always surfaces as `SessionNotFoundError`
//! before any other validation.

mod tools;

use std::path::PathBuf;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::{Map, Value as Json};
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::error::{KernelError, KernelResult};
use crate::executor::ExecutionEngine;
use crate::ingest::naming::{base_variable_name, is_valid_identifier, unique_name};
use crate::ingest::{read_table, LoadOptions, SourceFormat};
use crate::interp::context::read_lock;
use crate::models::{
    dtype_map, to_mb, ClearResult, CreateSessionResult, DeleteSessionResult, ExecutionRecord,
    HealthResponse, HistoryResult, MemoryReport, PreviewMethod, PreviewResult, SampleMethod,
    SampleOptions, SampleResult, SessionList, SessionStatusReport, TableDescriptor, TableList,
    TableLoadResult, TableSummaryStats, VariableDescriptor,
};
use crate::sampling;
use crate::session::{SessionHandle, SessionRegistry, SessionSettings};
use crate::table::stats::{categorical_summary, numeric_summary};

pub use tools::{dispatch, TOOL_NAMES};

/// Sessions, execution and inspection behind one facade
pub struct DataService {
    config: AppConfig,
    registry: SessionRegistry,
    engine: ExecutionEngine,
    started_at: Instant,
}

impl DataService {
    pub fn new(config: AppConfig) -> Self {
        Self {
            registry: SessionRegistry::new(SessionSettings::from(&config)),
            engine: ExecutionEngine::new(config.execution.clone()),
            config,
            started_at: Instant::now(),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    async fn session(&self, session_id: &str) -> KernelResult<SessionHandle> {
        self.registry.get(session_id).await
    }

    // ------------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------------

    pub async fn create_session(
        &self,
        session_id: Option<String>,
        auto_import: bool,
    ) -> KernelResult<CreateSessionResult> {
        let (session, import_failures) = self.registry.create(session_id, auto_import).await?;
        Ok(CreateSessionResult {
            session_id: session.session_id.clone(),
            auto_imported: session.auto_imported.clone(),
            import_failures,
        })
    }

    pub async fn list_sessions(&self) -> KernelResult<SessionList> {
        let sessions = self.registry.list().await;
        Ok(SessionList {
            total_sessions: sessions.len(),
            sessions,
        })
    }

    pub async fn get_session_status(&self, session_id: &str) -> KernelResult<SessionStatusReport> {
        self.session(session_id).await?.status_report().await
    }

    pub async fn delete_session(&self, session_id: &str) -> KernelResult<DeleteSessionResult> {
        self.registry.delete(session_id).await?;
        Ok(DeleteSessionResult {
            session_id: session_id.to_string(),
        })
    }

    // ------------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------------

    pub async fn execute(
        &self,
        code: &str,
        session_id: &str,
        capture_output: bool,
        timeout_secs: Option<u64>,
    ) -> KernelResult<ExecutionRecord> {
        let session = self.session(session_id).await?;
        self.engine
            .execute(&session, code, timeout_secs, capture_output)
            .await
    }

    pub async fn get_history(
        &self,
        session_id: &str,
        limit: usize,
        include_output: bool,
    ) -> KernelResult<HistoryResult> {
        let session = self.session(session_id).await?;
        let (history, total_executions) = session.history(limit, include_output).await;
        Ok(HistoryResult {
            history,
            total_executions,
        })
    }

    // ------------------------------------------------------------------------
    // Data
    // ------------------------------------------------------------------------

    /// Parse a file off the async runtime, then bind it under the execution lock
    pub async fn load_file(
        &self,
        file_path: &str,
        session_id: &str,
        format: &str,
        variable_name: Option<String>,
        options: LoadOptions,
    ) -> KernelResult<TableLoadResult> {
        let session = self.session(session_id).await?;
        let format: SourceFormat = format.parse()?;
        if let Some(name) = &variable_name {
            if !is_valid_identifier(name) {
                return Err(KernelError::invalid(format!(
                    "'{}' is not a valid variable name",
                    name
                )));
            }
        }

        let path: PathBuf = read_lock(session.env()).resolve(file_path);
        let encodings = self.config.ingest.encodings.clone();
        let start_time = Instant::now();
        let parsed = {
            let path = path.clone();
            tokio::task::spawn_blocking(move || read_table(&path, format, &options, &encodings))
                .await??
        };
        let load_time_ms = start_time.elapsed().as_millis() as u64;

        let table = parsed.table;
        let shape = [table.nrows(), table.ncols()];
        let columns = table.column_names();
        let dtypes = dtype_map(&table);
        let memory_bytes = table.footprint_bytes();

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let base = base_variable_name(&stem);
        let variable_name = {
            let _lock = session.acquire_execution_lock().await;
            session
                .store()
                .with_interpreter(move |interp| {
                    let name = variable_name
                        .unwrap_or_else(|| unique_name(&base, |candidate| interp.contains(candidate)));
                    interp.bind_table(&name, &table)?;
                    Ok(name)
                })
                .await?
        };
        session.touch().await;

        info!(
            session_id = %session_id,
            variable = %variable_name,
            path = %path.display(),
            format = format.as_str(),
            rows = shape[0],
            columns = shape[1],
            load_time_ms,
            "Table loaded"
        );

        Ok(TableLoadResult {
            variable_name,
            file_path: path.display().to_string(),
            format: format.as_str().to_string(),
            shape,
            columns,
            dtypes,
            memory_bytes,
            memory_usage_mb: to_mb(memory_bytes, 2),
            encoding: parsed.encoding,
            sheet_name: parsed.sheet,
            load_time_ms,
        })
    }

    pub async fn list_tables(&self, session_id: &str) -> KernelResult<TableList> {
        self.session(session_id).await?.store().list_tables().await
    }

    pub async fn describe_table(
        &self,
        variable_name: &str,
        session_id: &str,
    ) -> KernelResult<TableDescriptor> {
        self.session(session_id)
            .await?
            .store()
            .describe_table(variable_name)
            .await
    }

    /// Up to `n_rows` rows as records, capped by `sampling.max_preview_rows`
    pub async fn preview_table(
        &self,
        variable_name: &str,
        session_id: &str,
        method: PreviewMethod,
        n_rows: usize,
    ) -> KernelResult<PreviewResult> {
        let session = self.session(session_id).await?;
        let table = session.store().table(variable_name).await?;
        let total_rows = table.nrows();
        let n = n_rows.min(self.config.sampling.max_preview_rows).min(total_rows);

        let rows: Vec<usize> = match method {
            PreviewMethod::Head => (0..n).collect(),
            PreviewMethod::Tail => (total_rows - n..total_rows).collect(),
            PreviewMethod::Sample => {
                let mut rng = StdRng::from_entropy();
                let mut picked = rand::seq::index::sample(&mut rng, total_rows, n).into_vec();
                picked.sort_unstable();
                picked
            }
        };
        let data = table.records(&rows);

        Ok(PreviewResult {
            variable_name: variable_name.to_string(),
            method,
            n_rows: data.len(),
            data,
            total_rows,
        })
    }

    /// Per-column statistics, numeric and categorical columns reported apart
    pub async fn summarize_table(
        &self,
        variable_name: &str,
        session_id: &str,
        include_categorical: bool,
    ) -> KernelResult<TableSummaryStats> {
        let session = self.session(session_id).await?;
        let table = session.store().table(variable_name).await?;

        let mut numeric = Map::new();
        let mut categorical = Map::new();
        for column in table.columns() {
            if let Some(summary) = numeric_summary(column) {
                numeric.insert(column.name.clone(), to_json(&summary)?);
            } else if include_categorical && !column.dtype.is_numeric() {
                categorical.insert(column.name.clone(), to_json(&categorical_summary(column))?);
            }
        }

        Ok(TableSummaryStats {
            variable_name: variable_name.to_string(),
            numeric_summary: (!numeric.is_empty()).then_some(numeric),
            categorical_summary: (!categorical.is_empty()).then_some(categorical),
        })
    }

    pub async fn sample_column(
        &self,
        variable_name: &str,
        column_name: &str,
        session_id: &str,
        method: SampleMethod,
        sample_size: usize,
        options: &SampleOptions,
    ) -> KernelResult<SampleResult> {
        let session = self.session(session_id).await?;
        sampling::sample(
            session.store(),
            variable_name,
            column_name,
            method,
            sample_size,
            options,
            &self.config.sampling,
        )
        .await
    }

    pub async fn check_memory(&self, session_id: &str) -> KernelResult<MemoryReport> {
        self.session(session_id).await?.store().memory_report().await
    }

    pub async fn describe_variable(
        &self,
        variable_name: &str,
        session_id: &str,
        include_preview: bool,
    ) -> KernelResult<VariableDescriptor> {
        self.session(session_id)
            .await?
            .store()
            .describe(variable_name, include_preview)
            .await
    }

    /// Remove bindings while no execution is running in the session
    pub async fn clear_variables(
        &self,
        session_id: &str,
        variable_names: Option<Vec<String>>,
        clear_all: bool,
        keep_imports: bool,
    ) -> KernelResult<ClearResult> {
        let session = self.session(session_id).await?;
        let result = {
            let _lock = session.acquire_execution_lock().await;
            session
                .store()
                .clear(variable_names.as_deref(), clear_all, keep_imports)
                .await?
        };
        session.touch().await;
        debug!(
            session_id = %session_id,
            cleared = result.cleared_variables.len(),
            "Clear completed"
        );
        Ok(result)
    }

    // ------------------------------------------------------------------------
    // Process
    // ------------------------------------------------------------------------

    pub async fn health(&self) -> HealthResponse {
        HealthResponse {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
            active_sessions: self.registry.count().await,
        }
    }

    /// Stop every session worker
    pub async fn shutdown(&self) {
        self.registry.shutdown_all().await;
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> KernelResult<Json> {
    serde_json::to_value(value).map_err(|e| KernelError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests;
