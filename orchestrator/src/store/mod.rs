//! Read-through view over a session namespace.
//!
//! Nothing here is cached: every call runs a short inspection job on the
//! session's kernel worker and recomputes classification and footprint from
//! the interpreter globals as they are right now. Inspections queue behind a
//! running cell and fail with `BusyError` once the configured wait elapses.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value as Json};
use sysinfo::System;
use tracing::debug;

use crate::error::{KernelError, KernelResult};
use crate::interp::{Binding, Classification, EvalResult, Interpreter};
use crate::kernel::KernelHandle;
use crate::models::{
    dtype_map, to_mb, ClearResult, IndexInfo, MemoryReport, SizeInfo, SystemMemory, TableDescriptor,
    TableInfo, TableList, TableMemory, VariableDescriptor, VariableInfo, VariableMemory,
};
use crate::table::Table;

/// Preview length for non-table values
const PREVIEW_CHARS: usize = 200;
/// Preview length for a table's `head(5)` rendering
const TABLE_PREVIEW_CHARS: usize = 2000;
const TOP_VARIABLES: usize = 10;
const LISTED_COLUMNS: usize = 10;

fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Host memory as seen by the operating system
pub fn system_memory() -> SystemMemory {
    let mut sys = System::new();
    sys.refresh_memory();
    let total = sys.total_memory();
    let used_percent = if total == 0 {
        0.0
    } else {
        (sys.used_memory() as f64 / total as f64 * 1000.0).round() / 10.0
    };
    SystemMemory {
        available_mb: to_mb(sys.available_memory(), 1),
        used_percent,
    }
}

fn info_of(binding: &Binding) -> VariableInfo {
    VariableInfo {
        name: binding.name.clone(),
        classification: binding.classification(),
        type_name: binding.type_name.clone(),
        size_bytes: binding.size_bytes,
    }
}

/// Visible variable count per classification
pub fn classification_counts(bindings: &[Binding]) -> BTreeMap<Classification, usize> {
    let mut counts = BTreeMap::new();
    for binding in bindings {
        *counts.entry(binding.classification()).or_insert(0) += 1;
    }
    counts
}

/// Footprint per classification, in bytes
pub fn breakdown(bindings: &[Binding]) -> BTreeMap<Classification, u64> {
    let mut breakdown = BTreeMap::new();
    for binding in bindings {
        *breakdown.entry(binding.classification()).or_insert(0) += binding.size_bytes;
    }
    breakdown
}

/// What a clear removed, or the names that were missing
type ClearOutcome = Result<(Vec<String>, u64, usize), Vec<String>>;

fn clear_in(
    interp: &mut Interpreter,
    names: Option<Vec<String>>,
    keep_imports: bool,
) -> EvalResult<ClearOutcome> {
    let bindings = interp.bindings()?;
    let targets: Vec<&Binding> = match &names {
        None => bindings
            .iter()
            .filter(|b| !(keep_imports && b.imported))
            .collect(),
        Some(names) => {
            let unique: BTreeSet<&String> = names.iter().collect();
            let missing: Vec<String> = unique
                .into_iter()
                .filter(|n| !bindings.iter().any(|b| &b.name == *n))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Ok(Err(missing));
            }
            let mut picked: Vec<&Binding> = Vec::new();
            for binding in names.iter().filter_map(|n| bindings.iter().find(|b| &b.name == n)) {
                if !picked.iter().any(|p| p.name == binding.name) {
                    picked.push(binding);
                }
            }
            picked
        }
    };

    let cleared: Vec<String> = targets.iter().map(|b| b.name.clone()).collect();
    let freed = targets.iter().map(|b| b.size_bytes).sum();
    interp.remove(&cleared)?;
    let remaining = bindings.len() - cleared.len();
    Ok(Ok((cleared, freed, remaining)))
}

/// Variable inspection for one session
#[derive(Debug, Clone)]
pub struct VariableStore {
    session_id: String,
    kernel: Arc<KernelHandle>,
    wait: Duration,
}

impl VariableStore {
    pub fn new(session_id: impl Into<String>, kernel: Arc<KernelHandle>, wait: Duration) -> Self {
        Self {
            session_id: session_id.into(),
            kernel,
            wait,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn not_found(&self, names: Vec<String>) -> KernelError {
        KernelError::VariableNotFound {
            session_id: self.session_id.clone(),
            names,
        }
    }

    /// Run `f` on the worker that owns the interpreter
    pub async fn with_interpreter<T, F>(&self, f: F) -> KernelResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Interpreter) -> EvalResult<T> + Send + 'static,
    {
        self.kernel
            .inspect(self.wait, f)
            .await?
            .map_err(|e| KernelError::Internal(format!("namespace inspection failed: {}", e)))
    }

    /// Every visible binding, ordered by name
    pub async fn bindings(&self) -> KernelResult<Vec<Binding>> {
        self.with_interpreter(|interp| interp.bindings()).await
    }

    /// Current binding of a visible name
    pub async fn binding(&self, name: &str) -> KernelResult<Binding> {
        let key = name.to_string();
        let found = self
            .with_interpreter(move |interp| interp.binding(&key))
            .await?;
        found.ok_or_else(|| self.not_found(vec![name.to_string()]))
    }

    /// Whether `name` is bound at all, private names included
    pub async fn contains(&self, name: &str) -> KernelResult<bool> {
        let key = name.to_string();
        self.with_interpreter(move |interp| Ok(interp.contains(&key)))
            .await
    }

    /// Copy of the table bound to `name`, or `NotATableError`
    pub async fn table(&self, name: &str) -> KernelResult<Table> {
        let key = name.to_string();
        let (binding, table) = self
            .with_interpreter(move |interp| {
                let binding = interp.binding(&key)?;
                let table = match &binding {
                    Some(b) if b.classification() == Classification::Table => interp.table(&key)?,
                    _ => None,
                };
                Ok((binding, table))
            })
            .await?;
        let binding = binding.ok_or_else(|| self.not_found(vec![name.to_string()]))?;
        table.ok_or_else(|| KernelError::NotATable {
            session_id: self.session_id.clone(),
            name: name.to_string(),
            type_name: binding.type_name,
        })
    }

    /// Bind `table` to `name`, replacing whatever was there
    pub async fn bind_table(&self, name: &str, table: Table) -> KernelResult<()> {
        let key = name.to_string();
        self.with_interpreter(move |interp| interp.bind_table(&key, &table))
            .await
    }

    pub async fn snapshot(&self) -> KernelResult<Vec<VariableInfo>> {
        Ok(self.bindings().await?.iter().map(info_of).collect())
    }

    pub async fn list_tables(&self) -> KernelResult<TableList> {
        let tables: Vec<TableInfo> = self
            .bindings()
            .await?
            .into_iter()
            .filter(|b| b.classification() == Classification::Table)
            .map(|b| {
                let (rows, cols) = match b.shape.as_deref() {
                    Some([rows, cols]) => (*rows, *cols),
                    _ => (0, 0),
                };
                TableInfo {
                    shape: [rows, cols],
                    memory_bytes: b.size_bytes,
                    memory_mb: to_mb(b.size_bytes, 2),
                    columns: b
                        .columns
                        .unwrap_or_default()
                        .into_iter()
                        .take(LISTED_COLUMNS)
                        .collect(),
                    name: b.name,
                }
            })
            .collect();
        let total_bytes: u64 = tables.iter().map(|t| t.memory_bytes).sum();
        Ok(TableList {
            total_tables: tables.len(),
            total_memory_mb: to_mb(total_bytes, 2),
            tables,
        })
    }

    pub async fn describe(&self, name: &str, include_preview: bool) -> KernelResult<VariableDescriptor> {
        let key = name.to_string();
        let (binding, preview) = self
            .with_interpreter(move |interp| {
                let binding = interp.binding(&key)?;
                let preview = match (&binding, include_preview) {
                    (Some(_), true) => Some(interp.preview(&key)?),
                    _ => None,
                };
                Ok((binding, preview))
            })
            .await?;
        let binding = binding.ok_or_else(|| self.not_found(vec![name.to_string()]))?;

        let classification = binding.classification();
        let mut size_info = SizeInfo {
            size_bytes: binding.size_bytes,
            memory_mb: to_mb(binding.size_bytes, 3),
            shape: binding.shape.clone(),
            element_count: binding.length,
        };
        let mut additional_info = None;
        if let (Some(shape), Some(columns)) = (&binding.shape, &binding.columns) {
            size_info.element_count = Some(shape.iter().product());
            let dtypes: Map<String, Json> = binding
                .dtypes
                .iter()
                .flatten()
                .map(|(column, dtype)| (column.clone(), json!(dtype)))
                .collect();
            additional_info = Some(json!({ "columns": columns, "dtypes": dtypes }));
        } else if let Some((column, dtype)) = &binding.column {
            additional_info = Some(json!({ "name": column, "dtype": dtype }));
        }
        let limit = if classification == Classification::Table {
            TABLE_PREVIEW_CHARS
        } else {
            PREVIEW_CHARS
        };

        Ok(VariableDescriptor {
            variable_name: name.to_string(),
            type_name: binding.type_name,
            classification,
            size_info,
            content_preview: preview.map(|text| truncate_chars(&text, limit)),
            additional_info,
        })
    }

    /// Full metadata of a table variable
    pub async fn describe_table(&self, name: &str) -> KernelResult<TableDescriptor> {
        let table = self.table(name).await?;
        let total_bytes = table.footprint_bytes();
        let per_column_kb: Map<String, Json> = table
            .columns()
            .iter()
            .map(|c| {
                let kb = (c.footprint_bytes() as f64 / 1024.0 * 10.0).round() / 10.0;
                (c.name.clone(), json!(kb))
            })
            .collect();
        let null_counts: Map<String, Json> = table
            .columns()
            .iter()
            .map(|c| (c.name.clone(), json!(c.null_count())))
            .collect();
        let nrows = table.nrows();

        Ok(TableDescriptor {
            variable_name: name.to_string(),
            shape: [nrows, table.ncols()],
            columns: table.column_names(),
            dtypes: dtype_map(&table),
            memory_usage: TableMemory {
                total_mb: to_mb(total_bytes, 2),
                total_bytes,
                per_column_kb,
            },
            null_counts,
            index_info: IndexInfo {
                kind: "RangeIndex".to_string(),
                start: (nrows > 0).then_some(0),
                stop: nrows.checked_sub(1),
                step: 1,
            },
        })
    }

    /// Remove bindings. With `clear_all`, `names` is ignored and `keep_imports`
    /// preserves modules and native builtins. A named clear is all or nothing.
    pub async fn clear(
        &self,
        names: Option<&[String]>,
        clear_all: bool,
        keep_imports: bool,
    ) -> KernelResult<ClearResult> {
        let names = if clear_all {
            None
        } else {
            match names {
                Some(names) if !names.is_empty() => Some(names.to_vec()),
                _ => {
                    return Err(KernelError::invalid(
                        "Must specify either variable_names or set clear_all=true",
                    ))
                }
            }
        };

        let outcome = self
            .with_interpreter(move |interp| clear_in(interp, names, keep_imports))
            .await?;
        let (cleared, freed, remaining) = outcome.map_err(|missing| self.not_found(missing))?;

        debug!(
            session_id = %self.session_id,
            cleared = cleared.len(),
            freed_bytes = freed,
            "Variables cleared"
        );
        Ok(ClearResult {
            cleared_variables: cleared,
            memory_freed_bytes: freed,
            memory_freed_mb: to_mb(freed, 2),
            remaining_variables: remaining,
        })
    }

    pub async fn memory_report(&self) -> KernelResult<MemoryReport> {
        let bindings = self.bindings().await?;
        let total_bytes: u64 = bindings.iter().map(|b| b.size_bytes).sum();
        let breakdown = breakdown(&bindings)
            .into_iter()
            .map(|(class, bytes)| (class, to_mb(bytes, 3)))
            .collect();

        let mut top: Vec<VariableInfo> = bindings.iter().map(info_of).collect();
        top.sort_by(|a, b| b.size_bytes.cmp(&a.size_bytes).then_with(|| a.name.cmp(&b.name)));
        let top_variables = top
            .into_iter()
            .take(TOP_VARIABLES)
            .map(|v| VariableMemory {
                memory_mb: to_mb(v.size_bytes, 3),
                name: v.name,
                type_name: v.type_name,
                classification: v.classification,
                size_bytes: v.size_bytes,
            })
            .collect();

        Ok(MemoryReport {
            session_id: self.session_id.clone(),
            total_bytes,
            total_memory_mb: to_mb(total_bytes, 3),
            breakdown,
            top_variables,
            system_memory: system_memory(),
        })
    }
}
