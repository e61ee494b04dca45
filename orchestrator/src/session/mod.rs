//! Session state and the registry that owns it

mod registry;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::KernelResult;
use crate::interp::context::read_lock;
use crate::interp::SharedEnv;
use crate::kernel::KernelHandle;
use crate::models::{
    to_mb, ExecutionRecord, HistoryEntry, MemoryUsage, SessionState, SessionStatusReport,
    SessionSummary,
};
use crate::store::{breakdown, classification_counts, VariableStore};

pub use registry::{SessionRegistry, SessionSettings};

/// An isolated execution context with its own kernel worker
#[derive(Debug)]
pub struct Session {
    /// Unique session ID
    pub session_id: String,

    /// Creation order among all sessions of the registry
    pub sequence: u64,

    /// When the session was created
    pub created_at: DateTime<Utc>,

    /// Modules bound at creation
    pub auto_imported: Vec<String>,

    /// When the session last ran, loaded or cleared anything
    last_used: RwLock<DateTime<Utc>>,

    /// Execution attempts that reached the kernel
    execution_count: AtomicU64,

    /// Attempts that failed or timed out
    error_count: AtomicU64,

    /// Execution history, in counter order
    history: RwLock<Vec<ExecutionRecord>>,

    /// Read-through view of the namespace
    store: VariableStore,

    /// Working directory and environment overrides
    env: SharedEnv,

    /// The worker owning this session's interpreter
    kernel: Arc<KernelHandle>,

    /// Lock for execution (only one at a time per session)
    execution_lock: tokio::sync::Mutex<()>,
}

impl Session {
    pub fn new(
        session_id: String,
        sequence: u64,
        auto_imported: Vec<String>,
        store: VariableStore,
        env: SharedEnv,
        kernel: Arc<KernelHandle>,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            sequence,
            created_at: now,
            auto_imported,
            last_used: RwLock::new(now),
            execution_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            history: RwLock::new(Vec::new()),
            store,
            env,
            kernel,
            execution_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Update last-used timestamp
    pub async fn touch(&self) {
        *self.last_used.write().await = Utc::now();
    }

    pub async fn last_used(&self) -> DateTime<Utc> {
        *self.last_used.read().await
    }

    /// Claim the next execution counter value
    pub fn next_execution(&self) -> u64 {
        self.execution_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Increment error counter
    pub fn increment_errors(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn execution_count(&self) -> u64 {
        self.execution_count.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Append a record to the history
    pub async fn add_execution(&self, record: ExecutionRecord) {
        self.history.write().await.push(record);
    }

    /// The last `limit` entries (all when `limit` is 0) and the total count
    pub async fn history(&self, limit: usize, include_output: bool) -> (Vec<HistoryEntry>, usize) {
        let history = self.history.read().await;
        let start = if limit == 0 {
            0
        } else {
            history.len().saturating_sub(limit)
        };
        let entries = history[start..]
            .iter()
            .map(|r| HistoryEntry::from_record(r, include_output))
            .collect();
        (entries, history.len())
    }

    pub fn store(&self) -> &VariableStore {
        &self.store
    }

    pub fn env(&self) -> &SharedEnv {
        &self.env
    }

    pub fn kernel(&self) -> &KernelHandle {
        &self.kernel
    }

    pub fn working_dir(&self) -> PathBuf {
        read_lock(&self.env).cwd.clone()
    }

    /// Acquire execution lock (ensures one execution at a time)
    pub async fn acquire_execution_lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.execution_lock.lock().await
    }

    /// Try to acquire execution lock without blocking
    pub fn try_acquire_execution_lock(&self) -> Option<tokio::sync::MutexGuard<'_, ()>> {
        self.execution_lock.try_lock().ok()
    }

    fn state(&self) -> SessionState {
        if self.kernel.is_busy() {
            SessionState::Busy
        } else {
            SessionState::Active
        }
    }

    /// Counts are left empty while a cell holds the worker
    pub async fn summary(&self) -> SessionSummary {
        let bindings = match self.state() {
            SessionState::Busy => None,
            SessionState::Active => self.store.bindings().await.ok(),
        };
        SessionSummary {
            session_id: self.session_id.clone(),
            status: self.state(),
            created_at: self.created_at,
            last_used: self.last_used().await,
            execution_count: self.execution_count(),
            error_count: self.error_count(),
            variable_count: bindings.as_ref().map(Vec::len),
            memory_usage_mb: bindings
                .as_ref()
                .map(|b| to_mb(b.iter().map(|b| b.size_bytes).sum(), 2)),
        }
    }

    pub async fn status_report(&self) -> KernelResult<SessionStatusReport> {
        let bindings = self.store.bindings().await?;
        let breakdown = breakdown(&bindings);
        let total_bytes: u64 = breakdown.values().sum();
        Ok(SessionStatusReport {
            session_id: self.session_id.clone(),
            status: self.state(),
            created_at: self.created_at,
            last_used: self.last_used().await,
            execution_count: self.execution_count(),
            error_count: self.error_count(),
            working_dir: self.working_dir().display().to_string(),
            auto_imported: self.auto_imported.clone(),
            memory_usage: MemoryUsage {
                total_mb: to_mb(total_bytes, 2),
                total_bytes,
                breakdown: breakdown
                    .into_iter()
                    .map(|(class, bytes)| (class, to_mb(bytes, 3)))
                    .collect(),
            },
            variable_summary: classification_counts(&bindings),
        })
    }
}

/// Thread-safe session handle
pub type SessionHandle = Arc<Session>;
