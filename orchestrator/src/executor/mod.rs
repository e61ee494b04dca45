//! Code execution against a session's kernel worker

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::ExecutionConfig;
use crate::error::{KernelError, KernelResult};
use crate::interp::{Captured, CellMode, OutputSink};
use crate::kernel::{JobOutcome, RunJob, RunReply};
use crate::models::{ExecutionErrorKind, ExecutionRecord};
use crate::session::SessionHandle;

static ANSI_ESCAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])").expect("valid regex"));

/// Strip terminal escapes and cap the text at `max_bytes`
pub fn sanitize_output(text: &str, max_bytes: usize) -> String {
    let clean = ANSI_ESCAPE.replace_all(text, "");
    if clean.len() <= max_bytes {
        return clean.into_owned();
    }
    let mut cut = max_bytes;
    while !clean.is_char_boundary(cut) {
        cut -= 1;
    }
    format!(
        "{}\n... [output truncated: {} bytes omitted]",
        &clean[..cut],
        clean.len() - cut
    )
}

enum Outcome {
    Finished(JobOutcome),
    WorkerLost,
    TimedOut,
}

fn footprint_delta(reply: &RunReply) -> i64 {
    reply.footprint_after as i64 - reply.footprint_before as i64
}

/// Runs code in sessions and records the attempts
pub struct ExecutionEngine {
    config: ExecutionConfig,
}

impl ExecutionEngine {
    pub fn new(config: ExecutionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Execute `code` in `session`.
    ///
    /// Failures inside the code are reported through the returned record.
    /// `Err` means the attempt never reached the kernel.
    pub async fn execute(
        &self,
        session: &SessionHandle,
        code: &str,
        timeout_secs: Option<u64>,
        capture_output: bool,
    ) -> KernelResult<ExecutionRecord> {
        let _lock = if self.config.reject_when_busy {
            session
                .try_acquire_execution_lock()
                .ok_or_else(|| KernelError::Busy {
                    session_id: session.session_id.clone(),
                    reason: "another execution is in progress".to_string(),
                })?
        } else {
            session.acquire_execution_lock().await
        };

        let kernel = session.kernel();
        if kernel.is_busy() {
            let grace = Duration::from_millis(self.config.abandon_grace_ms);
            debug!(session_id = %session.session_id, "Waiting for abandoned run to drain");
            if !kernel.wait_idle(grace).await {
                return Err(KernelError::Busy {
                    session_id: session.session_id.clone(),
                    reason: "a timed-out execution is still running".to_string(),
                });
            }
        }

        let timeout_secs = self.config.effective_timeout(timeout_secs);
        let mode = CellMode::classify(code);
        let buffer = Arc::new(Mutex::new(Captured::default()));
        let output = if capture_output {
            OutputSink::capturing(buffer.clone())
        } else {
            OutputSink::discard()
        };
        let cancel = Arc::new(AtomicBool::new(false));
        let (reply, mut receiver) = oneshot::channel();

        let timestamp = Utc::now();
        let start_time = Instant::now();
        kernel
            .submit(RunJob {
                code: code.to_string(),
                cancel: cancel.clone(),
                output,
                reply,
            })
            .await?;
        let execution_count = session.next_execution();

        debug!(
            session_id = %session.session_id,
            execution_count,
            mode = mode.as_str(),
            timeout_secs,
            "Executing code"
        );

        let mut memory_delta = 0;
        let outcome = match timeout(Duration::from_secs(timeout_secs), &mut receiver).await {
            Ok(Ok(reply)) => {
                memory_delta = footprint_delta(&reply);
                Outcome::Finished(reply.outcome)
            }
            Ok(Err(_)) => Outcome::WorkerLost,
            Err(_) => {
                cancel.store(true, Ordering::SeqCst);
                warn!(
                    session_id = %session.session_id,
                    execution_count,
                    timeout_secs,
                    "Execution timed out"
                );
                let grace = Duration::from_millis(self.config.abandon_grace_ms);
                // A cancelled run that stops within the grace period still reports its footprint
                if let Ok(Ok(reply)) = timeout(grace, &mut receiver).await {
                    memory_delta = footprint_delta(&reply);
                }
                Outcome::TimedOut
            }
        };

        let duration_ms = start_time.elapsed().as_millis() as u64;
        let captured = buffer.lock().unwrap_or_else(PoisonError::into_inner).clone();

        let (success, result, error, error_kind) = match outcome {
            Outcome::Finished(Ok(result)) => (true, result, None, None),
            Outcome::Finished(Err(e)) => (
                false,
                None,
                Some(e.to_string()),
                Some(ExecutionErrorKind::ExecutionError),
            ),
            Outcome::WorkerLost => (
                false,
                None,
                Some("SystemError: kernel worker stopped".to_string()),
                Some(ExecutionErrorKind::ExecutionError),
            ),
            Outcome::TimedOut => (
                false,
                None,
                Some(format!(
                    "TimeoutError: execution exceeded {} seconds",
                    timeout_secs
                )),
                Some(ExecutionErrorKind::TimeoutError),
            ),
        };
        if !success {
            session.increment_errors();
        }

        let max_output = self.config.max_output_bytes;
        let record = ExecutionRecord {
            execution_count,
            timestamp,
            code: code.to_string(),
            mode,
            success,
            stdout: sanitize_output(&captured.stdout, max_output),
            stderr: sanitize_output(&captured.stderr, max_output),
            result: result.map(|r| sanitize_output(&r, max_output)),
            error: error.map(|e| sanitize_output(&e, max_output)),
            error_kind,
            duration_ms,
            memory_delta,
        };

        session.add_execution(record.clone()).await;
        session.touch().await;

        info!(
            session_id = %session.session_id,
            execution_count,
            success,
            error_kind = ?record.error_kind,
            duration_ms,
            "Execution completed"
        );

        Ok(record)
    }
}
