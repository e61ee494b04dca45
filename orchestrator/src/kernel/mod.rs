//! Kernel workers
//!
//! Every session owns one worker: a dedicated OS thread that builds and owns
//! the session's [`Interpreter`] and runs jobs it receives over a channel.
//! The async side never touches the interpreter directly: cells go in as
//! [`Job::Run`], namespace reads and writes as [`Job::Inspect`] closures.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{KernelError, KernelResult};
use crate::interp::{
    EvalError, EvalResult, InterpSettings, Interpreter, OutputSink, RunContext, SharedEnv,
};

/// Worker thread stack; the VM recurses per Python frame
const KERNEL_STACK_BYTES: usize = 64 * 1024 * 1024;

/// Pending jobs per worker. Runs are serialized upstream; inspections queue behind them
const QUEUE_DEPTH: usize = 16;

/// Display form of the final value, or the error raised by the cell
pub type JobOutcome = EvalResult<Option<String>>;

/// What a finished run reports back
#[derive(Debug, Clone, PartialEq)]
pub struct RunReply {
    pub outcome: JobOutcome,
    /// Namespace footprint before and after the cell, in bytes
    pub footprint_before: u64,
    pub footprint_after: u64,
}

/// Run one cell
pub struct RunJob {
    pub code: String,
    pub cancel: Arc<AtomicBool>,
    pub output: OutputSink,
    pub reply: oneshot::Sender<RunReply>,
}

type InspectFn = Box<dyn FnOnce(&mut Interpreter) + Send>;

/// One unit of work for a kernel worker
pub enum Job {
    Run(RunJob),
    Inspect(InspectFn),
}

/// Async handle to a session's worker thread
#[derive(Debug)]
pub struct KernelHandle {
    session_id: String,
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    /// Set while a run (possibly an abandoned one) is queued or on the worker
    busy: Arc<AtomicBool>,
    idle: Arc<Notify>,
    /// Cancel flag of the run currently on the worker
    current: Arc<Mutex<Option<Arc<AtomicBool>>>>,
}

impl KernelHandle {
    /// Start the worker thread for `session_id`. The interpreter is built on
    /// that thread; this returns once it is ready.
    pub async fn spawn(
        session_id: &str,
        env: SharedEnv,
        settings: InterpSettings,
    ) -> KernelResult<Self> {
        let (sender, receiver) = mpsc::channel(QUEUE_DEPTH);
        let (ready_tx, ready_rx) = oneshot::channel();
        let busy = Arc::new(AtomicBool::new(false));
        let idle = Arc::new(Notify::new());
        let current = Arc::new(Mutex::new(None));

        let id = session_id.to_string();
        let (worker_busy, worker_idle, worker_current) = (busy.clone(), idle.clone(), current.clone());
        thread::Builder::new()
            .name(format!("kernel-{}", session_id))
            .stack_size(KERNEL_STACK_BYTES)
            .spawn(move || {
                let interpreter = match Interpreter::new(env, settings) {
                    Ok(interpreter) => interpreter,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                Worker {
                    session_id: id,
                    interpreter,
                    receiver,
                    busy: worker_busy,
                    idle: worker_idle,
                    current: worker_current,
                }
                .run();
            })
            .map_err(|e| KernelError::Internal(format!("failed to spawn kernel thread: {}", e)))?;

        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => {
                return Err(KernelError::Internal(format!(
                    "interpreter failed to start: {}",
                    reason
                )))
            }
            Err(_) => {
                return Err(KernelError::Internal(
                    "kernel thread exited during startup".to_string(),
                ))
            }
        }

        info!(session_id = %session_id, "Kernel worker started");
        Ok(Self {
            session_id: session_id.to_string(),
            sender: Mutex::new(Some(sender)),
            busy,
            idle,
            current,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Whether a run (possibly an abandoned one) is still on the worker
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Wait until no run is on the worker, for at most `grace`
    pub async fn wait_idle(&self, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.is_busy() {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return !self.is_busy();
            }
        }
    }

    fn sender(&self) -> KernelResult<mpsc::Sender<Job>> {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| KernelError::session_not_found(&self.session_id))
    }

    fn stopped(&self) -> KernelError {
        KernelError::Internal(format!(
            "kernel worker for session '{}' has stopped",
            self.session_id
        ))
    }

    /// Queue a run on the worker
    pub async fn submit(&self, job: RunJob) -> KernelResult<()> {
        let sender = self.sender()?;
        self.busy.store(true, Ordering::SeqCst);
        if sender.send(Job::Run(job)).await.is_err() {
            self.busy.store(false, Ordering::SeqCst);
            return Err(self.stopped());
        }
        Ok(())
    }

    /// Run `f` against the interpreter on the worker thread. Fails with
    /// `BusyError` when the worker does not get to it within `wait`.
    pub async fn inspect<T, F>(&self, wait: Duration, f: F) -> KernelResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Interpreter) -> T + Send + 'static,
    {
        let sender = self.sender()?;
        let (tx, rx) = oneshot::channel();
        let job = Job::Inspect(Box::new(move |interpreter: &mut Interpreter| {
            let _ = tx.send(f(interpreter));
        }));
        let deadline = Instant::now() + wait;
        let busy = || KernelError::Busy {
            session_id: self.session_id.clone(),
            reason: "the session is still executing code".to_string(),
        };

        match tokio::time::timeout_at(deadline, sender.send(job)).await {
            Err(_) => return Err(busy()),
            Ok(Err(_)) => return Err(self.stopped()),
            Ok(Ok(())) => {}
        }
        match tokio::time::timeout_at(deadline, rx).await {
            Err(_) => Err(busy()),
            Ok(Err(_)) => Err(KernelError::Internal(
                "kernel worker dropped an inspection".to_string(),
            )),
            Ok(Ok(value)) => Ok(value),
        }
    }

    /// Raise the cancel flag of the running job, if any
    pub fn cancel_current(&self) {
        if let Some(flag) = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            flag.store(true, Ordering::SeqCst);
        }
    }

    /// Cancel the running job and close the channel. The thread exits once
    /// the running job returns; it is not joined.
    pub fn shutdown(&self) {
        self.cancel_current();
        let closed = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some();
        if closed {
            debug!(session_id = %self.session_id, "Kernel channel closed");
        }
    }
}

impl Drop for KernelHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker {
    session_id: String,
    interpreter: Interpreter,
    receiver: mpsc::Receiver<Job>,
    busy: Arc<AtomicBool>,
    idle: Arc<Notify>,
    current: Arc<Mutex<Option<Arc<AtomicBool>>>>,
}

impl Worker {
    fn set_current(&self, flag: Option<Arc<AtomicBool>>) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = flag;
    }

    fn run(mut self) {
        while let Some(job) = self.receiver.blocking_recv() {
            match job {
                Job::Run(run) => self.run_cell(run),
                Job::Inspect(f) => {
                    let interpreter = &mut self.interpreter;
                    if catch_unwind(AssertUnwindSafe(|| f(interpreter))).is_err() {
                        error!(session_id = %self.session_id, "Inspection panicked");
                    }
                }
            }
        }
        info!(session_id = %self.session_id, "Kernel worker stopped");
    }

    fn run_cell(&mut self, job: RunJob) {
        self.set_current(Some(job.cancel.clone()));
        let ctx = RunContext::new(job.cancel.clone(), job.output.clone());

        let interpreter = &mut self.interpreter;
        let footprint_before = interpreter.footprint();
        let outcome = catch_unwind(AssertUnwindSafe(|| interpreter.run_cell(&job.code, &ctx)))
            .unwrap_or_else(|_| {
                error!(session_id = %self.session_id, "Interpreter panicked");
                Err(EvalError::system("internal interpreter failure"))
            });
        let footprint_after = self.interpreter.footprint();

        self.set_current(None);
        self.busy.store(false, Ordering::SeqCst);
        self.idle.notify_waiters();
        let reply = RunReply {
            outcome,
            footprint_before,
            footprint_after,
        };
        if job.reply.send(reply).is_err() {
            warn!(session_id = %self.session_id, "Job finished after its caller gave up");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::{Captured, ShellEnv};
    use pretty_assertions::assert_eq;
    use tokio_test::assert_ok;

    async fn spawn_kernel(dir: &std::path::Path) -> KernelHandle {
        KernelHandle::spawn(
            "session_kernel",
            ShellEnv::new(dir).shared(),
            InterpSettings::default(),
        )
        .await
        .unwrap()
    }

    fn run_job(code: &str, output: OutputSink) -> (RunJob, oneshot::Receiver<RunReply>) {
        let (reply, rx) = oneshot::channel();
        let job = RunJob {
            code: code.to_string(),
            cancel: Arc::new(AtomicBool::new(false)),
            output,
            reply,
        };
        (job, rx)
    }

    async fn run(kernel: &KernelHandle, code: &str) -> (RunReply, Captured) {
        let buffer = Arc::new(Mutex::new(Captured::default()));
        let (job, rx) = run_job(code, OutputSink::capturing(buffer.clone()));
        assert_ok!(kernel.submit(job).await);
        let reply = rx.await.unwrap();
        let captured = buffer.lock().unwrap().clone();
        (reply, captured)
    }

    #[tokio::test]
    async fn test_state_persists_between_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let kernel = spawn_kernel(dir.path()).await;
        let (first, _) = run(&kernel, "x = 41").await;
        assert_eq!(first.outcome, Ok(None));
        assert_eq!(first.footprint_before, 0);
        assert_eq!(first.footprint_after, 28);
        let (second, captured) = run(&kernel, "print('hi')\nx + 1").await;
        assert_eq!(second.outcome, Ok(Some("42".to_string())));
        assert_eq!(captured.stdout, "hi\n");
        assert!(!kernel.is_busy());
    }

    #[tokio::test]
    async fn test_inspect_sees_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let kernel = spawn_kernel(dir.path()).await;
        run(&kernel, "greeting = 'hello'").await;
        let names = kernel
            .inspect(Duration::from_secs(5), |interp| {
                interp
                    .bindings()
                    .map(|b| b.into_iter().map(|b| b.name).collect::<Vec<_>>())
            })
            .await
            .unwrap();
        assert_eq!(names, Ok(vec!["greeting".to_string()]));
    }

    #[tokio::test]
    async fn test_inspect_behind_long_run_is_busy() {
        let dir = tempfile::tempdir().unwrap();
        let kernel = spawn_kernel(dir.path()).await;
        let (job, rx) = run_job("import time\ntime.sleep(30)", OutputSink::discard());
        assert_ok!(kernel.submit(job).await);

        let err = kernel
            .inspect(Duration::from_millis(100), |interp| interp.footprint())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "BusyError");

        kernel.cancel_current();
        let reply = tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.outcome, Err(EvalError::Interrupted));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_running_job() {
        let dir = tempfile::tempdir().unwrap();
        let kernel = spawn_kernel(dir.path()).await;
        let (job, rx) = run_job("import time\ntime.sleep(30)", OutputSink::discard());
        assert_ok!(kernel.submit(job).await);
        assert!(kernel.is_busy());

        tokio::time::sleep(Duration::from_millis(50)).await;
        kernel.cancel_current();
        let reply = tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.outcome, Err(EvalError::Interrupted));
        assert!(kernel.wait_idle(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_fails() {
        let dir = tempfile::tempdir().unwrap();
        let kernel = spawn_kernel(dir.path()).await;
        kernel.shutdown();
        let (job, _rx) = run_job("1", OutputSink::discard());
        let err = kernel.submit(job).await.unwrap_err();
        assert_eq!(err.kind(), "SessionNotFoundError");
        let err = kernel
            .inspect(Duration::from_secs(1), |interp| interp.footprint())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "SessionNotFoundError");
    }
}
