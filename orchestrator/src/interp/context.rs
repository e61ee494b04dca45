//! Per-run context: output capture, cancellation, working directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::error::{EvalError, EvalResult};

pub fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    /// Parse the stream name used by the runtime's `sys.stdout`/`sys.stderr` shims
    pub fn from_name(name: &str) -> Self {
        match name {
            "stderr" => Stream::Stderr,
            _ => Stream::Stdout,
        }
    }
}

/// Output produced by one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captured {
    pub stdout: String,
    pub stderr: String,
}

/// Destination for `print` and shell output; discards when not capturing
#[derive(Debug, Clone, Default)]
pub struct OutputSink {
    buffer: Option<Arc<Mutex<Captured>>>,
}

impl OutputSink {
    pub fn capturing(buffer: Arc<Mutex<Captured>>) -> Self {
        Self {
            buffer: Some(buffer),
        }
    }

    pub fn discard() -> Self {
        Self { buffer: None }
    }

    pub fn write(&self, stream: Stream, text: &str) {
        let Some(buffer) = &self.buffer else { return };
        let mut captured = buffer.lock().unwrap_or_else(PoisonError::into_inner);
        match stream {
            Stream::Stdout => captured.stdout.push_str(text),
            Stream::Stderr => captured.stderr.push_str(text),
        }
    }
}

/// Cancellation flag and output destination of the job on the worker
#[derive(Debug, Clone)]
pub struct RunContext {
    cancel: Arc<AtomicBool>,
    pub output: OutputSink,
}

impl RunContext {
    pub fn new(cancel: Arc<AtomicBool>, output: OutputSink) -> Self {
        Self { cancel, output }
    }

    /// Context used outside of a job: never cancelled, output dropped
    pub fn idle() -> Self {
        Self::new(Arc::new(AtomicBool::new(false)), OutputSink::discard())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Fail with `Interrupted` once the job has been cancelled
    pub fn check(&self) -> EvalResult<()> {
        if self.is_cancelled() {
            Err(EvalError::Interrupted)
        } else {
            Ok(())
        }
    }

    pub fn stdout(&self, text: &str) {
        self.output.write(Stream::Stdout, text);
    }

    pub fn stderr(&self, text: &str) {
        self.output.write(Stream::Stderr, text);
    }
}

/// Working directory and environment overrides of one session
#[derive(Debug, Clone)]
pub struct ShellEnv {
    pub cwd: PathBuf,
    pub vars: BTreeMap<String, String>,
}

pub type SharedEnv = Arc<RwLock<ShellEnv>>;

impl ShellEnv {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            vars: BTreeMap::new(),
        }
    }

    pub fn shared(self) -> SharedEnv {
        Arc::new(RwLock::new(self))
    }

    /// Resolve a user path: `~` expands to the home directory, relative paths join the cwd
    pub fn resolve(&self, path: &str) -> PathBuf {
        let expanded = match path.strip_prefix('~') {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => match self.var("HOME") {
                Some(home) => PathBuf::from(format!("{}{}", home, rest)),
                None => PathBuf::from(path),
            },
            _ => PathBuf::from(path),
        };
        if expanded.is_absolute() {
            expanded
        } else {
            self.cwd.join(expanded)
        }
    }

    /// Session override first, then the process environment
    pub fn var(&self, name: &str) -> Option<String> {
        self.vars
            .get(name)
            .cloned()
            .or_else(|| std::env::var(name).ok())
    }

    /// Process environment merged with session overrides
    pub fn all_vars(&self) -> BTreeMap<String, String> {
        let mut vars: BTreeMap<String, String> = std::env::vars().collect();
        vars.extend(self.vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        vars
    }

    pub fn change_dir(&mut self, target: &Path) -> std::io::Result<PathBuf> {
        let canonical = target.canonicalize()?;
        if !canonical.is_dir() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "not a directory",
            ));
        }
        self.cwd = canonical.clone();
        Ok(canonical)
    }
}
