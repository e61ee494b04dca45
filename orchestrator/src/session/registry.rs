//! Session registry

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::{KernelError, KernelResult};
use crate::interp::{InterpSettings, ShellEnv};
use crate::kernel::KernelHandle;
use crate::models::{ImportFailure, SessionSummary};
use crate::store::VariableStore;

use super::{Session, SessionHandle};

const MAX_SESSION_ID_LEN: usize = 128;

/// How long creation waits for auto-imports on a fresh worker
const IMPORT_WAIT: Duration = Duration::from_secs(60);

/// What the registry needs from the configuration
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub auto_import: Vec<String>,
    pub workspace_dir: Option<PathBuf>,
    pub encodings: Vec<String>,
    /// How long namespace inspections wait behind a running cell
    pub inspect_wait: Duration,
}

impl From<&AppConfig> for SessionSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            auto_import: config.sessions.auto_import.clone(),
            workspace_dir: config.sessions.workspace_dir.clone(),
            encodings: config.ingest.encodings.clone(),
            inspect_wait: Duration::from_millis(config.execution.inspect_wait_ms),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

fn validate_session_id(id: &str) -> KernelResult<()> {
    if id.is_empty() || id.len() > MAX_SESSION_ID_LEN {
        return Err(KernelError::invalid(format!(
            "session_id must be 1 to {} characters",
            MAX_SESSION_ID_LEN
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        || id.starts_with('.')
    {
        return Err(KernelError::invalid(format!(
            "session_id '{}' may only contain letters, digits, '_', '-' and '.'",
            id
        )));
    }
    Ok(())
}

fn generate_session_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("session_{}", &hex[..8])
}

/// Owns every live session
pub struct SessionRegistry {
    settings: SessionSettings,

    /// Live sessions by ID
    sessions: RwLock<HashMap<String, SessionHandle>>,

    /// Every generated ID ever handed out
    issued: std::sync::Mutex<HashSet<String>>,

    /// Creation sequence counter
    sequence: AtomicU64,
}

impl SessionRegistry {
    pub fn new(settings: SessionSettings) -> Self {
        Self {
            settings,
            sessions: RwLock::new(HashMap::new()),
            issued: std::sync::Mutex::new(HashSet::new()),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// A generated ID that was never issued before and names no live session
    fn fresh_id(
        &self,
        live: &HashMap<String, SessionHandle>,
        mut generate: impl FnMut() -> String,
    ) -> String {
        let mut issued = self
            .issued
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        loop {
            let id = generate();
            if !live.contains_key(&id) && issued.insert(id.clone()) {
                return id;
            }
        }
    }

    fn working_dir(&self, session_id: &str) -> KernelResult<PathBuf> {
        match &self.settings.workspace_dir {
            Some(root) => {
                let dir = root.join(session_id);
                std::fs::create_dir_all(&dir).map_err(|e| {
                    KernelError::Internal(format!(
                        "failed to create workspace {}: {}",
                        dir.display(),
                        e
                    ))
                })?;
                Ok(dir)
            }
            None => std::env::current_dir()
                .map_err(|e| KernelError::Internal(format!("no working directory: {}", e))),
        }
    }

    /// Start the worker, bind modules and assemble the session
    async fn build_session(
        &self,
        session_id: &str,
        auto_import: bool,
    ) -> KernelResult<(Session, Vec<ImportFailure>)> {
        let env = ShellEnv::new(self.working_dir(session_id)?).shared();
        let settings = InterpSettings {
            encodings: self.settings.encodings.clone(),
        };
        let kernel = Arc::new(KernelHandle::spawn(session_id, env.clone(), settings).await?);

        let modules = if auto_import {
            self.settings.auto_import.clone()
        } else {
            Vec::new()
        };
        let results = kernel
            .inspect(IMPORT_WAIT, move |interp| {
                modules
                    .into_iter()
                    .map(|module| {
                        let outcome = interp.import_module(&module);
                        (module, outcome)
                    })
                    .collect::<Vec<_>>()
            })
            .await?;

        let mut imported = Vec::new();
        let mut failures = Vec::new();
        for (module, outcome) in results {
            match outcome {
                Ok(()) => imported.push(module),
                Err(reason) => {
                    warn!(session_id = %session_id, module = %module, "Auto-import failed");
                    failures.push(ImportFailure { module, reason });
                }
            }
        }

        let store = VariableStore::new(session_id, kernel.clone(), self.settings.inspect_wait);
        let session = Session::new(
            session_id.to_string(),
            self.sequence.fetch_add(1, Ordering::Relaxed),
            imported,
            store,
            env,
            kernel,
        );
        Ok((session, failures))
    }

    /// Create a session, generating an ID when none is given
    pub async fn create(
        &self,
        session_id: Option<String>,
        auto_import: bool,
    ) -> KernelResult<(SessionHandle, Vec<ImportFailure>)> {
        let session_id = match session_id {
            Some(id) => {
                validate_session_id(&id)?;
                if self.sessions.read().await.contains_key(&id) {
                    return Err(KernelError::DuplicateSession { session_id: id });
                }
                id
            }
            None => {
                let live = self.sessions.read().await;
                self.fresh_id(&live, generate_session_id)
            }
        };

        let (session, failures) = self.build_session(&session_id, auto_import).await?;
        let session = Arc::new(session);

        {
            let mut sessions = self.sessions.write().await;
            if sessions.contains_key(&session_id) {
                // Lost a race with a concurrent create of the same ID
                session.kernel().shutdown();
                return Err(KernelError::DuplicateSession { session_id });
            }
            sessions.insert(session_id.clone(), session.clone());
        }

        info!(
            session_id = %session_id,
            auto_imported = session.auto_imported.len(),
            import_failures = failures.len(),
            working_dir = %session.working_dir().display(),
            "Session created"
        );
        Ok((session, failures))
    }

    /// Look up a live session
    pub async fn get(&self, session_id: &str) -> KernelResult<SessionHandle> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| KernelError::session_not_found(session_id))
    }

    /// Remove a session, cancel its running job and stop its worker
    pub async fn delete(&self, session_id: &str) -> KernelResult<()> {
        let session = self
            .sessions
            .write()
            .await
            .remove(session_id)
            .ok_or_else(|| KernelError::session_not_found(session_id))?;

        session.kernel().shutdown();
        info!(session_id = %session_id, "Session deleted");
        Ok(())
    }

    /// Summaries of all live sessions, in creation order
    pub async fn list(&self) -> Vec<SessionSummary> {
        let mut handles: Vec<SessionHandle> =
            self.sessions.read().await.values().cloned().collect();
        handles.sort_by_key(|s| (s.created_at, s.sequence));

        let mut summaries = Vec::with_capacity(handles.len());
        for session in handles {
            summaries.push(session.summary().await);
        }
        summaries
    }

    /// Get active session count
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Stop every worker; used at process teardown
    pub async fn shutdown_all(&self) {
        let drained: Vec<SessionHandle> = self.sessions.write().await.drain().map(|(_, s)| s).collect();
        for session in &drained {
            session.kernel().shutdown();
        }
        debug!(sessions = drained.len(), "All sessions shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio_test::{assert_err, assert_ok};

    fn registry() -> (SessionRegistry, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let settings = SessionSettings {
            workspace_dir: Some(dir.path().to_path_buf()),
            ..SessionSettings::default()
        };
        (SessionRegistry::new(settings), dir)
    }

    #[test]
    fn test_generated_id_format() {
        let id = generate_session_id();
        assert!(id.starts_with("session_"));
        assert_eq!(id.len(), "session_".len() + 8);
        assert!(id[8..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_session_id_validation() {
        assert_ok!(validate_session_id("analysis-1.v2"));
        assert_err!(validate_session_id(""));
        assert_err!(validate_session_id("../etc"));
        assert_err!(validate_session_id("has space"));
    }

    #[tokio::test]
    async fn test_create_list_delete() {
        let (registry, _dir) = registry();
        let (a, failures) = registry.create(Some("alpha".into()), true).await.unwrap();
        assert!(failures.is_empty());
        assert_eq!(a.auto_imported.len(), 7);
        let (b, _) = registry.create(None, false).await.unwrap();
        assert!(b.auto_imported.is_empty());

        let ids: Vec<String> = registry.list().await.into_iter().map(|s| s.session_id).collect();
        assert_eq!(ids, vec!["alpha".to_string(), b.session_id.clone()]);

        assert_ok!(registry.delete("alpha").await);
        assert_eq!(
            registry.delete("alpha").await.unwrap_err().kind(),
            "SessionNotFoundError"
        );
        assert_eq!(
            registry.get("alpha").await.unwrap_err().kind(),
            "SessionNotFoundError"
        );
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn test_duplicate_leaves_existing_untouched() {
        let (registry, _dir) = registry();
        let (first, _) = registry.create(Some("dup".into()), true).await.unwrap();
        let err = registry.create(Some("dup".into()), false).await.unwrap_err();
        assert_eq!(err.kind(), "DuplicateSessionError");

        let current = registry.get("dup").await.unwrap();
        assert!(Arc::ptr_eq(&first, &current));
        assert_eq!(current.auto_imported.len(), 7);
    }

    #[tokio::test]
    async fn test_concurrent_create_of_one_id() {
        let (registry, _dir) = registry();
        let (first, second) = tokio::join!(
            registry.create(Some("race".into()), false),
            registry.create(Some("race".into()), false),
        );
        let outcomes = [first.map(|(s, _)| s), second.map(|(s, _)| s)];
        let created: Vec<&SessionHandle> = outcomes.iter().filter_map(|o| o.as_ref().ok()).collect();
        let rejected: Vec<&str> = outcomes
            .iter()
            .filter_map(|o| o.as_ref().err())
            .map(KernelError::kind)
            .collect();
        assert_eq!(created.len(), 1);
        assert_eq!(rejected, vec!["DuplicateSessionError"]);
        assert!(Arc::ptr_eq(created[0], &registry.get("race").await.unwrap()));
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn test_generated_id_skips_live_sessions() {
        let (registry, _dir) = registry();
        let (taken, _) = registry
            .create(Some("session_0000aaaa".into()), false)
            .await
            .unwrap();
        let live = registry.sessions.read().await;
        let mut candidates = vec!["session_0000bbbb", "session_0000aaaa"];
        let id = registry.fresh_id(&live, || candidates.pop().unwrap_or_default().to_string());
        assert_eq!(id, "session_0000bbbb");
        assert!(live.contains_key(&taken.session_id));
    }

    #[tokio::test]
    async fn test_generated_ids_are_never_reissued() {
        let (registry, _dir) = registry();
        let live = HashMap::new();
        let first = registry.fresh_id(&live, || "session_0000cccc".to_string());
        let mut candidates = vec!["session_0000dddd", "session_0000cccc"];
        let second = registry.fresh_id(&live, || candidates.pop().unwrap_or_default().to_string());
        assert_eq!(first, "session_0000cccc");
        assert_eq!(second, "session_0000dddd");
    }

    #[tokio::test]
    async fn test_unknown_auto_import_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SessionRegistry::new(SessionSettings {
            auto_import: vec!["math".into(), "numpy".into()],
            workspace_dir: Some(dir.path().to_path_buf()),
            encodings: vec!["utf-8".into()],
            inspect_wait: Duration::from_secs(2),
        });
        let (session, failures) = registry.create(None, true).await.unwrap();
        assert_eq!(session.auto_imported, vec!["math"]);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].module, "numpy");
    }

    #[tokio::test]
    async fn test_workspace_dir_per_session() {
        let (registry, dir) = registry();
        let (session, _) = registry.create(Some("ws".into()), false).await.unwrap();
        assert_eq!(session.working_dir(), dir.path().join("ws"));
        assert!(dir.path().join("ws").is_dir());
    }
}
