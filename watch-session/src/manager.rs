//! The public start/stop/reconfigure surface.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};

use crate::backend::{WatchBackend, WatchedPaths};
use crate::config::SessionConfig;
use crate::error::{Result, WatcherError};
use crate::handler::HandlerSet;
use crate::notify_backend::NotifyBackend;
use crate::rules::ExclusionRules;
use crate::session::{SessionState, SessionStats, WatchSession};

/// Owns at most one watch session and serializes every change to it.
///
/// Create one manager per process and share it by reference. `start`,
/// `stop` and `reconfigure` take turns on an internal lock, so a new native
/// watch is only opened after the previous one has been fully released.
/// Waiting for the initial scan happens outside that lock: a `stop` issued
/// while a `start` is still waiting for readiness goes through immediately,
/// and the waiting `start` returns [`WatcherError::ClosedBeforeReady`].
pub struct WatchSessionManager {
    backend: Arc<dyn WatchBackend>,
    config: SessionConfig,
    ops: Mutex<()>,
    current: Mutex<Option<WatchSession>>,
    next_id: AtomicU64,
    started_any: AtomicBool,
}

impl WatchSessionManager {
    /// Create a manager that watches through `notify`.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_backend(Arc::new(NotifyBackend::new()), config)
    }

    /// Create a manager over a custom backend.
    pub fn with_backend(backend: Arc<dyn WatchBackend>, config: SessionConfig) -> Self {
        Self {
            backend,
            config,
            ops: Mutex::new(()),
            current: Mutex::new(None),
            next_id: AtomicU64::new(0),
            started_any: AtomicBool::new(false),
        }
    }

    /// Options applied to every session.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Replace any running session with a watch on `path`.
    ///
    /// Resolves once the initial scan is complete. Failures to open the
    /// watch are passed to the error handler and returned; no session is
    /// left running in that case.
    pub async fn start(
        &self,
        path: impl AsRef<Path>,
        rules: ExclusionRules,
        handlers: HandlerSet,
    ) -> Result<()> {
        let root = path.as_ref().to_path_buf();
        let (id, ready) = {
            let _guard = self.ops.lock().await;
            self.replace_session(root, rules, handlers).await?
        };
        self.await_ready(id, ready).await
    }

    /// Stop the running session, if any. Close failures are logged, not returned.
    pub async fn stop(&self) {
        let _guard = self.ops.lock().await;
        self.close_current().await;
    }

    /// Restart the running session with new exclusion rules.
    ///
    /// The root and handlers of the running session are reused as they are.
    /// Without a running session this logs a warning and does nothing.
    pub async fn reconfigure(&self, rules: ExclusionRules) -> Result<()> {
        let (id, ready) = {
            let _guard = self.ops.lock().await;

            let retained = self.current.lock().await.as_ref().map(|session| {
                (
                    session.id(),
                    session.root().to_path_buf(),
                    session.handlers().clone(),
                    format!("{:?}", session.rules()),
                )
            });
            let Some((previous, root, handlers, old_rules)) = retained else {
                warn!("Reconfigure requested without an active watch session; ignoring");
                return Ok(());
            };

            info!(
                "Reconfiguring watch session {previous} on {}: {old_rules} -> {rules:?}",
                root.display()
            );
            self.replace_session(root, rules, handlers).await?
        };
        self.await_ready(id, ready).await
    }

    /// Whether a session is running.
    pub async fn is_watching(&self) -> bool {
        self.current.lock().await.is_some()
    }

    /// Directory → children map of the running session.
    pub async fn watched_paths(&self) -> Option<WatchedPaths> {
        let current = self.current.lock().await;
        let session = current.as_ref()?;
        Some(session.watched().await)
    }

    /// Root of the running session.
    pub async fn root(&self) -> Option<PathBuf> {
        self.current
            .lock()
            .await
            .as_ref()
            .map(|session| session.root().to_path_buf())
    }

    /// State of the running session, or of the manager when idle.
    pub async fn session_state(&self) -> SessionState {
        match self.current.lock().await.as_ref() {
            Some(session) => session.state(),
            None if self.started_any.load(Ordering::Acquire) => SessionState::Closed,
            None => SessionState::Unstarted,
        }
    }

    /// Counters of the running session.
    pub async fn stats(&self) -> Option<SessionStats> {
        self.current.lock().await.as_ref().map(WatchSession::stats)
    }

    /// Close the current session, then open and store a new one.
    /// Must be called with `ops` held.
    async fn replace_session(
        &self,
        root: PathBuf,
        rules: ExclusionRules,
        handlers: HandlerSet,
    ) -> Result<(u64, watch::Receiver<SessionState>)> {
        self.close_current().await;

        let root = match self.config.validate().and_then(|()| resolve_root(&root)) {
            Ok(resolved) => resolved,
            Err(e) => {
                error!("Cannot watch {}: {e}", root.display());
                handlers.error(&e);
                return Err(e);
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        info!("Starting watch session {id} on {}", root.display());

        let session = match WatchSession::open(
            id,
            self.backend.as_ref(),
            root,
            rules,
            handlers.clone(),
            &self.config,
        )
        .await
        {
            Ok(session) => session,
            Err(e) => {
                error!("Failed to open watch session {id}: {e}");
                handlers.error(&e);
                return Err(e);
            }
        };

        let ready = session.subscribe();
        self.started_any.store(true, Ordering::Release);
        *self.current.lock().await = Some(session);

        Ok((id, ready))
    }

    /// Must be called with `ops` held.
    async fn close_current(&self) {
        let Some(session) = self.current.lock().await.take() else {
            debug!("No active watch session to stop");
            return;
        };

        let id = session.id();
        let root = session.root().display().to_string();
        match session.close().await {
            Ok(()) => info!("Stopped watch session {id} on {root}"),
            Err(e) => warn!("Watch session {id} on {root} did not close cleanly: {e}"),
        }
    }

    async fn await_ready(&self, id: u64, mut ready: watch::Receiver<SessionState>) -> Result<()> {
        let wait = ready.wait_for(|state| *state != SessionState::Starting);

        let Some(timeout) = self.config.ready_timeout() else {
            let settled = wait.await.map(|state| *state).ok();
            return ready_outcome(settled);
        };

        let settled = tokio::time::timeout(timeout, wait)
            .await
            .map(|outcome| outcome.map(|state| *state).ok());
        match settled {
            Ok(settled) => ready_outcome(settled),
            Err(_) => {
                warn!("Watch session {id} not ready after {timeout:?}; stopping it");
                self.stop_session(id).await;
                Err(WatcherError::ReadyTimeout(timeout))
            }
        }
    }

    /// Stop session `id` unless something already replaced it.
    async fn stop_session(&self, id: u64) {
        let _guard = self.ops.lock().await;
        let is_current = self
            .current
            .lock()
            .await
            .as_ref()
            .is_some_and(|session| session.id() == id);
        if is_current {
            self.close_current().await;
        }
    }
}

impl Default for WatchSessionManager {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

fn ready_outcome(settled: Option<SessionState>) -> Result<()> {
    match settled {
        Some(SessionState::Ready) => Ok(()),
        _ => Err(WatcherError::ClosedBeforeReady),
    }
}

/// Check that `root` is an absolute, existing directory and resolve it to
/// its canonical form. Events are reported under the resolved path.
fn resolve_root(root: &Path) -> Result<PathBuf> {
    if !root.is_absolute() {
        return Err(WatcherError::RelativeRoot(root.display().to_string()));
    }

    match std::fs::metadata(root) {
        Ok(metadata) if metadata.is_dir() => {
            dunce::canonicalize(root).map_err(WatcherError::from)
        }
        Ok(_) => Err(WatcherError::NotADirectory(root.display().to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(WatcherError::not_found(root)),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(WatcherError::PermissionDenied(root.display().to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_root() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("file.txt");
        std::fs::write(&file, "x").unwrap();

        assert_eq!(
            resolve_root(temp_dir.path()).unwrap(),
            temp_dir.path().canonicalize().unwrap()
        );
        assert!(matches!(
            resolve_root(Path::new("relative/dir")),
            Err(WatcherError::RelativeRoot(_))
        ));
        assert!(matches!(
            resolve_root(&file),
            Err(WatcherError::NotADirectory(_))
        ));
        assert!(matches!(
            resolve_root(&temp_dir.path().join("missing")),
            Err(WatcherError::DirectoryNotFound(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_root_follows_symlinks() {
        let temp_dir = TempDir::new().unwrap();
        let real = temp_dir.path().join("real");
        let link = temp_dir.path().join("link");
        std::fs::create_dir(&real).unwrap();
        std::os::unix::fs::symlink(&real, &link).unwrap();

        assert_eq!(resolve_root(&link).unwrap(), real.canonicalize().unwrap());
    }

    #[tokio::test]
    async fn test_new_manager_is_idle() {
        let manager = WatchSessionManager::default();

        assert!(!manager.is_watching().await);
        assert_eq!(manager.session_state().await, SessionState::Unstarted);
        assert!(manager.watched_paths().await.is_none());
        assert!(manager.stats().await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reconfigure_keeps_the_same_handler_set() {
        let temp_dir = TempDir::new().unwrap();
        let handlers = HandlerSet::new().on_add(|_| {}).on_error(|_| {});
        let manager = WatchSessionManager::default();

        manager
            .start(temp_dir.path(), ExclusionRules::none(), handlers.clone())
            .await
            .unwrap();
        manager
            .reconfigure(ExclusionRules::patterns(["*.tmp"]).unwrap())
            .await
            .unwrap();

        {
            let current = manager.current.lock().await;
            let session = current.as_ref().unwrap();
            assert_eq!(session.id(), 2);
            assert!(session.handlers().same_handlers(&handlers));
            assert_eq!(format!("{:?}", session.rules()), r#"Patterns(["*.tmp"])"#);
        }

        manager.stop().await;
    }

    #[tokio::test]
    async fn test_missing_root_reports_through_handler_and_result() {
        let errors = Arc::new(StdMutex::new(Vec::new()));
        let seen = errors.clone();
        let handlers = HandlerSet::new().on_error(move |e| seen.lock().unwrap().push(e.to_string()));

        let manager = WatchSessionManager::default();
        let result = manager
            .start("/nonexistent/path/12345", ExclusionRules::none(), handlers)
            .await;

        assert!(matches!(result, Err(WatcherError::DirectoryNotFound(_))));
        assert_eq!(errors.lock().unwrap().len(), 1);
        assert!(!manager.is_watching().await);
    }
}
