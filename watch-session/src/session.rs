//! A single watch session: one native handle plus the task that delivers
//! its events to the caller's handlers.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{BackendOptions, EventSink, WatchBackend, WatchHandle, WatchedPaths};
use crate::config::SessionConfig;
use crate::error::Result;
use crate::event::{WatchEvent, WatchEventKind};
use crate::handler::HandlerSet;
use crate::rules::ExclusionRules;

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No session has been started yet.
    Unstarted,

    /// Native watch open, initial scan running.
    Starting,

    /// Initial scan complete; events are flowing.
    Ready,

    /// Stop in progress.
    Closing,

    /// Native watch released.
    Closed,
}

/// Snapshot of a session's lifecycle and delivery counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// Session id, unique per manager.
    pub id: u64,

    /// Watched root.
    pub root: PathBuf,

    /// Current state.
    pub state: SessionState,

    /// When the native watch was opened.
    pub started_at: DateTime<Utc>,

    /// When the initial scan completed.
    pub ready_at: Option<DateTime<Utc>>,

    /// Add events delivered to a handler.
    pub adds: u64,

    /// Change events delivered.
    pub changes: u64,

    /// Unlink events delivered.
    pub unlinks: u64,

    /// Errors delivered.
    pub errors: u64,
}

#[derive(Debug, Default)]
struct DeliveryCounters {
    adds: AtomicU64,
    changes: AtomicU64,
    unlinks: AtomicU64,
    errors: AtomicU64,
    ready_at: OnceLock<DateTime<Utc>>,
}

impl DeliveryCounters {
    fn record(&self, kind: WatchEventKind) {
        let counter = match kind {
            WatchEventKind::Add => &self.adds,
            WatchEventKind::Change => &self.changes,
            WatchEventKind::Unlink => &self.unlinks,
            WatchEventKind::Error => &self.errors,
            WatchEventKind::Ready => {
                let _ = self.ready_at.set(Utc::now());
                return;
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// The single resource a manager owns.
pub(crate) struct WatchSession {
    id: u64,
    root: PathBuf,
    rules: ExclusionRules,
    handlers: HandlerSet,
    handle: Box<dyn WatchHandle>,
    state: Arc<watch::Sender<SessionState>>,
    counters: Arc<DeliveryCounters>,
    delivery: CancellationToken,
    dispatcher: Option<JoinHandle<()>>,
    started_at: DateTime<Utc>,
}

impl WatchSession {
    /// Open a native watch on `root` and start delivering its events.
    pub async fn open(
        id: u64,
        backend: &dyn WatchBackend,
        root: PathBuf,
        rules: ExclusionRules,
        handlers: HandlerSet,
        config: &SessionConfig,
    ) -> Result<Self> {
        let (sink, events) = EventSink::channel();
        let options = BackendOptions {
            root: root.clone(),
            ignored: rules.clone(),
            config: config.clone(),
        };
        let handle = backend.watch(options, sink).await?;

        let (state, _) = watch::channel(SessionState::Starting);
        let state = Arc::new(state);
        let counters = Arc::new(DeliveryCounters::default());
        let delivery = CancellationToken::new();

        let dispatcher = tokio::spawn(dispatch_events(
            id,
            events,
            handlers.clone(),
            state.clone(),
            counters.clone(),
            delivery.clone(),
        ));

        Ok(Self {
            id,
            root,
            rules,
            handlers,
            handle,
            state,
            counters,
            delivery,
            dispatcher: Some(dispatcher),
            started_at: Utc::now(),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn rules(&self) -> &ExclusionRules {
        &self.rules
    }

    pub fn handlers(&self) -> &HandlerSet {
        &self.handlers
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Follow state transitions, e.g. to wait for `Ready`.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub async fn watched(&self) -> WatchedPaths {
        self.handle.watched().await
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            id: self.id,
            root: self.root.clone(),
            state: self.state(),
            started_at: self.started_at,
            ready_at: self.counters.ready_at.get().copied(),
            adds: self.counters.adds.load(Ordering::Relaxed),
            changes: self.counters.changes.load(Ordering::Relaxed),
            unlinks: self.counters.unlinks.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
        }
    }

    /// Stop delivery, release the native handle, and wait for both.
    pub async fn close(mut self) -> Result<()> {
        self.state.send_replace(SessionState::Closing);
        self.delivery.cancel();

        let result = self.handle.close().await;

        if let Some(dispatcher) = self.dispatcher.take() {
            if let Err(e) = dispatcher.await {
                warn!("Event dispatcher of session {} failed: {e}", self.id);
            }
        }

        self.state.send_replace(SessionState::Closed);
        result
    }
}

impl Drop for WatchSession {
    fn drop(&mut self) {
        self.delivery.cancel();
    }
}

async fn dispatch_events(
    id: u64,
    mut events: mpsc::UnboundedReceiver<WatchEvent>,
    handlers: HandlerSet,
    state: Arc<watch::Sender<SessionState>>,
    counters: Arc<DeliveryCounters>,
    delivery: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = delivery.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match &event {
            WatchEvent::Ready => {
                if *state.borrow() != SessionState::Starting {
                    debug!("Ignoring repeated ready signal for session {id}");
                    continue;
                }
                counters.record(WatchEventKind::Ready);
                handlers.dispatch(&event);
                state.send_replace(SessionState::Ready);
                info!("Watch session {id} is ready");
            }
            WatchEvent::Error(err) => {
                warn!("Watch session {id} reported an error: {err}");
                if handlers.handles(WatchEventKind::Error) {
                    counters.record(WatchEventKind::Error);
                    handlers.dispatch(&event);
                }
            }
            WatchEvent::Add(path) | WatchEvent::Change(path) | WatchEvent::Unlink(path) => {
                let kind = event.kind();
                if !handlers.handles(kind) {
                    debug!("Session {id}: no {kind:?} handler for {}", path.display());
                    continue;
                }
                debug!("Session {id}: {kind:?} {}", path.display());
                counters.record(kind);
                handlers.dispatch(&event);
            }
        }
    }

    debug!("Event dispatcher of session {id} stopped");
}
