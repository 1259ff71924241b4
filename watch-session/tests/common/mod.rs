//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use codex_watch_session::{
    BackendOptions, EventSink, HandlerSet, Result, WatchBackend, WatchEvent, WatchHandle,
    WatchedPaths, WatcherError,
};
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Default)]
struct FakeState {
    opened: usize,
    closed: usize,
    max_live: usize,
    sinks: Vec<EventSink>,
    options: Vec<BackendOptions>,
    fail_next_watch: Option<WatcherError>,
    fail_close: bool,
}

/// Scripted backend: records every open and close and lets tests push
/// events into the newest session.
#[derive(Clone)]
pub struct FakeBackend {
    state: Arc<Mutex<FakeState>>,
    auto_ready: bool,
}

impl FakeBackend {
    /// Signals ready as soon as a watch is opened.
    pub fn new() -> Self {
        Self {
            state: Arc::default(),
            auto_ready: true,
        }
    }

    /// Never signals ready on its own; see [`FakeBackend::ready`].
    pub fn manual() -> Self {
        Self {
            state: Arc::default(),
            auto_ready: false,
        }
    }

    pub fn opened(&self) -> usize {
        self.state.lock().unwrap().opened
    }

    pub fn closed(&self) -> usize {
        self.state.lock().unwrap().closed
    }

    pub fn live(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.opened - state.closed
    }

    /// Highest number of simultaneously open watches seen so far.
    pub fn max_live(&self) -> usize {
        self.state.lock().unwrap().max_live
    }

    /// Options of the most recent watch.
    pub fn last_options(&self) -> Option<BackendOptions> {
        self.state.lock().unwrap().options.last().cloned()
    }

    pub fn fail_next_watch(&self, err: WatcherError) {
        self.state.lock().unwrap().fail_next_watch = Some(err);
    }

    pub fn fail_close(&self) {
        self.state.lock().unwrap().fail_close = true;
    }

    /// Sink handed to the `index`-th watch.
    pub fn sink(&self, index: usize) -> Option<EventSink> {
        self.state.lock().unwrap().sinks.get(index).cloned()
    }

    /// Push an event into the newest session.
    pub fn emit(&self, event: WatchEvent) -> bool {
        let sink = self.state.lock().unwrap().sinks.last().cloned();
        sink.is_some_and(|sink| sink.emit(event))
    }

    pub fn ready(&self) -> bool {
        self.emit(WatchEvent::Ready)
    }
}

#[async_trait]
impl WatchBackend for FakeBackend {
    async fn watch(&self, options: BackendOptions, sink: EventSink) -> Result<Box<dyn WatchHandle>> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.fail_next_watch.take() {
            return Err(err);
        }

        state.opened += 1;
        state.max_live = state.max_live.max(state.opened - state.closed);
        if self.auto_ready {
            sink.emit(WatchEvent::Ready);
        }
        state.sinks.push(sink);
        state.options.push(options.clone());

        Ok(Box::new(FakeHandle {
            root: options.root,
            state: self.state.clone(),
            closed: false,
        }))
    }
}

struct FakeHandle {
    root: PathBuf,
    state: Arc<Mutex<FakeState>>,
    closed: bool,
}

#[async_trait]
impl WatchHandle for FakeHandle {
    async fn close(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !self.closed {
            self.closed = true;
            state.closed += 1;
        }
        if state.fail_close {
            return Err(WatcherError::Backend("close failed".to_string()));
        }
        Ok(())
    }

    async fn watched(&self) -> WatchedPaths {
        WatchedPaths::from([(self.root.clone(), vec![self.root.join("a.txt")])])
    }
}

/// Collects handler invocations as `"<kind> <path>"` lines.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handlers(&self) -> HandlerSet {
        let add = self.events.clone();
        let change = self.events.clone();
        let unlink = self.events.clone();
        let error = self.events.clone();
        let ready = self.events.clone();

        HandlerSet::new()
            .on_add(move |p| add.lock().unwrap().push(format!("add {}", p.display())))
            .on_change(move |p| change.lock().unwrap().push(format!("change {}", p.display())))
            .on_unlink(move |p| unlink.lock().unwrap().push(format!("unlink {}", p.display())))
            .on_error(move |e| error.lock().unwrap().push(format!("error {e}")))
            .on_ready(move || ready.lock().unwrap().push("ready".to_string()))
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    /// Number of recorded lines starting with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.events()
            .iter()
            .filter(|line| line.starts_with(prefix))
            .count()
    }

    /// Number of recorded `kind` events for `path`.
    pub fn count_for(&self, kind: &str, path: &Path) -> usize {
        let line = format!("{kind} {}", path.display());
        self.events().iter().filter(|seen| **seen == line).count()
    }

    /// Poll until `predicate` holds or `timeout` passes.
    pub async fn wait_until(&self, timeout: Duration, predicate: impl Fn(&[String]) -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if predicate(&self.events()) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
