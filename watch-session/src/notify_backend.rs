//! Native backend built on the `notify` crate.
//!
//! `notify` only reports raw OS events, so this backend adds what a session
//! expects from its primitive: an initial scan that ends with `Ready`,
//! suppression of pre-existing files, exclusion and depth filtering,
//! write-stability coalescing, and a directory → children map.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use notify::{PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{BackendOptions, EventSink, WatchBackend, WatchHandle, WatchedPaths};
use crate::config::SessionConfig;
use crate::error::{Result, WatcherError};
use crate::event::{RawTriage, WatchEvent};
use crate::stability::{PendingKind, Settled, WriteFinishTracker};
use crate::tree::{FileStat, ScannedEntry, TreeScope, WatchTree};

type RawEvent = notify::Result<notify::Event>;

/// Opens watches through `notify`: the platform's native API by default,
/// or `PollWatcher` when the session config asks for polling.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotifyBackend;

impl NotifyBackend {
    /// Create the backend.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl WatchBackend for NotifyBackend {
    async fn watch(&self, options: BackendOptions, sink: EventSink) -> Result<Box<dyn WatchHandle>> {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();

        // Registering a recursive watch walks the tree, so keep it off the runtime.
        let root = options.root.clone();
        let config = options.config.clone();
        let watcher =
            tokio::task::spawn_blocking(move || open_native_watcher(&root, &config, raw_tx))
                .await??;

        let scope = TreeScope::new(&options);
        let tree = Arc::new(RwLock::new(WatchTree::new(scope.root())));
        let cancel = CancellationToken::new();

        let (tracker, tick) = match &options.config.await_write_finish {
            Some(stability) => (
                Some(WriteFinishTracker::new(stability.threshold())),
                stability.poll_interval(),
            ),
            None => (None, Duration::from_millis(100)),
        };

        let pump = EventPump {
            scope,
            ignore_initial: options.config.ignore_initial,
            tree: tree.clone(),
            tracker,
            tick,
            sink,
            watcher,
        };

        info!(
            "Opened native watch on {} ({})",
            options.root.display(),
            if options.config.use_polling {
                "polling"
            } else {
                "os events"
            }
        );

        Ok(Box::new(NotifyHandle {
            root: options.root,
            tree,
            cancel: cancel.clone(),
            pump: Some(tokio::spawn(pump.run(raw_rx, cancel))),
        }))
    }
}

fn open_native_watcher(
    root: &Path,
    config: &SessionConfig,
    raw_tx: mpsc::UnboundedSender<RawEvent>,
) -> Result<Box<dyn Watcher + Send>> {
    let handler = move |res: RawEvent| {
        // The pump is gone once the session closed; nothing left to tell.
        let _ = raw_tx.send(res);
    };

    let notify_config = notify::Config::default()
        .with_follow_symlinks(config.follow_symlinks)
        .with_poll_interval(config.polling_interval());

    let mut watcher: Box<dyn Watcher + Send> = if config.use_polling {
        Box::new(PollWatcher::new(handler, notify_config)?)
    } else {
        Box::new(RecommendedWatcher::new(handler, notify_config)?)
    };

    let mode = if config.max_depth.is_some_and(|depth| depth <= 1) {
        RecursiveMode::NonRecursive
    } else {
        RecursiveMode::Recursive
    };
    watcher.watch(root, mode)?;

    Ok(watcher)
}

/// Handle to a watch opened by [`NotifyBackend`].
struct NotifyHandle {
    root: PathBuf,
    tree: Arc<RwLock<WatchTree>>,
    cancel: CancellationToken,
    pump: Option<JoinHandle<()>>,
}

#[async_trait]
impl WatchHandle for NotifyHandle {
    async fn close(&mut self) -> Result<()> {
        self.cancel.cancel();

        // The pump owns the OS watcher and drops it on exit.
        if let Some(pump) = self.pump.take() {
            pump.await?;
            debug!("Released native watch on {}", self.root.display());
        }

        Ok(())
    }

    async fn watched(&self) -> WatchedPaths {
        self.tree.read().await.snapshot()
    }
}

impl Drop for NotifyHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Owns the OS watcher and turns its raw events into session events.
struct EventPump {
    scope: TreeScope,
    ignore_initial: bool,
    tree: Arc<RwLock<WatchTree>>,
    tracker: Option<WriteFinishTracker>,
    tick: Duration,
    sink: EventSink,
    watcher: Box<dyn Watcher + Send>,
}

impl EventPump {
    async fn run(mut self, mut raw_rx: mpsc::UnboundedReceiver<RawEvent>, cancel: CancellationToken) {
        let sink = self.sink.clone();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = self.initial_scan() => {}
        }

        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let pending = self.tracker.as_ref().is_some_and(|t| !t.is_empty());

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = sink.closed() => break,
                raw = raw_rx.recv() => match raw {
                    Some(Ok(event)) => self.handle_event(event).await,
                    Some(Err(e)) => self.emit(WatchEvent::Error(e.into())),
                    None => break,
                },
                _ = ticker.tick(), if pending => self.flush_settled().await,
            }
        }

        debug!("Event pump for {} stopped", self.scope.root().display());
        drop(self.watcher);
    }

    fn emit(&self, event: WatchEvent) {
        if !self.sink.emit(event) {
            debug!("Session stopped listening; dropping event");
        }
    }

    async fn initial_scan(&mut self) {
        let scope = self.scope.clone();
        match tokio::task::spawn_blocking(move || scope.scan()).await {
            Ok(tree) => {
                let initial: Vec<PathBuf> = if self.ignore_initial {
                    Vec::new()
                } else {
                    tree.files().map(|(path, _)| path.clone()).collect()
                };
                *self.tree.write().await = tree;
                for path in initial {
                    self.emit(WatchEvent::Add(path));
                }
            }
            Err(e) => self.emit(WatchEvent::Error(e.into())),
        }

        self.emit(WatchEvent::Ready);
    }

    async fn handle_event(&mut self, event: notify::Event) {
        match RawTriage::from(&event) {
            RawTriage::Ignore => {}
            RawTriage::Rescan => self.rescan().await,
            RawTriage::Reconcile => {
                for path in &event.paths {
                    self.reconcile(path).await;
                }
            }
        }
    }

    /// Compare the disk state of `path` with what the tree knows.
    async fn reconcile(&mut self, path: &Path) {
        if path == self.scope.root() {
            self.check_root().await;
            return;
        }

        if !self.scope.includes(path) {
            return;
        }

        match self.scope.metadata(path) {
            Ok(metadata) if metadata.is_dir() => self.directory_appeared(path).await,
            Ok(metadata) => self.file_touched(path, FileStat::from(&metadata)).await,
            Err(e) if e.kind() == io::ErrorKind::NotFound => self.path_vanished(path).await,
            Err(e) => self.emit(WatchEvent::Error(WatcherError::Io(io::Error::new(
                e.kind(),
                format!("{}: {e}", path.display()),
            )))),
        }
    }

    async fn directory_appeared(&mut self, dir: &Path) {
        if !self.tree.write().await.insert_dir(dir) {
            return;
        }

        // Files may land in a new directory before its OS watch is attached.
        let scope = self.scope.clone();
        let start = dir.to_path_buf();
        let entries = match tokio::task::spawn_blocking(move || scope.walk(&start)).await {
            Ok(entries) => entries,
            Err(e) => {
                self.emit(WatchEvent::Error(e.into()));
                return;
            }
        };

        for entry in entries {
            match entry {
                ScannedEntry::Dir(path) => {
                    self.tree.write().await.insert_dir(&path);
                }
                ScannedEntry::File(path, stat) => self.file_touched(&path, stat).await,
            }
        }
    }

    async fn file_touched(&mut self, path: &Path, stat: FileStat) {
        let known = self.tree.read().await.file_stat(path);

        if let Some(tracker) = &mut self.tracker {
            let kind = if known.is_some() {
                PendingKind::Change
            } else {
                PendingKind::Add
            };
            tracker.track(path, kind, stat, Instant::now());
            return;
        }

        match known {
            Some(previous) if previous == stat => {}
            Some(_) => {
                self.tree.write().await.insert_file(path, stat);
                self.emit(WatchEvent::Change(path.to_path_buf()));
            }
            None => {
                self.tree.write().await.insert_file(path, stat);
                self.emit(WatchEvent::Add(path.to_path_buf()));
            }
        }
    }

    async fn path_vanished(&mut self, path: &Path) {
        if let Some(tracker) = &mut self.tracker {
            tracker.cancel(path);
        }

        let removed = self.tree.write().await.remove(path);
        for file in removed {
            self.emit(WatchEvent::Unlink(file));
        }
    }

    async fn check_root(&mut self) {
        let root = self.scope.root().to_path_buf();
        if self.scope.metadata(&root).is_ok() || !self.tree.read().await.contains_dir(&root) {
            return;
        }

        warn!("Watch root {} was removed", root.display());
        self.path_vanished(&root).await;
        self.emit(WatchEvent::Error(WatcherError::not_found(&root)));
    }

    async fn flush_settled(&mut self) {
        let Some(tracker) = &mut self.tracker else {
            return;
        };
        let scope = &self.scope;
        let settled = tracker.poll(Instant::now(), |path| {
            scope.metadata(path).map(|metadata| FileStat::from(&metadata))
        });

        for outcome in settled {
            match outcome {
                Settled::Written { path, kind, stat } => {
                    let previous = self.tree.write().await.insert_file(&path, stat);
                    match previous {
                        None => self.emit(WatchEvent::Add(path)),
                        Some(previous) if previous == stat => {
                            debug!("Suppressing {kind:?} for unchanged {}", path.display());
                        }
                        Some(_) => self.emit(WatchEvent::Change(path)),
                    }
                }
                Settled::Vanished { path, kind } => {
                    debug!("{} vanished while pending {kind:?}", path.display());
                    self.path_vanished(&path).await;
                }
            }
        }
    }

    async fn rescan(&mut self) {
        warn!(
            "Native watch on {} dropped events; rescanning",
            self.scope.root().display()
        );

        let scope = self.scope.clone();
        let newer = match tokio::task::spawn_blocking(move || scope.scan()).await {
            Ok(tree) => tree,
            Err(e) => {
                self.emit(WatchEvent::Error(e.into()));
                return;
            }
        };

        let diff = {
            let mut tree = self.tree.write().await;
            let diff = tree.diff(&newer);
            tree.adopt_dirs(&newer);
            diff
        };

        for path in diff.removed {
            self.path_vanished(&path).await;
        }
        for (path, stat) in diff.added.into_iter().chain(diff.modified) {
            self.file_touched(&path, stat).await;
        }
    }
}
