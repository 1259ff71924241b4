//! The native watch primitive a session is built on.
//!
//! A backend opens one recursive watch per call and pushes normalized
//! [`WatchEvent`]s into the [`EventSink`] it was given, finishing its
//! initial scan with exactly one [`WatchEvent::Ready`]. The returned
//! [`WatchHandle`] owns every OS resource of that watch.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::SessionConfig;
use crate::error::Result;
use crate::event::WatchEvent;
use crate::rules::ExclusionRules;

/// Directory → direct children (absolute, sorted) known to a watch.
pub type WatchedPaths = BTreeMap<PathBuf, Vec<PathBuf>>;

/// Everything a backend needs to open a watch.
#[derive(Debug, Clone)]
pub struct BackendOptions {
    /// Absolute root directory.
    pub root: PathBuf,

    /// Paths never reported.
    pub ignored: ExclusionRules,

    /// Scan, stability and polling options.
    pub config: SessionConfig,
}

/// Sending half of a session's event stream.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<WatchEvent>,
}

impl EventSink {
    /// Create a sink and the receiver that drains it.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<WatchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Push an event. Returns `false` once the session stopped listening.
    pub fn emit(&self, event: WatchEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Whether the session stopped listening.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the session stops listening.
    pub async fn closed(&self) {
        self.tx.closed().await;
    }
}

/// Opens native watches.
#[async_trait]
pub trait WatchBackend: Send + Sync {
    /// Start watching `options.root`.
    ///
    /// Returns once the watch is registered. Readiness is signalled later
    /// through `sink`.
    async fn watch(&self, options: BackendOptions, sink: EventSink) -> Result<Box<dyn WatchHandle>>;
}

/// A live native watch.
#[async_trait]
pub trait WatchHandle: Send + Sync {
    /// Release the watch and wait until its resources are gone.
    ///
    /// Calling `close` more than once is a no-op.
    async fn close(&mut self) -> Result<()>;

    /// The directories and entries currently known to the watch.
    async fn watched(&self) -> WatchedPaths;
}
