//! Caller-supplied callbacks for session events.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::error::WatcherError;
use crate::event::{WatchEvent, WatchEventKind};

/// Callback receiving the path of an added, changed, or removed file.
pub type PathHandler = Arc<dyn Fn(&Path) + Send + Sync>;

/// Callback receiving a watcher error.
pub type ErrorHandler = Arc<dyn Fn(&WatcherError) + Send + Sync>;

/// Callback invoked once the initial scan is complete.
pub type ReadyHandler = Arc<dyn Fn() + Send + Sync>;

/// One optional callback per event kind.
///
/// Events of a kind without a handler are dropped. Cloning shares the same
/// callbacks, which is how a reconfigured session keeps the handlers it was
/// started with.
#[derive(Clone, Default)]
pub struct HandlerSet {
    on_add: Option<PathHandler>,
    on_change: Option<PathHandler>,
    on_unlink: Option<PathHandler>,
    on_error: Option<ErrorHandler>,
    on_ready: Option<ReadyHandler>,
}

impl HandlerSet {
    /// Create an empty handler set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle files added after the watch became ready.
    pub fn on_add(mut self, handler: impl Fn(&Path) + Send + Sync + 'static) -> Self {
        self.on_add = Some(Arc::new(handler));
        self
    }

    /// Handle settled writes to existing files.
    pub fn on_change(mut self, handler: impl Fn(&Path) + Send + Sync + 'static) -> Self {
        self.on_change = Some(Arc::new(handler));
        self
    }

    /// Handle removed files.
    pub fn on_unlink(mut self, handler: impl Fn(&Path) + Send + Sync + 'static) -> Self {
        self.on_unlink = Some(Arc::new(handler));
        self
    }

    /// Handle construction and runtime errors.
    pub fn on_error(mut self, handler: impl Fn(&WatcherError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(handler));
        self
    }

    /// Handle completion of the initial scan.
    pub fn on_ready(mut self, handler: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_ready = Some(Arc::new(handler));
        self
    }

    /// Whether a handler is attached for `kind`.
    pub fn handles(&self, kind: WatchEventKind) -> bool {
        match kind {
            WatchEventKind::Add => self.on_add.is_some(),
            WatchEventKind::Change => self.on_change.is_some(),
            WatchEventKind::Unlink => self.on_unlink.is_some(),
            WatchEventKind::Error => self.on_error.is_some(),
            WatchEventKind::Ready => self.on_ready.is_some(),
        }
    }

    /// Whether both sets hold the very same callbacks.
    pub fn same_handlers(&self, other: &Self) -> bool {
        fn same<T: ?Sized>(a: &Option<Arc<T>>, b: &Option<Arc<T>>) -> bool {
            match (a, b) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                (None, None) => true,
                _ => false,
            }
        }

        same(&self.on_add, &other.on_add)
            && same(&self.on_change, &other.on_change)
            && same(&self.on_unlink, &other.on_unlink)
            && same(&self.on_error, &other.on_error)
            && same(&self.on_ready, &other.on_ready)
    }

    /// Report an error that happened outside the event stream.
    pub(crate) fn error(&self, err: &WatcherError) {
        if let Some(handler) = &self.on_error {
            handler(err);
        }
    }

    /// Invoke the handler matching `event`, if any.
    pub(crate) fn dispatch(&self, event: &WatchEvent) {
        match event {
            WatchEvent::Add(path) => {
                if let Some(handler) = &self.on_add {
                    handler(path);
                }
            }
            WatchEvent::Change(path) => {
                if let Some(handler) = &self.on_change {
                    handler(path);
                }
            }
            WatchEvent::Unlink(path) => {
                if let Some(handler) = &self.on_unlink {
                    handler(path);
                }
            }
            WatchEvent::Error(err) => self.error(err),
            WatchEvent::Ready => {
                if let Some(handler) = &self.on_ready {
                    handler();
                }
            }
        }
    }
}

impl fmt::Debug for HandlerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerSet")
            .field("on_add", &self.on_add.is_some())
            .field("on_change", &self.on_change.is_some())
            .field("on_unlink", &self.on_unlink.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_ready", &self.on_ready.is_some())
            .finish()
    }
}
