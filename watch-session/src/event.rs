//! Normalized session events and triage of raw `notify` events.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::WatcherError;

/// An event delivered to a session's handlers.
#[derive(Debug)]
pub enum WatchEvent {
    /// A file appeared after the watch became ready.
    Add(PathBuf),

    /// A known file was written and has settled.
    Change(PathBuf),

    /// A known file was removed.
    Unlink(PathBuf),

    /// The backend reported an error. The session keeps running.
    Error(WatcherError),

    /// The initial scan is complete.
    Ready,
}

impl WatchEvent {
    /// The kind of this event.
    pub fn kind(&self) -> WatchEventKind {
        match self {
            Self::Add(_) => WatchEventKind::Add,
            Self::Change(_) => WatchEventKind::Change,
            Self::Unlink(_) => WatchEventKind::Unlink,
            Self::Error(_) => WatchEventKind::Error,
            Self::Ready => WatchEventKind::Ready,
        }
    }

    /// Path of the affected file, for path events.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Add(path) | Self::Change(path) | Self::Unlink(path) => Some(path),
            Self::Error(_) | Self::Ready => None,
        }
    }
}

/// Kind of session event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchEventKind {
    /// File added.
    Add,

    /// File changed.
    Change,

    /// File removed.
    Unlink,

    /// Error reported.
    Error,

    /// Initial scan complete.
    Ready,
}

/// What the event pump should do with a raw `notify` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RawTriage {
    /// Re-stat each path and reconcile it against the known tree.
    Reconcile,

    /// The backend dropped events; rescan the whole tree.
    Rescan,

    /// Nothing on disk changed.
    Ignore,
}

impl From<&notify::Event> for RawTriage {
    fn from(event: &notify::Event) -> Self {
        if event.need_rescan() {
            return Self::Rescan;
        }

        match event.kind {
            notify::EventKind::Access(_) => Self::Ignore,
            notify::EventKind::Create(_)
            | notify::EventKind::Modify(_)
            | notify::EventKind::Remove(_)
            | notify::EventKind::Any
            | notify::EventKind::Other => Self::Reconcile,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, Flag, ModifyKind, RemoveKind};

    #[test]
    fn test_event_kind_and_path() {
        let event = WatchEvent::Change(PathBuf::from("/test/file.txt"));
        assert_eq!(event.kind(), WatchEventKind::Change);
        assert_eq!(event.path(), Some(Path::new("/test/file.txt")));
        assert_eq!(WatchEvent::Ready.path(), None);
    }

    #[test]
    fn test_raw_triage() {
        let create = notify::Event::new(notify::EventKind::Create(CreateKind::File));
        let write = notify::Event::new(notify::EventKind::Modify(ModifyKind::Data(
            DataChange::Content,
        )));
        let remove = notify::Event::new(notify::EventKind::Remove(RemoveKind::File));
        let access = notify::Event::new(notify::EventKind::Access(AccessKind::Read));

        assert_eq!(RawTriage::from(&create), RawTriage::Reconcile);
        assert_eq!(RawTriage::from(&write), RawTriage::Reconcile);
        assert_eq!(RawTriage::from(&remove), RawTriage::Reconcile);
        assert_eq!(RawTriage::from(&access), RawTriage::Ignore);
    }

    #[test]
    fn test_rescan_flag_wins() {
        let event = notify::Event::new(notify::EventKind::Any).set_flag(Flag::Rescan);
        assert_eq!(RawTriage::from(&event), RawTriage::Rescan);
    }
}
