//! Coalescing of rapid writes into one event per settled file.
//!
//! A file that is being written is tracked until its size and mtime have not
//! changed for the stability threshold. The event pump re-checks tracked
//! files on every poll tick and reports each one exactly once.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::tree::FileStat;

/// What a tracked file will be reported as once it settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PendingKind {
    Add,
    Change,
}

/// Outcome for a tracked file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Settled {
    /// Unchanged for the whole threshold.
    Written {
        path: PathBuf,
        kind: PendingKind,
        stat: FileStat,
    },

    /// Removed while still being written.
    Vanished { path: PathBuf, kind: PendingKind },
}

#[derive(Debug)]
struct PendingWrite {
    kind: PendingKind,
    last: FileStat,
    stable_since: Instant,
}

#[derive(Debug)]
pub(crate) struct WriteFinishTracker {
    threshold: Duration,
    pending: HashMap<PathBuf, PendingWrite>,
}

impl WriteFinishTracker {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            pending: HashMap::new(),
        }
    }

    /// Start or refresh tracking of `path` after a raw write event.
    pub fn track(&mut self, path: &Path, kind: PendingKind, stat: FileStat, now: Instant) {
        match self.pending.get_mut(path) {
            Some(pending) => {
                if kind == PendingKind::Add {
                    pending.kind = PendingKind::Add;
                }
                if pending.last != stat {
                    pending.last = stat;
                    pending.stable_since = now;
                }
            }
            None => {
                self.pending.insert(
                    path.to_path_buf(),
                    PendingWrite {
                        kind,
                        last: stat,
                        stable_since: now,
                    },
                );
            }
        }
    }

    /// Stop tracking `path` and anything below it.
    pub fn cancel(&mut self, path: &Path) {
        self.pending.retain(|pending, _| !pending.starts_with(path));
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Re-check every tracked file and drain those that settled or vanished.
    pub fn poll<F>(&mut self, now: Instant, stat: F) -> Vec<Settled>
    where
        F: Fn(&Path) -> io::Result<FileStat>,
    {
        let mut settled = Vec::new();

        for (path, pending) in &mut self.pending {
            match stat(path) {
                Ok(current) if current != pending.last => {
                    pending.last = current;
                    pending.stable_since = now;
                }
                Ok(current) => {
                    if now.saturating_duration_since(pending.stable_since) >= self.threshold {
                        settled.push(Settled::Written {
                            path: path.clone(),
                            kind: pending.kind,
                            stat: current,
                        });
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    settled.push(Settled::Vanished {
                        path: path.clone(),
                        kind: pending.kind,
                    });
                }
                // Transient failure; try again next tick.
                Err(_) => {}
            }
        }

        for outcome in &settled {
            match outcome {
                Settled::Written { path, .. } | Settled::Vanished { path, .. } => {
                    self.pending.remove(path);
                }
            }
        }

        settled.sort_by(|a, b| a.path().cmp(b.path()));
        settled
    }
}

impl Settled {
    pub fn path(&self) -> &Path {
        match self {
            Self::Written { path, .. } | Self::Vanished { path, .. } => path,
        }
    }
}
