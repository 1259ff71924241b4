//! Configuration types for watch sessions.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WatcherError};

/// Options applied to every session a manager opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Suppress add events for files that exist when the watch starts.
    pub ignore_initial: bool,

    /// Hold add/change events until the file stops changing (None = report immediately).
    pub await_write_finish: Option<WriteStability>,

    /// Maximum depth to recurse below the root (None = unlimited).
    pub max_depth: Option<usize>,

    /// Use the polling backend instead of native OS events.
    pub use_polling: bool,

    /// Scan interval for the polling backend, in milliseconds.
    pub polling_interval_ms: u64,

    /// Whether to follow symbolic links.
    pub follow_symlinks: bool,

    /// How long `start` waits for the initial scan, in milliseconds (None = forever).
    pub ready_timeout_ms: Option<u64>,
}

impl SessionConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Report pre-existing files as adds during the initial scan.
    pub fn report_initial(mut self) -> Self {
        self.ignore_initial = false;
        self
    }

    /// Set the write stability window.
    pub fn with_write_stability(mut self, stability: WriteStability) -> Self {
        self.await_write_finish = Some(stability);
        self
    }

    /// Report writes as soon as the backend sees them.
    pub fn without_write_stability(mut self) -> Self {
        self.await_write_finish = None;
        self
    }

    /// Set the maximum depth.
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    /// Force the polling backend with the given scan interval.
    pub fn with_polling(mut self, interval: Duration) -> Self {
        self.use_polling = true;
        self.polling_interval_ms = duration_ms(interval);
        self
    }

    /// Enable following symbolic links.
    pub fn follow_symlinks(mut self) -> Self {
        self.follow_symlinks = true;
        self
    }

    /// Bound the wait for the initial scan.
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout_ms = Some(duration_ms(timeout));
        self
    }

    /// Scan interval of the polling backend.
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    /// Ready timeout, if any.
    pub fn ready_timeout(&self) -> Option<Duration> {
        self.ready_timeout_ms.map(Duration::from_millis)
    }

    /// Check that intervals are usable.
    pub fn validate(&self) -> Result<()> {
        if self.use_polling && self.polling_interval_ms == 0 {
            return Err(WatcherError::Config(
                "polling_interval_ms must be greater than zero".to_string(),
            ));
        }

        if let Some(stability) = &self.await_write_finish {
            stability.validate()?;
        }

        if self.ready_timeout_ms == Some(0) {
            return Err(WatcherError::Config(
                "ready_timeout_ms must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ignore_initial: true,
            await_write_finish: Some(WriteStability::default()),
            max_depth: None,
            use_polling: false,
            polling_interval_ms: 100,
            follow_symlinks: false,
            ready_timeout_ms: None,
        }
    }
}

/// How long a file must stay unchanged before a write is reported.
///
/// A file counts as unchanged while its size and mtime stay the same. The
/// settled stat is also compared with the last reported one, so a rewrite
/// that keeps the size and lands within the filesystem's mtime resolution
/// (1-2s on HFS+, FAT and some network mounts) is not reported as a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteStability {
    /// Size and mtime must be unchanged for this long, in milliseconds.
    pub stability_threshold_ms: u64,

    /// How often pending files are re-checked, in milliseconds.
    pub poll_interval_ms: u64,
}

impl WriteStability {
    /// Create a stability window.
    pub fn new(threshold: Duration, poll_interval: Duration) -> Self {
        Self {
            stability_threshold_ms: duration_ms(threshold),
            poll_interval_ms: duration_ms(poll_interval),
        }
    }

    /// The stability threshold.
    pub fn threshold(&self) -> Duration {
        Duration::from_millis(self.stability_threshold_ms)
    }

    /// The re-check interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(WatcherError::Config(
                "await_write_finish.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.stability_threshold_ms < self.poll_interval_ms {
            return Err(WatcherError::Config(format!(
                "stability threshold ({}ms) is shorter than its poll interval ({}ms)",
                self.stability_threshold_ms, self.poll_interval_ms
            )));
        }
        Ok(())
    }
}

impl Default for WriteStability {
    fn default() -> Self {
        Self {
            stability_threshold_ms: 2000,
            poll_interval_ms: 100,
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
