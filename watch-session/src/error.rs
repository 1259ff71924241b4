//! Error types for watch sessions.

use std::path::Path;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for watch session operations.
pub type Result<T> = std::result::Result<T, WatcherError>;

/// Errors that can occur while starting, running, or closing a watch session.
#[derive(Error, Debug)]
pub enum WatcherError {
    /// Directory not found.
    #[error("directory not found: {0}")]
    DirectoryNotFound(String),

    /// The watch root exists but is not a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// The watch root is a relative path.
    #[error("watch root must be an absolute path: {0}")]
    RelativeRoot(String),

    /// Permission denied.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Invalid exclude pattern.
    #[error("invalid exclude pattern: {0}")]
    InvalidPattern(String),

    /// Watch limit exceeded.
    #[error("watch limit exceeded: too many directories")]
    WatchLimitExceeded,

    /// The initial scan did not complete in time.
    #[error("initial scan did not complete within {0:?}")]
    ReadyTimeout(Duration),

    /// The session was stopped or replaced before it became ready.
    #[error("watch session closed before it became ready")]
    ClosedBeforeReady,

    /// Notify error.
    #[error("notify error: {0}")]
    Notify(notify::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend task failure.
    #[error("backend error: {0}")]
    Backend(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl WatcherError {
    /// Build the error reported when `path` is missing.
    pub(crate) fn not_found(path: &Path) -> Self {
        Self::DirectoryNotFound(path.display().to_string())
    }

    /// Whether this error was raised while a session was being constructed.
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            Self::DirectoryNotFound(_)
                | Self::NotADirectory(_)
                | Self::RelativeRoot(_)
                | Self::PermissionDenied(_)
                | Self::WatchLimitExceeded
        )
    }
}

impl From<notify::Error> for WatcherError {
    fn from(err: notify::Error) -> Self {
        let path = err
            .paths
            .first()
            .map(|p| p.display().to_string())
            .unwrap_or_default();

        match err.kind {
            notify::ErrorKind::MaxFilesWatch => Self::WatchLimitExceeded,
            notify::ErrorKind::PathNotFound => Self::DirectoryNotFound(path),
            notify::ErrorKind::Io(ref io)
                if io.kind() == std::io::ErrorKind::PermissionDenied =>
            {
                Self::PermissionDenied(path)
            }
            _ => Self::Notify(err),
        }
    }
}

impl From<glob::PatternError> for WatcherError {
    fn from(err: glob::PatternError) -> Self {
        Self::InvalidPattern(err.to_string())
    }
}

impl From<tokio::task::JoinError> for WatcherError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Backend(err.to_string())
    }
}
