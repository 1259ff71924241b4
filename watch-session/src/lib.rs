//! # Watch Session
//!
//! This crate provides a long-lived directory change notification service.
//! A [`WatchSessionManager`] owns at most one watch session at a time and
//! reports file adds, changes and removals below a root directory to a set
//! of caller-supplied handlers.
//!
//! ## Features
//!
//! - **Single Session**: Starting a new watch fully releases the previous one first
//! - **Reconfiguration**: Swap exclusion rules while keeping the same root and handlers
//! - **Ready Gating**: Files that exist before the watch starts are not reported
//! - **Write Coalescing**: Rapid writes to one file produce a single change event
//! - **Exclusion Rules**: Glob patterns or a predicate hide whole subtrees
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     WatchSessionManager                         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  start / stop / reconfigure ──► WatchSession ──► WatchBackend   │
//! │                                      ▲               │          │
//! │                                      │          NotifyBackend   │
//! │                                      │      (scan, stability)   │
//! │                HandlerSet ◄── dispatcher ◄── WatchEvent         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use codex_watch_session::{ExclusionRules, HandlerSet, SessionConfig, WatchSessionManager};
//!
//! let manager = WatchSessionManager::new(SessionConfig::default());
//! let handlers = HandlerSet::new()
//!     .on_add(|path| println!("added {}", path.display()))
//!     .on_change(|path| println!("changed {}", path.display()));
//!
//! manager.start("/home/user/project", ExclusionRules::common(), handlers).await?;
//! manager.reconfigure(ExclusionRules::patterns(["*.tmp"])?).await?;
//! manager.stop().await;
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod event;
pub mod handler;
pub mod manager;
pub mod notify_backend;
pub mod rules;
pub mod session;

mod stability;
mod tree;

pub use backend::{BackendOptions, EventSink, WatchBackend, WatchHandle, WatchedPaths};
pub use config::{SessionConfig, WriteStability};
pub use error::{Result, WatcherError};
pub use event::{WatchEvent, WatchEventKind};
pub use handler::HandlerSet;
pub use manager::WatchSessionManager;
pub use notify_backend::NotifyBackend;
pub use rules::ExclusionRules;
pub use session::{SessionState, SessionStats};
