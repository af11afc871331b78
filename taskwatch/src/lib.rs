//! taskwatch - file-backed task tracker with live reload.
//!
//! Each user's tasks live in `tasks/<name>.txt`, one `title,description,status`
//! line per task. A session keeps the list in memory, writes every change
//! back in the background, and reloads the file when something else edits
//! it. An activity log in `logs/<name>.txt` records changes, and the one
//! session per user that holds `logs/<name>.lock` also writes a heartbeat
//! line every second.
//!
//! # Concurrency
//!
//! All task file I/O goes through one [`Gateway`] worker, which runs jobs in
//! the order they were issued. Mutations and live reloads share the
//! [`TaskStore`] mutex, and a reload never runs while a session write is
//! still queued, so neither side overwrites the other.
//!
//! # Modules
//!
//! - [`task`]: Task entity, status transitions and field validation
//! - [`codec`]: Line format of task files
//! - [`store`]: Shared in-memory task list
//! - [`pending`]: Handles for background work
//! - [`gateway`]: Serialized task file persistence
//! - [`watcher`]: Live reload on external changes
//! - [`logger`]: Activity log and single-instance heartbeat
//! - [`session`]: One user's session tying the above together
//! - [`config`]: Configuration from environment variables
//! - [`error`]: Top-level error type
//! - [`cli`]: Interactive menu and input validation
//! - [`utils`]: Shared utilities (advisory locks)

pub mod cli;
pub mod codec;
pub mod config;
pub mod error;
pub mod gateway;
pub mod logger;
pub mod pending;
pub mod session;
pub mod store;
pub mod task;
pub mod utils;
pub mod watcher;

pub use config::Config;
pub use error::{Result, TaskwatchError};
pub use gateway::{Gateway, GatewayError, ReloadOutcome, ReloadPolicy};
pub use logger::{LoggerConfig, LoggerError, LoggerState, TaskLogger};
pub use pending::Pending;
pub use session::Session;
pub use store::TaskStore;
pub use task::{Task, TaskError, TaskFilter, TaskStatus};
pub use utils::AdvisoryLock;
pub use watcher::{DirectoryWatcher, WatchStats, WatcherError};
