//! Error types for taskwatch.
//!
//! Each module defines its own error enum next to the code that raises it.
//! [`TaskwatchError`] wraps them for callers that drive a whole session.

use std::io;

use thiserror::Error;

use crate::cli::validate::ValidationError;
use crate::config::ConfigError;
use crate::gateway::GatewayError;
use crate::logger::LoggerError;
use crate::task::TaskError;
use crate::watcher::WatcherError;

/// Top-level error for sessions and the interactive menu.
#[derive(Error, Debug)]
pub enum TaskwatchError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Task file error.
    #[error("storage error: {0}")]
    Gateway(#[from] GatewayError),

    /// Live reload error.
    #[error("watcher error: {0}")]
    Watcher(#[from] WatcherError),

    /// Activity log error.
    #[error("log error: {0}")]
    Logger(#[from] LoggerError),

    /// Rejected task edit.
    #[error("{0}")]
    Task(#[from] TaskError),

    /// Rejected user input.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// Console I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias using [`TaskwatchError`].
pub type Result<T> = std::result::Result<T, TaskwatchError>;
