//! Configuration module for taskwatch.
//!
//! This module handles parsing configuration from environment variables.
//! Command-line flags override individual fields after loading.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `TASKWATCH_DATA_DIR` | No | `.` | Directory holding `tasks/` and `logs/` |
//! | `TASKWATCH_HEARTBEAT_MS` | No | 1000 | Heartbeat period in milliseconds (> 0) |
//! | `TASKWATCH_STOP_GRACE_MS` | No | 1000 | How long shutdown waits for a running heartbeat tick |
//! | `TASKWATCH_RELOAD` | No | `replace` | Live reload policy: `replace` or `when-empty` |
//! | `TASKWATCH_WATCH` | No | `true` | Enable live reload of the task file |
//! | `TASKWATCH_HEARTBEAT` | No | `true` | Enable the heartbeat log |
//!
//! # Example
//!
//! ```no_run
//! use taskwatch::config::Config;
//!
//! let config = Config::from_env().expect("Failed to load configuration");
//! println!("Tasks live in {}", config.tasks_dir().display());
//! ```

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::gateway::ReloadPolicy;
use crate::logger::LoggerConfig;

/// Default data directory.
const DEFAULT_DATA_DIR: &str = ".";

/// Directory under the data directory that holds task files.
pub const TASKS_DIR_NAME: &str = "tasks";

/// Directory under the data directory that holds log and lock files.
pub const LOGS_DIR_NAME: &str = "logs";

/// Default heartbeat period (in milliseconds).
const DEFAULT_HEARTBEAT_MS: u64 = 1000;

/// Default stop grace period (in milliseconds).
const DEFAULT_STOP_GRACE_MS: u64 = 1000;

/// Errors that can occur during configuration parsing.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Environment variable has an invalid value.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Root of the `tasks/` and `logs/` directories.
    pub data_dir: PathBuf,

    /// Time between heartbeat lines.
    pub heartbeat_interval: Duration,

    /// How long shutdown waits for an in-progress heartbeat tick.
    pub stop_grace: Duration,

    /// What a live reload does to tasks already in memory.
    pub reload_policy: ReloadPolicy,

    /// Whether the task file is watched for external changes.
    pub watch_enabled: bool,

    /// Whether this session competes for the heartbeat lock at all.
    pub heartbeat_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_MS),
            stop_grace: Duration::from_millis(DEFAULT_STOP_GRACE_MS),
            reload_policy: ReloadPolicy::default(),
            watch_enabled: true,
            heartbeat_enabled: true,
        }
    }
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if a variable is set to
    /// something that cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let data_dir = env::var("TASKWATCH_DATA_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map_or_else(|| PathBuf::from(DEFAULT_DATA_DIR), PathBuf::from);

        // tokio's interval panics on a zero period.
        let heartbeat_ms = parse_millis("TASKWATCH_HEARTBEAT_MS", DEFAULT_HEARTBEAT_MS)?;
        if heartbeat_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "TASKWATCH_HEARTBEAT_MS".to_string(),
                message: "heartbeat period must be greater than 0".to_string(),
            });
        }

        let stop_grace_ms = parse_millis("TASKWATCH_STOP_GRACE_MS", DEFAULT_STOP_GRACE_MS)?;

        let reload_policy = match env::var("TASKWATCH_RELOAD") {
            Ok(val) => val
                .parse::<ReloadPolicy>()
                .map_err(|message| ConfigError::InvalidValue {
                    key: "TASKWATCH_RELOAD".to_string(),
                    message,
                })?,
            Err(_) => ReloadPolicy::default(),
        };

        let watch_enabled = parse_bool("TASKWATCH_WATCH", true)?;
        let heartbeat_enabled = parse_bool("TASKWATCH_HEARTBEAT", true)?;

        Ok(Self {
            data_dir,
            heartbeat_interval: Duration::from_millis(heartbeat_ms),
            stop_grace: Duration::from_millis(stop_grace_ms),
            reload_policy,
            watch_enabled,
            heartbeat_enabled,
        })
    }

    /// Returns a copy rooted at `data_dir`.
    #[must_use]
    pub fn with_data_dir(mut self, data_dir: impl AsRef<Path>) -> Self {
        self.data_dir = data_dir.as_ref().to_path_buf();
        self
    }

    #[must_use]
    pub fn tasks_dir(&self) -> PathBuf {
        self.data_dir.join(TASKS_DIR_NAME)
    }

    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join(LOGS_DIR_NAME)
    }

    /// Heartbeat settings for [`crate::logger::TaskLogger`].
    #[must_use]
    pub fn logger_config(&self) -> LoggerConfig {
        LoggerConfig {
            heartbeat_interval: self.heartbeat_interval,
            stop_grace: self.stop_grace,
            heartbeat_enabled: self.heartbeat_enabled,
        }
    }
}

fn parse_millis(key: &str, default: u64) -> Result<u64, ConfigError> {
    match env::var(key) {
        Ok(val) => val.trim().parse::<u64>().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected milliseconds as a non-negative integer, got '{val}'"),
        }),
        Err(_) => Ok(default),
    }
}

fn parse_bool(key: &str, default: bool) -> Result<bool, ConfigError> {
    match env::var(key) {
        Ok(val) => match val.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected true or false, got '{val}'"),
            }),
        },
        Err(_) => Ok(default),
    }
}
