//! Per-user activity log with a single-instance heartbeat.
//!
//! Each user gets `logs/<name>.txt`. Any number of sessions may append to it;
//! each line is written with one `write_all` on a file opened in append mode,
//! so lines from different writers never interleave mid-line.
//!
//! The heartbeat ("Current Time: ...", once per interval) is emitted by at
//! most one session per user. A session that wants to run it takes an
//! exclusive advisory lock on `logs/<name>.lock` first. If the lock is held
//! elsewhere the logger goes [`LoggerState::Inactive`]: it still appends
//! ordinary lines but never ticks.
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized ──start──▶ LockAttempted ──acquired──▶ Active ──stop──▶ Stopped
//!                                       └──contended─▶ Inactive ─stop─▶ Stopped
//! ```

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::pending::Pending;
use crate::utils::lock::AdvisoryLock;

/// Timestamp format used in log lines.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Default heartbeat period.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Default time `stop` waits for an in-progress tick.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(1);

/// Errors that can occur while logging.
#[derive(Error, Debug)]
pub enum LoggerError {
    /// The logs directory could not be created.
    #[error("failed to create logs directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A log line could not be written.
    #[error("failed to write to log {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The heartbeat lock could not be tried.
    #[error("failed to lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The heartbeat lock could not be released.
    #[error("failed to release lock {path}: {source}")]
    Release {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A blocking log task panicked or was cancelled.
    #[error("log task failed: {0}")]
    Background(String),
}

/// Where the logger is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggerState {
    Uninitialized,
    LockAttempted,
    /// Holds the lock and runs the heartbeat.
    Active,
    /// Another holder has the lock; no heartbeat.
    Inactive,
    Stopped,
}

/// Heartbeat settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoggerConfig {
    /// Time between heartbeat lines.
    pub heartbeat_interval: Duration,
    /// How long `stop` waits for a running tick before aborting it.
    pub stop_grace: Duration,
    /// When false, the lock is never tried and the logger starts inactive.
    pub heartbeat_enabled: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            stop_grace: DEFAULT_STOP_GRACE,
            heartbeat_enabled: true,
        }
    }
}

/// Formats a log line, including the trailing newline.
#[must_use]
pub fn format_line(message: &str) -> String {
    format!("{} - {}\n", Local::now().format(TIMESTAMP_FORMAT), message)
}

/// Cloneable appender for one log file.
#[derive(Debug, Clone)]
pub struct LogWriter {
    path: Arc<PathBuf>,
}

impl LogWriter {
    fn new(path: PathBuf) -> Self {
        Self {
            path: Arc::new(path),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `"<timestamp> - <message>"` as one line.
    ///
    /// The timestamp is taken now; the write runs on the blocking pool and
    /// completes even if the returned handle is dropped. Failures are traced.
    pub fn log(&self, message: impl AsRef<str>) -> Pending<(), LoggerError> {
        let line = format_line(message.as_ref());
        let path = Arc::clone(&self.path);

        let write = tokio::task::spawn_blocking(move || {
            append_line(&path, &line).map_err(|source| LoggerError::Write {
                path: path.to_path_buf(),
                source,
            })
        });

        Pending::new("log", async move {
            let result = write
                .await
                .map_err(|e| LoggerError::Background(e.to_string()))
                .and_then(|r| r);
            if let Err(e) = &result {
                warn!(error = %e, "Failed to write log line");
            }
            result
        })
    }
}

fn append_line(path: &Path, line: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())
}

struct Heartbeat {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Activity log and heartbeat for one user.
pub struct TaskLogger {
    name: String,
    writer: LogWriter,
    lock_path: PathBuf,
    config: LoggerConfig,
    state: LoggerState,
    lock: Option<AdvisoryLock>,
    heartbeat: Option<Heartbeat>,
    heartbeats: Arc<AtomicU64>,
}

impl TaskLogger {
    /// Prepares the logger for `name` under `logs_dir`, creating the
    /// directory if needed. Nothing is locked until [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns [`LoggerError::Directory`] if `logs_dir` cannot be created.
    pub fn new(
        logs_dir: impl AsRef<Path>,
        name: &str,
        config: LoggerConfig,
    ) -> Result<Self, LoggerError> {
        let logs_dir = logs_dir.as_ref();
        fs::create_dir_all(logs_dir).map_err(|source| LoggerError::Directory {
            path: logs_dir.to_path_buf(),
            source,
        })?;

        Ok(Self {
            name: name.to_string(),
            writer: LogWriter::new(logs_dir.join(format!("{name}.txt"))),
            lock_path: logs_dir.join(format!("{name}.lock")),
            config,
            state: LoggerState::Uninitialized,
            lock: None,
            heartbeat: None,
            heartbeats: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Tries the heartbeat lock and, if acquired, starts the heartbeat.
    ///
    /// The first heartbeat is written immediately. Calling `start` again is
    /// a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`LoggerError::Lock`] if the lock file cannot be opened. Lock
    /// contention is not an error.
    pub async fn start(&mut self) -> Result<LoggerState, LoggerError> {
        if self.state != LoggerState::Uninitialized {
            return Ok(self.state);
        }

        if !self.config.heartbeat_enabled {
            debug!(name = %self.name, "Heartbeat disabled");
            self.state = LoggerState::Inactive;
            return Ok(self.state);
        }

        self.state = LoggerState::LockAttempted;

        let lock_path = self.lock_path.clone();
        let acquired = tokio::task::spawn_blocking(move || AdvisoryLock::try_acquire(lock_path))
            .await
            .map_err(|e| LoggerError::Background(e.to_string()))?;

        let lock = match acquired {
            Ok(lock) => lock,
            Err(source) => {
                self.state = LoggerState::Inactive;
                return Err(LoggerError::Lock {
                    path: self.lock_path.clone(),
                    source,
                });
            }
        };

        match lock {
            Some(lock) => {
                self.lock = Some(lock);
                self.heartbeat = Some(self.spawn_heartbeat());
                self.state = LoggerState::Active;
                info!(
                    name = %self.name,
                    interval_ms = self.config.heartbeat_interval.as_millis() as u64,
                    "Heartbeat started"
                );
            }
            None => {
                self.state = LoggerState::Inactive;
                info!(
                    name = %self.name,
                    lock = %self.lock_path.display(),
                    "Another session holds the heartbeat lock, heartbeat disabled"
                );
            }
        }

        Ok(self.state)
    }

    fn spawn_heartbeat(&self) -> Heartbeat {
        let (shutdown, mut shutdown_rx) = oneshot::channel();
        let writer = self.writer.clone();
        let count = Arc::clone(&self.heartbeats);
        let period = self.config.heartbeat_interval;

        let task = tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        let message = format!("Current Time: {}", Local::now().format(TIMESTAMP_FORMAT));
                        if writer.log(message).wait().await.is_ok() {
                            count.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            }
        });

        Heartbeat { shutdown, task }
    }

    /// Appends one line to this user's log.
    pub fn log(&self, message: impl AsRef<str>) -> Pending<(), LoggerError> {
        self.writer.log(message)
    }

    /// Returns a cloneable handle for appending to the log.
    #[must_use]
    pub fn writer(&self) -> LogWriter {
        self.writer.clone()
    }

    #[must_use]
    pub fn state(&self) -> LoggerState {
        self.state
    }

    /// Number of heartbeat lines written so far.
    #[must_use]
    pub fn heartbeat_count(&self) -> u64 {
        self.heartbeats.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn log_path(&self) -> &Path {
        self.writer.path()
    }

    #[must_use]
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Stops the heartbeat and releases the lock.
    ///
    /// A tick that is mid-write gets up to the configured grace period to
    /// finish; after that the heartbeat task is aborted. The lock file is
    /// removed if this logger held it. Safe to call more than once.
    ///
    /// # Errors
    ///
    /// Returns [`LoggerError::Release`] if the lock file cannot be removed.
    pub async fn stop(&mut self) -> Result<(), LoggerError> {
        if let Some(Heartbeat { shutdown, mut task }) = self.heartbeat.take() {
            let _ = shutdown.send(());
            match time::timeout(self.config.stop_grace, &mut task).await {
                Ok(_) => debug!(name = %self.name, "Heartbeat stopped"),
                Err(_) => {
                    warn!(
                        name = %self.name,
                        grace_ms = self.config.stop_grace.as_millis() as u64,
                        "Heartbeat did not stop in time, aborting"
                    );
                    task.abort();
                }
            }
        }

        let released = match self.lock.take() {
            Some(lock) => lock.release().map_err(|source| LoggerError::Release {
                path: self.lock_path.clone(),
                source,
            }),
            None => Ok(()),
        };

        self.state = LoggerState::Stopped;
        released
    }
}

impl Drop for TaskLogger {
    fn drop(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.task.abort();
        }
    }
}

impl std::fmt::Debug for TaskLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskLogger")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("log_path", &self.writer.path())
            .finish_non_exhaustive()
    }
}
