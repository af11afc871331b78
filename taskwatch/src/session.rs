//! One user's working session.
//!
//! Opening a session wires the pieces together in a fixed order:
//!
//! 1. Start the [`Gateway`] (creating `tasks/` if needed).
//! 2. Load `tasks/<name>.txt` if it exists, otherwise create it empty. Both
//!    are awaited, so the file is on disk before anything watches it.
//! 3. Start the [`DirectoryWatcher`] (unless disabled).
//! 4. Start the [`TaskLogger`] and try for the heartbeat lock.
//!
//! Mutations update the [`TaskStore`] and queue the matching write while the
//! store lock is held, then return without waiting for the disk. Failed
//! background writes are traced and recorded in the user's log file.
//! [`Session::close`] drains the write queue before stopping the background
//! tasks.

use tracing::{error, info, warn};

use crate::cli::validate::validate_name;
use crate::config::Config;
use crate::error::{Result, TaskwatchError};
use crate::gateway::{Gateway, GatewayError};
use crate::logger::{LoggerState, TaskLogger};
use crate::store::TaskStore;
use crate::task::{Task, TaskError, TaskFilter};
use crate::watcher::{DirectoryWatcher, WatcherError};

/// An open session for one user name.
#[derive(Debug)]
pub struct Session {
    name: String,
    gateway: Gateway,
    store: TaskStore,
    watcher: Option<DirectoryWatcher>,
    logger: TaskLogger,
    created: bool,
}

impl Session {
    /// Opens a session for `name`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails if the name is invalid, the tasks or logs directory cannot be
    /// created, or an existing task file cannot be read. A watcher that
    /// cannot start or a heartbeat lock that cannot be tried only degrades
    /// the session.
    pub async fn open(config: &Config, name: &str) -> Result<Self> {
        let name = validate_name(name)?;
        let gateway = Gateway::new(config.tasks_dir())?;
        let store = TaskStore::new();

        let created = if gateway.exists(&name).await? {
            gateway.load(&name, &store).await?;
            false
        } else {
            gateway.create_empty(&name).await?;
            true
        };

        let watcher = if config.watch_enabled {
            match DirectoryWatcher::start(gateway.clone(), &name, store.clone(), config.reload_policy) {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    warn!(name = %name, error = %e, "Live reload unavailable");
                    None
                }
            }
        } else {
            None
        };

        let mut logger = TaskLogger::new(config.logs_dir(), &name, config.logger_config())?;
        if let Err(e) = logger.start().await {
            warn!(name = %name, error = %e, "Heartbeat unavailable");
        }
        logger.log(format!("Session started for {name}")).detach(|_| {});

        info!(
            name = %name,
            tasks = store.len().await,
            created,
            logger = ?logger.state(),
            watching = watcher.is_some(),
            "Session opened"
        );

        Ok(Self {
            name,
            gateway,
            store,
            watcher,
            logger,
            created,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    #[must_use]
    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    /// Returns `true` if the task file was created by this session.
    #[must_use]
    pub fn created_task_file(&self) -> bool {
        self.created
    }

    #[must_use]
    pub fn logger_state(&self) -> LoggerState {
        self.logger.state()
    }

    #[must_use]
    pub fn logger(&self) -> &TaskLogger {
        &self.logger
    }

    /// Returns `true` while live reload is running.
    #[must_use]
    pub fn is_watching(&self) -> bool {
        self.watcher.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Reaps a watcher that ended on its own and returns why.
    ///
    /// Returns `None` while the watcher runs, after it has already been
    /// reaped, or if it stopped without error.
    pub async fn take_watcher_failure(&mut self) -> Option<WatcherError> {
        if !self.watcher.as_ref().is_some_and(DirectoryWatcher::is_finished) {
            return None;
        }
        let watcher = self.watcher.take()?;
        watcher.stop().await.err()
    }

    /// Tasks matching `filter`, in store order.
    pub async fn tasks(&self, filter: TaskFilter) -> Vec<Task> {
        self.store
            .lock()
            .await
            .iter()
            .filter(|task| filter.matches(task))
            .cloned()
            .collect()
    }

    /// Appends a task to the list and the file.
    pub async fn add_task(&self, task: Task) {
        let message = format!("Task added: {}", task.title());
        {
            let mut tasks = self.store.lock().await;
            self.gateway
                .append_one(&self.name, &task)
                .detach(self.write_failure_sink("append_one"));
            tasks.push(task);
        }
        self.audit(message);
    }

    /// Flips completion of the task at `index`.
    ///
    /// Returns the updated task, or `None` if `index` is out of range.
    pub async fn toggle_done(&self, index: usize) -> Option<Task> {
        self.modify(index, |task| {
            task.toggle_done();
            Ok(())
        })
        .await
        .ok()
        .flatten()
    }

    /// Flips urgency of the task at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::PriorityOfCompleted`] for a completed task.
    pub async fn toggle_priority(&self, index: usize) -> std::result::Result<Option<Task>, TaskError> {
        self.modify(index, Task::toggle_priority).await
    }

    /// Renames the task at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError`] if `title` is not a valid field.
    pub async fn set_title(
        &self,
        index: usize,
        title: &str,
    ) -> std::result::Result<Option<Task>, TaskError> {
        self.modify(index, |task| task.set_title(title)).await
    }

    /// Replaces the description of the task at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError`] if `description` is not a valid field.
    pub async fn set_description(
        &self,
        index: usize,
        description: &str,
    ) -> std::result::Result<Option<Task>, TaskError> {
        self.modify(index, |task| task.set_description(description))
            .await
    }

    /// Removes the task at `index`, or returns `None` if out of range.
    pub async fn remove_task(&self, index: usize) -> Option<Task> {
        let removed = {
            let mut tasks = self.store.lock().await;
            if index >= tasks.len() {
                return None;
            }
            let removed = tasks.remove(index);
            self.gateway
                .rewrite_all(&self.name, &tasks)
                .detach(self.write_failure_sink("rewrite_all"));
            removed
        };
        self.audit(format!("Task removed: {}", removed.title()));
        Some(removed)
    }

    async fn modify<F>(&self, index: usize, edit: F) -> std::result::Result<Option<Task>, TaskError>
    where
        F: FnOnce(&mut Task) -> std::result::Result<(), TaskError>,
    {
        let updated = {
            let mut tasks = self.store.lock().await;
            let Some(task) = tasks.get_mut(index) else {
                return Ok(None);
            };
            edit(task)?;
            let updated = task.clone();
            self.gateway
                .rewrite_all(&self.name, &tasks)
                .detach(self.write_failure_sink("rewrite_all"));
            updated
        };
        self.audit(format!("Task modified: {}", updated.title()));
        Ok(Some(updated))
    }

    /// Waits until every write issued so far has reached the disk.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::WorkerStopped`] if the gateway is gone.
    /// Failures of the writes themselves were already reported.
    pub async fn flush(&self) -> std::result::Result<(), GatewayError> {
        self.gateway.flush().wait().await
    }

    /// Drains pending writes, then stops the watcher and the logger.
    ///
    /// # Errors
    ///
    /// Returns the first failure among the shutdown steps; later steps still
    /// run.
    pub async fn close(mut self) -> Result<()> {
        let mut first_error: Option<TaskwatchError> = None;

        if let Err(e) = self.flush().await {
            error!(name = %self.name, error = %e, "Failed to drain pending writes");
            first_error = Some(e.into());
        }

        if let Some(watcher) = self.watcher.take() {
            if let Err(e) = watcher.stop().await {
                warn!(name = %self.name, error = %e, "Watcher ended with an error");
            }
        }

        let _ = self
            .logger
            .log(format!("Session ended for {}", self.name))
            .wait()
            .await;

        if let Err(e) = self.logger.stop().await {
            error!(name = %self.name, error = %e, "Failed to stop logger");
            if first_error.is_none() {
                first_error = Some(e.into());
            }
        }

        info!(name = %self.name, "Session closed");
        first_error.map_or(Ok(()), Err)
    }

    fn audit(&self, message: String) {
        self.logger.log(message).detach(|_| {});
    }

    fn write_failure_sink(&self, operation: &'static str) -> impl FnOnce(GatewayError) + Send + 'static {
        let name = self.name.clone();
        let writer = self.logger.writer();
        move |err| {
            error!(name = %name, operation, error = %err, "Background write failed");
            writer
                .log(format!("Error: {operation} failed: {err}"))
                .detach(|_| {});
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> Config {
        Config {
            heartbeat_interval: Duration::from_millis(50),
            stop_grace: Duration::from_millis(200),
            watch_enabled: false,
            ..Config::default()
        }
        .with_data_dir(dir.path())
    }

    #[tokio::test]
    async fn test_open_creates_missing_task_file() {
        let dir = TempDir::new().unwrap();
        let session = Session::open(&config(&dir), "alice").await.unwrap();

        assert!(session.created_task_file());
        assert!(dir.path().join("tasks/alice.txt").exists());
        assert!(session.tasks(TaskFilter::All).await.is_empty());
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_rejects_unsafe_names() {
        let dir = TempDir::new().unwrap();
        let err = Session::open(&config(&dir), "../escape").await.unwrap_err();
        assert!(matches!(err, TaskwatchError::Validation(_)));
    }

    #[tokio::test]
    async fn test_mutations_reach_the_file() {
        let dir = TempDir::new().unwrap();
        let session = Session::open(&config(&dir), "alice").await.unwrap();

        session.add_task(Task::new("Buy milk", "2 liters").unwrap()).await;
        session.add_task(Task::new("Pay rent", "March").unwrap()).await;
        session.toggle_priority(0).await.unwrap();
        session.toggle_done(1).await.unwrap();
        session.flush().await.unwrap();

        let content = fs::read_to_string(dir.path().join("tasks/alice.txt")).unwrap();
        assert_eq!(content, "Buy milk,2 liters,Urgent\nPay rent,March,Completed\n");

        session.remove_task(0).await.unwrap();
        session.flush().await.unwrap();
        let content = fs::read_to_string(dir.path().join("tasks/alice.txt")).unwrap();
        assert_eq!(content, "Pay rent,March,Completed\n");

        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_out_of_range_index_is_none() {
        let dir = TempDir::new().unwrap();
        let session = Session::open(&config(&dir), "alice").await.unwrap();

        assert!(session.toggle_done(0).await.is_none());
        assert_eq!(session.set_title(3, "x").await, Ok(None));
        assert!(session.remove_task(0).await.is_none());
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_edit_leaves_task_unchanged() {
        let dir = TempDir::new().unwrap();
        let session = Session::open(&config(&dir), "alice").await.unwrap();
        session.add_task(Task::new("a", "b").unwrap()).await;
        session.toggle_done(0).await.unwrap();

        assert_eq!(
            session.toggle_priority(0).await,
            Err(TaskError::PriorityOfCompleted)
        );
        assert!(session.set_title(0, "bad,title").await.is_err());
        assert_eq!(session.tasks(TaskFilter::All).await[0].title(), "a");
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_audit_lines_are_logged() {
        let dir = TempDir::new().unwrap();
        let session = Session::open(&config(&dir), "alice").await.unwrap();

        session.add_task(Task::new("Buy milk", "2 liters").unwrap()).await;
        session.set_description(0, "3 liters").await.unwrap();
        session.remove_task(0).await.unwrap();
        session.close().await.unwrap();
        // Audit appends are detached.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let log = fs::read_to_string(dir.path().join("logs/alice.txt")).unwrap();
        for expected in [
            " - Session started for alice",
            " - Task added: Buy milk",
            " - Task modified: Buy milk",
            " - Task removed: Buy milk",
            " - Session ended for alice",
        ] {
            assert!(log.contains(expected), "missing {expected:?} in {log}");
        }
    }

    #[tokio::test]
    async fn test_close_releases_heartbeat_lock() {
        let dir = TempDir::new().unwrap();
        let session = Session::open(&config(&dir), "alice").await.unwrap();
        assert_eq!(session.logger_state(), LoggerState::Active);
        assert!(dir.path().join("logs/alice.lock").exists());

        session.close().await.unwrap();
        assert!(!dir.path().join("logs/alice.lock").exists());
    }
}
