//! Live reload of a user's task file.
//!
//! [`DirectoryWatcher`] subscribes to the tasks directory (non-recursively) and
//! reloads the session's store whenever `<name>.txt` is created, modified or
//! removed. Other files in the directory are ignored.
//!
//! # Architecture
//!
//! The notify callback only classifies raw events and forwards them through
//! an internal channel. A dedicated async task drains that channel in
//! batches: a batch that touched the task file triggers exactly one
//! [`Gateway::reload`]. The reload goes through the gateway's queue, so it is
//! ordered with the session's own writes and never sees a half-written file.
//!
//! Overflow notifications (the OS dropped events) are counted and otherwise
//! ignored.
//!
//! A reload failure, such as the task file being deleted, ends the watch
//! task. The error is reported by [`DirectoryWatcher::stop`]; the session
//! keeps running without live reload.
//!
//! # Example
//!
//! ```no_run
//! use taskwatch::gateway::{Gateway, ReloadPolicy};
//! use taskwatch::store::TaskStore;
//! use taskwatch::watcher::DirectoryWatcher;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let gateway = Gateway::new("tasks")?;
//! let store = TaskStore::new();
//! gateway.create_empty("alice").await?;
//! gateway.load("alice", &store).await?;
//!
//! let watcher = DirectoryWatcher::start(gateway, "alice", store, ReloadPolicy::Replace)?;
//! // ... external edits to tasks/alice.txt now show up in the store ...
//! let stats = watcher.stop().await?;
//! println!("reloads applied: {}", stats.reloads);
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::gateway::{Gateway, GatewayError, ReloadOutcome, ReloadPolicy};
use crate::store::TaskStore;

/// Capacity of the channel between the notify callback and the watch task.
const INTERNAL_CHANNEL_CAPACITY: usize = 1000;

/// Errors that can occur during file watching operations.
#[derive(Error, Debug)]
pub enum WatcherError {
    /// Failed to initialize the file system watcher.
    #[error("failed to create watcher: {0}")]
    WatcherInit(#[from] notify::Error),

    /// The tasks directory does not exist or is inaccessible.
    #[error("watch directory does not exist: {0}")]
    DirectoryNotFound(PathBuf),

    /// The task file has not been created yet.
    #[error("task file does not exist: {0}")]
    TaskFileMissing(PathBuf),

    /// Reloading the task file failed; the watch task has ended.
    #[error("failed to reload tasks for {name}: {source}")]
    Reload {
        name: String,
        #[source]
        source: GatewayError,
    },

    /// The watch task panicked or was cancelled.
    #[error("watch task failed: {0}")]
    Task(String),
}

/// Result type for watcher operations.
pub type Result<T> = std::result::Result<T, WatcherError>;

/// What a raw notify event means for the watched task file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchAction {
    /// The task file was created, modified or removed.
    Reload,
    /// The OS dropped events; nothing to do.
    Overflow,
    /// Not about the task file, or an access-only event.
    Ignore,
}

/// Classifies a notify event for the task file named `file_name`.
#[must_use]
pub fn classify(event: &Event, file_name: &str) -> WatchAction {
    if event.need_rescan() {
        return WatchAction::Overflow;
    }

    let relevant_kind = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) | EventKind::Any
    );
    if !relevant_kind {
        return WatchAction::Ignore;
    }

    let touches_file = event
        .paths
        .iter()
        .any(|path| path.file_name().is_some_and(|n| n == file_name));

    if touches_file {
        WatchAction::Reload
    } else {
        WatchAction::Ignore
    }
}

/// Counters kept by the watch task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchStats {
    /// Reloads that replaced the store's contents.
    pub reloads: usize,
    /// Reloads that found only our own writes.
    pub echoes: usize,
    /// Reloads postponed behind queued writes.
    pub deferred: usize,
    /// Reloads the policy declined.
    pub skipped: usize,
    /// Overflow notifications seen.
    pub overflows: usize,
}

impl WatchStats {
    fn record(&mut self, outcome: ReloadOutcome) {
        match outcome {
            ReloadOutcome::Applied { .. } => self.reloads += 1,
            ReloadOutcome::Unchanged => self.echoes += 1,
            ReloadOutcome::Deferred => self.deferred += 1,
            ReloadOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// Internal events sent from the notify callback to the watch task.
#[derive(Debug)]
enum InternalEvent {
    Changed,
    Overflow,
}

/// What the watch task reloads and how.
struct ReloadTarget {
    gateway: Gateway,
    name: String,
    store: TaskStore,
    policy: ReloadPolicy,
}

/// Watches one user's task file and keeps a store in sync with it.
#[derive(Debug)]
pub struct DirectoryWatcher {
    /// Kept alive to maintain the subscription.
    #[allow(dead_code)]
    watcher: Option<RecommendedWatcher>,
    name: String,
    task_file: PathBuf,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<Result<WatchStats>>,
}

impl DirectoryWatcher {
    /// Starts watching `name`'s task file.
    ///
    /// The task file must already exist on disk; start the watcher only after
    /// the initial create or load has completed.
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError::DirectoryNotFound`] or
    /// [`WatcherError::TaskFileMissing`] when the directory or file is not
    /// there yet, and [`WatcherError::WatcherInit`] if the OS watch cannot be
    /// set up.
    pub fn start(
        gateway: Gateway,
        name: &str,
        store: TaskStore,
        policy: ReloadPolicy,
    ) -> Result<Self> {
        let watch_dir = gateway.tasks_dir().to_path_buf();
        if !watch_dir.is_dir() {
            return Err(WatcherError::DirectoryNotFound(watch_dir));
        }

        let task_file = gateway.task_file(name);
        if !task_file.exists() {
            return Err(WatcherError::TaskFileMissing(task_file));
        }

        let file_name = task_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let (internal_tx, internal_rx) = mpsc::channel(INTERNAL_CHANNEL_CAPACITY);
        let watcher = create_watcher(internal_tx, &watch_dir, file_name)?;

        info!(
            name = %name,
            task_file = %task_file.display(),
            policy = policy.as_str(),
            "Watching task file"
        );

        let target = ReloadTarget {
            gateway,
            name: name.to_string(),
            store,
            policy,
        };
        Ok(Self::spawn(Some(watcher), target, task_file, internal_rx))
    }

    fn spawn(
        watcher: Option<RecommendedWatcher>,
        target: ReloadTarget,
        task_file: PathBuf,
        internal_rx: mpsc::Receiver<InternalEvent>,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let name = target.name.clone();
        let task = tokio::spawn(process_internal_events(internal_rx, shutdown_rx, target));

        Self {
            watcher,
            name,
            task_file,
            shutdown,
            task,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn task_file(&self) -> &Path {
        &self.task_file
    }

    /// Returns `true` once the watch task has ended, by failure or shutdown.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops watching and returns the task's counters.
    ///
    /// # Errors
    ///
    /// Returns the reload error that ended the task early, if any.
    pub async fn stop(self) -> Result<WatchStats> {
        let _ = self.shutdown.send(true);
        drop(self.watcher);

        let stats = self
            .task
            .await
            .map_err(|e| WatcherError::Task(e.to_string()))??;

        debug!(name = %self.name, ?stats, "Watcher stopped");
        Ok(stats)
    }
}

/// Creates the notify watcher with a lightweight callback.
fn create_watcher(
    internal_tx: mpsc::Sender<InternalEvent>,
    watch_dir: &Path,
    file_name: String,
) -> Result<RecommendedWatcher> {
    let mut watcher = RecommendedWatcher::new(
        move |res: std::result::Result<Event, notify::Error>| {
            handle_notify_event(res, &file_name, &internal_tx);
        },
        Config::default(),
    )?;

    watcher.watch(watch_dir, RecursiveMode::NonRecursive)?;

    debug!(watch_dir = %watch_dir.display(), "Started directory watch");

    Ok(watcher)
}

fn handle_notify_event(
    res: std::result::Result<Event, notify::Error>,
    file_name: &str,
    internal_tx: &mpsc::Sender<InternalEvent>,
) {
    let event = match res {
        Ok(event) => event,
        Err(e) => {
            error!(error = %e, "File watcher error");
            return;
        }
    };

    trace!(kind = ?event.kind, paths = ?event.paths, "Received notify event");

    let internal = match classify(&event, file_name) {
        WatchAction::Reload => InternalEvent::Changed,
        WatchAction::Overflow => InternalEvent::Overflow,
        WatchAction::Ignore => return,
    };

    // Never block the notify thread; a full channel already holds a reload.
    if let Err(e) = internal_tx.try_send(internal) {
        warn!(error = %e, "Failed to queue watch event, channel may be full");
    }
}

/// Drains watch events until shutdown or a reload failure.
async fn process_internal_events(
    mut rx: mpsc::Receiver<InternalEvent>,
    mut shutdown: watch::Receiver<bool>,
    target: ReloadTarget,
) -> Result<WatchStats> {
    let mut stats = WatchStats::default();

    loop {
        let first = tokio::select! {
            _ = shutdown.changed() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let mut batch = vec![first];
        while let Ok(event) = rx.try_recv() {
            batch.push(event);
        }

        let mut changed = false;
        for event in batch {
            match event {
                InternalEvent::Changed => changed = true,
                InternalEvent::Overflow => {
                    stats.overflows += 1;
                    debug!(name = %target.name, "Watch overflow, ignoring");
                }
            }
        }

        if !changed {
            continue;
        }

        let outcome = target
            .gateway
            .reload(&target.name, &target.store, target.policy)
            .wait()
            .await
            .map_err(|source| {
                error!(name = %target.name, error = %source, "Reload failed, live reload stopped");
                WatcherError::Reload {
                    name: target.name.clone(),
                    source,
                }
            })?;

        trace!(name = %target.name, ?outcome, "Reload finished");
        stats.record(outcome);
    }

    debug!(name = %target.name, "Watch task shutting down");
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, Flag, ModifyKind, RemoveKind};
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn test_classify_task_file_events() {
        let kinds = [
            EventKind::Create(CreateKind::File),
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            EventKind::Modify(ModifyKind::Any),
            EventKind::Remove(RemoveKind::File),
        ];
        for kind in kinds {
            assert_eq!(
                classify(&event(kind, "/data/tasks/alice.txt"), "alice.txt"),
                WatchAction::Reload
            );
        }
    }

    #[test]
    fn test_classify_ignores_other_files() {
        let kind = EventKind::Modify(ModifyKind::Any);
        assert_eq!(
            classify(&event(kind, "/data/tasks/bob.txt"), "alice.txt"),
            WatchAction::Ignore
        );
        assert_eq!(
            classify(&event(kind, "/data/tasks/alice.txt.bak"), "alice.txt"),
            WatchAction::Ignore
        );
    }

    #[test]
    fn test_classify_ignores_access() {
        let kind = EventKind::Access(notify::event::AccessKind::Any);
        assert_eq!(
            classify(&event(kind, "/data/tasks/alice.txt"), "alice.txt"),
            WatchAction::Ignore
        );
    }

    #[test]
    fn test_classify_overflow() {
        let overflow = Event::new(EventKind::Other).set_flag(Flag::Rescan);
        assert_eq!(classify(&overflow, "alice.txt"), WatchAction::Overflow);
    }

    #[tokio::test]
    async fn test_start_requires_task_file() {
        let dir = TempDir::new().unwrap();
        let gateway = Gateway::new(dir.path().join("tasks")).unwrap();

        let result = DirectoryWatcher::start(gateway, "alice", TaskStore::new(), ReloadPolicy::Replace);
        assert!(matches!(result, Err(WatcherError::TaskFileMissing(_))));
    }

    #[tokio::test]
    async fn test_start_requires_directory() {
        let dir = TempDir::new().unwrap();
        let tasks_dir = dir.path().join("tasks");
        let gateway = Gateway::new(&tasks_dir).unwrap();
        fs::remove_dir(&tasks_dir).unwrap();

        let result = DirectoryWatcher::start(gateway, "alice", TaskStore::new(), ReloadPolicy::Replace);
        assert!(matches!(result, Err(WatcherError::DirectoryNotFound(_))));
    }

    #[tokio::test]
    async fn test_overflow_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let gateway = Gateway::new(dir.path().join("tasks")).unwrap();
        fs::write(gateway.task_file("alice"), "a,1,Pending\n").unwrap();

        let store = TaskStore::new();
        gateway.load("alice", &store).await.unwrap();

        let (tx, rx) = mpsc::channel(8);
        let target = ReloadTarget {
            gateway: gateway.clone(),
            name: "alice".to_string(),
            store: store.clone(),
            policy: ReloadPolicy::Replace,
        };
        let watcher = DirectoryWatcher::spawn(None, target, gateway.task_file("alice"), rx);

        // Change the file behind the store's back; an overflow alone must not reload it.
        fs::write(gateway.task_file("alice"), "x,1,Pending\ny,2,Pending\n").unwrap();
        tx.send(InternalEvent::Overflow).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let stats = watcher.stop().await.unwrap();
        assert_eq!(stats.overflows, 1);
        assert_eq!(stats.reloads, 0);
        assert_eq!(store.snapshot().await[0].title(), "a");
    }

    #[tokio::test]
    async fn test_change_batch_reloads_once() {
        let dir = TempDir::new().unwrap();
        let gateway = Gateway::new(dir.path().join("tasks")).unwrap();
        fs::write(gateway.task_file("alice"), "a,1,Pending\n").unwrap();

        let store = TaskStore::new();
        gateway.load("alice", &store).await.unwrap();
        fs::write(gateway.task_file("alice"), "x,1,Pending\ny,2,Pending\n").unwrap();

        let (tx, rx) = mpsc::channel(8);
        for _ in 0..3 {
            tx.send(InternalEvent::Changed).await.unwrap();
        }

        let target = ReloadTarget {
            gateway: gateway.clone(),
            name: "alice".to_string(),
            store: store.clone(),
            policy: ReloadPolicy::Replace,
        };
        let watcher = DirectoryWatcher::spawn(None, target, gateway.task_file("alice"), rx);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let stats = watcher.stop().await.unwrap();
        assert_eq!(stats.reloads, 1);
        assert_eq!(stats.echoes, 0);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_reload_failure_ends_task() {
        let dir = TempDir::new().unwrap();
        let gateway = Gateway::new(dir.path().join("tasks")).unwrap();
        gateway.create_empty("alice").await.unwrap();

        let (tx, rx) = mpsc::channel(8);
        let target = ReloadTarget {
            gateway: gateway.clone(),
            name: "alice".to_string(),
            store: TaskStore::new(),
            policy: ReloadPolicy::Replace,
        };
        let watcher = DirectoryWatcher::spawn(None, target, gateway.task_file("alice"), rx);

        fs::remove_file(gateway.task_file("alice")).unwrap();
        tx.send(InternalEvent::Changed).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(watcher.is_finished());
        assert!(matches!(watcher.stop().await, Err(WatcherError::Reload { .. })));
    }
}
