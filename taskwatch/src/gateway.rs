//! Task file persistence.
//!
//! The [`Gateway`] owns every read and write of `<tasks_dir>/<name>.txt`. All
//! operations are queued to a single worker task and execute strictly in the
//! order they were issued, one at a time. Blocking file I/O runs on the Tokio
//! blocking pool, so the async threads never stall on disk.
//!
//! # Ordering
//!
//! Each public operation enqueues its job synchronously before returning a
//! [`Pending`]. A caller that mutates the [`TaskStore`] and queues the
//! matching write while still holding the store lock therefore gets a file
//! whose history matches the store's history, even when the write itself is
//! detached.
//!
//! # Live reload
//!
//! [`Gateway::reload`] re-reads a file after an external change. Two rules
//! keep a reload from clobbering in-process state:
//!
//! - After every successful load or write the worker records the file's
//!   length, modification time and (on Unix) inode. A reload that finds the
//!   same fingerprint is an echo of our own write and does nothing.
//! - While any write is queued but not finished, a reload is deferred. It is
//!   applied once, after the last queued write completes.
//!
//! An append that finds the file changed underneath it drops the recorded
//! fingerprint, so the next reload picks up the foreign change together with
//! the appended line.
//!
//! The fingerprint does not look at content. An in-place edit by another
//! process that keeps the length and lands within the same mtime tick as our
//! last write reads as an echo and is missed until the file changes again.
//! Editors that save by writing a new file and renaming it over the old one
//! always change the inode and are detected.

use std::collections::HashMap;
use std::fs::{self, File, Metadata, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

use crate::codec;
use crate::pending::Pending;
use crate::store::TaskStore;
use crate::task::Task;

/// Extension of task files inside the tasks directory.
pub const TASK_FILE_EXTENSION: &str = "txt";

/// Errors that can occur while reading or writing task files.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// The tasks directory could not be created.
    #[error("failed to create tasks directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The task file could not be opened or read.
    #[error("failed to load tasks from {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The empty task file could not be created.
    #[error("failed to create task file {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A task line could not be appended.
    #[error("failed to append task to {path}: {source}")]
    Append {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The task file could not be rewritten.
    #[error("failed to rewrite task file {path}: {source}")]
    Rewrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The worker is gone, so the job was never run.
    #[error("persistence worker is not running")]
    WorkerStopped,

    /// The blocking I/O task panicked or was cancelled.
    #[error("background I/O task failed: {0}")]
    Background(String),
}

impl GatewayError {
    /// Path of the file involved, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Directory { path, .. }
            | Self::Load { path, .. }
            | Self::Create { path, .. }
            | Self::Append { path, .. }
            | Self::Rewrite { path, .. } => Some(path),
            Self::WorkerStopped | Self::Background(_) => None,
        }
    }
}

/// How a reload treats tasks already held in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReloadPolicy {
    /// Replace the whole list with the file's contents.
    #[default]
    Replace,
    /// Only fill an empty list, like the initial load. A session that already
    /// holds tasks never sees external edits.
    WhenEmpty,
}

impl ReloadPolicy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ReloadPolicy::Replace => "replace",
            ReloadPolicy::WhenEmpty => "when-empty",
        }
    }
}

impl FromStr for ReloadPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "replace" => Ok(ReloadPolicy::Replace),
            "when-empty" | "when_empty" => Ok(ReloadPolicy::WhenEmpty),
            other => Err(format!("expected 'replace' or 'when-empty', got '{other}'")),
        }
    }
}

/// What a reload ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// The store now mirrors the file.
    Applied { tasks: usize },
    /// The file is exactly as we last wrote or read it.
    Unchanged,
    /// Writes are queued; the reload runs after the last one finishes.
    Deferred,
    /// The policy kept the current list.
    Skipped,
}

/// Identity, length and modification time of a task file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    inode: Option<u64>,
    len: u64,
    modified: Option<SystemTime>,
}

impl Fingerprint {
    fn of(metadata: &Metadata) -> Self {
        Self {
            inode: inode(metadata),
            len: metadata.len(),
            modified: metadata.modified().ok(),
        }
    }
}

#[cfg(unix)]
fn inode(metadata: &Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(metadata.ino())
}

#[cfg(not(unix))]
fn inode(_metadata: &Metadata) -> Option<u64> {
    None
}

type Reply<T> = oneshot::Sender<Result<T, GatewayError>>;

enum Job {
    Exists {
        name: String,
        reply: Reply<bool>,
    },
    Load {
        name: String,
        store: TaskStore,
        reply: Reply<usize>,
    },
    CreateEmpty {
        name: String,
        reply: Reply<()>,
    },
    Append {
        name: String,
        line: String,
        reply: Reply<()>,
    },
    Rewrite {
        name: String,
        body: String,
        reply: Reply<()>,
    },
    Reload {
        name: String,
        store: TaskStore,
        policy: ReloadPolicy,
        reply: Reply<ReloadOutcome>,
    },
    Flush {
        reply: Reply<()>,
    },
}

impl Job {
    fn is_write(&self) -> bool {
        matches!(
            self,
            Job::CreateEmpty { .. } | Job::Append { .. } | Job::Rewrite { .. }
        )
    }
}

#[derive(Debug, Default)]
struct Shared {
    writes_in_flight: AtomicUsize,
}

/// Serialized access to the task files of one tasks directory.
///
/// Cloning is cheap; every clone feeds the same worker. The worker stops once
/// the last clone is dropped and its queue is drained.
#[derive(Debug, Clone)]
pub struct Gateway {
    tasks_dir: PathBuf,
    jobs: mpsc::UnboundedSender<Job>,
    shared: Arc<Shared>,
}

impl Gateway {
    /// Creates the tasks directory if needed and starts the worker.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Directory`] if the directory cannot be created.
    pub fn new(tasks_dir: impl Into<PathBuf>) -> Result<Self, GatewayError> {
        let tasks_dir = tasks_dir.into();
        fs::create_dir_all(&tasks_dir).map_err(|source| GatewayError::Directory {
            path: tasks_dir.clone(),
            source,
        })?;

        let (jobs, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());

        let worker = Worker {
            tasks_dir: tasks_dir.clone(),
            shared: Arc::clone(&shared),
            synced: HashMap::new(),
            deferred: HashMap::new(),
        };
        tokio::spawn(worker.run(receiver));

        info!(tasks_dir = %tasks_dir.display(), "Task gateway started");

        Ok(Self {
            tasks_dir,
            jobs,
            shared,
        })
    }

    /// Directory holding the task files.
    #[must_use]
    pub fn tasks_dir(&self) -> &Path {
        &self.tasks_dir
    }

    /// Path of the task file for `name`.
    #[must_use]
    pub fn task_file(&self, name: &str) -> PathBuf {
        task_file(&self.tasks_dir, name)
    }

    /// Number of writes queued or running.
    #[must_use]
    pub fn writes_in_flight(&self) -> usize {
        self.shared.writes_in_flight.load(Ordering::SeqCst)
    }

    /// Resolves to whether the task file can be opened for reading.
    pub fn exists(&self, name: &str) -> Pending<bool, GatewayError> {
        let name = name.to_string();
        self.submit("exists", |reply| Job::Exists { name, reply })
    }

    /// Fills `store` from the task file, but only if the store is empty.
    ///
    /// Resolves to the number of tasks added. Malformed lines are skipped.
    /// Fails if the file cannot be opened, even when the store is not empty.
    pub fn load(&self, name: &str, store: &TaskStore) -> Pending<usize, GatewayError> {
        let name = name.to_string();
        let store = store.clone();
        self.submit("load", |reply| Job::Load { name, store, reply })
    }

    /// Creates the task file if it is missing. Existing content is kept.
    pub fn create_empty(&self, name: &str) -> Pending<(), GatewayError> {
        let name = name.to_string();
        self.submit("create_empty", |reply| Job::CreateEmpty { name, reply })
    }

    /// Appends one task line and syncs it to disk.
    pub fn append_one(&self, name: &str, task: &Task) -> Pending<(), GatewayError> {
        let name = name.to_string();
        let line = codec::encode(task);
        self.submit("append_one", |reply| Job::Append { name, line, reply })
    }

    /// Replaces the task file with `tasks` and syncs it to disk.
    ///
    /// The body is encoded now, so pass the store's contents while holding
    /// its lock.
    pub fn rewrite_all(&self, name: &str, tasks: &[Task]) -> Pending<(), GatewayError> {
        let name = name.to_string();
        let body = codec::encode_all(tasks);
        self.submit("rewrite_all", |reply| Job::Rewrite { name, body, reply })
    }

    /// Re-reads the task file into `store` after an external change.
    pub fn reload(
        &self,
        name: &str,
        store: &TaskStore,
        policy: ReloadPolicy,
    ) -> Pending<ReloadOutcome, GatewayError> {
        let name = name.to_string();
        let store = store.clone();
        self.submit("reload", |reply| Job::Reload {
            name,
            store,
            policy,
            reply,
        })
    }

    /// Resolves once every job issued before it has finished.
    pub fn flush(&self) -> Pending<(), GatewayError> {
        self.submit("flush", |reply| Job::Flush { reply })
    }

    fn submit<T>(
        &self,
        label: &'static str,
        make: impl FnOnce(Reply<T>) -> Job,
    ) -> Pending<T, GatewayError>
    where
        T: Send + 'static,
    {
        let (reply, receiver) = oneshot::channel();
        let job = make(reply);
        let is_write = job.is_write();

        if is_write {
            self.shared.writes_in_flight.fetch_add(1, Ordering::SeqCst);
        }

        let sent = self.jobs.send(job).is_ok();
        if !sent {
            if is_write {
                self.shared.writes_in_flight.fetch_sub(1, Ordering::SeqCst);
            }
            error!(operation = label, "Persistence worker is not running");
        }

        Pending::new(label, async move {
            if !sent {
                return Err(GatewayError::WorkerStopped);
            }
            receiver.await.map_err(|_| GatewayError::WorkerStopped)?
        })
    }
}

fn task_file(tasks_dir: &Path, name: &str) -> PathBuf {
    tasks_dir.join(format!("{name}.{TASK_FILE_EXTENSION}"))
}

struct DeferredReload {
    store: TaskStore,
    policy: ReloadPolicy,
}

struct Worker {
    tasks_dir: PathBuf,
    shared: Arc<Shared>,
    /// Fingerprint of each file as of our last load or write.
    synced: HashMap<String, Fingerprint>,
    deferred: HashMap<String, DeferredReload>,
}

impl Worker {
    async fn run(mut self, mut jobs: mpsc::UnboundedReceiver<Job>) {
        while let Some(job) = jobs.recv().await {
            self.handle(job).await;
        }
        debug!(tasks_dir = %self.tasks_dir.display(), "Task gateway stopped");
    }

    async fn handle(&mut self, job: Job) {
        match job {
            Job::Exists { name, reply } => {
                let path = task_file(&self.tasks_dir, &name);
                let exists = run_blocking(move || Ok(File::open(path).is_ok())).await;
                let _ = reply.send(exists);
            }
            Job::Load { name, store, reply } => {
                let result = self.load(&name, &store).await;
                if let Err(e) = &result {
                    error!(name = %name, error = %e, "Failed to load tasks");
                }
                let _ = reply.send(result);
            }
            Job::CreateEmpty { name, reply } => {
                let path = task_file(&self.tasks_dir, &name);
                let result = run_blocking(move || {
                    create_empty_file(&path).map_err(|source| GatewayError::Create { path, source })
                })
                .await;
                let result = result.map(|created| {
                    if let Some(fingerprint) = created {
                        self.synced.insert(name.clone(), fingerprint);
                    }
                });
                self.finish_write(&name, &result).await;
                let _ = reply.send(result);
            }
            Job::Append { name, line, reply } => {
                let path = task_file(&self.tasks_dir, &name);
                let result = run_blocking(move || {
                    append_line(&path, &line).map_err(|source| GatewayError::Append { path, source })
                })
                .await;
                let result = result.map(|(before, after)| {
                    if self.synced.get(&name) == Some(&before) {
                        self.synced.insert(name.clone(), after);
                    } else {
                        // Something else touched the file since we last saw it.
                        self.synced.remove(&name);
                    }
                });
                self.finish_write(&name, &result).await;
                let _ = reply.send(result);
            }
            Job::Rewrite { name, body, reply } => {
                let path = task_file(&self.tasks_dir, &name);
                let result = run_blocking(move || {
                    rewrite_file(&path, &body).map_err(|source| GatewayError::Rewrite { path, source })
                })
                .await;
                let result = result.map(|after| {
                    self.synced.insert(name.clone(), after);
                });
                self.finish_write(&name, &result).await;
                let _ = reply.send(result);
            }
            Job::Reload {
                name,
                store,
                policy,
                reply,
            } => {
                let result = self.reload(&name, &store, policy).await;
                let _ = reply.send(result);
            }
            Job::Flush { reply } => {
                let _ = reply.send(Ok(()));
            }
        }
    }

    async fn load(&mut self, name: &str, store: &TaskStore) -> Result<usize, GatewayError> {
        let path = task_file(&self.tasks_dir, name);
        let (tasks, fingerprint) = run_blocking(move || {
            read_tasks(&path).map_err(|source| GatewayError::Load { path, source })
        })
        .await?;

        let mut current = store.lock().await;
        if !current.is_empty() {
            debug!(name = %name, "Store already populated, skipping load");
            return Ok(0);
        }

        let count = tasks.len();
        current.extend(tasks);
        self.synced.insert(name.to_string(), fingerprint);
        info!(name = %name, tasks = count, "Loaded tasks");
        Ok(count)
    }

    async fn reload(
        &mut self,
        name: &str,
        store: &TaskStore,
        policy: ReloadPolicy,
    ) -> Result<ReloadOutcome, GatewayError> {
        let path = task_file(&self.tasks_dir, name);
        let (tasks, fingerprint) = run_blocking(move || {
            read_tasks(&path).map_err(|source| GatewayError::Load { path, source })
        })
        .await?;

        let mut current = store.lock().await;

        if self.shared.writes_in_flight.load(Ordering::SeqCst) > 0 {
            trace!(name = %name, "Writes pending, deferring reload");
            self.deferred.insert(
                name.to_string(),
                DeferredReload {
                    store: store.clone(),
                    policy,
                },
            );
            return Ok(ReloadOutcome::Deferred);
        }

        if self.synced.get(name) == Some(&fingerprint) {
            trace!(name = %name, "Task file unchanged since last sync");
            return Ok(ReloadOutcome::Unchanged);
        }

        if policy == ReloadPolicy::WhenEmpty && !current.is_empty() {
            debug!(name = %name, "Store not empty, reload skipped by policy");
            return Ok(ReloadOutcome::Skipped);
        }

        let count = tasks.len();
        *current = tasks;
        self.synced.insert(name.to_string(), fingerprint);
        info!(name = %name, tasks = count, "Reloaded tasks after external change");
        Ok(ReloadOutcome::Applied { tasks: count })
    }

    async fn finish_write(&mut self, name: &str, result: &Result<(), GatewayError>) {
        if let Err(e) = result {
            error!(name = %name, error = %e, "Task file write failed");
        }

        let previous = self.shared.writes_in_flight.fetch_sub(1, Ordering::SeqCst);
        if previous == 1 && !self.deferred.is_empty() {
            self.run_deferred().await;
        }
    }

    async fn run_deferred(&mut self) {
        let deferred: Vec<_> = self.deferred.drain().collect();
        for (name, DeferredReload { store, policy }) in deferred {
            match self.reload(&name, &store, policy).await {
                Ok(outcome) => debug!(name = %name, ?outcome, "Applied deferred reload"),
                Err(e) => warn!(name = %name, error = %e, "Deferred reload failed"),
            }
        }
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, GatewayError>
where
    F: FnOnce() -> Result<T, GatewayError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| GatewayError::Background(e.to_string()))?
}

fn read_tasks(path: &Path) -> io::Result<(Vec<Task>, Fingerprint)> {
    let file = File::open(path)?;
    let fingerprint = Fingerprint::of(&file.metadata()?);

    let mut tasks = Vec::new();
    for line in BufReader::new(file).lines() {
        if let Some(task) = codec::decode(&line?) {
            tasks.push(task);
        }
    }
    Ok((tasks, fingerprint))
}

/// Returns the new file's fingerprint, or `None` if the file already existed.
fn create_empty_file(path: &Path) -> io::Result<Option<Fingerprint>> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => {
            file.sync_all()?;
            Ok(Some(Fingerprint::of(&file.metadata()?)))
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(None),
        Err(e) => Err(e),
    }
}

/// Returns the fingerprints from before and after the append.
fn append_line(path: &Path, line: &str) -> io::Result<(Fingerprint, Fingerprint)> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let before = Fingerprint::of(&file.metadata()?);

    let mut buf = String::with_capacity(line.len() + 1);
    buf.push_str(line);
    buf.push('\n');
    file.write_all(buf.as_bytes())?;
    file.sync_all()?;

    Ok((before, Fingerprint::of(&file.metadata()?)))
}

fn rewrite_file(path: &Path, body: &str) -> io::Result<Fingerprint> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    file.write_all(body.as_bytes())?;
    file.sync_all()?;
    Ok(Fingerprint::of(&file.metadata()?))
}
