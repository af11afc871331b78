//! Integration tests for live reload.
//!
//! These use the real OS watcher, so assertions on reloads poll with a
//! deadline instead of sleeping a fixed time.

use std::fs;
use std::time::Duration;

use tempfile::TempDir;
use taskwatch::codec;
use taskwatch::config::Config;
use taskwatch::gateway::{Gateway, ReloadPolicy};
use taskwatch::session::Session;
use taskwatch::store::TaskStore;
use taskwatch::task::{Task, TaskFilter};
use taskwatch::watcher::{DirectoryWatcher, WatcherError};

// =============================================================================
// Test Helpers
// =============================================================================

const DEADLINE: Duration = Duration::from_secs(5);

/// Polls `check` until it returns true or the deadline passes.
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < DEADLINE {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}

fn session_config(dir: &TempDir) -> Config {
    Config {
        heartbeat_enabled: false,
        ..Config::default()
    }
    .with_data_dir(dir.path())
}

// =============================================================================
// Durability ordering
// =============================================================================

#[tokio::test]
async fn watcher_starts_after_awaited_create() {
    let dir = TempDir::new().unwrap();
    let gateway = Gateway::new(dir.path().join("tasks")).unwrap();

    gateway.create_empty("alice").await.unwrap();
    let watcher =
        DirectoryWatcher::start(gateway, "alice", TaskStore::new(), ReloadPolicy::Replace).unwrap();

    watcher.stop().await.unwrap();
}

#[tokio::test]
async fn watcher_before_create_reports_missing_file() {
    let dir = TempDir::new().unwrap();
    let gateway = Gateway::new(dir.path().join("tasks")).unwrap();

    // Issued but not awaited. On the current-thread runtime the worker can't
    // run before the synchronous start, so the file is never there yet.
    let create = gateway.create_empty("alice");
    let early = DirectoryWatcher::start(gateway.clone(), "alice", TaskStore::new(), ReloadPolicy::Replace);

    match early {
        Err(WatcherError::TaskFileMissing(path)) => assert_eq!(path, gateway.task_file("alice")),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("watcher started before the task file existed"),
    }

    // Once the create has been awaited the same start succeeds.
    create.await.unwrap();
    let watcher =
        DirectoryWatcher::start(gateway.clone(), "alice", TaskStore::new(), ReloadPolicy::Replace).unwrap();
    watcher.stop().await.unwrap();

    let never_created =
        DirectoryWatcher::start(gateway, "bob", TaskStore::new(), ReloadPolicy::Replace);
    assert!(matches!(never_created, Err(WatcherError::TaskFileMissing(_))));
}

// =============================================================================
// Live reload
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn external_edit_is_reloaded() {
    let dir = TempDir::new().unwrap();
    let gateway = Gateway::new(dir.path().join("tasks")).unwrap();
    fs::write(gateway.task_file("alice"), "a,1,Pending\n").unwrap();

    let store = TaskStore::new();
    gateway.load("alice", &store).await.unwrap();
    let watcher =
        DirectoryWatcher::start(gateway.clone(), "alice", store.clone(), ReloadPolicy::Replace).unwrap();

    fs::write(gateway.task_file("alice"), "x,1,Urgent\ny,2,Pending\n").unwrap();

    let reloaded = eventually(|| {
        let store = store.clone();
        async move { store.len().await == 2 }
    })
    .await;
    assert!(reloaded, "store was never reloaded");
    assert_eq!(store.snapshot().await[0].title(), "x");

    let stats = watcher.stop().await.unwrap();
    assert!(stats.reloads >= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn other_files_are_ignored() {
    let dir = TempDir::new().unwrap();
    let gateway = Gateway::new(dir.path().join("tasks")).unwrap();
    fs::write(gateway.task_file("alice"), "a,1,Pending\n").unwrap();

    let store = TaskStore::new();
    gateway.load("alice", &store).await.unwrap();
    let watcher =
        DirectoryWatcher::start(gateway.clone(), "alice", store.clone(), ReloadPolicy::Replace).unwrap();

    fs::write(gateway.task_file("bob"), "b,1,Pending\nc,2,Pending\n").unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let stats = watcher.stop().await.unwrap();
    assert_eq!(stats.reloads + stats.echoes + stats.deferred + stats.skipped, 0);
    assert_eq!(store.snapshot().await[0].title(), "a");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn deleting_the_file_stops_only_the_watcher() {
    let dir = TempDir::new().unwrap();
    let mut session = Session::open(&session_config(&dir), "alice").await.unwrap();
    session.add_task(Task::new("keep", "me").unwrap()).await;
    session.flush().await.unwrap();
    assert!(session.is_watching());

    fs::remove_file(dir.path().join("tasks/alice.txt")).unwrap();

    let stopped = eventually(|| {
        let watching = session.is_watching();
        async move { !watching }
    })
    .await;
    assert!(stopped, "watcher kept running after the file was deleted");

    // Last known good state survives.
    assert_eq!(session.tasks(TaskFilter::All).await.len(), 1);
    assert!(matches!(
        session.take_watcher_failure().await,
        Some(WatcherError::Reload { .. })
    ));
    session.close().await.unwrap();
}

// =============================================================================
// Own writes
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn own_writes_never_clobber_the_store() {
    let dir = TempDir::new().unwrap();
    let session = Session::open(&session_config(&dir), "alice").await.unwrap();

    for i in 0..30 {
        session
            .add_task(Task::new(format!("task-{i}"), "desc").unwrap())
            .await;
        if i % 5 == 4 {
            session.toggle_done(i - 2).await.unwrap();
        }
    }
    session.flush().await.unwrap();

    // Let the echoes of our own writes arrive and settle.
    tokio::time::sleep(Duration::from_millis(500)).await;
    session.flush().await.unwrap();

    let tasks = session.tasks(TaskFilter::All).await;
    assert_eq!(tasks.len(), 30);
    assert_eq!(tasks[29].title(), "task-29");

    let on_disk = fs::read_to_string(dir.path().join("tasks/alice.txt")).unwrap();
    assert_eq!(on_disk, codec::encode_all(&tasks));

    session.close().await.unwrap();
}
