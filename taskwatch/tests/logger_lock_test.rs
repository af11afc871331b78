//! Integration tests for the single-instance heartbeat.
//!
//! Two loggers for the same name stand in for two processes: the advisory
//! lock is per open file, so they exclude each other within one process too.

use std::fs;
use std::time::Duration;

use tempfile::TempDir;
use taskwatch::logger::{LoggerConfig, LoggerState, TaskLogger};

fn fast_config() -> LoggerConfig {
    LoggerConfig {
        heartbeat_interval: Duration::from_millis(25),
        stop_grace: Duration::from_millis(500),
        heartbeat_enabled: true,
    }
}

fn heartbeat_lines(content: &str) -> usize {
    content
        .lines()
        .filter(|l| l.contains(" - Current Time: "))
        .count()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn exactly_one_of_two_loggers_is_active() {
    let dir = TempDir::new().unwrap();
    let mut first = TaskLogger::new(dir.path(), "alice", fast_config()).unwrap();
    let mut second = TaskLogger::new(dir.path(), "alice", fast_config()).unwrap();

    let (a, b) = tokio::join!(first.start(), second.start());
    let states = [a.unwrap(), b.unwrap()];

    assert_eq!(
        states.iter().filter(|s| **s == LoggerState::Active).count(),
        1,
        "states: {states:?}"
    );
    assert_eq!(
        states.iter().filter(|s| **s == LoggerState::Inactive).count(),
        1,
        "states: {states:?}"
    );

    // Both accept on-demand messages.
    first.log("from first").wait().await.unwrap();
    second.log("from second").wait().await.unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;

    let (active, inactive) = if first.state() == LoggerState::Active {
        (&mut first, &mut second)
    } else {
        (&mut second, &mut first)
    };
    active.stop().await.unwrap();
    inactive.stop().await.unwrap();

    assert!(active.heartbeat_count() >= 1);
    assert_eq!(inactive.heartbeat_count(), 0);

    let content = fs::read_to_string(dir.path().join("alice.txt")).unwrap();
    assert!(content.contains(" - from first\n"));
    assert!(content.contains(" - from second\n"));
    assert_eq!(heartbeat_lines(&content) as u64, active.heartbeat_count());
}

#[tokio::test]
async fn lock_is_released_on_stop() {
    let dir = TempDir::new().unwrap();

    let mut first = TaskLogger::new(dir.path(), "alice", fast_config()).unwrap();
    assert_eq!(first.start().await.unwrap(), LoggerState::Active);
    first.stop().await.unwrap();
    assert!(!dir.path().join("alice.lock").exists());

    let mut second = TaskLogger::new(dir.path(), "alice", fast_config()).unwrap();
    assert_eq!(second.start().await.unwrap(), LoggerState::Active);
    second.stop().await.unwrap();
}

#[tokio::test]
async fn inactive_logger_does_not_remove_foreign_lock() {
    let dir = TempDir::new().unwrap();

    let mut owner = TaskLogger::new(dir.path(), "alice", fast_config()).unwrap();
    let mut guest = TaskLogger::new(dir.path(), "alice", fast_config()).unwrap();
    assert_eq!(owner.start().await.unwrap(), LoggerState::Active);
    assert_eq!(guest.start().await.unwrap(), LoggerState::Inactive);

    guest.stop().await.unwrap();
    assert!(dir.path().join("alice.lock").exists());

    owner.stop().await.unwrap();
    assert!(!dir.path().join("alice.lock").exists());
}

#[tokio::test]
async fn different_names_do_not_contend() {
    let dir = TempDir::new().unwrap();

    let mut alice = TaskLogger::new(dir.path(), "alice", fast_config()).unwrap();
    let mut bob = TaskLogger::new(dir.path(), "bob", fast_config()).unwrap();

    assert_eq!(alice.start().await.unwrap(), LoggerState::Active);
    assert_eq!(bob.start().await.unwrap(), LoggerState::Active);

    alice.stop().await.unwrap();
    bob.stop().await.unwrap();
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_aborts_a_tick_stuck_past_the_grace_period() {
    use std::process::Command;
    use std::time::Instant;

    let dir = TempDir::new().unwrap();
    let log_path = dir.path().join("alice.txt");

    // Opening a FIFO for writing blocks until a reader shows up, so the
    // first heartbeat tick hangs mid-write.
    let status = Command::new("mkfifo").arg(&log_path).status().unwrap();
    assert!(status.success());

    let config = LoggerConfig {
        heartbeat_interval: Duration::from_millis(25),
        stop_grace: Duration::from_millis(100),
        heartbeat_enabled: true,
    };
    let mut logger = TaskLogger::new(dir.path(), "alice", config).unwrap();
    assert_eq!(logger.start().await.unwrap(), LoggerState::Active);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    logger.stop().await.unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(100), "stopped after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "stopped after {elapsed:?}");
    assert_eq!(logger.state(), LoggerState::Stopped);
    assert_eq!(logger.heartbeat_count(), 0);
    assert!(!dir.path().join("alice.lock").exists());

    // Unblock the stranded writer so the runtime can shut down.
    let reader = std::thread::spawn(move || fs::read(&log_path).unwrap());
    let written = reader.join().unwrap();
    assert!(String::from_utf8_lossy(&written).contains(" - Current Time: "));
}
