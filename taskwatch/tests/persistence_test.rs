//! Integration tests for task file persistence.
//!
//! These tests drive the gateway the way a session does and check the
//! properties the task file format promises: round-trips, tolerance of
//! malformed lines, and that creating a file never destroys content.

use std::fs;

use tempfile::TempDir;
use taskwatch::codec;
use taskwatch::gateway::Gateway;
use taskwatch::store::TaskStore;
use taskwatch::task::{Task, TaskStatus};

// =============================================================================
// Test Helpers
// =============================================================================

fn setup() -> (TempDir, Gateway) {
    let dir = TempDir::new().unwrap();
    let gateway = Gateway::new(dir.path().join("tasks")).unwrap();
    (dir, gateway)
}

fn titles(tasks: &[Task]) -> Vec<&str> {
    tasks.iter().map(Task::title).collect()
}

// =============================================================================
// Round-trip
// =============================================================================

#[tokio::test]
async fn rewrite_then_load_reproduces_tasks_in_order() {
    let (_dir, gateway) = setup();

    let mut both = Task::new("Both", "done and urgent").unwrap();
    both.toggle_priority().unwrap();
    both.toggle_done();

    let tasks = vec![
        Task::new("First", "plain").unwrap(),
        Task::with_status("Second", "urgent", TaskStatus::Urgent).unwrap(),
        both,
    ];
    gateway.rewrite_all("alice", &tasks).await.unwrap();

    let store = TaskStore::new();
    assert_eq!(gateway.load("alice", &store).await.unwrap(), 3);

    let loaded = store.snapshot().await;
    assert_eq!(titles(&loaded), ["First", "Second", "Both"]);
    assert_eq!(loaded[1].status(), TaskStatus::Urgent);

    // Completed wins; urgency is not persisted.
    assert!(loaded[2].is_done());
    assert!(!loaded[2].is_urgent());
}

#[tokio::test]
async fn load_then_rewrite_is_byte_stable() {
    let (_dir, gateway) = setup();
    let body = "Buy milk,2 liters,Urgent\nPay rent,rent for March,Completed\nCall mom,sunday,Pending\n";
    fs::write(gateway.task_file("alice"), body).unwrap();

    let store = TaskStore::new();
    gateway.load("alice", &store).await.unwrap();
    let tasks = store.snapshot().await;
    gateway.rewrite_all("alice", &tasks).await.unwrap();

    assert_eq!(fs::read_to_string(gateway.task_file("alice")).unwrap(), body);
}

// =============================================================================
// Idempotence and tolerance
// =============================================================================

#[tokio::test]
async fn create_empty_twice_keeps_content() {
    let (_dir, gateway) = setup();

    gateway.create_empty("alice").await.unwrap();
    gateway
        .append_one("alice", &Task::new("Keep", "me").unwrap())
        .await
        .unwrap();
    gateway.create_empty("alice").await.unwrap();
    gateway.create_empty("alice").await.unwrap();

    assert_eq!(
        fs::read_to_string(gateway.task_file("alice")).unwrap(),
        "Keep,me,Pending\n"
    );
}

#[tokio::test]
async fn malformed_lines_are_dropped() {
    let (_dir, gateway) = setup();
    let body = "\
\n\
one-field\n\
two,fields\n\
a,1,Pending\n\
four,fields,are,bad\n\
b,2,Urgent\n\
five,fields,are,way,worse\n\
c,3,Completed\n";
    fs::write(gateway.task_file("alice"), body).unwrap();

    let store = TaskStore::new();
    assert_eq!(gateway.load("alice", &store).await.unwrap(), 3);
    assert_eq!(titles(&store.snapshot().await), ["a", "b", "c"]);
}

#[tokio::test]
async fn scenario_from_task_file() {
    let (_dir, gateway) = setup();
    fs::write(
        gateway.task_file("alice"),
        "Buy milk,2 liters,Urgent\nPay rent,rent for March,Completed\n",
    )
    .unwrap();

    let store = TaskStore::new();
    gateway.load("alice", &store).await.unwrap();
    let tasks = store.snapshot().await;

    assert!(!tasks[0].is_done());
    assert!(tasks[0].is_urgent());
    assert!(tasks[1].is_done());
    assert!(!tasks[1].is_urgent());
}

// =============================================================================
// Ordering
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn detached_writes_land_in_issue_order() {
    let (_dir, gateway) = setup();
    let store = TaskStore::new();
    gateway.create_empty("alice").await.unwrap();

    // Interleave appends and rewrites the way a busy session would.
    for i in 0..50 {
        let mut tasks = store.lock().await;
        let task = Task::new(format!("task-{i}"), "desc").unwrap();
        gateway.append_one("alice", &task).detach(|e| panic!("append failed: {e}"));
        tasks.push(task);

        if i % 10 == 9 {
            tasks.remove(0);
            gateway
                .rewrite_all("alice", &tasks)
                .detach(|e| panic!("rewrite failed: {e}"));
        }
    }
    gateway.flush().await.unwrap();

    let on_disk = fs::read_to_string(gateway.task_file("alice")).unwrap();
    assert_eq!(on_disk, codec::encode_all(&store.snapshot().await));
    assert_eq!(gateway.writes_in_flight(), 0);
}

#[tokio::test]
async fn exists_is_false_for_unknown_name() {
    let (_dir, gateway) = setup();
    assert!(!gateway.exists("nobody").await.unwrap());
}
