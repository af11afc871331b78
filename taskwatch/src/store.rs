//! Shared in-memory task list.
//!
//! The store is mutated from two places: the session's request handlers and
//! the directory watcher's reload path. Both go through the same async mutex.
//! A handler that changes the list should queue the matching gateway write
//! before it releases the guard, so the gateway sees mutations and writes in
//! the same order (see [`crate::gateway`]).

use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::task::Task;

/// Ordered task list for one user, shareable across tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskStore {
    tasks: Arc<Mutex<Vec<Task>>>,
}

impl TaskStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already holds `tasks`.
    #[must_use]
    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        Self {
            tasks: Arc::new(Mutex::new(tasks)),
        }
    }

    /// Locks the list for reading or mutation.
    ///
    /// Do not hold the guard across an `.await` on a gateway operation that
    /// itself needs the store (`load`, `reload`); that would deadlock.
    pub async fn lock(&self) -> MutexGuard<'_, Vec<Task>> {
        self.tasks.lock().await
    }

    /// Returns a copy of the current list.
    pub async fn snapshot(&self) -> Vec<Task> {
        self.tasks.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.lock().await.is_empty()
    }

    /// Returns `true` if both handles point at the same list.
    #[must_use]
    pub fn same_store(&self, other: &TaskStore) -> bool {
        Arc::ptr_eq(&self.tasks, &other.tasks)
    }
}
