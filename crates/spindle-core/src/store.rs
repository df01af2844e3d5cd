//! Active and completed task stores.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::domain::{Task, TaskId};
use crate::error::TaskError;

/// In-flight and terminal tasks, each behind its own lock.
///
/// Lock order is active -> completed. A task moving between the two is
/// inserted into `completed` while `active` is still held, so a reader that
/// checks `active` and then `completed` always finds it.
#[derive(Default)]
pub struct TaskStore {
    active: Mutex<HashMap<TaskId, Task>>,
    completed: Mutex<HashMap<TaskId, Task>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // Every critical section is a single map operation, so poisoning can't
    // leave a map inconsistent.
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `task` (Pending -> Running) and record it as active.
    ///
    /// Returns the snapshot the worker executes from.
    pub fn begin(&self, mut task: Task, now: DateTime<Utc>) -> Task {
        task.start(now);
        let snapshot = task.clone();
        lock(&self.active).insert(task.id(), task);
        snapshot
    }

    /// Record the outcome of an active task and move it to the completed
    /// store. Returns the final snapshot, or `None` if the task was no longer
    /// active (already cancelled by `stop`).
    pub fn finish(
        &self,
        task_id: TaskId,
        outcome: Result<serde_json::Value, TaskError>,
        now: DateTime<Utc>,
    ) -> Option<Task> {
        let mut active = lock(&self.active);
        let mut task = active.remove(&task_id)?;
        match outcome {
            Ok(result) => task.complete(result, now),
            Err(error) => task.fail(error, now),
        }
        let snapshot = task.clone();
        lock(&self.completed).insert(task_id, task);
        Some(snapshot)
    }

    /// Cancel every task still active and move it to the completed store.
    pub fn cancel_active(&self, now: DateTime<Utc>) -> Vec<TaskId> {
        let mut active = lock(&self.active);
        let mut completed = lock(&self.completed);
        active
            .drain()
            .map(|(id, mut task)| {
                task.cancel(now);
                completed.insert(id, task);
                id
            })
            .collect()
    }

    /// Snapshot of a task, active store first.
    pub fn get(&self, task_id: TaskId) -> Option<Task> {
        if let Some(task) = lock(&self.active).get(&task_id) {
            return Some(task.clone());
        }
        lock(&self.completed).get(&task_id).cloned()
    }

    pub fn active_count(&self) -> usize {
        lock(&self.active).len()
    }

    pub fn completed_count(&self) -> usize {
        lock(&self.completed).len()
    }
}
