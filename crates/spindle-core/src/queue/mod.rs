//! Priority queue of pending tasks.

mod entry;

use std::collections::{BinaryHeap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use self::entry::QueueEntry;
use crate::domain::{Task, TaskId};

/// `heap` orders the pending ids; `pending` holds the tasks themselves.
/// Both always contain the same set of ids.
#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<QueueEntry>,
    pending: HashMap<TaskId, Task>,
    next_seq: u64,
}

impl QueueState {
    fn pop(&mut self) -> Option<Task> {
        while let Some(entry) = self.heap.pop() {
            if let Some(task) = self.pending.remove(&entry.task_id) {
                return Some(task);
            }
        }
        None
    }
}

/// Unbounded priority queue shared by the submitting side and all workers.
///
/// Design:
/// - The heap lives behind a short-lived std mutex; nothing awaits while
///   holding it, so `enqueue` never blocks on anything but the lock itself.
/// - `Notify` wakes idle workers on enqueue.
/// - Status lookups go through an id index, not a heap scan.
/// - Each entry is popped by exactly one dequeue call.
#[derive(Default)]
pub struct PriorityQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // The heap is never left half-updated, so a poisoned lock is still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a pending task. O(log n).
    pub fn enqueue(&self, task: Task) {
        {
            let mut state = self.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.heap.push(QueueEntry::new(&task, seq));
            state.pending.insert(task.id(), task);
        }
        self.notify.notify_one();
    }

    /// Wait up to `timeout` for the next task.
    pub async fn dequeue(&self, timeout: Duration) -> Option<Task> {
        self.dequeue_with(timeout, |task| task).await
    }

    /// Wait up to `timeout` for the next task and hand it to `claim` while the
    /// queue lock is still held.
    ///
    /// Anything `claim` publishes (e.g. an active-store insert) is visible
    /// before the task disappears from the queue, so a reader checking the
    /// queue first and then the stores never misses it.
    ///
    /// Cancel-safe: a task is only removed from the heap in the same poll
    /// that returns it.
    pub async fn dequeue_with<R>(
        &self,
        timeout: Duration,
        claim: impl FnOnce(Task) -> R,
    ) -> Option<R> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // register before checking the heap so an enqueue in between is not missed
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(task) = state.pop() {
                    return Some(claim(task));
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Snapshot of a pending task, if it is still queued.
    pub fn get(&self, task_id: TaskId) -> Option<Task> {
        self.lock().pending.get(&task_id).cloned()
    }

    /// Current number of pending tasks. Approximate under concurrent use.
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
