//! Heap entry and its ordering.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::domain::{Priority, Task, TaskId};

/// Ordering keys for one pending task. The task itself lives in the queue's
/// index.
///
/// `BinaryHeap` is a max-heap, so "greater" means "served first":
/// higher priority, then earlier `created_at`, then lower insertion `seq`.
#[derive(Debug)]
pub(super) struct QueueEntry {
    pub(super) priority: Priority,
    pub(super) created_at: DateTime<Utc>,
    pub(super) seq: u64,
    pub(super) task_id: TaskId,
}

impl QueueEntry {
    pub(super) fn new(task: &Task, seq: u64) -> Self {
        Self {
            priority: task.priority(),
            created_at: task.created_at(),
            seq,
            task_id: task.id(),
        }
    }
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.created_at.cmp(&self.created_at))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}
