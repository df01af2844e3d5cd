use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Priority, TaskId, TaskStatus};
use crate::error::{TaskError, ValidationError};

/// Opaque key-value payload handed to a handler.
pub type Params = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(String);

impl TaskType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Like `new`, but rejects empty or whitespace-only names.
    pub fn parse(s: impl Into<String>) -> Result<Self, ValidationError> {
        let s = s.into();
        if s.trim().is_empty() {
            return Err(ValidationError::EmptyTaskType);
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A unit of submitted work: immutable identity plus its lifecycle record.
///
/// Clones are snapshots. The scheduler only hands out clones, so a caller
/// never observes a task changing underneath it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    id: TaskId,
    #[serde(rename = "type")]
    task_type: TaskType,
    params: Params,
    priority: Priority,
    status: TaskStatus,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    result: Option<serde_json::Value>,
    error: Option<TaskError>,
}

impl Task {
    pub fn create(
        id: TaskId,
        task_type: TaskType,
        params: Params,
        priority: Priority,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            task_type,
            params,
            priority,
            status: TaskStatus::Pending,
            created_at: now,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn task_type(&self) -> &TaskType {
        &self.task_type
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn result(&self) -> Option<&serde_json::Value> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&TaskError> {
        self.error.as_ref()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `next`, panicking on a transition the state machine forbids.
    pub(crate) fn transition(&mut self, next: TaskStatus) {
        match self.status.transition(next) {
            Ok(status) => self.status = status,
            Err(err) => panic!("task {}: {err}", self.id),
        }
    }

    /// Pending -> Running.
    pub(crate) fn start(&mut self, now: DateTime<Utc>) {
        self.transition(TaskStatus::Running);
        self.started_at = Some(now);
    }

    /// Running -> Completed.
    pub(crate) fn complete(&mut self, result: serde_json::Value, now: DateTime<Utc>) {
        self.transition(TaskStatus::Completed);
        self.result = Some(result);
        self.completed_at = Some(now);
    }

    /// Running -> Failed.
    pub(crate) fn fail(&mut self, error: TaskError, now: DateTime<Utc>) {
        self.transition(TaskStatus::Failed);
        self.error = Some(error);
        self.completed_at = Some(now);
    }

    /// Pending/Running -> Cancelled.
    pub(crate) fn cancel(&mut self, now: DateTime<Utc>) {
        self.transition(TaskStatus::Cancelled);
        self.error = Some(TaskError::Cancelled);
        self.completed_at = Some(now);
    }
}
