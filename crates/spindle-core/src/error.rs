use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{TaskStatus, TaskType};

/// Malformed submission or malformed input at the caller boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("task type must not be empty")]
    EmptyTaskType,

    #[error("unknown priority '{0}' (expected low, medium, high or critical)")]
    UnknownPriority(String),

    #[error("unknown priority level {0} (expected 0..=3)")]
    UnknownPriorityLevel(u8),

    #[error("invalid task id '{0}'")]
    InvalidTaskId(String),
}

/// Errors returned synchronously by `register_handler`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("handler '{0}' is already registered")]
    DuplicateName(String),

    #[error("handler '{name}' declares no routes")]
    NoRoutes { name: String },

    #[error("task type '{task_type}' is already routed to handler '{owner}'")]
    RouteConflict { task_type: String, owner: String },

    #[error("handler '{name}' failed to initialize: {source}")]
    InitializationFailed {
        name: String,
        #[source]
        source: HandlerError,
    },
}

/// No handler resolves for a task type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no handler registered for task type '{0}'")]
pub struct DispatchError(pub TaskType);

/// Invalid status transition. This is a programming error inside the
/// scheduler, never a task outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid task transition {from:?} -> {to:?}")]
pub struct LifecycleError {
    pub from: TaskStatus,
    pub to: TaskStatus,
}

/// Classification of a handler failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The params did not match what the handler expects.
    InvalidParams,
    /// A temporary condition; resubmitting may succeed.
    Transient,
    /// Resubmitting will not help.
    Permanent,
    /// An upstream dependency of the handler is unavailable.
    Infrastructure,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidParams => "invalid_params",
            ErrorKind::Transient => "transient",
            ErrorKind::Permanent => "permanent",
            ErrorKind::Infrastructure => "infrastructure",
        };
        f.write_str(s)
    }
}

/// Error produced by a handler's `initialize` or `execute`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind}: {message}")]
pub struct HandlerError {
    pub kind: ErrorKind,
    pub message: String,
}

impl HandlerError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidParams, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permanent, message)
    }
}

/// The error recorded on a task that ended in FAILED or CANCELLED.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskError {
    #[error("no handler registered for task type '{task_type}'")]
    Dispatch { task_type: TaskType },

    #[error("handler '{handler}' failed: {error}")]
    Handler { handler: String, error: HandlerError },

    #[error("handler '{handler}' exceeded the execution timeout of {timeout_ms}ms")]
    TimedOut { handler: String, timeout_ms: u64 },

    #[error("handler '{handler}' panicked")]
    Panicked { handler: String },

    #[error("handler '{handler}' call was aborted before it returned")]
    Aborted { handler: String },

    #[error("scheduler stopped before the task finished")]
    Cancelled,
}

impl TaskError {
    pub fn timed_out(handler: impl Into<String>, timeout: Duration) -> Self {
        TaskError::TimedOut {
            handler: handler.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }
}

impl From<DispatchError> for TaskError {
    fn from(err: DispatchError) -> Self {
        TaskError::Dispatch { task_type: err.0 }
    }
}

/// Errors returned by the scheduler surface.
#[derive(Debug, Error)]
pub enum SpindleError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error("scheduler is already running")]
    AlreadyRunning,
}
