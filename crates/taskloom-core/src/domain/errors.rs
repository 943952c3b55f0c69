//! Errors and their classification.
//!
//! Two families live here:
//! - `TaskError`: what the manager API returns synchronously to callers.
//! - `ErrorKind` / `ErrorInfo` / `HandlerError`: failures captured *into* a task,
//!   never thrown across the executor boundary.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ids::TaskId;
use super::state::TaskStatus;
use super::task::TaskType;
use crate::executor::ExecutorError;
use crate::handler::RegistryError;
use crate::resources::ResourceError;
use crate::scheduler::ScheduleError;

/// Operational classification of a failure recorded on a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed task or dangling dependency.
    Validation,
    /// No handler registered for the task type.
    NoHandler,
    /// Admission denied by the resource manager.
    ResourceExhausted,
    /// Handler exceeded its deadline.
    Timeout,
    /// Handler returned an error (or panicked).
    Handler,
    /// Explicit cancellation, cascade, or maintenance sweep.
    Cancelled,
}

impl ErrorKind {
    /// Whether the maintenance sweep may retry a task that failed this way.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Handler | ErrorKind::Timeout)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NoHandler => "no_handler",
            ErrorKind::ResourceExhausted => "resource_exhausted",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Handler => "handler",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by a handler: `{type, message}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{error_type}: {message}")]
pub struct HandlerError {
    pub error_type: String,
    pub message: String,
}

impl HandlerError {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
        }
    }

    /// A generic handler error with type "error".
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new("error", message)
    }

    /// Wrap any std error, keeping its Rust type name as the error type.
    pub fn from_error<E: std::error::Error>(err: E) -> Self {
        let full = std::any::type_name::<E>();
        let short = full.rsplit("::").next().unwrap_or(full);
        Self::new(short, err.to_string())
    }
}

/// Failure details stored on a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    /// Handler-supplied type for `Handler` errors, the kind name otherwise.
    pub error_type: String,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>, occurred_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            error_type: kind.as_str().to_string(),
            message: message.into(),
            occurred_at,
        }
    }

    pub fn from_handler(err: HandlerError, occurred_at: DateTime<Utc>) -> Self {
        Self {
            kind: ErrorKind::Handler,
            error_type: err.error_type,
            message: err.message,
            occurred_at,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == ErrorKind::Timeout
    }
}

/// Errors returned by the task manager API.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("invalid task: {0}")]
    Validation(String),

    #[error("dependency {0} does not exist")]
    UnknownDependency(TaskId),

    #[error("task {0} not found")]
    NotFound(TaskId),

    #[error("no handler registered for task_type={0}")]
    NoHandler(TaskType),

    #[error("resources exhausted for task {task_id}: {source}")]
    ResourceExhausted {
        task_id: TaskId,
        #[source]
        source: ResourceError,
    },

    #[error("task {task_id}: illegal transition {from} -> {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("task manager is shut down")]
    ShutDown,
}

impl TaskError {
    /// Classification for errors that end up recorded on a task.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TaskError::NoHandler(_) => ErrorKind::NoHandler,
            TaskError::ResourceExhausted { .. } => ErrorKind::ResourceExhausted,
            TaskError::Executor(ExecutorError::Resource(_)) => ErrorKind::ResourceExhausted,
            _ => ErrorKind::Validation,
        }
    }
}
