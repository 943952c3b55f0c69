//! Outcome of one execution attempt.
//!
//! An attempt yields exactly one of: output, handler error, timeout, or
//! cancellation. The executor produces it; the manager folds it into the task.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::{ErrorInfo, ErrorKind, HandlerError};
use super::state::TaskStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    Success,
    Failure,
    Timeout,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Succeeded {
        output: serde_json::Value,
    },
    Failed {
        error: HandlerError,
    },
    /// `forced` is true when the unit ignored terminate and had to be killed.
    TimedOut {
        timeout: Duration,
        forced: bool,
    },
    Cancelled {
        forced: bool,
    },
}

impl ExecutionOutcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            ExecutionOutcome::Succeeded { .. } => OutcomeKind::Success,
            ExecutionOutcome::Failed { .. } => OutcomeKind::Failure,
            ExecutionOutcome::TimedOut { .. } => OutcomeKind::Timeout,
            ExecutionOutcome::Cancelled { .. } => OutcomeKind::Cancelled,
        }
    }

    /// Status the task moves to when this outcome is applied.
    pub fn target_status(&self) -> TaskStatus {
        match self {
            ExecutionOutcome::Succeeded { .. } => TaskStatus::Completed,
            ExecutionOutcome::Failed { .. } | ExecutionOutcome::TimedOut { .. } => {
                TaskStatus::Failed
            }
            ExecutionOutcome::Cancelled { .. } => TaskStatus::Cancelled,
        }
    }

    /// Error details to record on the task, if any.
    pub fn error_info(&self, now: DateTime<Utc>) -> Option<ErrorInfo> {
        match self {
            ExecutionOutcome::Succeeded { .. } => None,
            ExecutionOutcome::Failed { error } => Some(ErrorInfo::from_handler(error.clone(), now)),
            ExecutionOutcome::TimedOut { timeout, .. } => Some(ErrorInfo::new(
                ErrorKind::Timeout,
                format!("handler exceeded timeout of {}ms", timeout.as_millis()),
                now,
            )),
            ExecutionOutcome::Cancelled { .. } => Some(ErrorInfo::new(
                ErrorKind::Cancelled,
                "execution cancelled",
                now,
            )),
        }
    }

    pub fn was_forced(&self) -> bool {
        matches!(
            self,
            ExecutionOutcome::TimedOut { forced: true, .. }
                | ExecutionOutcome::Cancelled { forced: true }
        )
    }
}
