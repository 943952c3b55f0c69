//! Task state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Task status.
///
/// State transitions:
/// - Pending -> Queued -> Running -> Completed | Failed | Cancelled
/// - Running -> Paused -> Running
/// - Failed -> Retrying -> Pending (only while retry_count < max_retries)
/// - Queued -> Failed (dispatch-time failures: no handler, requirement above capacity)
/// - any non-terminal -> Cancelled
///
/// `Failed` is only terminal once the task can no longer retry; that part of the
/// rule depends on the task, see `Task::is_finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Registered, waiting for dependencies or for the scheduler to accept it.
    Pending,

    /// Accepted by the scheduler, waiting for a worker and resources.
    Queued,

    /// Dispatched to an execution unit.
    Running,

    /// Manually suspended while running.
    Paused,

    /// Failed and about to be re-queued.
    Retrying,

    Completed,

    Failed,

    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 8] = [
        TaskStatus::Pending,
        TaskStatus::Queued,
        TaskStatus::Running,
        TaskStatus::Paused,
        TaskStatus::Retrying,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    /// Terminal regardless of retry budget.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }

    /// Waiting for dispatch: the scheduler keeps heap entries for these.
    pub fn is_awaiting_dispatch(self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Queued)
    }

    /// Holding an execution unit.
    pub fn is_active(self) -> bool {
        matches!(self, TaskStatus::Running | TaskStatus::Paused)
    }

    /// Edge check of the transition graph. Guards that depend on task data
    /// (retry budget for Failed -> Retrying) live on `Task`.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Pending, Queued) => true,
            (Queued, Running) | (Queued, Failed) => true,
            (Running, Completed) | (Running, Failed) | (Running, Paused) => true,
            (Paused, Running) => true,
            (Failed, Retrying) => true,
            (Retrying, Pending) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Paused => "paused",
            TaskStatus::Retrying => "retrying",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::TaskStatus::{self, *};
    use rstest::rstest;

    #[rstest]
    #[case::queue(Pending, Queued)]
    #[case::dispatch(Queued, Running)]
    #[case::dispatch_failure(Queued, Failed)]
    #[case::complete(Running, Completed)]
    #[case::fail(Running, Failed)]
    #[case::pause(Running, Paused)]
    #[case::resume(Paused, Running)]
    #[case::retry(Failed, Retrying)]
    #[case::requeue(Retrying, Pending)]
    #[case::cancel_pending(Pending, Cancelled)]
    #[case::cancel_paused(Paused, Cancelled)]
    #[case::cancel_failed(Failed, Cancelled)]
    fn legal_edges(#[case] from: TaskStatus, #[case] to: TaskStatus) {
        assert!(from.can_transition_to(to), "{from} -> {to} should be legal");
    }

    #[rstest]
    #[case::running_back_to_pending(Running, Pending)]
    #[case::skip_queue(Pending, Running)]
    #[case::queued_back(Queued, Pending)]
    #[case::completed_is_final(Completed, Pending)]
    #[case::cancelled_is_final(Cancelled, Cancelled)]
    #[case::paused_completes(Paused, Completed)]
    #[case::failed_to_pending(Failed, Pending)]
    fn illegal_edges(#[case] from: TaskStatus, #[case] to: TaskStatus) {
        assert!(!from.can_transition_to(to), "{from} -> {to} should be illegal");
    }

    #[test]
    fn serializes_as_snake_case() {
        let s = serde_json::to_string(&TaskStatus::Retrying).unwrap();
        assert_eq!(s, "\"retrying\"");
    }
}
