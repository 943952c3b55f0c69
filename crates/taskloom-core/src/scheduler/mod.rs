//! Scheduling: the priority queue, its ordering strategies, the dependency
//! index and retry backoff.

mod dependency;
mod queue;
mod retry;
mod strategy;

pub use self::dependency::DependencyGraph;
pub use self::queue::{ScheduledEntry, Scheduler};
pub use self::retry::RetryPolicy;
pub use self::strategy::{ScoreParams, SchedulingKey, SchedulingStrategy};

use thiserror::Error;

use crate::domain::{TaskId, TaskStatus};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("task {task_id} is {status}, only pending tasks can be scheduled")]
    NotPending { task_id: TaskId, status: TaskStatus },

    #[error("task {0} is already enqueued")]
    AlreadyEnqueued(TaskId),
}
