//! Ordering strategies. Every strategy maps a task to a score; lower runs first.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Priority, Task, TaskType};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingStrategy {
    /// Creation time.
    Fifo,
    /// Priority level.
    #[default]
    PriorityFirst,
    /// Estimated duration, falling back to a default.
    ShortestJobFirst,
    /// Deadline; tasks without one go last.
    DeadlineFirst,
    /// Blend of priority, deadline urgency, duration and age.
    Weighted,
    /// Rotates through task types, priority breaks ties within a turn.
    RoundRobin,
}

impl SchedulingStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            SchedulingStrategy::Fifo => "fifo",
            SchedulingStrategy::PriorityFirst => "priority_first",
            SchedulingStrategy::ShortestJobFirst => "shortest_job_first",
            SchedulingStrategy::DeadlineFirst => "deadline_first",
            SchedulingStrategy::Weighted => "weighted",
            SchedulingStrategy::RoundRobin => "round_robin",
        }
    }

    pub fn score(self, key: &SchedulingKey, params: &ScoreParams, now: DateTime<Utc>) -> f64 {
        match self {
            SchedulingStrategy::Fifo => key.created_at.timestamp_millis() as f64,
            SchedulingStrategy::PriorityFirst => f64::from(key.priority.level()),
            SchedulingStrategy::ShortestJobFirst => key
                .estimated_duration
                .unwrap_or(params.default_duration)
                .as_secs_f64(),
            SchedulingStrategy::DeadlineFirst => key
                .deadline
                .map_or(f64::INFINITY, |d| d.timestamp_millis() as f64),
            SchedulingStrategy::Weighted => weighted_score(key, params, now),
            SchedulingStrategy::RoundRobin => key.rotation as f64 + 0.5 * key.priority.normalized(),
        }
    }
}

impl fmt::Display for SchedulingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tunables shared by the strategies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreParams {
    pub default_duration: Duration,
    /// Normalisation horizon for WEIGHTED's deadline, duration and age terms.
    pub horizon: Duration,
}

impl Default for ScoreParams {
    fn default() -> Self {
        Self {
            default_duration: Duration::from_secs(300),
            horizon: Duration::from_secs(3600),
        }
    }
}

/// The slice of a task the scheduler scores on, captured at enqueue time.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulingKey {
    pub task_type: TaskType,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub deadline: Option<DateTime<Utc>>,
    pub estimated_duration: Option<Duration>,
    /// ROUND_ROBIN turn within the task's type.
    pub rotation: u64,
}

impl SchedulingKey {
    pub fn from_task(task: &Task, rotation: u64) -> Self {
        Self {
            task_type: task.task_type.clone(),
            priority: task.priority,
            created_at: task.created_at,
            deadline: task.deadline,
            estimated_duration: task.estimated_duration,
            rotation,
        }
    }

    /// Pick up edits made to the task since it was enqueued.
    pub fn refresh(&mut self, task: &Task) {
        self.priority = task.priority;
        self.deadline = task.deadline;
        self.estimated_duration = task.estimated_duration;
    }
}

fn weighted_score(key: &SchedulingKey, params: &ScoreParams, now: DateTime<Utc>) -> f64 {
    let horizon = params.horizon.as_secs_f64().max(f64::EPSILON);

    let urgency = match key.deadline {
        Some(deadline) => {
            let remaining = (deadline - now).num_milliseconds() as f64 / 1000.0;
            if remaining <= 0.0 {
                return f64::NEG_INFINITY;
            }
            1.0 - (remaining / horizon).min(1.0)
        }
        None => 0.0,
    };

    let duration = key
        .estimated_duration
        .unwrap_or(params.default_duration)
        .as_secs_f64();
    let age = ((now - key.created_at).num_milliseconds().max(0) as f64) / 1000.0;

    0.4 * key.priority.normalized()
        + 0.3 * (1.0 - urgency)
        + 0.2 * (duration / horizon).min(1.0)
        + 0.1 * (1.0 - (age / horizon).min(1.0))
}
