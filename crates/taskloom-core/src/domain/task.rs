//! Task model.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::{ErrorInfo, ErrorKind, TaskError};
use super::ids::{ExecutionId, TaskId};
use super::spec::TaskSpec;
use super::state::TaskStatus;

/// Handler routing key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskType(String);

impl TaskType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
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

impl From<&str> for TaskType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TaskType {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Priority level. Lower level = more urgent.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
    Background,
}

impl Priority {
    pub const ALL: [Priority; 5] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
        Priority::Background,
    ];

    /// 1 (critical) ..= 5 (background).
    pub fn level(self) -> u8 {
        match self {
            Priority::Critical => 1,
            Priority::High => 2,
            Priority::Normal => 3,
            Priority::Low => 4,
            Priority::Background => 5,
        }
    }

    /// Level mapped onto [0, 1].
    pub fn normalized(self) -> f64 {
        f64::from(self.level() - 1) / 4.0
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
            Priority::Background => "background",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a dependency edge means. Only `Completion` gates scheduling;
/// the other kinds are metadata for handlers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    #[default]
    Completion,
    Data,
    Resource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    pub task_id: TaskId,
    #[serde(default)]
    pub kind: DependencyKind,
}

impl Dependency {
    pub fn completion(task_id: TaskId) -> Self {
        Self {
            task_id,
            kind: DependencyKind::Completion,
        }
    }

    pub fn is_completion(&self) -> bool {
        self.kind == DependencyKind::Completion
    }
}

/// Resources a task needs while running. `None` means "no constraint".
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirement {
    #[serde(default)]
    pub cpu_cores: Option<f64>,
    #[serde(default)]
    pub memory_mb: Option<u64>,
    /// Occupies one GPU slot when true.
    #[serde(default)]
    pub gpu_required: bool,
}

impl ResourceRequirement {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn cpu(mut self, cores: f64) -> Self {
        self.cpu_cores = Some(cores);
        self
    }

    pub fn memory(mut self, mb: u64) -> Self {
        self.memory_mb = Some(mb);
        self
    }

    pub fn gpu(mut self) -> Self {
        self.gpu_required = true;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.cpu_cores.is_none() && self.memory_mb.is_none() && !self.gpu_required
    }
}

/// A unit of work.
///
/// Design:
/// - The task manager owns every `Task` and is the only writer of `status`.
/// - All status changes go through `transition`, which enforces the state
///   machine and keeps timestamps consistent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub priority: Priority,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Not eligible to run before this instant.
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    /// Only set while the task is in a terminal (or failed) state.
    pub completed_at: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,

    pub estimated_duration: Option<Duration>,
    pub timeout: Duration,

    pub retry_count: u32,
    pub max_retries: u32,

    pub dependencies: Vec<Dependency>,
    pub resources: ResourceRequirement,
    pub environment: BTreeMap<String, String>,

    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub error_info: Option<ErrorInfo>,

    /// Current execution attempt, set on dispatch.
    pub execution_id: Option<ExecutionId>,
}

impl Task {
    /// Build a pending task from a spec. Unset timeout / retry ceiling come
    /// from the manager defaults.
    pub fn from_spec(
        id: TaskId,
        spec: TaskSpec,
        default_timeout: Duration,
        default_max_retries: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: spec.name,
            task_type: spec.task_type,
            status: TaskStatus::Pending,
            priority: spec.priority,
            created_at: now,
            updated_at: now,
            scheduled_at: spec.scheduled_at,
            started_at: None,
            completed_at: None,
            deadline: spec.deadline,
            estimated_duration: spec.estimated_duration,
            timeout: spec.timeout.unwrap_or(default_timeout),
            retry_count: 0,
            max_retries: spec.max_retries.unwrap_or(default_max_retries),
            dependencies: spec.dependencies,
            resources: spec.resources,
            environment: spec.environment,
            input: spec.input,
            output: None,
            error_info: None,
            execution_id: None,
        }
    }

    /// Ids this task must see COMPLETED before it may run.
    pub fn completion_dependencies(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.dependencies
            .iter()
            .filter(|d| d.is_completion())
            .map(|d| d.task_id)
    }

    pub fn dependencies_satisfied(&self, completed: &HashSet<TaskId>) -> bool {
        self.completion_dependencies().all(|id| completed.contains(&id))
    }

    /// Pending, every completion dependency completed, and due.
    pub fn can_execute(&self, completed: &HashSet<TaskId>, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending
            && self.dependencies_satisfied(completed)
            && self.is_due(now)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at.is_none_or(|at| at <= now)
    }

    /// Failed with a retryable error and retry budget left.
    pub fn should_retry(&self) -> bool {
        self.status == TaskStatus::Failed
            && self.retry_count < self.max_retries
            && self
                .error_info
                .as_ref()
                .is_some_and(|e| e.kind.is_retryable())
    }

    /// No further transitions will happen on their own.
    pub fn is_finished(&self) -> bool {
        match self.status {
            TaskStatus::Completed | TaskStatus::Cancelled => true,
            TaskStatus::Failed => !self.should_retry(),
            _ => false,
        }
    }

    /// Wall-clock run time of the last attempt, once it has ended.
    pub fn run_duration(&self) -> Option<Duration> {
        let (start, end) = (self.started_at?, self.completed_at?);
        (end - start).to_std().ok()
    }

    /// Move to `next`, enforcing the state machine.
    pub fn transition(&mut self, next: TaskStatus, now: DateTime<Utc>) -> Result<(), TaskError> {
        let legal = self.status.can_transition_to(next)
            && match (self.status, next) {
                (TaskStatus::Failed, TaskStatus::Retrying) => self.retry_count < self.max_retries,
                (TaskStatus::Failed, TaskStatus::Cancelled) => !self.is_finished(),
                _ => true,
            };
        if !legal {
            return Err(TaskError::InvalidTransition {
                task_id: self.id,
                from: self.status,
                to: next,
            });
        }

        match next {
            TaskStatus::Running if self.status == TaskStatus::Queued => {
                self.started_at = Some(now);
                self.completed_at = None;
            }
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => {
                self.completed_at = Some(now);
            }
            TaskStatus::Retrying => {
                self.retry_count += 1;
                self.completed_at = None;
            }
            TaskStatus::Pending => {
                self.started_at = None;
                self.execution_id = None;
            }
            _ => {}
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    pub fn complete(&mut self, output: serde_json::Value, now: DateTime<Utc>) -> Result<(), TaskError> {
        self.transition(TaskStatus::Completed, now)?;
        self.output = Some(output);
        self.error_info = None;
        Ok(())
    }

    pub fn fail(&mut self, error: ErrorInfo, now: DateTime<Utc>) -> Result<(), TaskError> {
        self.transition(TaskStatus::Failed, now)?;
        self.error_info = Some(error);
        Ok(())
    }

    pub fn cancel(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<(), TaskError> {
        self.transition(TaskStatus::Cancelled, now)?;
        self.error_info = Some(ErrorInfo::new(ErrorKind::Cancelled, reason, now));
        Ok(())
    }
}

/// Query for `TaskManager::get_tasks`. Empty filter matches everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskFilter {
    #[serde(default)]
    pub statuses: Option<Vec<TaskStatus>>,
    #[serde(default)]
    pub task_type: Option<TaskType>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub name_contains: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl TaskFilter {
    pub fn with_status(status: TaskStatus) -> Self {
        Self {
            statuses: Some(vec![status]),
            ..Default::default()
        }
    }

    pub fn matches(&self, task: &Task) -> bool {
        self.statuses
            .as_ref()
            .is_none_or(|s| s.contains(&task.status))
            && self.task_type.as_ref().is_none_or(|t| *t == task.task_type)
            && self.priority.is_none_or(|p| p == task.priority)
            && self
                .name_contains
                .as_ref()
                .is_none_or(|n| task.name.contains(n.as_str()))
    }
}
