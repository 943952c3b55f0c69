//! Input spec for `TaskManager::create_task`.
//!
//! Everything except name and type is optional; unset timeout and retry
//! ceiling fall back to the manager configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::TaskId;
use super::task::{Dependency, Priority, ResourceRequirement, TaskType};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    pub task_type: TaskType,

    #[serde(default)]
    pub priority: Priority,

    #[serde(default)]
    pub input: serde_json::Value,

    #[serde(default)]
    pub dependencies: Vec<Dependency>,

    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,

    #[serde(default)]
    pub timeout: Option<Duration>,

    #[serde(default)]
    pub max_retries: Option<u32>,

    #[serde(default)]
    pub estimated_duration: Option<Duration>,

    #[serde(default)]
    pub resources: ResourceRequirement,

    /// Passed to the handler through its execution context.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

impl TaskSpec {
    pub fn new(name: impl Into<String>, task_type: impl Into<TaskType>) -> Self {
        Self {
            name: name.into(),
            task_type: task_type.into(),
            priority: Priority::default(),
            input: serde_json::Value::Null,
            dependencies: Vec::new(),
            scheduled_at: None,
            deadline: None,
            timeout: None,
            max_retries: None,
            estimated_duration: None,
            resources: ResourceRequirement::default(),
            environment: BTreeMap::new(),
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn input(mut self, input: serde_json::Value) -> Self {
        self.input = input;
        self
    }

    /// Add a completion dependency.
    pub fn depends_on(self, task_id: TaskId) -> Self {
        self.dependency(Dependency::completion(task_id))
    }

    pub fn dependency(mut self, dependency: Dependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    pub fn deadline(mut self, at: DateTime<Utc>) -> Self {
        self.deadline = Some(at);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn estimated_duration(mut self, duration: Duration) -> Self {
        self.estimated_duration = Some(duration);
        self
    }

    pub fn resources(mut self, resources: ResourceRequirement) -> Self {
        self.resources = resources;
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }
}
