//! TaskManagerBuilder - wiring and startup validation.
//!
//! Fail-fast: handler registration conflicts and missing expected task types
//! surface from `build()`, before any task is accepted.

use std::sync::Arc;

use thiserror::Error;

use super::TaskManager;
use crate::config::{ConfigError, ManagerConfig};
use crate::domain::TaskType;
use crate::handler::{HandlerRegistry, RegistryError, TaskHandler};
use crate::ports::{Clock, IdGenerator, SystemClock, UlidGenerator};

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("missing handlers for task types: {0:?}")]
    MissingTaskTypes(Vec<TaskType>),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// ```ignore
/// let manager = TaskManager::builder()
///     .config(config)
///     .handler("echo", handler_fn(|task, _ctx| async move { Ok(task.input) }))
///     .expect_task_types(&["echo"])
///     .build()?;
/// ```
pub struct TaskManagerBuilder {
    config: ManagerConfig,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    handlers: Vec<(TaskType, Arc<dyn TaskHandler>)>,
    expected: Vec<TaskType>,
}

impl TaskManagerBuilder {
    pub fn new() -> Self {
        Self {
            config: ManagerConfig::default(),
            clock: None,
            ids: None,
            handlers: Vec::new(),
            expected: Vec::new(),
        }
    }

    pub fn config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn handler<H>(mut self, task_type: impl Into<TaskType>, handler: H) -> Self
    where
        H: TaskHandler + 'static,
    {
        self.handlers.push((task_type.into(), Arc::new(handler)));
        self
    }

    /// Task types that must have a handler by the time `build` runs.
    pub fn expect_task_types(mut self, task_types: &[&str]) -> Self {
        self.expected
            .extend(task_types.iter().map(|t| TaskType::new(*t)));
        self
    }

    pub fn build(self) -> Result<TaskManager, BuildError> {
        self.config.validate()?;

        let mut registry = HandlerRegistry::new();
        for (task_type, handler) in self.handlers {
            registry.register(task_type, handler)?;
        }

        let missing: Vec<TaskType> = self
            .expected
            .into_iter()
            .filter(|t| !registry.contains(t))
            .collect();
        if !missing.is_empty() {
            return Err(BuildError::MissingTaskTypes(missing));
        }

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));

        Ok(TaskManager::from_parts(self.config, clock, ids, registry))
    }
}

impl Default for TaskManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
