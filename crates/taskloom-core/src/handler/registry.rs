//! Capability map: task type -> handler.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use super::TaskHandler;
use crate::domain::TaskType;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("handler for task type '{0}' is already registered")]
    AlreadyRegistered(TaskType),
}

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskType, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. A second registration for the same type is an error.
    pub fn register(
        &mut self,
        task_type: TaskType,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<(), RegistryError> {
        if self.handlers.contains_key(&task_type) {
            return Err(RegistryError::AlreadyRegistered(task_type));
        }
        self.handlers.insert(task_type, handler);
        Ok(())
    }

    pub fn get(&self, task_type: &TaskType) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(task_type).cloned()
    }

    pub fn contains(&self, task_type: &TaskType) -> bool {
        self.handlers.contains_key(task_type)
    }

    /// Registered types, sorted.
    pub fn registered_types(&self) -> Vec<TaskType> {
        let mut types: Vec<_> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
