//! Handler contract.
//!
//! A handler turns a task's input into an output or a `HandlerError`. Handlers
//! are supplied by collaborators and registered per task type; the core only
//! ever talks to them through `TaskHandler`.

mod command;
mod registry;

pub use self::command::CommandHandler;
pub use self::registry::{HandlerRegistry, RegistryError};

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::domain::{ExecutionId, HandlerError, ResourceRequirement, Task, TaskId};

/// Executes tasks of one type.
///
/// Retries invoke the same handler again with the same input, so handlers
/// must be safe to re-run.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(
        &self,
        task: Task,
        ctx: ExecutionContext,
    ) -> Result<serde_json::Value, HandlerError>;
}

/// What a handler gets to know about its execution. Immutable once built.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    task_id: TaskId,
    execution_id: ExecutionId,
    timeout: Duration,
    resources: ResourceRequirement,
    environment: BTreeMap<String, String>,
    terminate: CancellationToken,
}

impl ExecutionContext {
    pub fn new(
        task_id: TaskId,
        execution_id: ExecutionId,
        timeout: Duration,
        resources: ResourceRequirement,
        environment: BTreeMap<String, String>,
    ) -> Self {
        Self {
            task_id,
            execution_id,
            timeout,
            resources,
            environment,
            terminate: CancellationToken::new(),
        }
    }

    pub fn for_task(task: &Task, execution_id: ExecutionId) -> Self {
        Self::new(
            task.id,
            execution_id,
            task.timeout,
            task.resources,
            task.environment.clone(),
        )
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn execution_id(&self) -> ExecutionId {
        self.execution_id
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn resources(&self) -> &ResourceRequirement {
        &self.resources
    }

    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    /// True once the executor has asked this execution to stop.
    pub fn is_terminating(&self) -> bool {
        self.terminate.is_cancelled()
    }

    /// Resolves when the executor asks this execution to stop. Handlers that
    /// ignore it are force-killed after the grace period.
    pub fn terminated(&self) -> WaitForCancellationFuture<'_> {
        self.terminate.cancelled()
    }

    pub(crate) fn terminate_token(&self) -> CancellationToken {
        self.terminate.clone()
    }
}

/// Adapter returned by `handler_fn`.
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(Task, ExecutionContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<serde_json::Value, HandlerError>> + Send,
{
    async fn handle(
        &self,
        task: Task,
        ctx: ExecutionContext,
    ) -> Result<serde_json::Value, HandlerError> {
        (self.f)(task, ctx).await
    }
}

/// Build a handler from an async closure.
///
/// ```ignore
/// manager.register_handler("echo", handler_fn(|task, _ctx| async move { Ok(task.input) }))?;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Task, ExecutionContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<serde_json::Value, HandlerError>> + Send,
{
    FnHandler { f }
}
