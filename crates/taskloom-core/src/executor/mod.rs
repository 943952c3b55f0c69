//! Executor: bounded pool of isolated execution units.
//!
//! Design:
//! - `submit` reserves a worker slot and the task's resources under the
//!   running-map lock, then spawns a supervisor. Lock order is always
//!   running map -> resource ledger.
//! - The supervisor owns the attempt until it ends, releases the resources,
//!   frees the slot and reports exactly one `ExecutionReport` to the sink.
//! - Handler failures, panics, timeouts and cancellations are all outcomes;
//!   nothing escapes the unit boundary as an error or panic.

mod unit;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{
    ExecutionId, ExecutionOutcome, ResourceRequirement, Task, TaskId, TaskType,
};
use crate::handler::{ExecutionContext, TaskHandler};
use crate::resources::{ResourceError, ResourceManager, ResourceUsage};

#[derive(Debug, Error, PartialEq)]
pub enum ExecutorError {
    #[error("all {max_workers} workers are busy")]
    Saturated { max_workers: usize },

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error("executor is shutting down")]
    ShuttingDown,
}

/// The single result of one execution attempt.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub task_id: TaskId,
    pub execution_id: ExecutionId,
    pub task_type: TaskType,
    pub outcome: ExecutionOutcome,
    /// Wall time from unit start to outcome.
    pub duration: Duration,
    pub resources: ResourceRequirement,
}

/// Receives execution reports.
#[async_trait]
pub trait CompletionSink: Send + Sync {
    async fn report(&self, report: ExecutionReport);
}

#[async_trait]
impl CompletionSink for mpsc::UnboundedSender<ExecutionReport> {
    async fn report(&self, report: ExecutionReport) {
        let task_id = report.task_id;
        if self.send(report).is_err() {
            warn!(task_id = %task_id, "completion receiver dropped, report lost");
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutorStats {
    pub active: usize,
    pub max_workers: usize,
    /// `active / max_workers`.
    pub utilization: f64,
    /// Mean elapsed time of the executions running now.
    pub average_running_secs: f64,
    pub resource_usage: ResourceUsage,
}

struct RunningExecution {
    execution_id: ExecutionId,
    cancel: CancellationToken,
    started: Instant,
}

struct Shared {
    max_workers: usize,
    grace_period: Duration,
    resources: Arc<ResourceManager>,
    running: Mutex<HashMap<TaskId, RunningExecution>>,
    shutting_down: AtomicBool,
}

impl Shared {
    fn running(&self) -> MutexGuard<'_, HashMap<TaskId, RunningExecution>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Clone)]
pub struct Executor {
    shared: Arc<Shared>,
}

impl Executor {
    pub fn new(max_workers: usize, grace_period: Duration, resources: Arc<ResourceManager>) -> Self {
        Self {
            shared: Arc::new(Shared {
                max_workers: max_workers.max(1),
                grace_period,
                resources,
                running: Mutex::new(HashMap::new()),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.shared.max_workers
    }

    pub fn grace_period(&self) -> Duration {
        self.shared.grace_period
    }

    pub fn resources(&self) -> &Arc<ResourceManager> {
        &self.shared.resources
    }

    pub fn active_count(&self) -> usize {
        self.shared.running().len()
    }

    pub fn has_capacity(&self) -> bool {
        !self.shared.shutting_down.load(Ordering::Acquire)
            && self.active_count() < self.shared.max_workers
    }

    pub fn is_running(&self, task_id: TaskId) -> bool {
        self.shared.running().contains_key(&task_id)
    }

    /// Start an attempt. Fails without side effects when no worker is free,
    /// resources are not available, or the executor is shutting down.
    pub fn submit(
        &self,
        task: Task,
        handler: Arc<dyn TaskHandler>,
        ctx: ExecutionContext,
        sink: Arc<dyn CompletionSink>,
    ) -> Result<(), ExecutorError> {
        if self.shared.shutting_down.load(Ordering::Acquire) {
            return Err(ExecutorError::ShuttingDown);
        }

        let cancel = CancellationToken::new();
        {
            let mut running = self.shared.running();
            if running.len() >= self.shared.max_workers {
                return Err(ExecutorError::Saturated {
                    max_workers: self.shared.max_workers,
                });
            }
            self.shared.resources.allocate(task.id, &task.resources)?;
            running.insert(
                task.id,
                RunningExecution {
                    execution_id: ctx.execution_id(),
                    cancel: cancel.clone(),
                    started: Instant::now(),
                },
            );
        }

        debug!(
            task_id = %task.id,
            execution_id = %ctx.execution_id(),
            task_type = %task.task_type,
            timeout_ms = ctx.timeout().as_millis() as u64,
            "execution unit submitted"
        );

        let shared = Arc::clone(&self.shared);
        tokio::spawn(supervise(shared, task, handler, ctx, cancel, sink));
        Ok(())
    }

    /// Ask a running attempt to stop. The report arrives through the sink.
    pub fn cancel(&self, task_id: TaskId) -> bool {
        match self.shared.running().get(&task_id) {
            Some(execution) => {
                execution.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Stop accepting work and cancel everything running.
    pub fn cancel_all(&self) -> usize {
        self.shared.shutting_down.store(true, Ordering::Release);
        let running = self.shared.running();
        for execution in running.values() {
            execution.cancel.cancel();
        }
        running.len()
    }

    pub fn stats(&self) -> ExecutorStats {
        let (active, average_running_secs) = {
            let running = self.shared.running();
            let active = running.len();
            let total: f64 = running
                .values()
                .map(|e| e.started.elapsed().as_secs_f64())
                .sum();
            let avg = if active == 0 { 0.0 } else { total / active as f64 };
            (active, avg)
        };

        ExecutorStats {
            active,
            max_workers: self.shared.max_workers,
            utilization: active as f64 / self.shared.max_workers as f64,
            average_running_secs,
            resource_usage: self.shared.resources.usage(),
        }
    }
}

async fn supervise(
    shared: Arc<Shared>,
    task: Task,
    handler: Arc<dyn TaskHandler>,
    ctx: ExecutionContext,
    cancel: CancellationToken,
    sink: Arc<dyn CompletionSink>,
) {
    let started = Instant::now();
    let task_id = task.id;
    let task_type = task.task_type.clone();
    let resources = task.resources;
    let execution_id = ctx.execution_id();

    let outcome = unit::run_isolated(handler, task, ctx, shared.grace_period, cancel).await;
    let duration = started.elapsed();

    shared.resources.deallocate(task_id);
    {
        let mut running = shared.running();
        if running
            .get(&task_id)
            .is_some_and(|e| e.execution_id == execution_id)
        {
            running.remove(&task_id);
        }
    }

    match &outcome {
        ExecutionOutcome::TimedOut { forced, .. } => warn!(
            task_id = %task_id,
            execution_id = %execution_id,
            duration_ms = duration.as_millis() as u64,
            forced,
            "execution timed out"
        ),
        other => info!(
            task_id = %task_id,
            execution_id = %execution_id,
            outcome = ?other.kind(),
            duration_ms = duration.as_millis() as u64,
            "execution finished"
        ),
    }

    sink.report(ExecutionReport {
        task_id,
        execution_id,
        task_type,
        outcome,
        duration,
        resources,
    })
    .await;
}
