//! Task manager: owns every task and drives scheduler, executor and monitor.
//!
//! Design:
//! - One `ManagerState` behind one async mutex holds the task registry, the
//!   dependency index, the scheduler queue and the bookkeeping for paused and
//!   cancelling executions. Every status write happens under that lock.
//! - The executor reports back through `ReportSink`, which holds a `Weak`
//!   reference so the executor never keeps the manager alive.
//! - Dispatch is event driven: creating, scheduling, completing and cancelling
//!   all end with an admission pass. The maintenance sweep covers retries,
//!   overdue executions, history pruning and tasks that just became due.

mod builder;
mod maintenance;
mod status;
#[cfg(test)]
mod tests;

pub use self::builder::{BuildError, TaskManagerBuilder};
pub use self::status::{MaintenanceReport, SystemStatus};

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ManagerConfig;
use crate::domain::{
    ErrorInfo, ErrorKind, ExecutionOutcome, Priority, Task, TaskError, TaskFilter, TaskId,
    TaskSpec, TaskStatus, TaskType,
};
use crate::executor::{CompletionSink, ExecutionReport, Executor, ExecutorError};
use crate::handler::{ExecutionContext, HandlerRegistry, TaskHandler};
use crate::monitor::{Monitor, MonitoringMetrics};
use crate::ports::{Clock, IdGenerator};
use crate::resources::{ResourceError, ResourceManager};
use crate::scheduler::{DependencyGraph, RetryPolicy, ScheduleError, Scheduler};

struct ManagerState {
    tasks: HashMap<TaskId, Task>,
    graph: DependencyGraph,
    scheduler: Scheduler,
    completed: HashSet<TaskId>,
    /// Outcomes that arrived while their task was paused.
    held_reports: HashMap<TaskId, ExecutionReport>,
    /// Running tasks asked to cancel, with the reason to record.
    cancel_requests: HashMap<TaskId, String>,
}

#[derive(Default)]
struct Lifecycle {
    shutdown_tx: Option<watch::Sender<bool>>,
    maintenance: Option<JoinHandle<()>>,
}

struct ManagerInner {
    config: ManagerConfig,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    handlers: RwLock<HandlerRegistry>,
    state: Mutex<ManagerState>,
    executor: Executor,
    monitor: Monitor,
    retry_policy: RetryPolicy,
    sink: Arc<dyn CompletionSink>,
    lifecycle: std::sync::Mutex<Lifecycle>,
    shut_down: AtomicBool,
}

struct ReportSink {
    inner: Weak<ManagerInner>,
}

#[async_trait]
impl CompletionSink for ReportSink {
    async fn report(&self, report: ExecutionReport) {
        match self.inner.upgrade() {
            Some(inner) => inner.apply_report(report).await,
            None => debug!(task_id = %report.task_id, "manager dropped, report discarded"),
        }
    }
}

/// Handle to a task manager. Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<ManagerInner>,
}

impl TaskManager {
    pub fn builder() -> TaskManagerBuilder {
        TaskManagerBuilder::new()
    }

    /// Manager with the given config, system clock and no handlers.
    pub fn new(config: ManagerConfig) -> Result<Self, BuildError> {
        TaskManagerBuilder::new().config(config).build()
    }

    fn from_parts(
        config: ManagerConfig,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        registry: HandlerRegistry,
    ) -> Self {
        let resources = Arc::new(ResourceManager::new(config.capacity));
        let executor = Executor::new(config.max_workers, config.grace_period(), resources);
        let scheduler = Scheduler::new(config.strategy, config.score_params());
        let monitor = Monitor::new(config.monitor.max_history, config.metrics_window());
        let retry_policy = config.retry.policy();

        let inner = Arc::new_cyclic(|weak| ManagerInner {
            clock,
            ids,
            handlers: RwLock::new(registry),
            state: Mutex::new(ManagerState {
                tasks: HashMap::new(),
                graph: DependencyGraph::new(),
                scheduler,
                completed: HashSet::new(),
                held_reports: HashMap::new(),
                cancel_requests: HashMap::new(),
            }),
            executor,
            monitor,
            retry_policy,
            sink: Arc::new(ReportSink {
                inner: weak.clone(),
            }),
            lifecycle: std::sync::Mutex::new(Lifecycle::default()),
            shut_down: AtomicBool::new(false),
            config,
        });

        info!(
            max_workers = inner.config.max_workers,
            strategy = %inner.config.strategy,
            "task manager created"
        );
        Self { inner }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    pub fn register_handler<H>(
        &self,
        task_type: impl Into<TaskType>,
        handler: H,
    ) -> Result<(), TaskError>
    where
        H: TaskHandler + 'static,
    {
        let task_type = task_type.into();
        self.inner
            .handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .register(task_type.clone(), Arc::new(handler))?;
        info!(task_type = %task_type, "handler registered");
        Ok(())
    }

    /// Register a task as PENDING and queue it right away when its
    /// dependencies are already complete.
    pub async fn create_task(&self, spec: TaskSpec) -> Result<Task, TaskError> {
        self.inner.create_task(spec).await
    }

    /// Hand a PENDING task to the scheduler. `Ok(false)` while a completion
    /// dependency is outstanding.
    pub async fn schedule_task(&self, task_id: TaskId) -> Result<bool, TaskError> {
        let inner = &self.inner;
        let now = inner.clock.now();
        let mut state = inner.state.lock().await;
        let accepted = inner.enqueue(&mut state, task_id, now)?;
        inner.dispatch_ready(&mut state);
        Ok(accepted)
    }

    /// Dispatch one task now, bypassing queue order. `Ok(false)` when the
    /// task is not waiting for dispatch or not ready.
    pub async fn execute_task(&self, task_id: TaskId) -> Result<bool, TaskError> {
        self.inner.execute_task(task_id).await
    }

    /// Cancel a task. Queued work is cancelled synchronously and its handler
    /// never runs; running work is stopped and becomes CANCELLED once its
    /// execution unit is gone. `Ok(false)` if the task had already finished.
    pub async fn cancel_task(
        &self,
        task_id: TaskId,
        reason: Option<&str>,
    ) -> Result<bool, TaskError> {
        self.inner
            .cancel_task(task_id, reason.map(str::to_string))
            .await
    }

    /// RUNNING -> PAUSED. The handler keeps running; its outcome is held until
    /// the task is resumed.
    pub async fn pause_task(&self, task_id: TaskId) -> Result<(), TaskError> {
        let inner = &self.inner;
        let now = inner.clock.now();
        let mut state = inner.state.lock().await;
        let task = state
            .tasks
            .get_mut(&task_id)
            .ok_or(TaskError::NotFound(task_id))?;
        task.transition(TaskStatus::Paused, now)?;
        info!(task_id = %task_id, "task paused");
        Ok(())
    }

    /// PAUSED -> RUNNING, applying any outcome that arrived meanwhile.
    pub async fn resume_task(&self, task_id: TaskId) -> Result<(), TaskError> {
        let inner = &self.inner;
        let now = inner.clock.now();
        let mut state = inner.state.lock().await;
        let task = state
            .tasks
            .get_mut(&task_id)
            .ok_or(TaskError::NotFound(task_id))?;
        task.transition(TaskStatus::Running, now)?;
        info!(task_id = %task_id, "task resumed");

        if let Some(report) = state.held_reports.remove(&task_id) {
            inner.settle(&mut state, report, now);
            inner.dispatch_ready(&mut state);
        }
        Ok(())
    }

    pub async fn set_priority(&self, task_id: TaskId, priority: Priority) -> Result<(), TaskError> {
        let inner = &self.inner;
        let now = inner.clock.now();
        let mut state = inner.state.lock().await;
        let task = state
            .tasks
            .get_mut(&task_id)
            .ok_or(TaskError::NotFound(task_id))?;
        task.priority = priority;
        task.updated_at = now;
        let requeued = state.scheduler.update_priority(task_id, priority, now);
        debug!(task_id = %task_id, priority = %priority, requeued, "priority changed");
        Ok(())
    }

    pub async fn set_deadline(
        &self,
        task_id: TaskId,
        deadline: Option<DateTime<Utc>>,
    ) -> Result<(), TaskError> {
        let inner = &self.inner;
        let now = inner.clock.now();
        let mut state = inner.state.lock().await;
        let task = state
            .tasks
            .get_mut(&task_id)
            .ok_or(TaskError::NotFound(task_id))?;
        task.deadline = deadline;
        task.updated_at = now;
        let ManagerState {
            tasks, scheduler, ..
        } = &mut *state;
        scheduler.optimize(tasks, now);
        debug!(task_id = %task_id, ?deadline, "deadline changed");
        Ok(())
    }

    pub async fn get_task(&self, task_id: TaskId) -> Option<Task> {
        self.inner.state.lock().await.tasks.get(&task_id).cloned()
    }

    /// Matching tasks in creation order.
    pub async fn get_tasks(&self, filter: &TaskFilter) -> Vec<Task> {
        let state = self.inner.state.lock().await;
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        drop(state);

        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            tasks.truncate(limit);
        }
        tasks
    }

    /// Metrics over the configured window.
    pub fn get_metrics(&self) -> MonitoringMetrics {
        self.get_metrics_window(self.inner.monitor.default_window())
    }

    pub fn get_metrics_window(&self, window: Duration) -> MonitoringMetrics {
        self.inner.monitor.metrics(window, self.inner.clock.now())
    }

    pub async fn get_system_status(&self) -> SystemStatus {
        let inner = &self.inner;
        let state = inner.state.lock().await;

        let mut counts: BTreeMap<TaskStatus, usize> =
            TaskStatus::ALL.iter().map(|s| (*s, 0)).collect();
        for task in state.tasks.values() {
            *counts.entry(task.status).or_default() += 1;
        }
        let total = state.tasks.len();
        let queue_size = state.scheduler.len();
        let strategy = state.scheduler.strategy();
        drop(state);

        let executor = inner.executor.stats();
        let handlers = inner
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .registered_types()
            .into_iter()
            .map(|t| t.to_string())
            .collect();

        SystemStatus {
            total,
            running: counts.get(&TaskStatus::Running).copied().unwrap_or(0),
            counts,
            queue_size,
            resource_usage: executor.resource_usage,
            executor,
            strategy,
            handlers,
            shut_down: inner.shut_down.load(Ordering::Acquire),
        }
    }

    /// Run one maintenance sweep now.
    pub async fn run_maintenance(&self) -> MaintenanceReport {
        self.inner.run_maintenance().await
    }

    /// Start the periodic maintenance loop. Must be called inside a Tokio
    /// runtime; calling it again is a no-op.
    pub fn start(&self) -> Result<(), TaskError> {
        self.inner.ensure_open()?;
        let mut lifecycle = self
            .inner
            .lifecycle
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if lifecycle.maintenance.is_some() {
            return Ok(());
        }

        let (tx, rx) = watch::channel(false);
        let interval = self.inner.config.maintenance_interval();
        lifecycle.maintenance = Some(maintenance::spawn_loop(
            Arc::downgrade(&self.inner),
            interval,
            rx,
        ));
        lifecycle.shutdown_tx = Some(tx);
        info!(interval_ms = interval.as_millis() as u64, "maintenance loop started");
        Ok(())
    }

    /// Stop the maintenance loop, cancel running executions and wait (bounded
    /// by the grace period) for their outcomes to land. New work is refused
    /// afterwards.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        if inner.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        let (tx, handle) = {
            let mut lifecycle = inner.lifecycle.lock().unwrap_or_else(|e| e.into_inner());
            (lifecycle.shutdown_tx.take(), lifecycle.maintenance.take())
        };
        if let Some(tx) = tx {
            let _ = tx.send(true);
        }
        let cancelled = inner.executor.cancel_all();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        let deadline = Instant::now() + inner.config.grace_period() + Duration::from_secs(1);
        while inner.executor.active_count() > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        info!(cancelled, "task manager shut down");
    }
}

impl ManagerInner {
    fn ensure_open(&self) -> Result<(), TaskError> {
        if self.shut_down.load(Ordering::Acquire) {
            Err(TaskError::ShutDown)
        } else {
            Ok(())
        }
    }

    fn handler_for(&self, task_type: &TaskType) -> Option<Arc<dyn TaskHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(task_type)
    }

    async fn create_task(&self, spec: TaskSpec) -> Result<Task, TaskError> {
        self.ensure_open()?;
        validate_spec(&spec)?;

        let now = self.clock.now();
        let mut state = self.state.lock().await;
        if let Some(missing) = spec
            .dependencies
            .iter()
            .find(|d| !state.tasks.contains_key(&d.task_id))
        {
            return Err(TaskError::UnknownDependency(missing.task_id));
        }

        let id = self.ids.generate_task_id();
        let task = Task::from_spec(
            id,
            spec,
            self.config.default_timeout(),
            self.config.default_max_retries,
            now,
        );
        for dep in task.completion_dependencies() {
            state.graph.add_dependency(id, dep);
        }
        let dead_dependency = task.completion_dependencies().find(|dep| {
            state
                .tasks
                .get(dep)
                .is_some_and(|t| t.is_finished() && t.status != TaskStatus::Completed)
        });
        info!(
            task_id = %id,
            task_type = %task.task_type,
            priority = %task.priority,
            dependencies = task.dependencies.len(),
            "task created"
        );
        state.tasks.insert(id, task);

        match dead_dependency {
            Some(dep) if self.config.cancel_dependents_on_failure => {
                self.cancel_now(&mut state, id, format!("dependency {dep} did not complete"), now);
            }
            _ => {
                self.enqueue(&mut state, id, now)?;
                self.dispatch_ready(&mut state);
            }
        }

        state.tasks.get(&id).cloned().ok_or(TaskError::NotFound(id))
    }

    /// PENDING -> QUEUED when every completion dependency is complete.
    fn enqueue(
        &self,
        state: &mut ManagerState,
        task_id: TaskId,
        now: DateTime<Utc>,
    ) -> Result<bool, TaskError> {
        let task = state
            .tasks
            .get(&task_id)
            .ok_or(TaskError::NotFound(task_id))?;
        match task.status {
            TaskStatus::Queued | TaskStatus::Running | TaskStatus::Paused => return Ok(true),
            TaskStatus::Pending => {}
            status => {
                return Err(ScheduleError::NotPending { task_id, status }.into());
            }
        }
        if !task.dependencies_satisfied(&state.completed) {
            debug!(task_id = %task_id, "dependencies outstanding, not queued");
            return Ok(false);
        }

        let score = state.scheduler.schedule(task, now)?;
        if let Some(task) = state.tasks.get_mut(&task_id) {
            task.transition(TaskStatus::Queued, now)?;
        }
        debug!(task_id = %task_id, score, "task queued");
        Ok(true)
    }

    /// Tasks holding an execution slot from the manager's point of view.
    fn active_count(state: &ManagerState) -> usize {
        state
            .tasks
            .values()
            .filter(|t| t.status.is_active())
            .count()
    }

    /// Admission loop: pop and dispatch while a worker is free. Tasks whose
    /// requirement does not fit the free resources stay queued.
    fn dispatch_ready(&self, state: &mut ManagerState) -> usize {
        let mut active = Self::active_count(state);
        let mut dispatched = 0;
        let resources: &ResourceManager = self.executor.resources();

        while active < self.config.max_workers && self.executor.has_capacity() {
            let now = self.clock.now();
            let next = state.scheduler.pop_next_where(now, &state.tasks, |t| {
                !resources.fits_capacity(&t.resources) || resources.can_allocate(&t.resources)
            });
            let Some(task_id) = next else { break };

            match self.dispatch(state, task_id, now) {
                Ok(()) => {
                    active += 1;
                    dispatched += 1;
                }
                Err(e) => debug!(task_id = %task_id, error = %e, "dispatch failed"),
            }
        }

        if dispatched > 0 {
            self.monitor
                .observe_running(self.executor.active_count(), self.clock.now());
        }
        dispatched
    }

    /// Start one attempt of a QUEUED task. Dispatch-time failures (no
    /// handler, requirement above total capacity) fail the task.
    fn dispatch(
        &self,
        state: &mut ManagerState,
        task_id: TaskId,
        now: DateTime<Utc>,
    ) -> Result<(), TaskError> {
        let task = state
            .tasks
            .get(&task_id)
            .ok_or(TaskError::NotFound(task_id))?;

        let Some(handler) = self.handler_for(&task.task_type) else {
            let err = TaskError::NoHandler(task.task_type.clone());
            self.fail_dispatch(state, task_id, ErrorKind::NoHandler, err.to_string(), now);
            return Err(err);
        };

        if let Err(source @ ResourceError::ExceedsCapacity { .. }) =
            self.executor.resources().check(&task.resources)
        {
            warn!(task_id = %task_id, error = %source, "resource admission denied");
            self.fail_dispatch(state, task_id, ErrorKind::ResourceExhausted, source.to_string(), now);
            return Err(TaskError::ResourceExhausted { task_id, source });
        }

        let execution_id = self.ids.generate_execution_id();
        let mut running = task.clone();
        running.transition(TaskStatus::Running, now)?;
        running.execution_id = Some(execution_id);
        let ctx = ExecutionContext::for_task(&running, execution_id);

        match self
            .executor
            .submit(running.clone(), handler, ctx, Arc::clone(&self.sink))
        {
            Ok(()) => {
                info!(
                    task_id = %task_id,
                    execution_id = %execution_id,
                    task_type = %running.task_type,
                    attempt = running.retry_count + 1,
                    "task dispatched"
                );
                state.tasks.insert(task_id, running);
                Ok(())
            }
            Err(ExecutorError::ShuttingDown) => {
                self.cancel_now(state, task_id, "task manager shutting down".to_string(), now);
                Err(ExecutorError::ShuttingDown.into())
            }
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "executor rejected task");
                self.fail_dispatch(state, task_id, ErrorKind::ResourceExhausted, e.to_string(), now);
                Err(e.into())
            }
        }
    }

    fn fail_dispatch(
        &self,
        state: &mut ManagerState,
        task_id: TaskId,
        kind: ErrorKind,
        message: String,
        now: DateTime<Utc>,
    ) {
        let Some(task) = state.tasks.get_mut(&task_id) else {
            return;
        };
        if task.status == TaskStatus::Pending && task.transition(TaskStatus::Queued, now).is_err() {
            return;
        }
        if let Err(e) = task.fail(ErrorInfo::new(kind, message, now), now) {
            warn!(task_id = %task_id, error = %e, "could not fail task");
            return;
        }
        warn!(task_id = %task_id, error_kind = %kind, "task failed at dispatch");
        self.monitor.record(task, None, now);
        self.cascade(state, task_id, now);
    }

    async fn execute_task(&self, task_id: TaskId) -> Result<bool, TaskError> {
        self.ensure_open()?;
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        let task = state
            .tasks
            .get(&task_id)
            .ok_or(TaskError::NotFound(task_id))?;
        let status = task.status;
        if !status.is_awaiting_dispatch()
            || !task.dependencies_satisfied(&state.completed)
            || !task.is_due(now)
        {
            return Ok(false);
        }

        if let Err(source @ ResourceError::Exhausted { .. }) =
            self.executor.resources().check(&task.resources)
        {
            warn!(task_id = %task_id, error = %source, "resource admission denied");
            return Err(TaskError::ResourceExhausted { task_id, source });
        }
        if Self::active_count(&state) >= self.config.max_workers || !self.executor.has_capacity() {
            return Err(ExecutorError::Saturated {
                max_workers: self.config.max_workers,
            }
            .into());
        }

        if status == TaskStatus::Pending {
            if let Some(task) = state.tasks.get_mut(&task_id) {
                task.transition(TaskStatus::Queued, now)?;
            }
        } else {
            state.scheduler.remove(task_id);
        }

        self.dispatch(&mut state, task_id, now)?;
        self.monitor
            .observe_running(self.executor.active_count(), now);
        Ok(true)
    }

    async fn cancel_task(&self, task_id: TaskId, reason: Option<String>) -> Result<bool, TaskError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        let task = state
            .tasks
            .get(&task_id)
            .ok_or(TaskError::NotFound(task_id))?;
        if task.is_finished() {
            return Ok(false);
        }
        let reason = reason.unwrap_or_else(|| "cancelled by request".to_string());

        if task.status.is_active() {
            if let Some(report) = state.held_reports.remove(&task_id) {
                state.cancel_requests.insert(task_id, reason);
                self.settle(&mut state, report, now);
                self.dispatch_ready(&mut state);
                return Ok(true);
            }
            if self.executor.cancel(task_id) {
                info!(task_id = %task_id, reason = %reason, "cancelling running task");
                state.cancel_requests.insert(task_id, reason);
                return Ok(true);
            }
        }

        let cancelled = self.cancel_now(&mut state, task_id, reason, now);
        self.dispatch_ready(&mut state);
        Ok(cancelled)
    }

    /// Cancel without waiting on an execution unit.
    fn cancel_now(
        &self,
        state: &mut ManagerState,
        task_id: TaskId,
        reason: String,
        now: DateTime<Utc>,
    ) -> bool {
        state.scheduler.remove(task_id);
        let Some(task) = state.tasks.get_mut(&task_id) else {
            return false;
        };
        if let Err(e) = task.cancel(reason.clone(), now) {
            debug!(task_id = %task_id, error = %e, "cancel skipped");
            return false;
        }
        info!(task_id = %task_id, reason = %reason, "task cancelled");
        self.monitor.record(task, None, now);
        self.cascade(state, task_id, now);
        true
    }

    /// Cancel everything that transitively waits on a task that will never
    /// complete.
    fn cascade(&self, state: &mut ManagerState, root: TaskId, now: DateTime<Utc>) {
        if !self.config.cancel_dependents_on_failure {
            return;
        }
        let root_dead = state
            .tasks
            .get(&root)
            .is_some_and(|t| t.is_finished() && t.status != TaskStatus::Completed);
        if !root_dead {
            return;
        }

        let reason = format!("dependency {root} did not complete");
        for dependent in state.graph.transitive_dependents(root) {
            let Some(task) = state.tasks.get(&dependent) else {
                continue;
            };
            if task.is_finished() {
                continue;
            }
            if task.status.is_active() {
                if self.executor.cancel(dependent) {
                    state
                        .cancel_requests
                        .entry(dependent)
                        .or_insert_with(|| reason.clone());
                }
                continue;
            }

            state.scheduler.remove(dependent);
            if let Some(task) = state.tasks.get_mut(&dependent)
                && task.cancel(reason.clone(), now).is_ok()
            {
                info!(task_id = %dependent, root = %root, "dependent task cancelled");
                self.monitor.record(task, None, now);
            }
        }
    }

    async fn apply_report(&self, report: ExecutionReport) {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let task_id = report.task_id;

        let Some(task) = state.tasks.get(&task_id) else {
            debug!(task_id = %task_id, "report for unknown task dropped");
            return;
        };
        if task.execution_id != Some(report.execution_id) {
            debug!(
                task_id = %task_id,
                execution_id = %report.execution_id,
                "stale execution report dropped"
            );
            return;
        }

        let status = task.status;
        match status {
            TaskStatus::Running => {}
            TaskStatus::Paused if !state.cancel_requests.contains_key(&task_id) => {
                info!(task_id = %task_id, outcome = ?report.outcome.kind(), "outcome held while paused");
                state.held_reports.insert(task_id, report);
                return;
            }
            TaskStatus::Paused => {}
            _ => {
                debug!(task_id = %task_id, status = %status, "report for inactive task dropped");
                return;
            }
        }

        self.settle(&mut state, report, now);
        self.dispatch_ready(&mut state);
        self.monitor
            .observe_running(self.executor.active_count(), now);
    }

    /// Fold an execution outcome into its task and react to the new status.
    fn settle(&self, state: &mut ManagerState, report: ExecutionReport, now: DateTime<Utc>) {
        let task_id = report.task_id;
        let cancel_reason = state.cancel_requests.remove(&task_id);
        let Some(task) = state.tasks.get_mut(&task_id) else {
            return;
        };

        let applied = match (cancel_reason, report.outcome) {
            (Some(reason), _) => task.cancel(reason, now),
            (None, ExecutionOutcome::Succeeded { output }) => task.complete(output, now),
            (None, ExecutionOutcome::Cancelled { .. }) => task.cancel("execution cancelled", now),
            (None, outcome) => {
                let info = outcome.error_info(now).unwrap_or_else(|| {
                    ErrorInfo::new(ErrorKind::Handler, "execution failed", now)
                });
                task.fail(info, now)
            }
        };
        if let Err(e) = applied {
            warn!(task_id = %task_id, error = %e, "could not apply execution outcome");
            return;
        }

        let duration_ms = report.duration.as_millis() as u64;
        match task.status {
            TaskStatus::Completed => info!(task_id = %task_id, duration_ms, "task completed"),
            TaskStatus::Failed => warn!(
                task_id = %task_id,
                duration_ms,
                error_kind = ?task.error_info.as_ref().map(|e| e.kind),
                error = ?task.error_info.as_ref().map(|e| e.message.as_str()),
                retry_count = task.retry_count,
                will_retry = task.should_retry(),
                "task failed"
            ),
            status => info!(task_id = %task_id, status = %status, duration_ms, "task stopped"),
        }
        self.monitor.record(task, Some(report.duration), now);

        if task.status == TaskStatus::Completed {
            state.completed.insert(task_id);
            for waiting in state.graph.get_waiting_tasks(task_id) {
                let pending = state
                    .tasks
                    .get(&waiting)
                    .is_some_and(|t| t.status == TaskStatus::Pending);
                if pending && let Err(e) = self.enqueue(state, waiting, now) {
                    debug!(task_id = %waiting, error = %e, "dependent not queued");
                }
            }
        } else {
            self.cascade(state, task_id, now);
        }
    }
}

/// Longest per-task timeout `create_task` accepts.
const MAX_TASK_TIMEOUT: Duration = Duration::from_secs(30 * 24 * 60 * 60);

fn validate_spec(spec: &TaskSpec) -> Result<(), TaskError> {
    if spec.name.trim().is_empty() {
        return Err(TaskError::Validation("task name must not be empty".into()));
    }
    if spec.task_type.as_str().trim().is_empty() {
        return Err(TaskError::Validation("task type must not be empty".into()));
    }
    if spec.timeout.is_some_and(|t| t.is_zero()) {
        return Err(TaskError::Validation("timeout must be positive".into()));
    }
    if spec.timeout.is_some_and(|t| t > MAX_TASK_TIMEOUT) {
        return Err(TaskError::Validation(format!(
            "timeout must not exceed {}s",
            MAX_TASK_TIMEOUT.as_secs()
        )));
    }
    if let Some(cores) = spec.resources.cpu_cores
        && (!cores.is_finite() || cores < 0.0)
    {
        return Err(TaskError::Validation(format!(
            "cpu_cores must be a non-negative number, got {cores}"
        )));
    }
    Ok(())
}
