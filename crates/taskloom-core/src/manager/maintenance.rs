//! Maintenance sweep and the loop that drives it.
//!
//! One sweep, in order:
//! 1. Overdue RUNNING tasks are cancelled. The executor enforces timeouts on
//!    its own; this only catches executions that outlived timeout + grace.
//! 2. FAILED tasks that may retry go FAILED -> RETRYING -> PENDING with a
//!    backoff delay and are queued again.
//! 3. Finished tasks beyond the retention bounds are pruned.
//! 4. An admission pass picks up whatever became due.

use std::sync::Weak;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::{ManagerInner, ManagerState, MaintenanceReport};
use crate::domain::{TaskId, TaskStatus};

impl ManagerInner {
    pub(super) async fn run_maintenance(&self) -> MaintenanceReport {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        let report = MaintenanceReport {
            timed_out: self.sweep_overdue(&mut state, now),
            retried: self.retry_failed(&mut state, now),
            pruned: self.prune_history(&mut state, now),
            dispatched: self.dispatch_ready(&mut state),
        };
        drop(state);

        if !report.is_idle() {
            debug!(
                timed_out = report.timed_out,
                retried = report.retried,
                pruned = report.pruned,
                dispatched = report.dispatched,
                "maintenance sweep"
            );
        }
        report
    }

    fn sweep_overdue(&self, state: &mut ManagerState, now: DateTime<Utc>) -> usize {
        let slack = self.config.grace_period();
        let overdue: Vec<TaskId> = state
            .tasks
            .values()
            .filter(|t| {
                t.status == TaskStatus::Running && !state.cancel_requests.contains_key(&t.id)
            })
            .filter(|t| {
                t.started_at
                    .and_then(|started| (now - started).to_std().ok())
                    .is_some_and(|elapsed| elapsed > t.timeout.saturating_add(slack))
            })
            .map(|t| t.id)
            .collect();

        let mut swept = 0;
        for task_id in overdue {
            warn!(task_id = %task_id, "running task exceeded its timeout, cancelling");
            let reason = "exceeded timeout".to_string();
            if self.executor.cancel(task_id) {
                state.cancel_requests.insert(task_id, reason);
                swept += 1;
            } else if self.cancel_now(state, task_id, reason, now) {
                swept += 1;
            }
        }
        swept
    }

    fn retry_failed(&self, state: &mut ManagerState, now: DateTime<Utc>) -> usize {
        let mut retryable: Vec<TaskId> = state
            .tasks
            .values()
            .filter(|t| t.should_retry())
            .map(|t| t.id)
            .collect();
        retryable.sort();

        let mut retried = 0;
        for task_id in retryable {
            let Some(task) = state.tasks.get_mut(&task_id) else {
                continue;
            };
            let delay = self.retry_policy.next_delay(task.retry_count + 1);
            if let Err(e) = task.transition(TaskStatus::Retrying, now) {
                warn!(task_id = %task_id, error = %e, "retry skipped");
                continue;
            }
            let backoff = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
            task.scheduled_at = Some(now + backoff);
            if let Err(e) = task.transition(TaskStatus::Pending, now) {
                warn!(task_id = %task_id, error = %e, "retry skipped");
                continue;
            }
            let attempt = task.retry_count;

            self.monitor.record_retry(now);
            info!(
                task_id = %task_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "task retried"
            );
            if let Err(e) = self.enqueue(state, task_id, now) {
                warn!(task_id = %task_id, error = %e, "retried task not queued");
            }
            retried += 1;
        }
        retried
    }

    fn prune_history(&self, state: &mut ManagerState, now: DateTime<Utc>) -> usize {
        let retention = self.config.history_retention();
        let mut finished: Vec<(DateTime<Utc>, TaskId)> = state
            .tasks
            .values()
            .filter(|t| t.is_finished())
            .filter(|t| {
                state
                    .graph
                    .get_waiting_tasks(t.id)
                    .iter()
                    .all(|w| state.tasks.get(w).is_none_or(|w| w.is_finished()))
            })
            .map(|t| (t.completed_at.unwrap_or(t.updated_at), t.id))
            .collect();
        finished.sort();

        let excess = finished.len().saturating_sub(self.config.max_retained_tasks);
        let doomed: Vec<TaskId> = finished
            .iter()
            .enumerate()
            .filter(|(i, (completed_at, _))| {
                *i < excess
                    || (now - *completed_at)
                        .to_std()
                        .is_ok_and(|age| age > retention)
            })
            .map(|(_, (_, id))| *id)
            .collect();

        for task_id in &doomed {
            state.tasks.remove(task_id);
            state.graph.remove_task(*task_id);
            state.completed.remove(task_id);
            state.held_reports.remove(task_id);
            state.cancel_requests.remove(task_id);
            state.scheduler.remove(*task_id);
        }
        doomed.len()
    }
}

/// Run the sweep every `interval` until `shutdown` flips or the manager is
/// dropped.
pub(super) fn spawn_loop(
    inner: Weak<ManagerInner>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            let Some(inner) = inner.upgrade() else {
                break;
            };
            inner.run_maintenance().await;
        }
        debug!("maintenance loop stopped");
    })
}
