//! Rolling execution metrics.
//!
//! Design:
//! - Bounded history (`max_history`) of terminal outcomes, retry events and
//!   running-count samples; the oldest entries fall off the front.
//! - Nothing is aggregated on write. `metrics(window)` recomputes everything
//!   from the records inside the window.
//! - Duration statistics cover COMPLETED outcomes; rates cover every outcome.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ErrorKind, Priority, ResourceRequirement, Task, TaskId, TaskStatus, TaskType};

/// One task reaching a terminal (or failed) state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub priority: Priority,
    pub status: TaskStatus,
    pub duration: Option<Duration>,
    pub error_kind: Option<ErrorKind>,
    pub retry_count: u32,
    pub resources: ResourceRequirement,
    pub recorded_at: DateTime<Utc>,
}

impl OutcomeRecord {
    fn timed_out(&self) -> bool {
        self.error_kind == Some(ErrorKind::Timeout)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BreakdownStats {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub average_execution_time: f64,
}

/// Snapshot computed by `Monitor::metrics`. Times are in seconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitoringMetrics {
    pub window_secs: f64,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub timed_out: usize,
    pub retries: usize,

    pub average_execution_time: f64,
    pub median_execution_time: f64,
    pub p90_execution_time: f64,
    pub p95_execution_time: f64,
    pub p99_execution_time: f64,
    pub min_execution_time: f64,
    pub max_execution_time: f64,

    /// Completions per minute over the window.
    pub throughput_per_minute: f64,
    pub error_rate: f64,
    pub timeout_rate: f64,
    pub retry_rate: f64,

    pub peak_concurrency: usize,

    pub by_type: BTreeMap<String, BreakdownStats>,
    pub by_priority: BTreeMap<String, BreakdownStats>,
}

#[derive(Debug, Default)]
struct History {
    outcomes: VecDeque<OutcomeRecord>,
    retries: VecDeque<DateTime<Utc>>,
    running_samples: VecDeque<(DateTime<Utc>, usize)>,
}

fn push_bounded<T>(queue: &mut VecDeque<T>, item: T, max: usize) {
    queue.push_back(item);
    while queue.len() > max {
        queue.pop_front();
    }
}

pub struct Monitor {
    max_history: usize,
    default_window: Duration,
    history: Mutex<History>,
}

impl Monitor {
    pub fn new(max_history: usize, default_window: Duration) -> Self {
        Self {
            max_history: max_history.max(1),
            default_window,
            history: Mutex::new(History::default()),
        }
    }

    pub fn default_window(&self) -> Duration {
        self.default_window
    }

    fn history(&self) -> MutexGuard<'_, History> {
        self.history.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a task that just reached COMPLETED, FAILED or CANCELLED.
    /// `duration` is the attempt's run time when it ran at all.
    pub fn record(&self, task: &Task, duration: Option<Duration>, now: DateTime<Utc>) {
        let record = OutcomeRecord {
            task_id: task.id,
            task_type: task.task_type.clone(),
            priority: task.priority,
            status: task.status,
            duration,
            error_kind: task.error_info.as_ref().map(|e| e.kind),
            retry_count: task.retry_count,
            resources: task.resources,
            recorded_at: now,
        };
        push_bounded(&mut self.history().outcomes, record, self.max_history);
    }

    pub fn record_retry(&self, now: DateTime<Utc>) {
        push_bounded(&mut self.history().retries, now, self.max_history);
    }

    /// Sample the number of running executions.
    pub fn observe_running(&self, running: usize, now: DateTime<Utc>) {
        push_bounded(
            &mut self.history().running_samples,
            (now, running),
            self.max_history,
        );
    }

    pub fn history_len(&self) -> usize {
        self.history().outcomes.len()
    }

    /// Metrics over `[now - window, now]`.
    pub fn metrics(&self, window: Duration, now: DateTime<Utc>) -> MonitoringMetrics {
        let since = chrono::Duration::from_std(window)
            .ok()
            .and_then(|w| now.checked_sub_signed(w))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let history = self.history();
        let outcomes: Vec<&OutcomeRecord> = history
            .outcomes
            .iter()
            .filter(|r| r.recorded_at >= since)
            .collect();
        let retries = history.retries.iter().filter(|t| **t >= since).count();
        let peak_concurrency = history
            .running_samples
            .iter()
            .filter(|(t, _)| *t >= since)
            .map(|(_, n)| *n)
            .max()
            .unwrap_or(0);

        let count = |status: TaskStatus| outcomes.iter().filter(|r| r.status == status).count();
        let total = outcomes.len();
        let completed = count(TaskStatus::Completed);
        let failed = count(TaskStatus::Failed);
        let cancelled = count(TaskStatus::Cancelled);
        let timed_out = outcomes.iter().filter(|r| r.timed_out()).count();

        let mut durations: Vec<f64> = completed_durations(outcomes.iter().copied());
        durations.sort_by(f64::total_cmp);

        let rate = |n: usize| if total == 0 { 0.0 } else { n as f64 / total as f64 };
        let window_minutes = window.as_secs_f64() / 60.0;

        MonitoringMetrics {
            window_secs: window.as_secs_f64(),
            total,
            completed,
            failed,
            cancelled,
            timed_out,
            retries,
            average_execution_time: mean(&durations),
            median_execution_time: median(&durations),
            p90_execution_time: percentile(&durations, 90.0),
            p95_execution_time: percentile(&durations, 95.0),
            p99_execution_time: percentile(&durations, 99.0),
            min_execution_time: durations.first().copied().unwrap_or(0.0),
            max_execution_time: durations.last().copied().unwrap_or(0.0),
            throughput_per_minute: if window_minutes > 0.0 {
                completed as f64 / window_minutes
            } else {
                0.0
            },
            error_rate: rate(failed),
            timeout_rate: rate(timed_out),
            retry_rate: rate(retries),
            peak_concurrency,
            by_type: breakdown(&outcomes, |r| r.task_type.to_string()),
            by_priority: breakdown(&outcomes, |r| r.priority.to_string()),
        }
    }
}

fn completed_durations<'a>(records: impl Iterator<Item = &'a OutcomeRecord>) -> Vec<f64> {
    records
        .filter(|r| r.status == TaskStatus::Completed)
        .filter_map(|r| r.duration)
        .map(|d| d.as_secs_f64())
        .collect()
}

fn breakdown<F>(outcomes: &[&OutcomeRecord], key: F) -> BTreeMap<String, BreakdownStats>
where
    F: Fn(&OutcomeRecord) -> String,
{
    let mut groups: BTreeMap<String, Vec<&OutcomeRecord>> = BTreeMap::new();
    for record in outcomes {
        groups.entry(key(record)).or_default().push(record);
    }

    groups
        .into_iter()
        .map(|(k, records)| {
            let stats = BreakdownStats {
                total: records.len(),
                completed: records.iter().filter(|r| r.status == TaskStatus::Completed).count(),
                failed: records.iter().filter(|r| r.status == TaskStatus::Failed).count(),
                cancelled: records.iter().filter(|r| r.status == TaskStatus::Cancelled).count(),
                average_execution_time: mean(&completed_durations(records.iter().copied())),
            };
            (k, stats)
        })
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// `sorted` must be ascending.
fn median(sorted: &[f64]) -> f64 {
    match sorted.len() {
        0 => 0.0,
        n if n % 2 == 1 => sorted[n / 2],
        n => (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0,
    }
}

/// Nearest-rank percentile. `sorted` must be ascending.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
