use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{TimeZone, Utc};
use serde_json::json;
use tokio::sync::Notify;

use super::*;
use crate::config::RetryConfig;
use crate::domain::{HandlerError, ResourceRequirement};
use crate::handler::handler_fn;
use crate::ports::FixedClock;
use crate::resources::ResourceCapacity;

fn config(max_workers: usize) -> ManagerConfig {
    ManagerConfig {
        max_workers,
        grace_period_ms: 100,
        maintenance_interval_ms: 20,
        retry: RetryConfig {
            base_delay_ms: 0,
            multiplier: 1.0,
            max_delay_ms: 0,
        },
        ..Default::default()
    }
}

fn manager(config: ManagerConfig) -> TaskManager {
    let manager = TaskManager::new(config).unwrap();
    manager.register_handler("echo", echo()).unwrap();
    manager
}

fn fixed_clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
    ))
}

fn echo() -> impl TaskHandler {
    handler_fn(|task: Task, _ctx: ExecutionContext| async move {
        Ok::<_, HandlerError>(task.input)
    })
}

/// Blocks until `gate` is notified, then echoes the input.
fn gated(gate: Arc<Notify>) -> impl TaskHandler {
    handler_fn(move |task: Task, _ctx: ExecutionContext| {
        let gate = Arc::clone(&gate);
        async move {
            gate.notified().await;
            Ok::<_, HandlerError>(task.input)
        }
    })
}

/// Sleeps without looking at the terminate signal.
fn stubborn(d: Duration) -> impl TaskHandler {
    handler_fn(move |_task: Task, _ctx: ExecutionContext| async move {
        tokio::time::sleep(d).await;
        Ok::<_, HandlerError>(serde_json::Value::Null)
    })
}

fn failing(calls: Arc<AtomicUsize>) -> impl TaskHandler {
    handler_fn(move |_task: Task, _ctx: ExecutionContext| {
        let calls = Arc::clone(&calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<serde_json::Value, _>(HandlerError::new("Flaky", "try again"))
        }
    })
}

async fn wait_until<F>(manager: &TaskManager, id: TaskId, mut pred: F) -> Task
where
    F: FnMut(&Task) -> bool,
{
    let polled = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(task) = manager.get_task(id).await
                && pred(&task)
            {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    match polled {
        Ok(task) => task,
        Err(_) => {
            let last = manager.get_task(id).await;
            panic!("task {id} never reached the expected state: {last:?}")
        }
    }
}

async fn wait_for(manager: &TaskManager, id: TaskId, status: TaskStatus) -> Task {
    wait_until(manager, id, |t| t.status == status).await
}

#[tokio::test]
async fn dependent_runs_only_after_dependency_completes() {
    let m = manager(config(4));
    let gate = Arc::new(Notify::new());
    m.register_handler("gated", gated(Arc::clone(&gate))).unwrap();

    let a = m
        .create_task(TaskSpec::new("fetch", "gated").input(json!("a")))
        .await
        .unwrap();
    let b = m
        .create_task(TaskSpec::new("build", "echo").depends_on(a.id))
        .await
        .unwrap();

    assert_eq!(b.status, TaskStatus::Pending);
    wait_for(&m, a.id, TaskStatus::Running).await;
    assert!(!m.schedule_task(b.id).await.unwrap());
    assert!(!m.execute_task(b.id).await.unwrap());
    assert_eq!(m.get_task(b.id).await.unwrap().status, TaskStatus::Pending);

    gate.notify_one();
    let a = wait_for(&m, a.id, TaskStatus::Completed).await;
    let b = wait_for(&m, b.id, TaskStatus::Completed).await;

    assert_eq!(a.output, Some(json!("a")));
    assert!(b.started_at.unwrap() >= a.completed_at.unwrap());
}

#[tokio::test]
async fn slow_handler_times_out_with_timeout_marker() {
    let m = manager(config(2));
    m.register_handler("slow", stubborn(Duration::from_secs(30)))
        .unwrap();

    let started = Instant::now();
    let task = m
        .create_task(
            TaskSpec::new("hang", "slow")
                .timeout(Duration::from_millis(50))
                .max_retries(0),
        )
        .await
        .unwrap();

    let task = wait_for(&m, task.id, TaskStatus::Failed).await;
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(task.error_info.as_ref().unwrap().is_timeout());
    assert!(task.is_finished());
    assert_eq!(m.get_metrics().timed_out, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blocking_handlers_time_out_without_starving_the_runtime() {
    let m = manager(config(2));
    m.register_handler(
        "blocking",
        handler_fn(|_task: Task, _ctx: ExecutionContext| async move {
            std::thread::sleep(Duration::from_secs(3));
            Ok::<_, HandlerError>(serde_json::Value::Null)
        }),
    )
    .unwrap();

    let started = Instant::now();
    let mut ids = Vec::new();
    for n in 0..2 {
        let task = m
            .create_task(
                TaskSpec::new(format!("stall-{n}"), "blocking")
                    .timeout(Duration::from_millis(100))
                    .max_retries(0),
            )
            .await
            .unwrap();
        ids.push(task.id);
    }

    for id in ids {
        let task = wait_for(&m, id, TaskStatus::Failed).await;
        assert!(task.error_info.as_ref().unwrap().is_timeout());
    }
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(m.get_system_status().await.executor.active, 0);
}

#[tokio::test]
async fn cancelling_queued_task_never_invokes_its_handler() {
    let m = manager(config(1));
    let gate = Arc::new(Notify::new());
    let calls = Arc::new(AtomicUsize::new(0));
    m.register_handler("gated", gated(Arc::clone(&gate))).unwrap();
    m.register_handler("counted", failing(Arc::clone(&calls)))
        .unwrap();

    let blocker = m.create_task(TaskSpec::new("block", "gated")).await.unwrap();
    let queued = m.create_task(TaskSpec::new("victim", "counted")).await.unwrap();
    assert_eq!(queued.status, TaskStatus::Queued);

    assert!(m.cancel_task(queued.id, Some("not needed")).await.unwrap());
    let cancelled = m.get_task(queued.id).await.unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);
    assert_eq!(cancelled.error_info.unwrap().message, "not needed");

    gate.notify_one();
    wait_for(&m, blocker.id, TaskStatus::Completed).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!m.cancel_task(queued.id, None).await.unwrap());
}

#[tokio::test]
async fn cancelling_running_task_stops_it_within_grace() {
    let m = manager(config(1));
    m.register_handler("slow", stubborn(Duration::from_secs(30)))
        .unwrap();

    let task = m.create_task(TaskSpec::new("hang", "slow")).await.unwrap();
    wait_for(&m, task.id, TaskStatus::Running).await;

    let started = Instant::now();
    assert!(m.cancel_task(task.id, Some("operator")).await.unwrap());
    let task = wait_for(&m, task.id, TaskStatus::Cancelled).await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(task.error_info.unwrap().message, "operator");
    assert_eq!(m.get_system_status().await.executor.active, 0);
}

#[tokio::test]
async fn never_more_than_max_workers_running() {
    let m = manager(config(2));
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    {
        let (current, peak) = (Arc::clone(&current), Arc::clone(&peak));
        m.register_handler(
            "busy",
            handler_fn(move |_task: Task, _ctx: ExecutionContext| {
                let (current, peak) = (Arc::clone(&current), Arc::clone(&peak));
                async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, HandlerError>(serde_json::Value::Null)
                }
            }),
        )
        .unwrap();
    }

    let mut ids = Vec::new();
    for n in 0..6 {
        let task = m
            .create_task(TaskSpec::new(format!("job-{n}"), "busy"))
            .await
            .unwrap();
        ids.push(task.id);
    }
    for id in ids {
        wait_for(&m, id, TaskStatus::Completed).await;
    }

    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert!(m.get_metrics().peak_concurrency <= 2);
    assert_eq!(m.get_metrics().completed, 6);
}

#[tokio::test]
async fn failed_task_is_retried_exactly_max_retries_times() {
    let m = manager(config(1));
    let calls = Arc::new(AtomicUsize::new(0));
    m.register_handler("flaky", failing(Arc::clone(&calls)))
        .unwrap();

    let task = m
        .create_task(TaskSpec::new("flaky", "flaky").max_retries(2))
        .await
        .unwrap();
    wait_for(&m, task.id, TaskStatus::Failed).await;

    for attempt in 1..=2 {
        let report = m.run_maintenance().await;
        assert_eq!(report.retried, 1);
        let t = wait_until(&m, task.id, |t| {
            t.status == TaskStatus::Failed && t.retry_count == attempt
        })
        .await;
        assert_eq!(t.error_info.unwrap().error_type, "Flaky");
    }

    let report = m.run_maintenance().await;
    assert_eq!(report.retried, 0);
    let task = m.get_task(task.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_count, 2);
    assert!(task.is_finished());
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let metrics = m.get_metrics();
    assert_eq!(metrics.retries, 2);
    assert_eq!(metrics.failed, 3);
}

#[tokio::test]
async fn retry_waits_for_backoff() {
    let clock = fixed_clock();
    let m = TaskManager::builder()
        .config(ManagerConfig {
            retry: RetryConfig {
                base_delay_ms: 1_000,
                multiplier: 2.0,
                max_delay_ms: 10_000,
            },
            ..config(1)
        })
        .clock(clock.clone())
        .build()
        .unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    m.register_handler("flaky", failing(Arc::clone(&calls)))
        .unwrap();

    let task = m
        .create_task(TaskSpec::new("flaky", "flaky").max_retries(1))
        .await
        .unwrap();
    wait_for(&m, task.id, TaskStatus::Failed).await;

    let report = m.run_maintenance().await;
    assert_eq!(report.retried, 1);
    assert_eq!(report.dispatched, 0);
    let queued = m.get_task(task.id).await.unwrap();
    assert_eq!(queued.status, TaskStatus::Queued);
    assert_eq!(queued.retry_count, 1);
    assert_eq!(
        queued.scheduled_at,
        Some(clock.now() + chrono::Duration::seconds(1))
    );

    clock.advance(chrono::Duration::seconds(2));
    let report = m.run_maintenance().await;
    assert_eq!(report.dispatched, 1);
    wait_until(&m, task.id, |t| t.status == TaskStatus::Failed && t.retry_count == 1).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn missing_handler_fails_task_and_cancels_dependents() {
    let m = manager(config(1));
    let gate = Arc::new(Notify::new());
    m.register_handler("gated", gated(Arc::clone(&gate))).unwrap();

    let blocker = m.create_task(TaskSpec::new("block", "gated")).await.unwrap();
    let orphan = m.create_task(TaskSpec::new("orphan", "ghost")).await.unwrap();
    let child = m
        .create_task(TaskSpec::new("child", "echo").depends_on(orphan.id))
        .await
        .unwrap();
    let grandchild = m
        .create_task(TaskSpec::new("grandchild", "echo").depends_on(child.id))
        .await
        .unwrap();
    assert_eq!(orphan.status, TaskStatus::Queued);

    gate.notify_one();
    wait_for(&m, blocker.id, TaskStatus::Completed).await;

    let orphan = wait_for(&m, orphan.id, TaskStatus::Failed).await;
    assert_eq!(orphan.error_info.unwrap().kind, ErrorKind::NoHandler);
    for id in [child.id, grandchild.id] {
        let t = wait_for(&m, id, TaskStatus::Cancelled).await;
        assert_eq!(
            t.error_info.unwrap().message,
            format!("dependency {} did not complete", orphan.id)
        );
    }

    let late = m
        .create_task(TaskSpec::new("late", "echo").depends_on(orphan.id))
        .await
        .unwrap();
    assert_eq!(late.status, TaskStatus::Cancelled);
}

#[tokio::test]
async fn requirement_above_total_capacity_fails_at_dispatch() {
    let m = manager(ManagerConfig {
        capacity: ResourceCapacity {
            cpu_cores: 2.0,
            memory_mb: 1024,
            gpu_slots: 0,
        },
        ..config(2)
    });

    let task = m
        .create_task(TaskSpec::new("huge", "echo").resources(ResourceRequirement::none().memory(4096)))
        .await
        .unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error_info.as_ref().unwrap().kind, ErrorKind::ResourceExhausted);
    assert!(task.is_finished());
}

#[tokio::test]
async fn task_waits_for_resources_and_execute_reports_exhaustion() {
    let m = manager(ManagerConfig {
        capacity: ResourceCapacity {
            cpu_cores: 8.0,
            memory_mb: 1024,
            gpu_slots: 1,
        },
        ..config(4)
    });
    let gate = Arc::new(Notify::new());
    m.register_handler("gated", gated(Arc::clone(&gate))).unwrap();

    let gpu = ResourceRequirement::none().gpu();
    let first = m
        .create_task(TaskSpec::new("train", "gated").resources(gpu))
        .await
        .unwrap();
    let second = m
        .create_task(TaskSpec::new("eval", "echo").resources(gpu))
        .await
        .unwrap();
    assert_eq!(first.status, TaskStatus::Running);
    assert_eq!(second.status, TaskStatus::Queued);

    let err = m.execute_task(second.id).await.unwrap_err();
    assert!(matches!(err, TaskError::ResourceExhausted { task_id, .. } if task_id == second.id));
    assert_eq!(m.get_task(second.id).await.unwrap().status, TaskStatus::Queued);

    gate.notify_one();
    wait_for(&m, second.id, TaskStatus::Completed).await;
    assert_eq!(m.get_system_status().await.resource_usage.allocations, 0);
}

#[tokio::test]
async fn execute_task_dispatches_out_of_order_and_rejects_when_saturated() {
    let m = manager(config(1));
    let gate = Arc::new(Notify::new());
    m.register_handler("gated", gated(Arc::clone(&gate))).unwrap();

    let later = Utc::now() + chrono::Duration::hours(1);
    let deferred = m
        .create_task(TaskSpec::new("tomorrow", "echo").scheduled_at(later))
        .await
        .unwrap();
    assert_eq!(deferred.status, TaskStatus::Queued);
    assert!(!m.execute_task(deferred.id).await.unwrap());

    let blocker = m.create_task(TaskSpec::new("block", "gated")).await.unwrap();
    let waiting = m.create_task(TaskSpec::new("next", "echo")).await.unwrap();
    let err = m.execute_task(waiting.id).await.unwrap_err();
    assert!(matches!(err, TaskError::Executor(ExecutorError::Saturated { max_workers: 1 })));

    gate.notify_one();
    wait_for(&m, blocker.id, TaskStatus::Completed).await;
    wait_for(&m, waiting.id, TaskStatus::Completed).await;
}

#[tokio::test]
async fn paused_task_holds_its_outcome_until_resumed() {
    let m = manager(config(1));
    let gate = Arc::new(Notify::new());
    m.register_handler("gated", gated(Arc::clone(&gate))).unwrap();

    let task = m
        .create_task(TaskSpec::new("pausable", "gated").input(json!(7)))
        .await
        .unwrap();
    wait_for(&m, task.id, TaskStatus::Running).await;
    m.pause_task(task.id).await.unwrap();

    gate.notify_one();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(m.get_task(task.id).await.unwrap().status, TaskStatus::Paused);
    assert!(m.pause_task(task.id).await.is_err());

    m.resume_task(task.id).await.unwrap();
    let task = m.get_task(task.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.output, Some(json!(7)));
}

#[tokio::test]
async fn cancelling_paused_task_applies_cancellation() {
    let m = manager(config(1));
    m.register_handler("slow", stubborn(Duration::from_secs(30)))
        .unwrap();

    let task = m.create_task(TaskSpec::new("hang", "slow")).await.unwrap();
    wait_for(&m, task.id, TaskStatus::Running).await;
    m.pause_task(task.id).await.unwrap();

    assert!(m.cancel_task(task.id, None).await.unwrap());
    let task = wait_for(&m, task.id, TaskStatus::Cancelled).await;
    assert_eq!(task.error_info.unwrap().kind, ErrorKind::Cancelled);
}

#[tokio::test]
async fn create_task_rejects_bad_input() {
    let m = manager(config(1));

    let err = m.create_task(TaskSpec::new("  ", "echo")).await.unwrap_err();
    assert!(matches!(err, TaskError::Validation(_)));

    let err = m
        .create_task(TaskSpec::new("t", "echo").timeout(Duration::ZERO))
        .await
        .unwrap_err();
    assert!(matches!(err, TaskError::Validation(_)));

    let err = m
        .create_task(TaskSpec::new("t", "echo").timeout(Duration::MAX))
        .await
        .unwrap_err();
    assert!(matches!(err, TaskError::Validation(_)));

    for cores in [-4.0, f64::NAN, f64::INFINITY] {
        let err = m
            .create_task(
                TaskSpec::new("t", "echo").resources(ResourceRequirement::none().cpu(cores)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Validation(_)));
    }

    let ghost = TaskId::from_u128(404);
    let err = m
        .create_task(TaskSpec::new("t", "echo").depends_on(ghost))
        .await
        .unwrap_err();
    assert!(matches!(err, TaskError::UnknownDependency(id) if id == ghost));

    assert!(m.get_tasks(&TaskFilter::default()).await.is_empty());
    assert!(matches!(m.schedule_task(ghost).await, Err(TaskError::NotFound(_))));
}

#[tokio::test]
async fn schedule_task_rejects_finished_tasks() {
    let m = manager(config(1));
    let task = m.create_task(TaskSpec::new("t", "echo")).await.unwrap();
    wait_for(&m, task.id, TaskStatus::Completed).await;

    let err = m.schedule_task(task.id).await.unwrap_err();
    assert!(matches!(
        err,
        TaskError::Schedule(ScheduleError::NotPending { status: TaskStatus::Completed, .. })
    ));
}

#[tokio::test]
async fn priority_first_runs_most_urgent_first() {
    let m = manager(config(1));
    let gate = Arc::new(Notify::new());
    let order = Arc::new(Mutex::new(Vec::new()));
    m.register_handler("gated", gated(Arc::clone(&gate))).unwrap();
    {
        let order = Arc::clone(&order);
        m.register_handler(
            "record",
            handler_fn(move |task: Task, _ctx: ExecutionContext| {
                let order = Arc::clone(&order);
                async move {
                    order.lock().unwrap().push(task.name.clone());
                    Ok::<_, HandlerError>(serde_json::Value::Null)
                }
            }),
        )
        .unwrap();
    }

    let blocker = m.create_task(TaskSpec::new("block", "gated")).await.unwrap();
    let mut ids = Vec::new();
    for (name, priority) in [
        ("low", Priority::Low),
        ("normal", Priority::Normal),
        ("bumped", Priority::Background),
        ("critical", Priority::Critical),
    ] {
        let t = m
            .create_task(TaskSpec::new(name, "record").priority(priority))
            .await
            .unwrap();
        ids.push(t.id);
    }
    m.set_priority(ids[2], Priority::High).await.unwrap();

    gate.notify_one();
    wait_for(&m, blocker.id, TaskStatus::Completed).await;
    for id in ids {
        wait_for(&m, id, TaskStatus::Completed).await;
    }

    assert_eq!(
        *order.lock().unwrap(),
        vec!["critical", "bumped", "normal", "low"]
    );
}

#[tokio::test]
async fn metrics_count_each_outcome() {
    let m = manager(config(2));
    let calls = Arc::new(AtomicUsize::new(0));
    m.register_handler("flaky", failing(Arc::clone(&calls)))
        .unwrap();

    let ok1 = m.create_task(TaskSpec::new("a", "echo")).await.unwrap();
    let ok2 = m.create_task(TaskSpec::new("b", "echo")).await.unwrap();
    let bad = m
        .create_task(TaskSpec::new("c", "flaky").max_retries(0))
        .await
        .unwrap();
    let later = Utc::now() + chrono::Duration::hours(1);
    let dropped = m
        .create_task(TaskSpec::new("d", "echo").scheduled_at(later))
        .await
        .unwrap();

    wait_for(&m, ok1.id, TaskStatus::Completed).await;
    wait_for(&m, ok2.id, TaskStatus::Completed).await;
    wait_for(&m, bad.id, TaskStatus::Failed).await;
    m.cancel_task(dropped.id, None).await.unwrap();

    let metrics = m.get_metrics();
    assert_eq!(metrics.total, 4);
    assert_eq!(metrics.completed, 2);
    assert_eq!(metrics.failed, 1);
    assert_eq!(metrics.cancelled, 1);
    assert!((metrics.error_rate - 0.25).abs() < 1e-9);
    assert_eq!(metrics.by_type["echo"].completed, 2);
}

#[tokio::test]
async fn sweep_cancels_tasks_running_past_their_timeout() {
    let clock = fixed_clock();
    let m = TaskManager::builder()
        .config(config(1))
        .clock(clock.clone())
        .handler(
            "waits",
            handler_fn(|_task: Task, ctx: ExecutionContext| async move {
                ctx.terminated().await;
                Err::<serde_json::Value, _>(HandlerError::msg("terminated"))
            }),
        )
        .build()
        .unwrap();

    let task = m
        .create_task(TaskSpec::new("long", "waits").timeout(Duration::from_secs(60)))
        .await
        .unwrap();
    wait_for(&m, task.id, TaskStatus::Running).await;
    assert_eq!(m.run_maintenance().await.timed_out, 0);

    clock.advance(chrono::Duration::seconds(61));
    assert_eq!(m.run_maintenance().await.timed_out, 1);

    let task = wait_for(&m, task.id, TaskStatus::Cancelled).await;
    assert_eq!(task.error_info.unwrap().message, "exceeded timeout");
}

#[tokio::test]
async fn sweep_tolerates_the_longest_allowed_timeout() {
    let m = manager(config(1));
    let gate = Arc::new(Notify::new());
    m.register_handler("gated", gated(Arc::clone(&gate))).unwrap();

    let task = m
        .create_task(TaskSpec::new("patient", "gated").timeout(MAX_TASK_TIMEOUT))
        .await
        .unwrap();
    wait_for(&m, task.id, TaskStatus::Running).await;

    assert_eq!(m.run_maintenance().await.timed_out, 0);
    gate.notify_one();
    wait_for(&m, task.id, TaskStatus::Completed).await;
}

#[tokio::test]
async fn finished_history_is_pruned() {
    let clock = fixed_clock();
    let m = TaskManager::builder()
        .config(ManagerConfig {
            max_retained_tasks: 2,
            history_retention_ms: 60_000,
            ..config(2)
        })
        .clock(clock.clone())
        .handler("echo", echo())
        .build()
        .unwrap();

    let mut ids = Vec::new();
    for n in 0..3 {
        let t = m
            .create_task(TaskSpec::new(format!("t{n}"), "echo"))
            .await
            .unwrap();
        ids.push(t.id);
    }
    for id in &ids {
        wait_for(&m, *id, TaskStatus::Completed).await;
    }

    assert_eq!(m.run_maintenance().await.pruned, 1);
    assert_eq!(m.get_tasks(&TaskFilter::default()).await.len(), 2);

    clock.advance(chrono::Duration::minutes(2));
    assert_eq!(m.run_maintenance().await.pruned, 2);
    assert!(m.get_tasks(&TaskFilter::default()).await.is_empty());
}

#[tokio::test]
async fn system_status_and_filters_reflect_registry() {
    let m = manager(config(2));
    let gate = Arc::new(Notify::new());
    m.register_handler("gated", gated(Arc::clone(&gate))).unwrap();

    let running = m.create_task(TaskSpec::new("block", "gated")).await.unwrap();
    let done = m.create_task(TaskSpec::new("quick", "echo")).await.unwrap();
    wait_for(&m, done.id, TaskStatus::Completed).await;
    let pending = m
        .create_task(TaskSpec::new("after", "echo").depends_on(running.id))
        .await
        .unwrap();

    let status = m.get_system_status().await;
    assert_eq!(status.total, 3);
    assert_eq!(status.running, 1);
    assert_eq!(status.count(TaskStatus::Completed), 1);
    assert_eq!(status.count(TaskStatus::Pending), 1);
    assert_eq!(status.queue_size, 0);
    assert_eq!(status.handlers, vec!["echo", "gated"]);
    assert!(!status.shut_down);
    assert!(serde_json::to_value(&status).is_ok());

    let pending_only = m.get_tasks(&TaskFilter::with_status(TaskStatus::Pending)).await;
    assert_eq!(pending_only.len(), 1);
    assert_eq!(pending_only[0].id, pending.id);

    let limited = m
        .get_tasks(&TaskFilter {
            limit: Some(1),
            ..Default::default()
        })
        .await;
    assert_eq!(limited.len(), 1);

    gate.notify_one();
    wait_for(&m, pending.id, TaskStatus::Completed).await;
}

#[tokio::test]
async fn background_loop_retries_failed_tasks() {
    let m = manager(config(1));
    let calls = Arc::new(AtomicUsize::new(0));
    {
        let calls = Arc::clone(&calls);
        m.register_handler(
            "second-time",
            handler_fn(move |_task: Task, _ctx: ExecutionContext| {
                let calls = Arc::clone(&calls);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(HandlerError::msg("first attempt fails"))
                    } else {
                        Ok(json!("ok"))
                    }
                }
            }),
        )
        .unwrap();
    }
    m.start().unwrap();
    m.start().unwrap();

    let task = m
        .create_task(TaskSpec::new("eventually", "second-time").max_retries(3))
        .await
        .unwrap();
    let task = wait_for(&m, task.id, TaskStatus::Completed).await;
    assert_eq!(task.retry_count, 1);
    assert_eq!(task.output, Some(json!("ok")));

    m.shutdown().await;
}

#[tokio::test]
async fn shutdown_cancels_running_work_and_refuses_new_tasks() {
    let m = manager(config(2));
    m.register_handler("slow", stubborn(Duration::from_secs(30)))
        .unwrap();
    m.start().unwrap();

    let task = m.create_task(TaskSpec::new("hang", "slow")).await.unwrap();
    wait_for(&m, task.id, TaskStatus::Running).await;

    let started = Instant::now();
    m.shutdown().await;
    assert!(started.elapsed() < Duration::from_secs(2));

    wait_for(&m, task.id, TaskStatus::Cancelled).await;
    let err = m.create_task(TaskSpec::new("late", "echo")).await.unwrap_err();
    assert!(matches!(err, TaskError::ShutDown));
    assert!(matches!(m.start(), Err(TaskError::ShutDown)));
    assert!(m.get_system_status().await.shut_down);
}
