//! taskloom - run a small dependency graph through the task manager.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use taskloom_core::{
    CommandHandler, ExecutionContext, HandlerError, ManagerConfig, MonitoringMetrics, Priority,
    SystemStatus, Task, TaskFilter, TaskHandler, TaskId, TaskManager, TaskSpec, handler_fn,
};

#[derive(Parser)]
#[command(name = "taskloom")]
#[command(about = "Run a demo task graph through the taskloom scheduler", long_about = None)]
struct Cli {
    /// TOML config file; defaults are used when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of fan-out tasks between the fetch and merge steps
    #[arg(long, default_value = "4")]
    tasks: usize,

    /// Also run one step through `sh` in a child process
    #[arg(long)]
    shell: bool,

    /// Give up waiting after this many seconds
    #[arg(long, default_value = "30")]
    wait_secs: u64,
}

/// Sums the numbers found in `input.values`.
struct SumHandler;

#[async_trait]
impl TaskHandler for SumHandler {
    async fn handle(&self, task: Task, ctx: ExecutionContext) -> Result<Value, HandlerError> {
        let values = task.input["values"]
            .as_array()
            .ok_or_else(|| HandlerError::new("InvalidInput", "input.values must be an array"))?;

        let mut total = 0.0;
        for v in values {
            if ctx.is_terminating() {
                return Err(HandlerError::new("Terminated", "stopped before finishing"));
            }
            total += v
                .as_f64()
                .ok_or_else(|| HandlerError::new("InvalidInput", format!("not a number: {v}")))?;
        }
        Ok(json!({ "sum": total }))
    }
}

#[derive(Serialize)]
struct Summary {
    tasks: Vec<Task>,
    status: SystemStatus,
    metrics: MonitoringMetrics,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ManagerConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ManagerConfig::default(),
    };

    let manager = TaskManager::builder()
        .config(config)
        .handler(
            "sleep",
            handler_fn(|task: Task, ctx: ExecutionContext| async move {
                let ms = task.input["ms"].as_u64().unwrap_or(50);
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(ms)) => {}
                    _ = ctx.terminated() => {
                        return Err(HandlerError::new("Terminated", "sleep interrupted"));
                    }
                }
                Ok(json!({ "slept_ms": ms, "task": task.name }))
            }),
        )
        .handler("sum", SumHandler)
        .handler("sh", CommandHandler::new("sh").arg("-c").arg("cat; echo"))
        .expect_task_types(&["sleep", "sum"])
        .build()
        .context("building task manager")?;
    manager.start()?;

    let ids = submit_graph(&manager, cli.tasks, cli.shell).await?;
    info!(tasks = ids.len(), "graph submitted");

    tokio::select! {
        finished = wait_until_finished(&manager, &ids, Duration::from_secs(cli.wait_secs)) => {
            if !finished {
                warn!(wait_secs = cli.wait_secs, "gave up waiting for the graph");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted");
        }
    }

    let summary = Summary {
        tasks: manager.get_tasks(&TaskFilter::default()).await,
        status: manager.get_system_status().await,
        metrics: manager.get_metrics(),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    manager.shutdown().await;
    Ok(())
}

/// fetch -> N parallel sleeps -> sum, plus an optional shell step after fetch.
async fn submit_graph(manager: &TaskManager, fan_out: usize, shell: bool) -> Result<Vec<TaskId>> {
    let fetch = manager
        .create_task(
            TaskSpec::new("fetch", "sleep")
                .priority(Priority::High)
                .input(json!({ "ms": 100 })),
        )
        .await?;
    let mut ids = vec![fetch.id];

    let mut merge = TaskSpec::new("merge", "sum")
        .input(json!({ "values": (1..=fan_out).collect::<Vec<_>>() }))
        .timeout(Duration::from_secs(5));
    for n in 0..fan_out {
        let step = manager
            .create_task(
                TaskSpec::new(format!("step-{n}"), "sleep")
                    .depends_on(fetch.id)
                    .input(json!({ "ms": 50 + 25 * n }))
                    .estimated_duration(Duration::from_millis(50 + 25 * n as u64)),
            )
            .await?;
        merge = merge.depends_on(step.id);
        ids.push(step.id);
    }

    if shell {
        let echo = manager
            .create_task(
                TaskSpec::new("shell-echo", "sh")
                    .depends_on(fetch.id)
                    .input(json!({ "from": "taskloom" })),
            )
            .await?;
        ids.push(echo.id);
    }

    let merge = manager.create_task(merge).await?;
    ids.push(merge.id);
    Ok(ids)
}

async fn wait_until_finished(manager: &TaskManager, ids: &[TaskId], limit: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        let mut done = true;
        for id in ids {
            done &= manager
                .get_task(*id)
                .await
                .is_none_or(|t| t.is_finished());
        }
        if done {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
