//! Isolated execution unit.
//!
//! The handler runs on its own OS thread, driven by the runtime handle. The
//! supervisor stays on the runtime and races the unit against the timeout and
//! the cancel token; on either it asks the handler to stop, waits out the
//! grace period and then kills the unit. A handler stuck in blocking code
//! cannot be killed, so its thread is abandoned and its result discarded.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::domain::{ExecutionOutcome, HandlerError, Task};
use crate::handler::{ExecutionContext, TaskHandler};

enum StopReason {
    Timeout,
    Cancelled,
}

enum UnitExit {
    Returned(Result<serde_json::Value, HandlerError>),
    Panicked(String),
    Killed,
}

/// Run one attempt to an outcome. Never panics and never returns early
/// without an outcome.
pub(crate) async fn run_isolated(
    handler: Arc<dyn TaskHandler>,
    task: Task,
    ctx: ExecutionContext,
    grace_period: Duration,
    cancel: CancellationToken,
) -> ExecutionOutcome {
    if cancel.is_cancelled() {
        return ExecutionOutcome::Cancelled { forced: false };
    }

    let timeout = ctx.timeout();
    let terminate = ctx.terminate_token();
    let task_id = task.id;
    let kill = CancellationToken::new();
    let (tx, mut exit) = oneshot::channel();

    let spawned = {
        let kill = kill.clone();
        let runtime = Handle::current();
        std::thread::Builder::new()
            .name(format!("taskloom-unit-{task_id}"))
            .spawn(move || {
                let run = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    runtime.block_on(async move {
                        tokio::select! {
                            result = handler.handle(task, ctx) => Some(result),
                            _ = kill.cancelled() => None,
                        }
                    })
                }));
                let _ = tx.send(match run {
                    Ok(Some(result)) => UnitExit::Returned(result),
                    Ok(None) => UnitExit::Killed,
                    Err(payload) => UnitExit::Panicked(panic_message(payload)),
                });
            })
    };
    if let Err(e) = spawned {
        return ExecutionOutcome::Failed {
            error: HandlerError::new("UnitSpawn", e.to_string()),
        };
    }

    let reason = tokio::select! {
        exited = &mut exit => return finished(exited),
        _ = tokio::time::sleep(timeout) => StopReason::Timeout,
        _ = cancel.cancelled() => StopReason::Cancelled,
    };

    terminate.cancel();
    let forced = match tokio::time::timeout(grace_period, &mut exit).await {
        Ok(_) => false,
        Err(_) => {
            warn!(task_id = %task_id, grace_ms = grace_period.as_millis() as u64, "handler ignored terminate, killing unit");
            kill.cancel();
            true
        }
    };

    match reason {
        StopReason::Timeout => ExecutionOutcome::TimedOut { timeout, forced },
        StopReason::Cancelled => ExecutionOutcome::Cancelled { forced },
    }
}

fn finished(exited: Result<UnitExit, oneshot::error::RecvError>) -> ExecutionOutcome {
    match exited {
        Ok(UnitExit::Returned(Ok(output))) => ExecutionOutcome::Succeeded { output },
        Ok(UnitExit::Returned(Err(error))) => ExecutionOutcome::Failed { error },
        Ok(UnitExit::Panicked(message)) => ExecutionOutcome::Failed {
            error: HandlerError::new("panic", message),
        },
        Ok(UnitExit::Killed) => ExecutionOutcome::Cancelled { forced: true },
        Err(_) => ExecutionOutcome::Failed {
            error: HandlerError::new("UnitLost", "execution unit exited without a result"),
        },
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
