//! Out-of-process handler.
//!
//! Each execution spawns the configured program:
//! - task input as JSON on stdin
//! - context environment plus `TASKLOOM_TASK_ID` / `TASKLOOM_EXECUTION_ID`
//! - stdout parsed as JSON output (kept as a string if it is not JSON)
//! - non-zero exit becomes a `HandlerError` of type `exit_status`
//!
//! On terminate the child gets SIGTERM. If the executor later force-kills the
//! execution unit, dropping the child kills it.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

use super::{ExecutionContext, TaskHandler};
use crate::domain::{HandlerError, Task};

const STDERR_TAIL: usize = 2048;

#[derive(Debug, Clone)]
pub struct CommandHandler {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl CommandHandler {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn command(&self, ctx: &ExecutionContext) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(ctx.environment())
            .env("TASKLOOM_TASK_ID", ctx.task_id().to_string())
            .env("TASKLOOM_EXECUTION_ID", ctx.execution_id().to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

#[async_trait]
impl TaskHandler for CommandHandler {
    async fn handle(
        &self,
        task: Task,
        ctx: ExecutionContext,
    ) -> Result<serde_json::Value, HandlerError> {
        let payload = serde_json::to_vec(&task.input).map_err(HandlerError::from_error)?;

        let mut child = self.command(&ctx).spawn().map_err(|e| {
            HandlerError::new("spawn", format!("failed to start {}: {e}", self.program))
        })?;
        let pid = child.id();
        debug!(task_id = %ctx.task_id(), program = %self.program, ?pid, "command started");

        let stdin = child.stdin.take();
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| HandlerError::new("io", "stdout not captured"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| HandlerError::new("io", "stderr not captured"))?;

        let run = async {
            let feed = async move {
                if let Some(mut stdin) = stdin {
                    // The child may exit without reading; a broken pipe is fine.
                    let _ = stdin.write_all(&payload).await;
                    let _ = stdin.shutdown().await;
                }
            };
            let mut out = Vec::new();
            let mut err = Vec::new();
            let (status, read_out, read_err, ()) = tokio::join!(
                child.wait(),
                stdout.read_to_end(&mut out),
                stderr.read_to_end(&mut err),
                feed,
            );
            read_out.map_err(HandlerError::from_error)?;
            read_err.map_err(HandlerError::from_error)?;
            let status = status.map_err(HandlerError::from_error)?;
            Ok::<_, HandlerError>((status, out, err))
        };
        tokio::pin!(run);

        tokio::select! {
            result = &mut run => {
                let (status, out, err) = result?;
                interpret(status, &out, &err)
            }
            _ = ctx.terminated() => {
                send_terminate(pid).await;
                let _ = (&mut run).await;
                Err(HandlerError::new("terminated", format!("{} was terminated", self.program)))
            }
        }
    }
}

fn interpret(
    status: ExitStatus,
    stdout: &[u8],
    stderr: &[u8],
) -> Result<serde_json::Value, HandlerError> {
    if !status.success() {
        let stderr = String::from_utf8_lossy(stderr);
        let stderr = stderr.trim();
        let mut start = stderr.len().saturating_sub(STDERR_TAIL);
        while !stderr.is_char_boundary(start) {
            start += 1;
        }
        let tail = &stderr[start..];
        let message = if tail.is_empty() {
            format!("process exited with {status}")
        } else {
            format!("process exited with {status}: {tail}")
        };
        return Err(HandlerError::new("exit_status", message));
    }

    let text = String::from_utf8_lossy(stdout);
    let text = text.trim();
    if text.is_empty() {
        return Ok(serde_json::Value::Null);
    }
    Ok(serde_json::from_str(text).unwrap_or_else(|_| serde_json::Value::String(text.to_string())))
}

#[cfg(unix)]
async fn send_terminate(pid: Option<u32>) {
    let Some(pid) = pid else { return };
    match Command::new("kill")
        .arg("-TERM")
        .arg(pid.to_string())
        .status()
        .await
    {
        Ok(status) if status.success() => debug!(pid, "sent SIGTERM"),
        Ok(status) => debug!(pid, %status, "kill exited unsuccessfully, process likely gone"),
        Err(e) => warn!(pid, error = %e, "failed to send SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn send_terminate(_pid: Option<u32>) {}
