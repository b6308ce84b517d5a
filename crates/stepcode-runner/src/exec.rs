//! Child process execution with a deadline.

use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::process::Command;

use stepcode_core::error::SandboxError;
use stepcode_core::model::ExecutionResult;

/// Run a command to completion, capturing its output.
///
/// The child is killed when the deadline passes, and the call fails with
/// [`SandboxError::Timeout`]. A non-zero exit is not an error.
pub async fn run_command(mut cmd: Command, timeout: Duration) -> Result<ExecutionResult> {
    let start = Instant::now();

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let program = format!("{:?}", cmd.as_std().get_program());
    let child = cmd
        .spawn()
        .with_context(|| format!("failed to start {program}"))?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => output.with_context(|| format!("failed to wait for {program}"))?,
        Err(_) => {
            tracing::debug!(%program, "killed after {}ms", timeout.as_millis());
            return Err(SandboxError::Timeout(timeout.as_millis() as u64).into());
        }
    };

    Ok(ExecutionResult {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_status: output.status.code(),
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

/// Build a command running in `dir` with `env` applied.
pub fn command_in(program: &str, dir: &std::path::Path, env: &[(String, String)]) -> Command {
    let mut cmd = Command::new(program);
    cmd.current_dir(dir);
    for (key, val) in env {
        cmd.env(key, val);
    }
    cmd
}
