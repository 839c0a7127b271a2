//! Shared subprocess management.
//!
//! [`run_command`] spawns a prepared [`tokio::process::Command`] in its own
//! process group, captures stdout/stderr and races the child against the
//! timeout and the cancellation token. On timeout or cancellation the whole
//! group is killed, so helper processes the script started die with it.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use super::executor::{ScriptError, ScriptInput, ScriptOutput};

/// Maximum stdout or stderr size captured per stream (10 MiB).
///
/// Output beyond this limit is drained and discarded.
const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// How long to wait for the output readers after the child exits. A
/// grandchild that inherited the pipes could otherwise keep them open.
const READER_GRACE: Duration = Duration::from_secs(5);

enum Outcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Spawn `cmd`, capture its output and enforce the timeout and
/// cancellation from `input`.
///
/// The caller sets the program and arguments. Stdin is always closed.
pub async fn run_command(cmd: &mut Command, input: ScriptInput) -> Result<ScriptOutput, ScriptError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    cmd.process_group(0);

    for (key, value) in &input.env_vars {
        cmd.env(key, value);
    }
    if let Some(dir) = &input.working_directory {
        cmd.current_dir(dir);
    }

    let start = Instant::now();
    let mut child = cmd.spawn().map_err(ScriptError::IoError)?;
    let pid = child.id();

    let stdout_task = tokio::spawn(read_stream(child.stdout.take()));
    let stderr_task = tokio::spawn(read_stream(child.stderr.take()));

    let outcome = tokio::select! {
        status = child.wait() => Outcome::Exited(status),
        _ = tokio::time::sleep(input.timeout) => Outcome::TimedOut,
        _ = input.cancel.cancelled() => Outcome::Cancelled,
    };

    match outcome {
        Outcome::Exited(Ok(status)) => {
            let duration_ms = start.elapsed().as_millis() as u64;
            // Reap stragglers still holding the group.
            kill_process_group(pid);
            let stdout = collect(stdout_task).await;
            let stderr = collect(stderr_task).await;

            Ok(ScriptOutput {
                stdout,
                stderr,
                exit_code: status.code().unwrap_or(-1),
                duration_ms,
            })
        }
        Outcome::Exited(Err(e)) => {
            kill_process_group(pid);
            stdout_task.abort();
            stderr_task.abort();
            Err(ScriptError::IoError(e))
        }
        Outcome::TimedOut => {
            abort_child(&mut child, pid, stdout_task, stderr_task).await;
            Err(ScriptError::Timeout {
                elapsed_ms: start.elapsed().as_millis() as u64,
            })
        }
        Outcome::Cancelled => {
            abort_child(&mut child, pid, stdout_task, stderr_task).await;
            Err(ScriptError::Cancelled)
        }
    }
}

/// Kill the child's whole group, reap it and stop the output readers.
async fn abort_child(
    child: &mut tokio::process::Child,
    pid: Option<u32>,
    stdout_task: tokio::task::JoinHandle<Vec<u8>>,
    stderr_task: tokio::task::JoinHandle<Vec<u8>>,
) {
    kill_process_group(pid);
    if let Err(e) = child.kill().await {
        tracing::warn!(pid, error = %e, "Failed to reap killed child");
    }
    stdout_task.abort();
    stderr_task.abort();
}

/// Send SIGKILL to every process in the group led by `pid`.
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    let Some(pid) = pid.and_then(|p| libc::pid_t::try_from(p).ok()) else {
        return;
    };
    // SAFETY: kill(2) has no memory-safety preconditions. The child was
    // spawned with process_group(0), so -pid addresses only its group.
    let rc = unsafe { libc::kill(-pid, libc::SIGKILL) };
    if rc != 0 {
        tracing::trace!(pid, "Process group already gone");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

async fn collect(task: tokio::task::JoinHandle<Vec<u8>>) -> String {
    let bytes = match tokio::time::timeout(READER_GRACE, task).await {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(_)) | Err(_) => Vec::new(),
    };
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Read an entire output stream, keeping at most [`MAX_OUTPUT_BYTES`] and
/// draining the rest so the child never blocks on a full pipe.
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut h) = handle {
        if let Err(e) = (&mut h)
            .take(MAX_OUTPUT_BYTES as u64)
            .read_to_end(&mut buf)
            .await
        {
            tracing::debug!(error = %e, "Failed to read child output");
        }
        if let Err(e) = tokio::io::copy(&mut h, &mut tokio::io::sink()).await {
            tracing::debug!(error = %e, "Failed to drain child output");
        }
    }
    buf
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
