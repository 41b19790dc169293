//! Two-stage termination of child processes.
//!
//! A child that outlives its deadline, or whose task is cancelled, first gets
//! a graceful termination request for its whole process tree. If it is still
//! running after the grace period it is killed outright.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Why a child was put down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KillReason {
    Timeout,
    Cancelled,
}

#[derive(Debug)]
pub(crate) enum Termination {
    /// The child exited on its own.
    Exited(ExitStatus),
    /// The child was terminated by us.
    Killed(KillReason),
}

/// Wait for `child`, escalating when `timeout` elapses or `cancel` fires.
pub(crate) async fn wait_with_escalation(
    child: &mut Child,
    timeout: Duration,
    grace: Duration,
    cancel: &CancellationToken,
) -> io::Result<Termination> {
    let reason = tokio::select! {
        status = child.wait() => return status.map(Termination::Exited),
        _ = tokio::time::sleep(timeout) => KillReason::Timeout,
        _ = cancel.cancelled() => KillReason::Cancelled,
    };

    let pid = child.id();
    warn!(
        pid = ?pid,
        reason = ?reason,
        grace_ms = grace.as_millis() as u64,
        "Terminating process"
    );
    if let Some(pid) = pid {
        request_termination(pid).await;
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => {
            let status = status?;
            info!(pid = ?pid, status = %status, "Process exited after termination request");
        }
        Err(_) => {
            warn!(pid = ?pid, "Process ignored termination request, killing");
            if let Some(pid) = pid {
                kill_tree(pid).await;
            }
            if let Err(e) = child.start_kill() {
                debug!(pid = ?pid, error = %e, "start_kill failed");
            }
            child.wait().await?;
        }
    }

    Ok(Termination::Killed(reason))
}

/// Exit code for a status; signal deaths have none and map to -1.
pub(crate) fn exit_code(status: &ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[cfg(unix)]
async fn request_termination(pid: u32) {
    // Children are spawned as process group leaders; a negative pid addresses
    // the whole group.
    signal(&["-TERM", "--", &format!("-{}", pid)]).await;
}

#[cfg(unix)]
async fn kill_tree(pid: u32) {
    signal(&["-KILL", "--", &format!("-{}", pid)]).await;
}

#[cfg(unix)]
async fn signal(args: &[&str]) {
    run_quietly("kill", args).await;
}

#[cfg(windows)]
async fn request_termination(pid: u32) {
    run_quietly("taskkill", &["/PID", &pid.to_string(), "/T"]).await;
}

#[cfg(windows)]
async fn kill_tree(pid: u32) {
    run_quietly("taskkill", &["/PID", &pid.to_string(), "/T", "/F"]).await;
}

async fn run_quietly(program: &str, args: &[&str]) {
    let result = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    match result {
        Ok(status) if status.success() => {}
        Ok(status) => debug!(program, ?args, status = %status, "Signal command failed"),
        Err(e) => debug!(program, ?args, error = %e, "Could not run signal command"),
    }
}
