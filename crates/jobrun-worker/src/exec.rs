//! Shell command execution.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jobrun_core::{EngineConfig, JobConfig, JobType, ShellKind, WorkerResult};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::capture::Capture;
use crate::process::{exit_code, wait_with_escalation, KillReason, Termination};
use crate::Worker;

/// Runs `command` through a shell and reports its exit code and output.
#[derive(Debug, Clone)]
pub struct ExecWorker {
    default_timeout: Duration,
    output_cap: usize,
    grace_period: Duration,
}

impl ExecWorker {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            default_timeout: config.exec_timeout(),
            output_cap: config.exec_output_cap_bytes,
            grace_period: config.kill_grace_period(),
        }
    }

    fn command(&self, shell: ShellKind, command: &str, cwd: Option<&str>) -> Command {
        let mut cmd = Command::new(shell.program());
        cmd.args(shell.invocation_args())
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }

        // Own process group, so termination reaches everything the shell starts.
        #[cfg(unix)]
        cmd.process_group(0);

        cmd
    }
}

impl Default for ExecWorker {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

#[async_trait]
impl Worker for ExecWorker {
    fn job_type(&self) -> JobType {
        JobType::Exec
    }

    async fn execute(&self, config: &JobConfig, cancel: CancellationToken) -> WorkerResult {
        let started = Instant::now();

        let Some(command) = JobConfig::non_blank(&config.command) else {
            return WorkerResult::failure("No command specified in job config", started.elapsed());
        };
        let shell = ShellKind::parse_or_default(config.shell.as_deref());
        let timeout = config
            .timeout
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout);
        let cwd = JobConfig::non_blank(&config.cwd);

        if cancel.is_cancelled() {
            return WorkerResult::failure("Process cancelled by caller", started.elapsed());
        }

        let mut child = match self.command(shell, command, cwd).spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(shell = shell.program(), error = %e, "Failed to spawn command");
                return WorkerResult::failure(
                    format!("Failed to spawn {}: {}", shell.program(), e),
                    started.elapsed(),
                );
            }
        };

        info!(
            pid = ?child.id(),
            shell = shell.program(),
            cwd = ?cwd,
            timeout_ms = timeout.as_millis() as u64,
            "Started command"
        );

        let stdout = child
            .stdout
            .take()
            .map(|out| Capture::spawn("stdout", out, self.output_cap));
        let stderr = child
            .stderr
            .take()
            .map(|err| Capture::spawn("stderr", err, self.output_cap));

        let termination =
            wait_with_escalation(&mut child, timeout, self.grace_period, &cancel).await;

        let output = match stdout {
            Some(capture) => capture.finish().await,
            None => None,
        };
        let error_output = match stderr {
            Some(capture) => capture.finish().await,
            None => None,
        };
        let elapsed = started.elapsed();

        let result = match termination {
            Ok(Termination::Killed(KillReason::Timeout)) => WorkerResult::failure(
                format!("Process killed after timeout ({} ms)", timeout.as_millis()),
                elapsed,
            )
            .with_output(output)
            .with_exit_code(-1),
            Ok(Termination::Killed(KillReason::Cancelled)) => {
                WorkerResult::failure("Process cancelled by caller", elapsed)
                    .with_output(output)
                    .with_exit_code(-1)
            }
            Ok(Termination::Exited(status)) => {
                let code = exit_code(&status);
                if code == 0 {
                    WorkerResult::success(output, elapsed).with_exit_code(0)
                } else {
                    let error =
                        error_output.unwrap_or_else(|| format!("Process exited with code {}", code));
                    WorkerResult::failure(error, elapsed)
                        .with_output(output)
                        .with_exit_code(code)
                }
            }
            Err(e) => WorkerResult::failure(format!("Failed to wait for process: {}", e), elapsed)
                .with_output(output)
                .with_exit_code(-1),
        };

        info!(
            success = result.is_success(),
            exit_code = ?result.exit_code(),
            duration_ms = result.duration_ms(),
            "Command finished"
        );
        result
    }
}
