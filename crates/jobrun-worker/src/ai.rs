//! Prompt execution through a [`PromptRunner`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jobrun_claude_sdk::{PromptRequest, PromptRunner, SdkError};
use jobrun_core::{cap_output, EngineConfig, JobConfig, JobType, WorkerResult};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::Worker;

/// Settings shared by every worker that goes through the prompt path.
#[derive(Debug, Clone)]
pub(crate) struct PromptSettings {
    pub(crate) default_model: String,
    pub(crate) default_timeout: Duration,
    pub(crate) output_cap: usize,
}

impl PromptSettings {
    pub(crate) fn new(config: &EngineConfig) -> Self {
        Self {
            default_model: config.default_model.clone(),
            default_timeout: config.ai_timeout(),
            output_cap: config.ai_output_cap_bytes,
        }
    }
}

/// Run `prompt` and turn the outcome into a result.
///
/// The deadline and the token are enforced here as well as handed to the
/// runner, so a runner that ignores them cannot hold the slot.
pub(crate) async fn run_prompt(
    runner: &dyn PromptRunner,
    settings: &PromptSettings,
    prompt: String,
    config: &JobConfig,
    cwd: Option<PathBuf>,
    cancel: CancellationToken,
) -> WorkerResult {
    let started = Instant::now();

    if cancel.is_cancelled() {
        return WorkerResult::failure("Prompt cancelled by caller", started.elapsed());
    }

    let model = JobConfig::non_blank(&config.model).unwrap_or(&settings.default_model);
    let timeout = config
        .timeout
        .map(Duration::from_millis)
        .unwrap_or(settings.default_timeout);

    let mut request = PromptRequest::new(prompt, timeout).with_model(model);
    if let Some(cwd) = cwd {
        request = request.with_cwd(cwd);
    }

    info!(
        model,
        timeout_ms = timeout.as_millis() as u64,
        prompt_len = request.prompt.len(),
        cwd = ?request.cwd,
        "Running prompt"
    );

    let outcome = tokio::select! {
        outcome = runner.run(request, cancel.clone()) => outcome,
        _ = tokio::time::sleep(timeout) => Err(SdkError::Timeout(timeout)),
        _ = cancel.cancelled() => Err(SdkError::Cancelled),
    };
    let elapsed = started.elapsed();

    match outcome {
        Ok(response) => {
            info!(
                session_id = ?response.session_id,
                response_len = response.text.len(),
                duration_ms = elapsed.as_millis() as u64,
                "Prompt completed"
            );
            WorkerResult::success(cap_output(&response.text, settings.output_cap), elapsed)
        }
        Err(SdkError::Cancelled) => WorkerResult::failure("Prompt cancelled by caller", elapsed),
        Err(SdkError::Timeout(limit)) => {
            warn!(timeout_ms = limit.as_millis() as u64, "Prompt timed out");
            WorkerResult::failure(
                format!("Prompt timed out after {} ms", limit.as_millis()),
                elapsed,
            )
        }
        Err(SdkError::ProcessExit { code, stderr }) => {
            warn!(exit_code = code, "Prompt process failed");
            let error = if stderr.trim().is_empty() {
                format!("Claude exited with code {}", code)
            } else {
                format!("Claude exited with code {}: {}", code, stderr.trim())
            };
            WorkerResult::failure(error, elapsed).with_exit_code(code)
        }
        Err(e) => {
            warn!(error = %e, "Prompt failed");
            WorkerResult::failure(e.to_string(), elapsed)
        }
    }
}

/// Sends `prompt` to the model.
#[derive(Clone)]
pub struct AiWorker {
    runner: Arc<dyn PromptRunner>,
    settings: PromptSettings,
}

impl AiWorker {
    pub fn new(config: &EngineConfig, runner: Arc<dyn PromptRunner>) -> Self {
        Self {
            runner,
            settings: PromptSettings::new(config),
        }
    }
}

impl std::fmt::Debug for AiWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiWorker")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Worker for AiWorker {
    fn job_type(&self) -> JobType {
        JobType::Ai
    }

    async fn execute(&self, config: &JobConfig, cancel: CancellationToken) -> WorkerResult {
        let started = Instant::now();
        let Some(prompt) = JobConfig::non_blank(&config.prompt) else {
            return WorkerResult::failure("No prompt specified in job config", started.elapsed());
        };

        run_prompt(
            self.runner.as_ref(),
            &self.settings,
            prompt.to_string(),
            config,
            None,
            cancel,
        )
        .await
    }
}
