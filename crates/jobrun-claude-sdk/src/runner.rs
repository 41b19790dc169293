//! The prompt-execution seam used by the AI and skill workers.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::SdkError;

/// A single prompt to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRequest {
    pub prompt: String,
    /// Model name or alias; `None` lets the runner choose.
    pub model: Option<String>,
    pub timeout: Duration,
    /// Working directory for the run.
    pub cwd: Option<PathBuf>,
}

impl PromptRequest {
    pub fn new(prompt: impl Into<String>, timeout: Duration) -> Self {
        Self {
            prompt: prompt.into(),
            model: None,
            timeout,
            cwd: None,
        }
    }

    /// Builder method to set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Builder method to set the working directory.
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

/// What a successful prompt produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptResponse {
    /// Final response text.
    pub text: String,
    pub session_id: Option<String>,
    /// Model reported by the backend.
    pub model: Option<String>,
    pub duration_ms: u64,
}

/// Runs prompts against a model backend.
///
/// Implementations own their process or connection management and must honor
/// both `request.timeout` and the cancellation token. Retrying or streaming
/// internally is allowed.
#[async_trait]
pub trait PromptRunner: Send + Sync {
    async fn run(
        &self,
        request: PromptRequest,
        cancel: CancellationToken,
    ) -> Result<PromptResponse, SdkError>;
}
