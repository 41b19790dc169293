//! Claude Code executor for running prompts via subprocess.
//!
//! This module provides the main `ClaudeExecutor` type, which runs the
//! Claude Code CLI in one-shot mode with streaming JSON output and implements
//! [`PromptRunner`].

use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::SdkError;
use crate::runner::{PromptRequest, PromptResponse, PromptRunner};
use crate::types::{ClaudeMessage, ContentDelta, PermissionMode, StreamEvent};

/// How long to keep reading output once the CLI has exited. Processes it
/// started may hold the pipes open.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Executor for Claude Code prompts.
///
/// # Example
///
/// ```rust,no_run
/// use jobrun_claude_sdk::{ClaudeExecutor, PermissionMode};
///
/// let executor = ClaudeExecutor::new("claude")
///     .with_permission_mode(PermissionMode::AcceptEdits)
///     .with_default_model("sonnet");
/// ```
#[derive(Debug, Clone)]
pub struct ClaudeExecutor {
    /// Path to the Claude CLI executable.
    claude_path: String,

    /// Permission mode to use.
    permission_mode: PermissionMode,

    /// Model used when the request does not name one.
    default_model: Option<String>,

    /// System prompt (optional).
    system_prompt: Option<String>,

    /// Additional environment variables.
    env_vars: Vec<(String, String)>,
}

impl ClaudeExecutor {
    /// Create a new executor with the given path to the Claude CLI.
    ///
    /// The path can be just "claude" to use PATH lookup, or a full path.
    pub fn new(claude_path: impl Into<String>) -> Self {
        Self {
            claude_path: claude_path.into(),
            permission_mode: PermissionMode::Default,
            default_model: None,
            system_prompt: None,
            env_vars: Vec::new(),
        }
    }

    /// Set the permission mode.
    pub fn with_permission_mode(mut self, mode: PermissionMode) -> Self {
        self.permission_mode = mode;
        self
    }

    /// Set the model used when a request has none.
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    /// Set a system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }

    /// CLI arguments for a request, prompt last.
    fn build_args(&self, request: &PromptRequest) -> Vec<String> {
        let mut args = vec![
            "--print".to_string(),
            "--output-format=stream-json".to_string(),
            "--verbose".to_string(),
        ];

        if let Some(model) = request.model.as_ref().or(self.default_model.as_ref()) {
            args.push("--model".to_string());
            args.push(model.clone());
        }

        if self.permission_mode != PermissionMode::Default {
            args.push("--permission-mode".to_string());
            args.push(self.permission_mode.to_string());
        }

        if let Some(system) = &self.system_prompt {
            args.push("--system-prompt".to_string());
            args.push(system.clone());
        }

        args.push(request.prompt.clone());
        args
    }

    /// Run a prompt to completion.
    pub async fn execute(
        &self,
        request: &PromptRequest,
        cancel: &CancellationToken,
    ) -> Result<PromptResponse, SdkError> {
        let started = Instant::now();
        let working_dir = request.cwd.as_deref().unwrap_or_else(|| Path::new("."));

        info!(
            claude_path = %self.claude_path,
            working_dir = %working_dir.display(),
            prompt_len = request.prompt.len(),
            timeout_ms = request.timeout.as_millis() as u64,
            "Preparing Claude execution"
        );

        let mut cmd = Command::new(&self.claude_path);
        cmd.args(self.build_args(request))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .current_dir(working_dir)
            .kill_on_drop(true);

        for (key, value) in &self.env_vars {
            cmd.env(key, value);
        }

        debug!("Full command: {:?}", cmd);

        let mut child = cmd.spawn().map_err(|e| {
            error!(error = %e, "Failed to spawn Claude process");
            if e.kind() == std::io::ErrorKind::NotFound && !working_dir.exists() {
                SdkError::SpawnError(e)
            } else if e.kind() == std::io::ErrorKind::NotFound {
                SdkError::ClaudeNotFound(self.claude_path.clone())
            } else {
                SdkError::SpawnError(e)
            }
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SdkError::ProcessError("Failed to get stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SdkError::ProcessError("Failed to get stderr".to_string()))?;

        let transcript = Arc::new(Mutex::new(Transcript::default()));
        let stderr_text = Arc::new(Mutex::new(String::new()));
        let stdout_task = tokio::spawn(read_transcript(stdout, transcript.clone()));
        let stderr_task = tokio::spawn(read_stderr(stderr, stderr_text.clone()));

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = tokio::time::sleep(request.timeout) => {
                warn!(timeout_ms = request.timeout.as_millis() as u64, "Claude execution timed out, killing process");
                child.start_kill().ok();
                child.wait().await.ok();
                return Err(SdkError::Timeout(request.timeout));
            }
            _ = cancel.cancelled() => {
                info!("Claude execution cancelled, killing process");
                child.start_kill().ok();
                child.wait().await.ok();
                return Err(SdkError::Cancelled);
            }
        };

        drain("stdout", stdout_task).await;
        drain("stderr", stderr_task).await;
        let transcript = std::mem::take(&mut *lock(&transcript));
        let stderr_text = std::mem::take(&mut *lock(&stderr_text));

        let exit_code = status.code().unwrap_or(-1);
        info!(
            exit_code,
            success = status.success(),
            messages = transcript.messages,
            "Claude process exited"
        );

        if !status.success() {
            return Err(SdkError::ProcessExit {
                code: exit_code,
                stderr: stderr_text.trim().to_string(),
            });
        }

        transcript.into_response(started.elapsed())
    }
}

#[async_trait]
impl PromptRunner for ClaudeExecutor {
    async fn run(
        &self,
        request: PromptRequest,
        cancel: CancellationToken,
    ) -> Result<PromptResponse, SdkError> {
        self.execute(&request, &cancel).await
    }
}

impl Default for ClaudeExecutor {
    fn default() -> Self {
        Self::new("claude")
    }
}

/// What was learned from the stream-json output.
#[derive(Debug, Default)]
struct Transcript {
    session_id: Option<String>,
    model: Option<String>,
    assistant_text: String,
    streamed_text: String,
    result_text: Option<String>,
    is_error: bool,
    error: Option<String>,
    messages: u64,
}

impl Transcript {
    fn observe(&mut self, message: ClaudeMessage) {
        self.messages += 1;
        if self.session_id.is_none() {
            self.session_id = message.session_id().map(str::to_string);
        }

        match message {
            ClaudeMessage::System { model, .. } => {
                if model.is_some() {
                    self.model = model;
                }
            }
            ClaudeMessage::Assistant { message, .. } => {
                if self.model.is_none() {
                    self.model = message.model.clone();
                }
                let text = message.text();
                if !text.is_empty() {
                    if !self.assistant_text.is_empty() {
                        self.assistant_text.push('\n');
                    }
                    self.assistant_text.push_str(&text);
                }
            }
            ClaudeMessage::StreamEvent {
                event:
                    StreamEvent::ContentBlockDelta {
                        delta: ContentDelta::TextDelta { text },
                        ..
                    },
                ..
            } => self.streamed_text.push_str(&text),
            ClaudeMessage::Result {
                is_error,
                result,
                error,
                ..
            } => {
                self.is_error = is_error.unwrap_or(false);
                self.result_text = result.and_then(|value| match value {
                    serde_json::Value::String(text) => Some(text),
                    serde_json::Value::Null => None,
                    other => Some(other.to_string()),
                });
                self.error = error;
            }
            _ => {}
        }
    }

    fn into_response(self, elapsed: Duration) -> Result<PromptResponse, SdkError> {
        if self.is_error {
            let message = self
                .error
                .or(self.result_text)
                .unwrap_or_else(|| "Claude reported an error".to_string());
            return Err(SdkError::ProcessError(message));
        }

        let text = match self.result_text {
            Some(text) => text,
            None if !self.assistant_text.is_empty() => self.assistant_text,
            None => self.streamed_text,
        };

        Ok(PromptResponse {
            text,
            session_id: self.session_id,
            model: self.model,
            duration_ms: elapsed.as_millis() as u64,
        })
    }
}

/// Wait for a reader to reach EOF, giving up after [`OUTPUT_DRAIN_TIMEOUT`].
async fn drain(stream: &'static str, mut reader: JoinHandle<()>) {
    if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, &mut reader)
        .await
        .is_err()
    {
        warn!(stream, "Claude output still open after exit, abandoning reader");
        reader.abort();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn read_transcript<R: AsyncRead + Unpin>(stdout: R, transcript: Arc<Mutex<Transcript>>) {
    let mut lines = BufReader::new(stdout).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match serde_json::from_str::<ClaudeMessage>(trimmed) {
                    Ok(message) => {
                        debug!(message_type = message.kind(), "Received message from Claude");
                        lock(&transcript).observe(message);
                    }
                    Err(e) => {
                        // Log first 200 chars for debugging
                        let preview: String = trimmed.chars().take(200).collect();
                        warn!(error = %e, preview = %preview, "Failed to parse Claude message");
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "Error reading Claude stdout");
                break;
            }
        }
    }
}

async fn read_stderr<R: AsyncRead + Unpin>(stderr: R, collected: Arc<Mutex<String>>) {
    let mut lines = BufReader::new(stderr).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            warn!(stderr = %trimmed, "Claude stderr");
            let mut collected = lock(&collected);
            collected.push_str(trimmed);
            collected.push('\n');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> ClaudeMessage {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_executor_builder() {
        let executor = ClaudeExecutor::new("claude")
            .with_default_model("claude-sonnet-4-20250514")
            .with_permission_mode(PermissionMode::BypassPermissions)
            .with_system_prompt("You are a helpful assistant.")
            .with_env("ANTHROPIC_API_KEY", "test-key");

        assert_eq!(executor.claude_path, "claude");
        assert_eq!(
            executor.default_model,
            Some("claude-sonnet-4-20250514".to_string())
        );
        assert_eq!(executor.permission_mode, PermissionMode::BypassPermissions);
        assert_eq!(
            executor.system_prompt,
            Some("You are a helpful assistant.".to_string())
        );
        assert_eq!(executor.env_vars.len(), 1);
    }

    #[test]
    fn test_default_executor() {
        let executor = ClaudeExecutor::default();
        assert_eq!(executor.claude_path, "claude");
        assert_eq!(executor.permission_mode, PermissionMode::Default);
        assert!(executor.default_model.is_none());
    }

    #[test]
    fn test_build_args_request_model_wins() {
        let executor = ClaudeExecutor::new("claude").with_default_model("sonnet");
        let request = PromptRequest::new("hi", Duration::from_secs(1)).with_model("opus");
        let args = executor.build_args(&request);

        assert_eq!(&args[..3], &["--print", "--output-format=stream-json", "--verbose"]);
        assert_eq!(&args[3..5], &["--model", "opus"]);
        assert_eq!(args.last().map(String::as_str), Some("hi"));
        assert!(!args.iter().any(|a| a == "--permission-mode"));
    }

    #[test]
    fn test_build_args_permission_mode() {
        let executor =
            ClaudeExecutor::new("claude").with_permission_mode(PermissionMode::AcceptEdits);
        let args = executor.build_args(&PromptRequest::new("hi", Duration::from_secs(1)));
        let pos = args.iter().position(|a| a == "--permission-mode").unwrap();
        assert_eq!(args[pos + 1], "acceptEdits");
        assert!(!args.iter().any(|a| a == "--model"));
    }

    #[test]
    fn test_transcript_prefers_result_text() {
        let mut transcript = Transcript::default();
        transcript.observe(parse(
            r#"{"type":"system","subtype":"init","session_id":"s-1","model":"claude-sonnet-4"}"#,
        ));
        transcript.observe(parse(
            r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"thinking out loud"}]}}"#,
        ));
        transcript.observe(parse(
            r#"{"type":"result","subtype":"success","is_error":false,"result":"final answer"}"#,
        ));

        let response = transcript.into_response(Duration::from_millis(3)).unwrap();
        assert_eq!(response.text, "final answer");
        assert_eq!(response.session_id.as_deref(), Some("s-1"));
        assert_eq!(response.model.as_deref(), Some("claude-sonnet-4"));
        assert_eq!(response.duration_ms, 3);
    }

    #[test]
    fn test_transcript_falls_back_to_assistant_text() {
        let mut transcript = Transcript::default();
        transcript.observe(parse(
            r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"one"}]}}"#,
        ));
        transcript.observe(parse(
            r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"two"}]}}"#,
        ));
        let response = transcript.into_response(Duration::ZERO).unwrap();
        assert_eq!(response.text, "one\ntwo");
    }

    #[test]
    fn test_transcript_error_result() {
        let mut transcript = Transcript::default();
        transcript.observe(parse(
            r#"{"type":"result","subtype":"error_max_turns","is_error":true,"error":"max turns reached"}"#,
        ));
        let err = transcript.into_response(Duration::ZERO).unwrap_err();
        assert!(matches!(err, SdkError::ProcessError(ref m) if m == "max turns reached"));
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use std::path::PathBuf;

        fn fake_claude(dir: &tempfile::TempDir, body: &str) -> PathBuf {
            let path = dir.path().join("claude");
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        fn executor(path: &Path) -> ClaudeExecutor {
            ClaudeExecutor::new(path.to_string_lossy().to_string())
        }

        #[tokio::test]
        async fn test_runs_fake_cli() {
            let dir = tempfile::tempdir().unwrap();
            let path = fake_claude(
                &dir,
                r#"echo '{"type":"system","subtype":"init","session_id":"s-9"}'
echo '{"type":"result","is_error":false,"result":"pong"}'"#,
            );

            let response = executor(&path)
                .execute(
                    &PromptRequest::new("ping", Duration::from_secs(10)),
                    &CancellationToken::new(),
                )
                .await
                .unwrap();
            assert_eq!(response.text, "pong");
            assert_eq!(response.session_id.as_deref(), Some("s-9"));
        }

        #[tokio::test]
        async fn test_nonzero_exit() {
            let dir = tempfile::tempdir().unwrap();
            let path = fake_claude(&dir, "echo 'not logged in' >&2\nexit 3");

            let err = executor(&path)
                .execute(
                    &PromptRequest::new("ping", Duration::from_secs(10)),
                    &CancellationToken::new(),
                )
                .await
                .unwrap_err();
            match err {
                SdkError::ProcessExit { code, stderr } => {
                    assert_eq!(code, 3);
                    assert_eq!(stderr, "not logged in");
                }
                other => panic!("expected ProcessExit, got {:?}", other),
            }
        }

        #[tokio::test]
        async fn test_timeout_kills_process() {
            let dir = tempfile::tempdir().unwrap();
            let path = fake_claude(&dir, "exec sleep 30");

            let started = Instant::now();
            let err = executor(&path)
                .execute(
                    &PromptRequest::new("ping", Duration::from_millis(100)),
                    &CancellationToken::new(),
                )
                .await
                .unwrap_err();
            assert!(matches!(err, SdkError::Timeout(_)));
            assert!(started.elapsed() < Duration::from_secs(10));
        }

        #[tokio::test]
        async fn test_cancel_kills_process() {
            let dir = tempfile::tempdir().unwrap();
            let path = fake_claude(&dir, "exec sleep 30");
            let cancel = CancellationToken::new();

            let trigger = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                trigger.cancel();
            });

            let err = executor(&path)
                .execute(&PromptRequest::new("ping", Duration::from_secs(30)), &cancel)
                .await
                .unwrap_err();
            assert!(matches!(err, SdkError::Cancelled));
        }

        #[tokio::test]
        async fn test_lingering_child_does_not_stall() {
            let dir = tempfile::tempdir().unwrap();
            // The backgrounded sleep keeps stdout open after the CLI exits.
            let path = fake_claude(
                &dir,
                r#"sleep 30 &
echo '{"type":"result","is_error":false,"result":"pong"}'"#,
            );

            let started = Instant::now();
            let response = executor(&path)
                .execute(
                    &PromptRequest::new("ping", Duration::from_secs(60)),
                    &CancellationToken::new(),
                )
                .await
                .unwrap();
            assert_eq!(response.text, "pong");
            assert!(started.elapsed() < Duration::from_secs(10));
        }

        #[tokio::test]
        async fn test_missing_cli() {
            let err = ClaudeExecutor::new("/nonexistent/claude-cli")
                .execute(
                    &PromptRequest::new("ping", Duration::from_secs(1)),
                    &CancellationToken::new(),
                )
                .await
                .unwrap_err();
            assert!(matches!(err, SdkError::ClaudeNotFound(_)));
        }
    }
}
