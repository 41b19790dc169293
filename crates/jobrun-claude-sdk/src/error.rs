//! Error types for the Claude Code SDK.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during prompt execution.
#[derive(Debug, Error)]
pub enum SdkError {
    /// Claude CLI executable not found.
    #[error("Claude CLI not found at '{0}'. Ensure Claude Code is installed.")]
    ClaudeNotFound(String),

    /// Failed to spawn the Claude process.
    #[error("Failed to spawn Claude process: {0}")]
    SpawnError(#[from] std::io::Error),

    /// Claude process exited with a non-zero code.
    #[error("Claude exited with code {code}: {stderr}")]
    ProcessExit { code: i32, stderr: String },

    /// Claude reported an error result.
    #[error("Claude process exited with error: {0}")]
    ProcessError(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Execution exceeded its timeout.
    #[error("Timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Execution was cancelled by the caller.
    #[error("Cancelled by caller")]
    Cancelled,
}
