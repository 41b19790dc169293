//! Claude Code SDK for jobrun
//!
//! This crate provides the prompt-execution collaborator behind the AI and
//! skill workers: a [`PromptRunner`] trait and [`ClaudeExecutor`], which runs
//! the Claude Code CLI in one-shot mode and parses its streaming JSON output.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use jobrun_claude_sdk::{CancellationToken, ClaudeExecutor, PromptRequest, PromptRunner};
//!
//! async fn ask() -> Result<(), Box<dyn std::error::Error>> {
//!     let executor = ClaudeExecutor::new("claude");
//!     let request = PromptRequest::new("What is 2 + 2?", Duration::from_secs(60))
//!         .with_model("sonnet");
//!
//!     let response = executor.run(request, CancellationToken::new()).await?;
//!     println!("{}", response.text);
//!     Ok(())
//! }
//! ```

mod error;
mod executor;
mod runner;
mod types;

// Re-export main types
pub use error::SdkError;
pub use executor::ClaudeExecutor;
pub use runner::{PromptRequest, PromptResponse, PromptRunner};
pub use tokio_util::sync::CancellationToken;
pub use types::{
    AssistantMessage, ClaudeMessage, ContentDelta, ContentItem, PermissionMode, StreamEvent,
    UserMessage,
};
