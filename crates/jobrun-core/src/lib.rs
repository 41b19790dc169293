//! jobrun Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Async runtimes
//! - Process spawning
//! - Persistence
//!
//! All types here describe the jobs the engine runs and the results it
//! hands back.

pub mod config;
pub mod error;
pub mod ids;
pub mod job;
pub mod output;
pub mod result;
pub mod status;

// Re-export commonly used types
pub use config::EngineConfig;
pub use error::CoreError;
pub use ids::{RunId, TaskId};
pub use job::{JobConfig, JobType, ShellKind};
pub use output::cap_output;
pub use result::WorkerResult;
pub use status::TaskStatus;
