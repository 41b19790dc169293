//! Engine configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::CoreError;

/// Default timeout for shell commands (30s).
pub const DEFAULT_EXEC_TIMEOUT_MS: u64 = 30_000;

/// Per-stream capture limit for shell commands (512 KiB).
pub const DEFAULT_EXEC_OUTPUT_CAP_BYTES: usize = 512 * 1024;

/// Default timeout for prompt execution (2 min).
pub const DEFAULT_AI_TIMEOUT_MS: u64 = 120_000;

/// Output limit for model responses (1 MiB).
pub const DEFAULT_AI_OUTPUT_CAP_BYTES: usize = 1024 * 1024;

/// Time between the graceful and the forceful termination signal.
pub const DEFAULT_KILL_GRACE_PERIOD_MS: u64 = 5_000;

/// Model used when a job does not name one.
pub const DEFAULT_MODEL: &str = "sonnet";

/// Tunables for the queue and workers.
///
/// Every field has a default, so a config file only needs the keys it
/// overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub exec_timeout_ms: u64,
    pub exec_output_cap_bytes: usize,
    pub ai_timeout_ms: u64,
    pub ai_output_cap_bytes: usize,
    pub kill_grace_period_ms: u64,

    /// Model for prompts that don't specify one.
    pub default_model: String,

    /// Path to the Claude CLI executable ("claude" uses PATH lookup).
    pub claude_path: String,

    /// Directory skills are resolved against. `None` means `$HOME/.claude/skills`.
    pub skills_dir: Option<PathBuf>,

    /// Concurrency of the shared automation queue.
    pub automation_concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            exec_timeout_ms: DEFAULT_EXEC_TIMEOUT_MS,
            exec_output_cap_bytes: DEFAULT_EXEC_OUTPUT_CAP_BYTES,
            ai_timeout_ms: DEFAULT_AI_TIMEOUT_MS,
            ai_output_cap_bytes: DEFAULT_AI_OUTPUT_CAP_BYTES,
            kill_grace_period_ms: DEFAULT_KILL_GRACE_PERIOD_MS,
            default_model: DEFAULT_MODEL.to_string(),
            claude_path: "claude".to_string(),
            skills_dir: None,
            automation_concurrency: 1,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON document, filling missing keys with defaults.
    pub fn from_json_str(json: &str) -> Result<Self, CoreError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a JSON config file.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CoreError::ConfigRead {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_millis(self.exec_timeout_ms)
    }

    pub fn ai_timeout(&self) -> Duration {
        Duration::from_millis(self.ai_timeout_ms)
    }

    pub fn kill_grace_period(&self) -> Duration {
        Duration::from_millis(self.kill_grace_period_ms)
    }

    /// Skills directory, resolving the conventional location under the
    /// user's home when not configured.
    pub fn resolved_skills_dir(&self) -> Option<PathBuf> {
        if let Some(dir) = &self.skills_dir {
            return Some(dir.clone());
        }
        std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(|home| PathBuf::from(home).join(".claude").join("skills"))
    }
}
