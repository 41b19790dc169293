//! Job configuration consumed by workers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::CoreError;

/// Kind of worker a job is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Shell command execution.
    Exec,
    /// LLM prompt execution.
    Ai,
    /// Skill invocation through the prompt path.
    Skill,
}

impl JobType {
    /// Tag used in logs and run records.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exec => "exec",
            Self::Ai => "ai",
            Self::Skill => "skill",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exec" | "shell" | "command" => Ok(Self::Exec),
            "ai" | "prompt" => Ok(Self::Ai),
            "skill" => Ok(Self::Skill),
            other => Err(CoreError::UnknownJobType(other.to_string())),
        }
    }
}

/// Shell used to run an exec job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShellKind {
    Bash,
    Sh,
    Zsh,
    /// PowerShell 7+.
    Pwsh,
    /// Windows PowerShell 5.
    PowerShell,
    Cmd,
}

impl ShellKind {
    /// Platform default. PowerShell 7 on Windows for its UTF-8 console, `sh`
    /// everywhere else.
    pub fn platform_default() -> Self {
        if cfg!(windows) {
            Self::Pwsh
        } else {
            Self::Sh
        }
    }

    /// Parse a shell name, falling back to the platform default for unknown
    /// or missing values.
    pub fn parse_or_default(name: Option<&str>) -> Self {
        match name.map(|n| n.trim().to_ascii_lowercase()) {
            Some(n) => match n.as_str() {
                "bash" => Self::Bash,
                "sh" => Self::Sh,
                "zsh" => Self::Zsh,
                "pwsh" => Self::Pwsh,
                "powershell" => Self::PowerShell,
                "cmd" => Self::Cmd,
                _ => Self::platform_default(),
            },
            None => Self::platform_default(),
        }
    }

    /// Executable to spawn.
    pub fn program(&self) -> &'static str {
        match self {
            Self::Bash => "bash",
            Self::Sh => "sh",
            Self::Zsh => "zsh",
            Self::Pwsh => "pwsh",
            Self::PowerShell => "powershell",
            Self::Cmd => "cmd",
        }
    }

    /// Arguments that precede the command text. Non-interactive invocation,
    /// no profile loading.
    pub fn invocation_args(&self) -> &'static [&'static str] {
        match self {
            Self::Bash | Self::Sh | Self::Zsh => &["-c"],
            Self::Pwsh | Self::PowerShell => &["-NoLogo", "-NoProfile", "-NonInteractive", "-Command"],
            Self::Cmd => &["/C"],
        }
    }
}

impl fmt::Display for ShellKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

/// Superset of the fields any worker reads.
///
/// A worker only looks at the fields relevant to it and fails fast when its
/// required field is missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobConfig {
    /// Command text (exec).
    pub command: Option<String>,
    /// Working directory (exec).
    pub cwd: Option<String>,
    /// Timeout in milliseconds (exec, ai).
    pub timeout: Option<u64>,
    /// Shell name (exec).
    pub shell: Option<String>,

    /// Prompt text (ai).
    pub prompt: Option<String>,
    /// Model name (ai, skill).
    pub model: Option<String>,

    /// Skill to invoke (skill).
    pub skill_name: Option<String>,
    /// Action within the skill (skill).
    pub action: Option<String>,
    /// Parameters, either free text or structured JSON (skill).
    pub params: Option<Value>,
}

impl JobConfig {
    /// Config for a shell command.
    pub fn exec(command: impl Into<String>) -> Self {
        Self {
            command: Some(command.into()),
            ..Self::default()
        }
    }

    /// Config for a prompt.
    pub fn ai(prompt: impl Into<String>) -> Self {
        Self {
            prompt: Some(prompt.into()),
            ..Self::default()
        }
    }

    /// Config for a skill invocation.
    pub fn skill(skill_name: impl Into<String>) -> Self {
        Self {
            skill_name: Some(skill_name.into()),
            ..Self::default()
        }
    }

    /// Builder method to set the working directory.
    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Builder method to set the timeout in milliseconds.
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout = Some(timeout_ms);
        self
    }

    /// Builder method to set the shell.
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = Some(shell.into());
        self
    }

    /// Builder method to set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Builder method to set the skill action.
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Builder method to set skill parameters.
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    /// Treat blank strings as absent.
    pub fn non_blank(field: &Option<String>) -> Option<&str> {
        field.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}
