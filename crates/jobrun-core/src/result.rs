//! Outcome of a worker execution.

use std::time::Duration;

use serde::Serialize;

/// Result produced by a worker. Immutable once built.
///
/// `success` is true exactly when `error` is absent; the constructors are the
/// only way to build one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerResult {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    exit_code: Option<i32>,
    #[serde(rename = "duration")]
    duration_ms: u64,
}

impl WorkerResult {
    /// Successful result.
    pub fn success(output: Option<String>, duration: Duration) -> Self {
        Self {
            success: true,
            output,
            error: None,
            exit_code: None,
            duration_ms: duration_millis(duration),
        }
    }

    /// Failed result with a human-readable cause.
    pub fn failure(error: impl Into<String>, duration: Duration) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
            exit_code: None,
            duration_ms: duration_millis(duration),
        }
    }

    /// Attach captured output.
    pub fn with_output(mut self, output: Option<String>) -> Self {
        self.output = output;
        self
    }

    /// Attach a process exit code.
    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_has_no_error() {
        let result = WorkerResult::success(Some("hello".into()), Duration::from_millis(12))
            .with_exit_code(0);
        assert!(result.is_success());
        assert!(result.error().is_none());
        assert_eq!(result.output(), Some("hello"));
        assert_eq!(result.exit_code(), Some(0));
        assert_eq!(result.duration_ms(), 12);
    }

    #[test]
    fn test_failure_has_error() {
        let result = WorkerResult::failure("boom", Duration::ZERO).with_exit_code(-1);
        assert!(!result.is_success());
        assert_eq!(result.error(), Some("boom"));
        assert_eq!(result.exit_code(), Some(-1));
    }

    #[test]
    fn test_serializes_camel_case() {
        let result = WorkerResult::failure("exit 2", Duration::from_millis(5)).with_exit_code(2);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["exitCode"], 2);
        assert_eq!(json["duration"], 5);
        assert!(json.get("output").is_none());
    }
}
