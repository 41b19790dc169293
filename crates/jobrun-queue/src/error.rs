//! Errors delivered through task handles.

use thiserror::Error;

/// Why a task did not produce a value.
///
/// `E` is the task function's own error type. Callers usually filter
/// [`TaskError::Cancelled`] out of user-facing error reporting.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskError<E> {
    /// Cancelled before it ran, or while running.
    #[error("Task cancelled")]
    Cancelled,

    /// The task function panicked.
    #[error("Task panicked: {0}")]
    Panicked(String),

    /// The task function returned an error.
    #[error("{0}")]
    Failed(E),
}

impl<E> TaskError<E> {
    /// Returns true for cancellation-kind errors.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The function's own error, if that is what this is.
    pub fn into_failure(self) -> Option<E> {
        match self {
            Self::Failed(e) => Some(e),
            _ => None,
        }
    }
}
