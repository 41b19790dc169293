//! Core domain errors.

use thiserror::Error;

/// Core domain errors for jobrun.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Unknown job type tag.
    #[error("Unknown job type: {0}")]
    UnknownJobType(String),

    /// Configuration file could not be read.
    #[error("Failed to read config file '{path}': {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Configuration could not be parsed.
    #[error("Invalid config: {0}")]
    InvalidConfig(#[from] serde_json::Error),
}
