//! Error types for utilization tracking.

use thiserror::Error;

/// A failure reported by a metrics sample source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("sample source error: {message}")]
pub struct SourceError {
    /// Description of the source failure.
    pub message: String,
}

impl SourceError {
    /// Creates a new source error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors that can occur in tracker configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackerError {
    /// Invalid tracker configuration.
    #[error("invalid tracker config: {reason}")]
    InvalidConfig {
        /// Description of why the config is invalid.
        reason: String,
    },
}
