//! Error types for safety gate configuration.

use thiserror::Error;

/// Errors that can occur when building a gate configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    /// Invalid gate configuration.
    #[error("invalid gate config: {reason}")]
    InvalidConfig {
        /// Description of why the config is invalid.
        reason: String,
    },
}
