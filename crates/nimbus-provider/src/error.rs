//! Error taxonomy for the provisioning contract.

use thiserror::Error;

/// Result type for provisioning operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Errors surfaced by a provisioning collaborator.
///
/// Transient errors are safe to retry on a later reconcile; fatal errors
/// mean the same request will never succeed and the node should be marked
/// failed. [`ProviderError::CircuitOpen`] must never be retried
/// synchronously.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider's circuit breaker is open; fail fast.
    #[error("provider circuit breaker is open")]
    CircuitOpen,

    /// The provider is rate limiting requests.
    #[error("provider rate limited: retry after {retry_after_secs}s")]
    RateLimited {
        /// Suggested wait before the next attempt.
        retry_after_secs: u64,
    },

    /// The provider call timed out.
    #[error("provider call timed out: {operation}")]
    Timeout {
        /// Which operation timed out.
        operation: String,
    },

    /// The requested offering does not exist or cannot be fulfilled.
    #[error("invalid offering: {offering}")]
    InvalidOffering {
        /// Offering name that was rejected.
        offering: String,
    },

    /// No instance exists for the given handle.
    #[error("unknown instance handle: {handle}")]
    UnknownHandle {
        /// Handle that was not found.
        handle: String,
    },

    /// Any other provider-side failure.
    #[error("provider error: {message}")]
    Api {
        /// Provider-reported failure description.
        message: String,
    },
}

impl ProviderError {
    /// True if a later retry of the same request may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::CircuitOpen | Self::RateLimited { .. } | Self::Timeout { .. } | Self::Api { .. }
        )
    }

    /// True if the same request can never succeed.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidOffering { .. })
    }
}
