//! Cloud provisioning contract for the Nimbus fleet autoscaler.
//!
//! The control loop never talks to a cloud API directly. It depends on the
//! [`Provisioner`] capability, whose real implementation wraps the cloud
//! client with retry, backoff, and a circuit breaker. When the breaker is
//! open, calls fail fast with [`ProviderError::CircuitOpen`] and the caller
//! must surface the error for the next reconcile rather than retry inline.

#![forbid(unsafe_code)]

mod error;
mod provisioner;
mod types;

pub use error::{ProviderError, Result};
pub use provisioner::{InMemoryProvisioner, Provisioner};
pub use types::{NodeHandle, OfferingSpec, ProvisionPhase};
