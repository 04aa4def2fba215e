//! Node drain orchestration for the Nimbus fleet autoscaler.
//!
//! The [`DrainOrchestrator`] walks one node at a time through
//! cordon, eviction, and deprovisioning against an injected
//! [`ClusterApi`] and provisioner. It is the only component besides the
//! provisioner that performs irreversible external mutation; everything
//! upstream of it is pure decision logic.

#![forbid(unsafe_code)]

mod cluster;
mod error;
mod orchestrator;

pub use cluster::{ClusterApi, EvictError, InMemoryCluster};
pub use error::DrainError;
pub use orchestrator::{DrainOrchestrator, DrainPhase, DrainReport};
