//! Scale decisions and group state for the Nimbus fleet autoscaler.
//!
//! The [`ScaleEngine`] turns a cluster snapshot plus utilization history
//! into a [`ScaleDecision`] per node group, honoring stabilization
//! windows, per-direction cooldowns, and the safety gate. The
//! [`GroupStore`] holds node groups and patches their status with
//! optimistic locking; the [`FleetManager`] serializes work per group and
//! coalesces redundant triggers.

#![forbid(unsafe_code)]

mod engine;
mod error;
mod manager;
mod store;

pub use engine::{EngineConfig, ScaleDecision, ScaleEngine};
pub use error::ScalerError;
pub use manager::{ActionGuard, FleetManager, ReconcileOutcome};
pub use store::GroupStore;
