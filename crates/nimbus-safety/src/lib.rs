//! Pre-disruption safety checks for the Nimbus fleet autoscaler.
//!
//! The [`SafetyGate`] is a pure evaluator: given a node group, a proposed
//! set of nodes to drain, and a cluster snapshot, it runs five independent
//! checks and returns a [`SafetyCheckResult`] listing every failure. It
//! never mutates anything; the scale engine and the rebalance pipeline
//! route all disruptive actions through it before touching the drain
//! orchestrator.

#![forbid(unsafe_code)]

mod error;
mod gate;

pub use error::GateError;
pub use gate::{CheckFailure, CheckKind, GateConfig, SafetyCheckResult, SafetyGate};
