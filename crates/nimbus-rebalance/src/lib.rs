//! Multi-node rebalancing for the Nimbus fleet autoscaler.
//!
//! The pipeline runs in three stages. The [`Analyzer`] filters cost
//! optimizer recommendations down to candidates that are safe to touch
//! right now. The [`Planner`] partitions candidates into ordered batches
//! with a synthesized rollback per batch. The [`RebalanceExecutor`] walks
//! the batches in order, running each batch's replacements concurrently:
//! every replacement is provisioned and ready before the node it replaces
//! is drained. A failed batch is rolled back and halts the plan, leaving
//! earlier batches in place.

#![forbid(unsafe_code)]

mod analyzer;
mod executor;
mod planner;
mod types;

pub use analyzer::Analyzer;
pub use executor::{ExecutionReport, ExecutionResult, ReadinessProbe, RebalanceExecutor};
pub use planner::Planner;
pub use types::{
    Batch, BatchRollback, BatchStatus, CandidateNode, CandidateReason, Optimization,
    RebalancePlan, RiskLevel, RollbackPlan,
};
