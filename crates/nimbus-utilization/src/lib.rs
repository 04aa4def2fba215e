//! Per-node utilization tracking for the Nimbus fleet autoscaler.
//!
//! The [`UtilizationTracker`] keeps a bounded sliding window of CPU and
//! memory samples per node, answers "is this node underutilized", and
//! garbage-collects windows for nodes that have left the cluster. It is
//! the only structure in the fleet shared between the metrics collector
//! (writer) and the decision engines (readers); reads always copy out.

#![forbid(unsafe_code)]

mod error;
mod tracker;

pub use error::{SourceError, TrackerError};
pub use tracker::{
    CycleOutcome, SampleSource, TrackerConfig, UtilizationSample, UtilizationTracker,
};
