//! Shared domain model for the Nimbus fleet autoscaler.
//!
//! This crate defines the types every other Nimbus crate builds on:
//! - [`NodeGroup`]: declarative spec + status for a homogeneous node set
//! - [`ManagedNode`]: one cloud-backed node with a checked phase lifecycle
//! - [`ScalePolicy`] / [`RebalancePolicy`]: validated scaling configuration
//! - [`ClusterSnapshot`]: a point-in-time view of nodes, pods, and budgets
//! - [`FleetEvent`]: structured events for observability collaborators

#![forbid(unsafe_code)]

mod error;
mod event;
mod policy;
mod registry;
mod snapshot;
mod types;

pub use error::{CoreError, Result};
pub use event::{EventRecorder, EventSink, FleetEvent, NullSink};
pub use registry::NodeRegistry;
pub use policy::{
    MaintenanceWindow, RebalancePolicy, RebalancePolicyBuilder, ScalePolicy, ScalePolicyBuilder,
};
pub use snapshot::{ClusterSnapshot, DisruptionBudget, NodeRecord, PodInfo, ResourceAmounts};
pub use types::{GroupId, ManagedNode, NodeGroup, NodeGroupSpec, NodeGroupStatus, NodeId, NodePhase};
