//! Error types for the core domain model.

use thiserror::Error;

use crate::types::{NodeId, NodePhase};

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur while constructing or mutating domain types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Invalid scaling policy configuration.
    #[error("invalid scale policy: {reason}")]
    InvalidScalePolicy {
        /// Description of why the policy is invalid.
        reason: String,
    },

    /// Invalid rebalance policy configuration.
    #[error("invalid rebalance policy: {reason}")]
    InvalidRebalancePolicy {
        /// Description of why the policy is invalid.
        reason: String,
    },

    /// Invalid node group configuration.
    #[error("invalid node group: {reason}")]
    InvalidNodeGroup {
        /// Description of why the group is invalid.
        reason: String,
    },

    /// Invalid maintenance window definition.
    #[error("invalid maintenance window: {reason}")]
    InvalidMaintenanceWindow {
        /// Description of why the window is invalid.
        reason: String,
    },

    /// A node phase transition that the lifecycle does not permit.
    #[error("illegal node phase transition: {from:?} -> {to:?}")]
    IllegalTransition {
        /// Phase the node is currently in.
        from: NodePhase,
        /// Phase the transition attempted to reach.
        to: NodePhase,
    },

    /// A node id with no registry entry.
    #[error("unknown managed node: {node}")]
    UnknownNode {
        /// The missing node.
        node: NodeId,
    },
}
