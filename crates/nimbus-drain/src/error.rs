//! Error types for drain orchestration.

use nimbus_core::NodeId;
use nimbus_provider::ProviderError;
use thiserror::Error;

/// Errors that can occur while draining a node.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DrainError {
    /// Pods did not terminate within the drain timeout. The node is left
    /// cordoned for operator inspection.
    #[error("drain of node {node} timed out; node left cordoned")]
    Timeout {
        /// The node that timed out.
        node: NodeId,
    },

    /// Eviction retries were exhausted against a disruption budget.
    #[error("eviction of pod {pod} on node {node} blocked by disruption budget after {attempts} attempts")]
    BudgetExhausted {
        /// The node being drained.
        node: NodeId,
        /// The pod whose eviction kept failing.
        pod: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// The cluster API rejected an operation.
    #[error("cluster API error on node {node}: {message}")]
    ClusterApi {
        /// The node being drained.
        node: NodeId,
        /// Description of the failure.
        message: String,
    },

    /// The provisioning collaborator failed; the node must be marked failed.
    #[error("provider error while deprovisioning: {0}")]
    Provider(#[from] ProviderError),
}
