//! Candidate, plan, and rollback types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use nimbus_core::{GroupId, NodeId};

/// Why a node became a rebalance candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CandidateReason {
    /// Sustained underutilization flagged by the scale engine.
    Underutilized,
    /// A cost optimizer recommendation.
    Optimization {
        /// Estimated monthly savings in dollars.
        estimated_savings: f64,
    },
    /// An operator asked for the replacement explicitly.
    Manual,
}

/// Risk classification attached to an optimizer recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    /// Safe to act on freely.
    Low,
    /// Act with standard batching.
    Medium,
    /// Act only when nothing cheaper is available.
    High,
}

impl RiskLevel {
    /// Discount factor applied to savings when scoring priority.
    #[must_use]
    pub const fn discount(self) -> f64 {
        match self {
            Self::Low => 1.0,
            Self::Medium => 2.0,
            Self::High => 4.0,
        }
    }
}

/// One recommendation consumed from the external cost optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Optimization {
    /// Node the optimizer wants replaced.
    pub node: NodeId,
    /// Offering to replace it with.
    pub replacement_offering: String,
    /// Estimated monthly savings in dollars.
    pub estimated_savings: f64,
    /// Risk classification of the swap.
    pub risk: RiskLevel,
}

/// A node selected for replacement, with ordering metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateNode {
    /// The node to replace.
    pub node: NodeId,
    /// Offering for the replacement node.
    pub replacement_offering: String,
    /// Why this node was selected.
    pub reason: CandidateReason,
    /// Execution priority; higher runs earlier.
    pub priority: f64,
}

/// Candidates replaced together, bounded by the policy's `max_concurrent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    /// Zero-based position in the plan.
    pub index: usize,
    /// The candidates in this batch.
    pub candidates: Vec<CandidateNode>,
}

/// How to restore the pre-batch state if a batch fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRollback {
    /// The batch this rollback covers.
    pub batch: usize,
    /// Old nodes that must be left untouched on failure.
    pub preserve: Vec<NodeId>,
}

/// Per-batch rollback actions for a whole plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RollbackPlan {
    /// One entry per batch, in batch order.
    pub batches: Vec<BatchRollback>,
}

/// Execution status of one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BatchStatus {
    /// Not started.
    #[default]
    Pending,
    /// Replacements or drains in flight.
    Running,
    /// Replacements ready and old nodes drained.
    Succeeded,
    /// A step failed and rollback could not release every replacement;
    /// stranded instances need operator attention.
    Failed,
    /// Failed and its partial replacements were deprovisioned.
    RolledBack,
}

/// An ordered, immutable batch sequence with per-batch status.
///
/// Built by the [`Planner`](crate::Planner), consumed once by the
/// executor; only the statuses mutate after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalancePlan {
    /// The group this plan rebalances.
    pub group: GroupId,
    /// Batches in execution order.
    pub batches: Vec<Batch>,
    /// Rollback actions, one per batch.
    pub rollback: RollbackPlan,
    /// Rough upper bound on wall-clock execution time.
    pub estimated_duration: Duration,
    /// Execution status per batch, indexed like `batches`.
    pub statuses: Vec<BatchStatus>,
}

impl RebalancePlan {
    /// A plan that replaces nothing.
    #[must_use]
    pub fn empty(group: GroupId) -> Self {
        Self {
            group,
            batches: Vec::new(),
            rollback: RollbackPlan::default(),
            estimated_duration: Duration::ZERO,
            statuses: Vec::new(),
        }
    }

    /// Whether the plan has nothing to do.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Total candidates across all batches.
    #[must_use]
    pub fn candidate_count(&self) -> usize {
        self.batches.iter().map(|b| b.candidates.len()).sum()
    }
}
