//! Batch planning over eligible candidates.

use tracing::debug;

use nimbus_core::{NodeGroup, RebalancePolicy};

use crate::types::{Batch, BatchRollback, CandidateNode, RebalancePlan, RollbackPlan};

/// Partitions candidates into ordered batches with per-batch rollbacks.
#[derive(Debug, Clone, Copy, Default)]
pub struct Planner;

impl Planner {
    /// Creates a planner.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Builds a plan for the group's eligible candidates.
    ///
    /// Candidates are ordered by priority descending and chunked into
    /// batches no larger than the policy's `max_concurrent`. An empty
    /// candidate list yields an empty plan, which executes as a
    /// successful no-op.
    #[must_use]
    pub fn plan(&self, group: &NodeGroup, mut candidates: Vec<CandidateNode>) -> RebalancePlan {
        if candidates.is_empty() {
            return RebalancePlan::empty(group.id.clone());
        }

        let policy = &group.spec.rebalance_policy;
        candidates.sort_by(|a, b| b.priority.total_cmp(&a.priority));

        let batch_size = policy.max_concurrent.max(1) as usize;
        let batches: Vec<Batch> = candidates
            .chunks(batch_size)
            .enumerate()
            .map(|(index, chunk)| Batch {
                index,
                candidates: chunk.to_vec(),
            })
            .collect();

        let rollback = RollbackPlan {
            batches: batches
                .iter()
                .map(|b| BatchRollback {
                    batch: b.index,
                    preserve: b.candidates.iter().map(|c| c.node.clone()).collect(),
                })
                .collect(),
        };

        let statuses = vec![crate::types::BatchStatus::Pending; batches.len()];
        let estimated_duration = Self::estimate_duration(policy, &batches);
        debug!(
            group = %group.id,
            batches = batches.len(),
            candidates = candidates.len(),
            "rebalance plan built"
        );
        RebalancePlan {
            group: group.id.clone(),
            batches,
            rollback,
            estimated_duration,
            statuses,
        }
    }

    // Worst case per batch: full provision wait plus a full drain per
    // candidate.
    fn estimate_duration(policy: &RebalancePolicy, batches: &[Batch]) -> std::time::Duration {
        batches
            .iter()
            .map(|b| policy.provision_timeout + policy.drain_timeout * b.candidates.len() as u32)
            .sum()
    }
}
