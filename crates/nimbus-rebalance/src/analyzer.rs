//! Candidate eligibility analysis.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::debug;

use nimbus_core::{ClusterSnapshot, NodeGroup, NodeId};
use nimbus_safety::SafetyGate;

use crate::types::{CandidateNode, CandidateReason, Optimization};

/// Filters optimizer recommendations and persistently underutilized nodes
/// down to candidates that are safe to replace right now.
///
/// Pure over its inputs; nothing here has side effects. Each candidate is
/// checked individually, so one ineligible node never blocks the rest.
#[derive(Debug, Clone, Default)]
pub struct Analyzer {
    gate: SafetyGate,
}

impl Analyzer {
    /// Creates an analyzer over the given gate.
    #[must_use]
    pub fn new(gate: SafetyGate) -> Self {
        Self { gate }
    }

    /// Returns eligible candidates against the current time.
    #[must_use]
    pub fn analyze(
        &self,
        group: &NodeGroup,
        snapshot: &ClusterSnapshot,
        optimizations: &[Optimization],
        underutilized: &[NodeId],
    ) -> Vec<CandidateNode> {
        self.analyze_at(group, snapshot, optimizations, underutilized, Utc::now())
    }

    /// Returns eligible candidates at an explicit time.
    ///
    /// A degraded cluster yields no candidates at all; otherwise a node is
    /// kept only if it belongs to the group, carries no local-storage
    /// pods, and passes a single-node safety evaluation (budget, capacity,
    /// maintenance window). `underutilized` names nodes the utilization
    /// tracker has flagged; a node appearing in both lists keeps its
    /// optimizer recommendation.
    #[must_use]
    pub fn analyze_at(
        &self,
        group: &NodeGroup,
        snapshot: &ClusterSnapshot,
        optimizations: &[Optimization],
        underutilized: &[NodeId],
        now: DateTime<Utc>,
    ) -> Vec<CandidateNode> {
        if snapshot.ready_fraction() < self.gate.config().min_cluster_ready_fraction {
            debug!(group = %group.id, "cluster degraded; no rebalance candidates");
            return Vec::new();
        }

        let members: HashSet<NodeId> = snapshot
            .nodes_in_group(&group.id)
            .into_iter()
            .map(|n| n.id.clone())
            .collect();

        let mut candidates: Vec<CandidateNode> = optimizations
            .iter()
            .filter(|opt| members.contains(&opt.node))
            .filter(|opt| !self.has_local_storage(&opt.node, snapshot))
            .filter(|opt| self.passes_gate(group, &opt.node, snapshot, now))
            .map(|opt| CandidateNode {
                node: opt.node.clone(),
                replacement_offering: opt.replacement_offering.clone(),
                reason: CandidateReason::Optimization {
                    estimated_savings: opt.estimated_savings,
                },
                priority: opt.estimated_savings / opt.risk.discount(),
            })
            .collect();

        let taken: HashSet<NodeId> = candidates.iter().map(|c| c.node.clone()).collect();
        for node in underutilized {
            if taken.contains(node) || !members.contains(node) {
                continue;
            }
            if self.has_local_storage(node, snapshot) || !self.passes_gate(group, node, snapshot, now) {
                continue;
            }
            // Consolidation carries no savings estimate; it runs after
            // every optimizer recommendation.
            candidates.push(CandidateNode {
                node: node.clone(),
                replacement_offering: group.spec.preferred_offering().to_string(),
                reason: CandidateReason::Underutilized,
                priority: 0.0,
            });
        }
        candidates
    }

    // Evicting a pod with node-local storage loses its data; such nodes
    // are skipped rather than failed.
    fn has_local_storage(&self, node: &NodeId, snapshot: &ClusterSnapshot) -> bool {
        let skipped = snapshot.pods_on(node).iter().any(|p| p.has_local_storage);
        if skipped {
            debug!(node = %node, "candidate skipped: local storage present");
        }
        skipped
    }

    fn passes_gate(
        &self,
        group: &NodeGroup,
        node: &NodeId,
        snapshot: &ClusterSnapshot,
        now: DateTime<Utc>,
    ) -> bool {
        let single: HashSet<NodeId> = [node.clone()].into_iter().collect();
        let result = self.gate.evaluate_at(group, &single, snapshot, now);
        if !result.passed() {
            debug!(
                node = %node,
                failures = result.failures.len(),
                "candidate ineligible"
            );
        }
        result.passed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_core::{
        GroupId, MaintenanceWindow, NodeGroupSpec, NodeRecord, PodInfo, RebalancePolicy,
        ResourceAmounts, ScalePolicy,
    };
    use nimbus_safety::GateConfig;

    use crate::types::RiskLevel;

    fn group_id() -> GroupId {
        GroupId::new("workers")
    }

    fn group_with_policy(policy: RebalancePolicy) -> NodeGroup {
        NodeGroup::new(
            "workers",
            "Workers",
            NodeGroupSpec {
                min_nodes: 1,
                max_nodes: 10,
                offerings: vec!["m5.large".to_string()],
                scale_policy: ScalePolicy::default(),
                rebalance_policy: policy,
            },
        )
        .unwrap()
    }

    fn group() -> NodeGroup {
        group_with_policy(RebalancePolicy::default())
    }

    fn snapshot(count: usize) -> ClusterSnapshot {
        ClusterSnapshot {
            nodes: (0..count)
                .map(|i| {
                    NodeRecord::new(
                        format!("n-{i}"),
                        group_id(),
                        ResourceAmounts::new(4000, 16 << 30),
                    )
                })
                .collect(),
            ..Default::default()
        }
    }

    fn recommend(node: &str, savings: f64, risk: RiskLevel) -> Optimization {
        Optimization {
            node: NodeId::new(node),
            replacement_offering: "m7.large".to_string(),
            estimated_savings: savings,
            risk,
        }
    }

    fn analyzer() -> Analyzer {
        Analyzer::new(SafetyGate::new(GateConfig::default()).unwrap())
    }

    #[test]
    fn eligible_recommendation_becomes_candidate() {
        let candidates = analyzer().analyze(
            &group(),
            &snapshot(4),
            &[recommend("n-1", 120.0, RiskLevel::Low)],
            &[],
        );
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].node, NodeId::new("n-1"));
        assert!((candidates[0].priority - 120.0).abs() < f64::EPSILON);
    }

    #[test]
    fn risk_discounts_priority() {
        let candidates = analyzer().analyze(
            &group(),
            &snapshot(4),
            &[
                recommend("n-1", 120.0, RiskLevel::High),
                recommend("n-2", 120.0, RiskLevel::Low),
            ],
            &[],
        );
        let high = candidates.iter().find(|c| c.node == NodeId::new("n-1")).unwrap();
        let low = candidates.iter().find(|c| c.node == NodeId::new("n-2")).unwrap();
        assert!(low.priority > high.priority);
    }

    #[test]
    fn degraded_cluster_yields_nothing() {
        let mut snap = snapshot(3);
        snap.nodes.push(
            NodeRecord::new("sick-1", group_id(), ResourceAmounts::new(4000, 16 << 30))
                .with_ready(false),
        );
        snap.nodes.push(
            NodeRecord::new("sick-2", group_id(), ResourceAmounts::new(4000, 16 << 30))
                .with_ready(false),
        );

        let candidates = analyzer().analyze(
            &group(),
            &snap,
            &[recommend("n-1", 120.0, RiskLevel::Low)],
            &[],
        );
        assert!(candidates.is_empty());
    }

    #[test]
    fn local_storage_nodes_are_skipped() {
        let mut snap = snapshot(4);
        snap.pods.push(
            PodInfo::new("db-1", NodeId::new("n-1"), ResourceAmounts::new(100, 1 << 20))
                .with_local_storage(),
        );

        let candidates = analyzer().analyze(
            &group(),
            &snap,
            &[
                recommend("n-1", 500.0, RiskLevel::Low),
                recommend("n-2", 50.0, RiskLevel::Low),
            ],
            &[],
        );
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].node, NodeId::new("n-2"));
    }

    #[test]
    fn nodes_outside_the_group_are_ignored() {
        let candidates = analyzer().analyze(
            &group(),
            &snapshot(4),
            &[recommend("stranger", 500.0, RiskLevel::Low)],
            &[],
        );
        assert!(candidates.is_empty());
    }

    #[test]
    fn maintenance_window_gates_candidates() {
        let window = MaintenanceWindow::new(vec![0, 6], 2, 6).unwrap();
        let group = group_with_policy(
            RebalancePolicy::builder().maintenance_window(window).build().unwrap(),
        );
        let monday = DateTime::parse_from_rfc3339("2024-01-15T03:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let saturday = DateTime::parse_from_rfc3339("2024-01-13T03:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let recs = [recommend("n-1", 120.0, RiskLevel::Low)];

        assert!(analyzer().analyze_at(&group, &snapshot(4), &recs, &[], monday).is_empty());
        assert_eq!(analyzer().analyze_at(&group, &snapshot(4), &recs, &[], saturday).len(), 1);
    }

    #[test]
    fn underutilized_node_becomes_candidate() {
        let candidates =
            analyzer().analyze(&group(), &snapshot(4), &[], &[NodeId::new("n-1")]);

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].node, NodeId::new("n-1"));
        assert_eq!(candidates[0].reason, CandidateReason::Underutilized);
        // Consolidation lands on the group's preferred offering.
        assert_eq!(candidates[0].replacement_offering, "m5.large");
        assert!(candidates[0].priority.abs() < f64::EPSILON);
    }

    #[test]
    fn recommendation_wins_over_underutilization_for_the_same_node() {
        let candidates = analyzer().analyze(
            &group(),
            &snapshot(4),
            &[recommend("n-1", 120.0, RiskLevel::Low)],
            &[NodeId::new("n-1"), NodeId::new("n-2")],
        );

        assert_eq!(candidates.len(), 2);
        assert!(matches!(
            candidates[0].reason,
            CandidateReason::Optimization { .. }
        ));
        assert_eq!(candidates[1].node, NodeId::new("n-2"));
        assert_eq!(candidates[1].reason, CandidateReason::Underutilized);
    }
}
