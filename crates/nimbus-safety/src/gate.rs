//! The safety gate and its individual checks.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use nimbus_core::{ClusterSnapshot, NodeGroup, NodeId};

use crate::error::GateError;

/// The independent check families the gate runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckKind {
    /// Cluster-wide ready fraction must sit above the floor.
    ClusterHealth,
    /// The group must stay above its minimum after the removal.
    NodeGroupHealth,
    /// Disruption budgets covering affected pods must not be exceeded.
    PodDisruption,
    /// Remaining cluster capacity must absorb the evicted requests.
    ResourceCapacity,
    /// The action must fall inside the maintenance window, if any.
    Timing,
}

impl std::fmt::Display for CheckKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ClusterHealth => "cluster-health",
            Self::NodeGroupHealth => "node-group-health",
            Self::PodDisruption => "pod-disruption",
            Self::ResourceCapacity => "resource-capacity",
            Self::Timing => "timing",
        };
        write!(f, "{name}")
    }
}

/// One failed check with an operator-readable reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckFailure {
    /// Which check failed.
    pub kind: CheckKind,
    /// Why it failed.
    pub reason: String,
}

impl CheckFailure {
    fn new(kind: CheckKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

/// Outcome of one gate evaluation.
///
/// Every failing check is enumerated so operators can diagnose from a
/// single evaluation. Results are ephemeral and recomputed per decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SafetyCheckResult {
    /// All failing checks, empty when the action is safe.
    pub failures: Vec<CheckFailure>,
}

impl SafetyCheckResult {
    /// Whether every check passed.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }

    /// Whether the given check kind failed.
    #[must_use]
    pub fn failed(&self, kind: CheckKind) -> bool {
        self.failures.iter().any(|f| f.kind == kind)
    }

    fn push(&mut self, kind: CheckKind, reason: impl Into<String>) {
        self.failures.push(CheckFailure::new(kind, reason));
    }
}

/// Tunable floors for the gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Minimum fraction of cluster nodes that must be ready for any
    /// disruptive action to proceed.
    pub min_cluster_ready_fraction: f64,
    /// Minimum ready fraction a group must retain after the removal.
    pub min_group_ready_fraction: f64,
    /// Simultaneous drain candidates permitted when no disruption budget
    /// covers any affected pod.
    pub no_budget_max_candidates: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_cluster_ready_fraction: 0.75,
            min_group_ready_fraction: 0.5,
            no_budget_max_candidates: 2,
        }
    }
}

impl GateConfig {
    /// Validates this configuration.
    ///
    /// # Errors
    ///
    /// Returns error if either fraction falls outside `[0, 1]`.
    pub fn validate(&self) -> Result<(), GateError> {
        for (name, value) in [
            ("min_cluster_ready_fraction", self.min_cluster_ready_fraction),
            ("min_group_ready_fraction", self.min_group_ready_fraction),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(GateError::InvalidConfig {
                    reason: format!("{name} must be within [0, 1], got {value}"),
                });
            }
        }
        Ok(())
    }
}

/// Side-effect-free evaluator run before every disruptive action.
#[derive(Debug, Clone, Default)]
pub struct SafetyGate {
    config: GateConfig,
}

impl SafetyGate {
    /// Creates a gate with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid.
    pub fn new(config: GateConfig) -> Result<Self, GateError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Returns the gate configuration.
    #[must_use]
    pub const fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Evaluates the proposed drain set against the current time.
    #[must_use]
    pub fn evaluate(
        &self,
        group: &NodeGroup,
        drain_set: &HashSet<NodeId>,
        snapshot: &ClusterSnapshot,
    ) -> SafetyCheckResult {
        self.evaluate_at(group, drain_set, snapshot, Utc::now())
    }

    /// Evaluates the proposed drain set at an explicit time.
    ///
    /// All five checks run unconditionally; the result carries every
    /// failure, not just the first.
    #[must_use]
    pub fn evaluate_at(
        &self,
        group: &NodeGroup,
        drain_set: &HashSet<NodeId>,
        snapshot: &ClusterSnapshot,
        now: DateTime<Utc>,
    ) -> SafetyCheckResult {
        let mut result = SafetyCheckResult::default();

        self.check_cluster_health(snapshot, &mut result);
        self.check_group_health(group, drain_set, snapshot, &mut result);
        self.check_pod_disruption(group, drain_set, snapshot, &mut result);
        Self::check_resource_capacity(drain_set, snapshot, &mut result);
        Self::check_timing(group, now, &mut result);

        if !result.passed() {
            debug!(
                group = %group.id,
                candidates = drain_set.len(),
                failures = result.failures.len(),
                "safety gate blocked action"
            );
        }
        result
    }

    fn check_cluster_health(&self, snapshot: &ClusterSnapshot, result: &mut SafetyCheckResult) {
        let ready = snapshot.ready_fraction();
        if ready < self.config.min_cluster_ready_fraction {
            result.push(
                CheckKind::ClusterHealth,
                format!(
                    "cluster ready fraction {ready:.2} below floor {:.2}",
                    self.config.min_cluster_ready_fraction
                ),
            );
        }
    }

    fn check_group_health(
        &self,
        group: &NodeGroup,
        drain_set: &HashSet<NodeId>,
        snapshot: &ClusterSnapshot,
        result: &mut SafetyCheckResult,
    ) {
        let members = snapshot.nodes_in_group(&group.id);
        let remaining_total = members
            .iter()
            .filter(|n| !drain_set.contains(&n.id))
            .count();
        let remaining_ready = members
            .iter()
            .filter(|n| n.ready && !drain_set.contains(&n.id))
            .count();

        if (remaining_ready as u32) < group.spec.min_nodes {
            result.push(
                CheckKind::NodeGroupHealth,
                format!(
                    "removal leaves {remaining_ready} ready nodes, below min_nodes {}",
                    group.spec.min_nodes
                ),
            );
        }
        if remaining_total > 0 {
            let fraction = remaining_ready as f64 / remaining_total as f64;
            if fraction < self.config.min_group_ready_fraction {
                result.push(
                    CheckKind::NodeGroupHealth,
                    format!(
                        "removal leaves group ready fraction {fraction:.2} below floor {:.2}",
                        self.config.min_group_ready_fraction
                    ),
                );
            }
        }
    }

    fn check_pod_disruption(
        &self,
        group: &NodeGroup,
        drain_set: &HashSet<NodeId>,
        snapshot: &ClusterSnapshot,
        result: &mut SafetyCheckResult,
    ) {
        if !group.spec.rebalance_policy.respect_disruption_budgets {
            return;
        }

        let affected: Vec<_> = snapshot
            .pods
            .iter()
            .filter(|p| p.node.as_ref().is_some_and(|n| drain_set.contains(n)))
            .collect();

        let mut any_budget_applies = false;
        for budget in &snapshot.budgets {
            let covered = affected.iter().filter(|p| budget.covers(p)).count();
            if covered == 0 {
                continue;
            }
            any_budget_applies = true;
            if covered as u32 > budget.allowed_disruptions {
                result.push(
                    CheckKind::PodDisruption,
                    format!(
                        "budget {} allows {} disruptions but {} covered pods would be evicted",
                        budget.name, budget.allowed_disruptions, covered
                    ),
                );
            }
        }

        // No budget in play is not a free pass; cap the batch size.
        if !any_budget_applies && drain_set.len() > self.config.no_budget_max_candidates {
            result.push(
                CheckKind::PodDisruption,
                format!(
                    "{} candidates exceed the no-budget cap of {}",
                    drain_set.len(),
                    self.config.no_budget_max_candidates
                ),
            );
        }
    }

    fn check_resource_capacity(
        drain_set: &HashSet<NodeId>,
        snapshot: &ClusterSnapshot,
        result: &mut SafetyCheckResult,
    ) {
        let displaced = snapshot.requests_on(drain_set);
        let remaining = snapshot.allocatable_excluding(drain_set);
        if !displaced.fits_within(remaining) {
            result.push(
                CheckKind::ResourceCapacity,
                format!(
                    "displaced requests ({}m CPU, {} bytes) exceed remaining capacity \
                     ({}m CPU, {} bytes)",
                    displaced.cpu_millis,
                    displaced.memory_bytes,
                    remaining.cpu_millis,
                    remaining.memory_bytes
                ),
            );
        }
    }

    fn check_timing(group: &NodeGroup, now: DateTime<Utc>, result: &mut SafetyCheckResult) {
        if let Some(window) = &group.spec.rebalance_policy.maintenance_window {
            if !window.permits_at(now) {
                result.push(
                    CheckKind::Timing,
                    format!("outside maintenance window at {now}"),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_core::{
        DisruptionBudget, MaintenanceWindow, NodeGroupSpec, NodeRecord, PodInfo, RebalancePolicy,
        ResourceAmounts, ScalePolicy,
    };

    fn group_with(min_nodes: u32, policy: RebalancePolicy) -> NodeGroup {
        NodeGroup::new(
            "workers",
            "Workers",
            NodeGroupSpec {
                min_nodes,
                max_nodes: 20,
                offerings: vec!["m5.large".to_string()],
                scale_policy: ScalePolicy::default(),
                rebalance_policy: policy,
            },
        )
        .unwrap()
    }

    fn group() -> NodeGroup {
        group_with(1, RebalancePolicy::default())
    }

    fn node(id: &str, ready: bool) -> NodeRecord {
        NodeRecord::new(
            id,
            nimbus_core::GroupId::new("workers"),
            ResourceAmounts::new(4000, 16 << 30),
        )
        .with_ready(ready)
    }

    fn healthy_snapshot(count: usize) -> ClusterSnapshot {
        ClusterSnapshot {
            nodes: (0..count).map(|i| node(&format!("n-{i}"), true)).collect(),
            ..Default::default()
        }
    }

    fn drain(ids: &[&str]) -> HashSet<NodeId> {
        ids.iter().map(|id| NodeId::new(*id)).collect()
    }

    fn gate() -> SafetyGate {
        SafetyGate::new(GateConfig::default()).unwrap()
    }

    mod config_tests {
        use super::*;

        #[test]
        fn default_config_is_valid() {
            assert!(GateConfig::default().validate().is_ok());
        }

        #[test]
        fn fraction_out_of_range_rejected() {
            let config = GateConfig {
                min_cluster_ready_fraction: 1.5,
                ..GateConfig::default()
            };
            assert!(matches!(
                SafetyGate::new(config),
                Err(GateError::InvalidConfig { .. })
            ));
        }
    }

    mod cluster_health_tests {
        use super::*;

        #[test]
        fn healthy_cluster_passes() {
            let result = gate().evaluate(&group(), &drain(&["n-0"]), &healthy_snapshot(8));
            assert!(result.passed());
        }

        #[test]
        fn degraded_cluster_blocks_everything() {
            // 3 of 5 ready: 60%, below the 75% floor.
            let mut snapshot = healthy_snapshot(3);
            snapshot.nodes.push(node("n-3", false));
            snapshot.nodes.push(node("n-4", false));

            let result = gate().evaluate(&group(), &drain(&["n-0"]), &snapshot);
            assert!(result.failed(CheckKind::ClusterHealth));
        }
    }

    mod group_health_tests {
        use super::*;

        #[test]
        fn removal_below_min_nodes_fails() {
            let group = group_with(2, RebalancePolicy::default());
            let result = gate().evaluate_at(
                &group,
                &drain(&["n-0", "n-1"]),
                &healthy_snapshot(3),
                Utc::now(),
            );
            assert!(result.failed(CheckKind::NodeGroupHealth));
        }

        #[test]
        fn removal_at_min_nodes_passes() {
            let group = group_with(2, RebalancePolicy::default());
            let result = gate().evaluate(&group, &drain(&["n-0"]), &healthy_snapshot(3));
            assert!(result.passed());
        }

        #[test]
        fn low_ready_fraction_after_removal_fails() {
            // 4 total, one not ready. Removing two ready nodes leaves
            // 1 ready of 2 remaining, exactly at the 50% floor; removing
            // the ready ones around a second unready node dips below it.
            let mut snapshot = healthy_snapshot(2);
            snapshot.nodes.push(node("sick-1", false));
            snapshot.nodes.push(node("sick-2", false));

            let result = gate().evaluate(&group(), &drain(&["n-0", "n-1"]), &snapshot);
            assert!(result.failed(CheckKind::NodeGroupHealth));
        }
    }

    mod pod_disruption_tests {
        use super::*;
        use test_case::test_case;

        fn labeled_pod(name: &str, node_id: &str) -> PodInfo {
            PodInfo::new(name, NodeId::new(node_id), ResourceAmounts::new(100, 1 << 20))
                .with_label("app", "web")
        }

        #[test_case(1, true; "one candidate passes without budgets")]
        #[test_case(2, true; "two candidates pass without budgets")]
        #[test_case(3, false; "three candidates blocked without budgets")]
        fn no_budget_default_caps_batch(candidates: usize, expect_pass: bool) {
            let snapshot = healthy_snapshot(10);
            let set: HashSet<NodeId> = (0..candidates).map(|i| NodeId::new(format!("n-{i}"))).collect();

            let result = gate().evaluate(&group(), &set, &snapshot);
            assert_eq!(!result.failed(CheckKind::PodDisruption), expect_pass);
        }

        #[test]
        fn budget_violation_fails_with_named_budget() {
            let mut snapshot = healthy_snapshot(8);
            snapshot.pods = vec![labeled_pod("web-1", "n-0"), labeled_pod("web-2", "n-1")];
            snapshot.budgets = vec![DisruptionBudget::new("web-pdb", "app", "web", 1)];

            let result = gate().evaluate(&group(), &drain(&["n-0", "n-1"]), &snapshot);
            assert!(result.failed(CheckKind::PodDisruption));
            let failure = result
                .failures
                .iter()
                .find(|f| f.kind == CheckKind::PodDisruption)
                .unwrap();
            assert!(failure.reason.contains("web-pdb"));
        }

        #[test]
        fn budget_within_allowance_passes() {
            let mut snapshot = healthy_snapshot(8);
            snapshot.pods = vec![labeled_pod("web-1", "n-0"), labeled_pod("web-2", "n-1")];
            snapshot.budgets = vec![DisruptionBudget::new("web-pdb", "app", "web", 2)];

            let result = gate().evaluate(&group(), &drain(&["n-0", "n-1"]), &snapshot);
            assert!(result.passed());
        }

        #[test]
        fn budgets_ignored_when_policy_disables_them() {
            let group = group_with(
                1,
                RebalancePolicy::builder()
                    .respect_disruption_budgets(false)
                    .build()
                    .unwrap(),
            );
            let mut snapshot = healthy_snapshot(8);
            snapshot.pods = vec![labeled_pod("web-1", "n-0"), labeled_pod("web-2", "n-1")];
            snapshot.budgets = vec![DisruptionBudget::new("web-pdb", "app", "web", 0)];

            let result = gate().evaluate(&group, &drain(&["n-0", "n-1"]), &snapshot);
            assert!(!result.failed(CheckKind::PodDisruption));
        }
    }

    mod resource_capacity_tests {
        use super::*;

        #[test]
        fn displaced_requests_must_fit_remaining_capacity() {
            let mut snapshot = ClusterSnapshot {
                nodes: vec![node("n-0", true), node("n-1", true)],
                ..Default::default()
            };
            // n-0 carries more than n-1 can absorb.
            snapshot.pods = vec![PodInfo::new(
                "big",
                NodeId::new("n-0"),
                ResourceAmounts::new(6000, 1 << 30),
            )];

            let result = gate().evaluate(&group(), &drain(&["n-0"]), &snapshot);
            assert!(result.failed(CheckKind::ResourceCapacity));
        }

        #[test]
        fn fitting_requests_pass() {
            let mut snapshot = healthy_snapshot(4);
            snapshot.pods = vec![PodInfo::new(
                "small",
                NodeId::new("n-0"),
                ResourceAmounts::new(500, 1 << 28),
            )];

            let result = gate().evaluate(&group(), &drain(&["n-0"]), &snapshot);
            assert!(result.passed());
        }
    }

    mod timing_tests {
        use super::*;

        fn at(rfc3339: &str) -> DateTime<Utc> {
            DateTime::parse_from_rfc3339(rfc3339)
                .unwrap()
                .with_timezone(&Utc)
        }

        #[test]
        fn outside_window_fails_timing_only() {
            let window = MaintenanceWindow::new(vec![0, 6], 2, 6).unwrap();
            let group = group_with(
                1,
                RebalancePolicy::builder().maintenance_window(window).build().unwrap(),
            );

            // Monday 03:00, wrong day.
            let result = gate().evaluate_at(
                &group,
                &drain(&["n-0"]),
                &healthy_snapshot(6),
                at("2024-01-15T03:00:00Z"),
            );
            assert!(result.failed(CheckKind::Timing));
            assert_eq!(result.failures.len(), 1);
        }

        #[test]
        fn inside_window_passes() {
            let window = MaintenanceWindow::new(vec![0, 6], 2, 6).unwrap();
            let group = group_with(
                1,
                RebalancePolicy::builder().maintenance_window(window).build().unwrap(),
            );

            // Saturday 03:00.
            let result = gate().evaluate_at(
                &group,
                &drain(&["n-0"]),
                &healthy_snapshot(6),
                at("2024-01-13T03:00:00Z"),
            );
            assert!(result.passed());
        }
    }

    mod aggregate_tests {
        use super::*;

        #[test]
        fn all_failures_are_enumerated() {
            // Degraded cluster, removal below min, oversized no-budget batch.
            let group = group_with(3, RebalancePolicy::default());
            let mut snapshot = healthy_snapshot(3);
            snapshot.nodes.push(node("sick-1", false));
            snapshot.nodes.push(node("sick-2", false));

            let result = gate().evaluate(&group, &drain(&["n-0", "n-1", "n-2"]), &snapshot);
            assert!(result.failed(CheckKind::ClusterHealth));
            assert!(result.failed(CheckKind::NodeGroupHealth));
            assert!(result.failed(CheckKind::PodDisruption));
            assert!(result.failures.len() >= 3);
        }

        #[test]
        fn empty_drain_set_is_safe() {
            let result = gate().evaluate(&group(), &HashSet::new(), &healthy_snapshot(4));
            assert!(result.passed());
        }
    }
}
