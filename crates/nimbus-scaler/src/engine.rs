//! The per-group scale decision engine.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use nimbus_core::{ClusterSnapshot, GroupId, NodeGroup, NodeId, ResourceAmounts};
use nimbus_safety::SafetyGate;
use nimbus_utilization::UtilizationTracker;

/// Step bounds for one decision cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on nodes added in one decision.
    pub max_step_up: u32,
    /// Upper bound on nodes removed in one decision.
    pub max_step_down: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_step_up: 4,
            max_step_down: 2,
        }
    }
}

/// Outcome of one evaluation cycle for a group.
///
/// Scale-up and scale-down are mutually exclusive within a cycle;
/// scale-up wins when both signals fire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScaleDecision {
    /// Add nodes up to `target`.
    ScaleUp {
        /// Node count to converge toward.
        target: u32,
        /// Human-readable trigger.
        reason: String,
    },
    /// Remove the named victims, converging to `target`.
    ScaleDown {
        /// Node count to converge toward.
        target: u32,
        /// Nodes to drain, lowest utilization first.
        victims: Vec<NodeId>,
        /// Human-readable trigger.
        reason: String,
    },
    /// Take no action this cycle.
    Hold {
        /// Why nothing happened.
        reason: String,
    },
}

impl ScaleDecision {
    fn hold(reason: impl Into<String>) -> Self {
        Self::Hold {
            reason: reason.into(),
        }
    }
}

/// Turns cluster state and utilization history into scale decisions.
///
/// Scale-up is gated only by the group's max size and cooldown;
/// scale-down additionally requires the underutilization signal to hold
/// for the stabilization window and the full safety gate to pass.
pub struct ScaleEngine {
    config: EngineConfig,
    gate: SafetyGate,
    tracker: Arc<UtilizationTracker>,
    // When each group's scale-down signal was first observed.
    pending_down: Mutex<HashMap<GroupId, DateTime<Utc>>>,
}

impl ScaleEngine {
    /// Creates an engine over the given gate and tracker.
    #[must_use]
    pub fn new(config: EngineConfig, gate: SafetyGate, tracker: Arc<UtilizationTracker>) -> Self {
        Self {
            config,
            gate,
            tracker,
            pending_down: Mutex::new(HashMap::new()),
        }
    }

    /// Evaluates the group against the current time.
    #[must_use]
    pub fn evaluate(&self, group: &NodeGroup, snapshot: &ClusterSnapshot) -> ScaleDecision {
        self.evaluate_at(group, snapshot, Utc::now())
    }

    /// Evaluates the group at an explicit time.
    #[must_use]
    pub fn evaluate_at(
        &self,
        group: &NodeGroup,
        snapshot: &ClusterSnapshot,
        now: DateTime<Utc>,
    ) -> ScaleDecision {
        let members = snapshot.nodes_in_group(&group.id);
        let current = members.len() as u32;

        // Availability over cost: pending demand preempts any scale-down.
        if !snapshot.pending_pods.is_empty() {
            self.pending_down.lock().remove(&group.id);
            return self.evaluate_scale_up(group, snapshot, current, now);
        }

        self.evaluate_scale_down(group, snapshot, current, now)
    }

    fn evaluate_scale_up(
        &self,
        group: &NodeGroup,
        snapshot: &ClusterSnapshot,
        current: u32,
        now: DateTime<Utc>,
    ) -> ScaleDecision {
        if current >= group.spec.max_nodes {
            return ScaleDecision::hold("pending pods but group is at max_nodes");
        }
        if !group.can_scale_up(now) {
            return ScaleDecision::hold("pending pods but scale-up cooldown active");
        }

        let headroom = group.spec.max_nodes - current;
        let needed = Self::nodes_needed(snapshot)
            .min(self.config.max_step_up)
            .min(headroom);
        let target = current + needed;
        info!(
            group = %group.id,
            current,
            target,
            pending = snapshot.pending_pods.len(),
            "scale-up decided"
        );
        ScaleDecision::ScaleUp {
            target,
            reason: format!("{} pending pods", snapshot.pending_pods.len()),
        }
    }

    fn evaluate_scale_down(
        &self,
        group: &NodeGroup,
        snapshot: &ClusterSnapshot,
        current: u32,
        now: DateTime<Utc>,
    ) -> ScaleDecision {
        let policy = &group.spec.scale_policy;
        let mut candidates: Vec<(f64, DateTime<Utc>, NodeId)> = snapshot
            .nodes_in_group(&group.id)
            .into_iter()
            .filter(|n| n.ready)
            .filter(|n| {
                self.tracker.underutilized(
                    &n.id,
                    policy.cpu_underutil_percent,
                    policy.memory_underutil_percent,
                )
            })
            .map(|n| {
                let utilization = self
                    .tracker
                    .average(&n.id)
                    .map_or(f64::MAX, |(cpu, mem)| (cpu + mem) / 2.0);
                (utilization, n.created_at, n.id.clone())
            })
            .collect();

        if candidates.is_empty() {
            self.pending_down.lock().remove(&group.id);
            return ScaleDecision::hold("no sustained underutilization");
        }

        // The signal must hold continuously for the stabilization window.
        let first_seen = *self
            .pending_down
            .lock()
            .entry(group.id.clone())
            .or_insert(now);
        let window = chrono::Duration::from_std(policy.stabilization_window)
            .unwrap_or_else(|_| chrono::Duration::seconds(600));
        if now - first_seen < window {
            return ScaleDecision::hold("underutilization signal still stabilizing");
        }

        if !group.can_scale_down(now) {
            return ScaleDecision::hold("scale-down cooldown active");
        }

        let removable = (candidates.len() as u32)
            .min(current.saturating_sub(group.spec.min_nodes))
            .min(self.config.max_step_down);
        if removable == 0 {
            return ScaleDecision::hold("group is at min_nodes");
        }

        // Lowest utilization first, oldest node as tiebreak.
        candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        let victims: Vec<NodeId> = candidates
            .into_iter()
            .take(removable as usize)
            .map(|(_, _, id)| id)
            .collect();

        let drain_set: HashSet<NodeId> = victims.iter().cloned().collect();
        let gate_result = self.gate.evaluate_at(group, &drain_set, snapshot, now);
        if !gate_result.passed() {
            let reasons: Vec<String> = gate_result
                .failures
                .iter()
                .map(|f| format!("{}: {}", f.kind, f.reason))
                .collect();
            debug!(group = %group.id, ?reasons, "scale-down blocked by safety gate");
            return ScaleDecision::hold(format!("safety gate: {}", reasons.join("; ")));
        }

        self.pending_down.lock().remove(&group.id);
        info!(
            group = %group.id,
            current,
            target = current - removable,
            victims = victims.len(),
            "scale-down decided"
        );
        ScaleDecision::ScaleDown {
            target: current - removable,
            victims,
            reason: "sustained underutilization".into(),
        }
    }

    // Estimates how many nodes the pending demand needs, using the
    // largest ready node as the per-node capacity yardstick.
    fn nodes_needed(snapshot: &ClusterSnapshot) -> u32 {
        let pending = snapshot.pending_requests();
        let per_node = snapshot
            .nodes
            .iter()
            .filter(|n| n.ready)
            .map(|n| n.allocatable)
            .max_by_key(|a| a.cpu_millis)
            .unwrap_or(ResourceAmounts::new(0, 0));

        if per_node.cpu_millis == 0 || per_node.memory_bytes == 0 {
            return (snapshot.pending_pods.len() as u32).max(1);
        }
        let by_cpu = pending.cpu_millis.div_ceil(per_node.cpu_millis);
        let by_mem = pending.memory_bytes.div_ceil(per_node.memory_bytes);
        (by_cpu.max(by_mem).max(1)) as u32
    }
}
