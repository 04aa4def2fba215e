//! Per-group reconcile driver.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use nimbus_core::{ClusterSnapshot, EventSink, FleetEvent, GroupId, ManagedNode, NodeGroup, NodeRegistry};

use crate::engine::{ScaleDecision, ScaleEngine};
use crate::error::ScalerError;
use crate::store::GroupStore;

/// Result of one reconcile trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The decision was computed and the group status updated.
    Applied(ScaleDecision),
    /// Another action was in flight for this group; the trigger was
    /// dropped rather than queued.
    Coalesced,
}

/// Exclusive claim on a group's action slot. Released on drop.
pub struct ActionGuard<'a> {
    manager: &'a FleetManager,
    group: GroupId,
}

impl Drop for ActionGuard<'_> {
    fn drop(&mut self) {
        self.manager.in_flight.lock().remove(&self.group);
    }
}

/// Serializes scale and rebalance work per group.
///
/// Groups reconcile independently and in parallel, but each group has at
/// most one in-flight action; a trigger arriving while one is running is
/// coalesced into the next periodic resync.
pub struct FleetManager {
    store: Arc<GroupStore>,
    engine: Arc<ScaleEngine>,
    registry: Arc<NodeRegistry>,
    events: Arc<dyn EventSink>,
    in_flight: Mutex<HashSet<GroupId>>,
}

impl FleetManager {
    /// Creates a manager over the given store, engine, and node registry.
    #[must_use]
    pub fn new(
        store: Arc<GroupStore>,
        engine: Arc<ScaleEngine>,
        registry: Arc<NodeRegistry>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            engine,
            registry,
            events,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Claims the group's action slot, if free.
    ///
    /// Long-running executors (drain, rebalance) hold the guard for the
    /// duration of their external side effects.
    #[must_use]
    pub fn begin_action(&self, group: &GroupId) -> Option<ActionGuard<'_>> {
        if !self.in_flight.lock().insert(group.clone()) {
            return None;
        }
        Some(ActionGuard {
            manager: self,
            group: group.clone(),
        })
    }

    /// Runs one reconcile cycle for the group against the current time.
    ///
    /// # Errors
    ///
    /// Returns error if the group is unknown or its status patch fails.
    pub fn reconcile(
        &self,
        group: &GroupId,
        snapshot: &ClusterSnapshot,
    ) -> Result<ReconcileOutcome, ScalerError> {
        self.reconcile_at(group, snapshot, Utc::now())
    }

    /// Runs one reconcile cycle at an explicit time.
    ///
    /// # Errors
    ///
    /// Returns error if the group is unknown or its status patch fails.
    pub fn reconcile_at(
        &self,
        group_id: &GroupId,
        snapshot: &ClusterSnapshot,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome, ScalerError> {
        let Some(_guard) = self.begin_action(group_id) else {
            debug!(group = %group_id, "action in flight; trigger coalesced");
            return Ok(ReconcileOutcome::Coalesced);
        };

        let group = self
            .store
            .get(group_id)
            .ok_or_else(|| ScalerError::UnknownGroup {
                group: group_id.clone(),
            })?;

        let current = snapshot.nodes_in_group(group_id).len() as u32;
        let ready = snapshot.ready_in_group(group_id) as u32;
        let decision = self.engine.evaluate_at(&group, snapshot, now);

        match &decision {
            ScaleDecision::ScaleUp { target, reason } => {
                let target = *target;
                self.store.update_status(group_id, |status| {
                    status.current_nodes = current;
                    status.ready_nodes = ready;
                    status.desired_nodes = target;
                    status.last_scale_up = Some(now);
                    status.condition = None;
                })?;
                self.register_pending_nodes(group_id, &group, current, target);
                self.events.publish(FleetEvent::ScaleUpDecided {
                    group: group_id.clone(),
                    from: current,
                    to: target,
                    reason: reason.clone(),
                });
                info!(group = %group_id, from = current, to = target, "scale-up applied");
            }
            ScaleDecision::ScaleDown { target, reason, .. } => {
                let target = *target;
                self.store.update_status(group_id, |status| {
                    status.current_nodes = current;
                    status.ready_nodes = ready;
                    status.desired_nodes = target;
                    status.last_scale_down = Some(now);
                    status.condition = None;
                })?;
                self.events.publish(FleetEvent::ScaleDownDecided {
                    group: group_id.clone(),
                    from: current,
                    to: target,
                    reason: reason.clone(),
                });
                info!(group = %group_id, from = current, to = target, "scale-down applied");
            }
            ScaleDecision::Hold { reason } => {
                let reason = reason.clone();
                self.store.update_status(group_id, |status| {
                    status.current_nodes = current;
                    status.ready_nodes = ready;
                    status.condition = Some(reason.clone());
                })?;
            }
        }

        Ok(ReconcileOutcome::Applied(decision))
    }

    // New nodes enter the registry as Pending; the provisioning loop picks
    // them up and walks them toward Ready.
    fn register_pending_nodes(&self, group_id: &GroupId, group: &NodeGroup, current: u32, target: u32) {
        for _ in current..target {
            self.registry.insert(ManagedNode::new(
                format!("{group_id}-{}", Uuid::new_v4().simple()),
                group_id.clone(),
                group.spec.preferred_offering(),
            ));
        }
    }
}
