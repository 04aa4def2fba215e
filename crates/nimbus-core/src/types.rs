//! Node group and managed node types.
//!
//! A [`NodeGroup`] is the declared desired state for a homogeneous set of
//! cloud-backed nodes; a [`ManagedNode`] is one node under its control.
//! Node phases move in one direction only, with the single exception of an
//! aborted drain returning a `Draining` node to `Ready`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::policy::{RebalancePolicy, ScalePolicy};

/// Unique identifier for a node group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(String);

impl GroupId {
    /// Creates a new group ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    /// Creates a new node ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle phase of a managed node.
///
/// Transitions are one-directional along
/// `Pending -> Provisioning -> Running -> Ready -> Draining -> Terminating -> Removed`,
/// except that an aborted drain returns a `Draining` node to `Ready`.
/// `Failed` is reachable from any pre-`Ready` phase, and from `Draining`
/// when deprovisioning fails mid-drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum NodePhase {
    /// Node has been requested but no cloud instance exists yet.
    #[default]
    Pending,
    /// Cloud instance is being created.
    Provisioning,
    /// Instance is up but the node has not passed readiness checks.
    Running,
    /// Node is ready and accepting workloads.
    Ready,
    /// Node is being drained before removal.
    Draining,
    /// Cloud instance is being terminated.
    Terminating,
    /// Node no longer exists.
    Removed,
    /// Provisioning failed permanently; excluded from further action.
    Failed,
}

impl NodePhase {
    /// Checks whether a transition from `self` to `to` is legal.
    #[must_use]
    pub fn can_transition(self, to: Self) -> bool {
        use NodePhase::{
            Draining, Failed, Pending, Provisioning, Ready, Removed, Running, Terminating,
        };
        match (self, to) {
            (Pending, Provisioning)
            | (Provisioning, Running)
            | (Running, Ready)
            | (Ready, Draining)
            | (Draining, Terminating)
            | (Terminating, Removed) => true,
            // Aborted drain: back to Ready before any irreversible step.
            (Draining, Ready) => true,
            // Failure from any pre-Ready phase, or from a drain whose
            // deprovision step failed.
            (Pending | Provisioning | Running | Draining, Failed) => true,
            _ => false,
        }
    }

    /// True once the node is past the point of no return.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Removed | Self::Failed)
    }
}

/// One cloud-backed node under control of a node group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedNode {
    /// Unique identifier for this node.
    pub id: NodeId,
    /// The group that owns this node.
    pub group: GroupId,
    /// Cloud offering (instance type) backing this node.
    pub offering: String,
    /// Current lifecycle phase.
    pub phase: NodePhase,
    /// Opaque handle returned by the provisioning collaborator, once known.
    pub provider_handle: Option<String>,
    /// When this node was created.
    pub created_at: DateTime<Utc>,
    /// Custom labels for this node.
    pub labels: HashMap<String, String>,
}

impl ManagedNode {
    /// Creates a new managed node in the `Pending` phase.
    #[must_use]
    pub fn new(id: impl Into<String>, group: GroupId, offering: impl Into<String>) -> Self {
        Self {
            id: NodeId::new(id),
            group,
            offering: offering.into(),
            phase: NodePhase::Pending,
            provider_handle: None,
            created_at: Utc::now(),
            labels: HashMap::new(),
        }
    }

    /// Sets the phase directly (test/bootstrap convenience).
    #[must_use]
    pub fn with_phase(mut self, phase: NodePhase) -> Self {
        self.phase = phase;
        self
    }

    /// Adds a label to this node.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Advances the node to a new phase, enforcing lifecycle rules.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IllegalTransition`] if the lifecycle does not
    /// permit the move.
    pub fn transition(&mut self, to: NodePhase) -> Result<()> {
        if !self.phase.can_transition(to) {
            return Err(CoreError::IllegalTransition {
                from: self.phase,
                to,
            });
        }
        self.phase = to;
        Ok(())
    }

    /// Checks if this node is ready for workloads.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.phase == NodePhase::Ready
    }
}

/// Declared desired state for a node group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeGroupSpec {
    /// Minimum number of nodes (never scale below this).
    pub min_nodes: u32,
    /// Maximum number of nodes (never scale above this).
    pub max_nodes: u32,
    /// Cloud offerings this group may provision, in order of preference.
    pub offerings: Vec<String>,
    /// Scaling policy for this group.
    pub scale_policy: ScalePolicy,
    /// Rebalance policy for this group.
    pub rebalance_policy: RebalancePolicy,
}

impl NodeGroupSpec {
    /// Validates this spec.
    ///
    /// # Errors
    ///
    /// Returns error if bounds are inconsistent or no offering is declared.
    pub fn validate(&self) -> Result<()> {
        if self.min_nodes > self.max_nodes {
            return Err(CoreError::InvalidNodeGroup {
                reason: format!(
                    "min_nodes ({}) cannot exceed max_nodes ({})",
                    self.min_nodes, self.max_nodes
                ),
            });
        }
        if self.max_nodes == 0 {
            return Err(CoreError::InvalidNodeGroup {
                reason: "max_nodes must be at least 1".into(),
            });
        }
        if self.offerings.is_empty() {
            return Err(CoreError::InvalidNodeGroup {
                reason: "at least one offering is required".into(),
            });
        }
        self.scale_policy.validate()?;
        self.rebalance_policy.validate()?;
        Ok(())
    }

    /// Returns the preferred offering for new nodes.
    #[must_use]
    pub fn preferred_offering(&self) -> &str {
        self.offerings.first().map_or("", String::as_str)
    }
}

/// Control-loop-owned status of a node group.
///
/// Updated only via read-modify-patch against the store; the `generation`
/// counter detects concurrent writers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NodeGroupStatus {
    /// Number of nodes currently known to the group.
    pub current_nodes: u32,
    /// Number of nodes in the `Ready` phase.
    pub ready_nodes: u32,
    /// Node count the control loop is converging toward.
    pub desired_nodes: u32,
    /// Last scale-up action timestamp.
    pub last_scale_up: Option<DateTime<Utc>>,
    /// Last scale-down action timestamp.
    pub last_scale_down: Option<DateTime<Utc>>,
    /// Outcome summary of the most recent rebalance, if any.
    pub last_rebalance: Option<String>,
    /// Operator-visible error or condition from the last reconcile.
    pub condition: Option<String>,
    /// Monotonic status generation, bumped on every successful patch.
    pub generation: u64,
}

impl NodeGroupStatus {
    /// Timestamp of the most recent scaling action in either direction.
    #[must_use]
    pub fn last_scale_action(&self) -> Option<DateTime<Utc>> {
        match (self.last_scale_up, self.last_scale_down) {
            (Some(up), Some(down)) => Some(up.max(down)),
            (up, down) => up.or(down),
        }
    }
}

/// Declarative spec plus control-loop-owned status for a set of nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeGroup {
    /// Unique identifier for this group.
    pub id: GroupId,
    /// Human-readable name.
    pub name: String,
    /// Desired state, owned by the operator.
    pub spec: NodeGroupSpec,
    /// Observed state, owned by the control loop.
    pub status: NodeGroupStatus,
}

impl NodeGroup {
    /// Creates a new node group with a validated spec and empty status.
    ///
    /// # Errors
    ///
    /// Returns error if the spec is invalid.
    pub fn new(id: impl Into<String>, name: impl Into<String>, spec: NodeGroupSpec) -> Result<Self> {
        spec.validate()?;
        Ok(Self {
            id: GroupId::new(id),
            name: name.into(),
            spec,
            status: NodeGroupStatus::default(),
        })
    }

    /// Checks if scaling up is allowed at `now` (cooldown lapsed).
    ///
    /// Any scaling action starts a quiet period; another action of either
    /// direction must wait out the cooldown configured for its direction.
    #[must_use]
    pub fn can_scale_up(&self, now: DateTime<Utc>) -> bool {
        self.status.last_scale_action().is_none_or(|last| {
            let cooldown = chrono::Duration::from_std(self.spec.scale_policy.scale_up_cooldown)
                .unwrap_or_else(|_| chrono::Duration::seconds(300));
            now >= last + cooldown
        })
    }

    /// Checks if scaling down is allowed at `now` (cooldown lapsed).
    #[must_use]
    pub fn can_scale_down(&self, now: DateTime<Utc>) -> bool {
        self.status.last_scale_action().is_none_or(|last| {
            let cooldown = chrono::Duration::from_std(self.spec.scale_policy.scale_down_cooldown)
                .unwrap_or_else(|_| chrono::Duration::seconds(600));
            now >= last + cooldown
        })
    }
}
