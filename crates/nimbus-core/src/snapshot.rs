//! Point-in-time cluster state used by decision paths.
//!
//! A [`ClusterSnapshot`] is assembled by the caller from the cluster API
//! and handed to the pure decision components (safety gate, analyzer,
//! scale engine), which never reach back to a live API.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{GroupId, NodeId};

/// CPU and memory quantities, in scheduling units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ResourceAmounts {
    /// CPU in millicores.
    pub cpu_millis: u64,
    /// Memory in bytes.
    pub memory_bytes: u64,
}

impl ResourceAmounts {
    /// Creates a new amount.
    #[must_use]
    pub const fn new(cpu_millis: u64, memory_bytes: u64) -> Self {
        Self {
            cpu_millis,
            memory_bytes,
        }
    }

    /// Component-wise addition.
    #[must_use]
    pub const fn plus(self, other: Self) -> Self {
        Self {
            cpu_millis: self.cpu_millis + other.cpu_millis,
            memory_bytes: self.memory_bytes + other.memory_bytes,
        }
    }

    /// Component-wise saturating subtraction.
    #[must_use]
    pub const fn saturating_minus(self, other: Self) -> Self {
        Self {
            cpu_millis: self.cpu_millis.saturating_sub(other.cpu_millis),
            memory_bytes: self.memory_bytes.saturating_sub(other.memory_bytes),
        }
    }

    /// True if `self` fits within `capacity` on both axes.
    #[must_use]
    pub const fn fits_within(self, capacity: Self) -> bool {
        self.cpu_millis <= capacity.cpu_millis && self.memory_bytes <= capacity.memory_bytes
    }
}

/// A pod as seen in the cluster snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodInfo {
    /// Pod name.
    pub name: String,
    /// Node the pod is bound to, if scheduled.
    pub node: Option<NodeId>,
    /// Resource requests for scheduling.
    pub requests: ResourceAmounts,
    /// Pod labels, matched against budget selectors.
    pub labels: HashMap<String, String>,
    /// Whether the pod uses node-local storage that eviction would lose.
    pub has_local_storage: bool,
}

impl PodInfo {
    /// Creates a new pod bound to a node.
    #[must_use]
    pub fn new(name: impl Into<String>, node: NodeId, requests: ResourceAmounts) -> Self {
        Self {
            name: name.into(),
            node: Some(node),
            requests,
            labels: HashMap::new(),
            has_local_storage: false,
        }
    }

    /// Creates an unscheduled (pending) pod.
    #[must_use]
    pub fn pending(name: impl Into<String>, requests: ResourceAmounts) -> Self {
        Self {
            name: name.into(),
            node: None,
            requests,
            labels: HashMap::new(),
            has_local_storage: false,
        }
    }

    /// Adds a label.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Marks the pod as using node-local storage.
    #[must_use]
    pub const fn with_local_storage(mut self) -> Self {
        self.has_local_storage = true;
        self
    }
}

/// A pod disruption budget constraining voluntary evictions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisruptionBudget {
    /// Budget name.
    pub name: String,
    /// Label selector; a pod is covered when every entry matches its labels.
    pub selector: HashMap<String, String>,
    /// Number of covered pods that may be disrupted simultaneously.
    pub allowed_disruptions: u32,
}

impl DisruptionBudget {
    /// Creates a new budget with a single-label selector.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
        allowed_disruptions: u32,
    ) -> Self {
        let mut selector = HashMap::new();
        selector.insert(key.into(), value.into());
        Self {
            name: name.into(),
            selector,
            allowed_disruptions,
        }
    }

    /// Whether this budget covers the given pod.
    #[must_use]
    pub fn covers(&self, pod: &PodInfo) -> bool {
        self.selector
            .iter()
            .all(|(k, v)| pod.labels.get(k) == Some(v))
    }
}

/// A cluster node as seen in the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Node identifier.
    pub id: NodeId,
    /// Owning group, if the node is fleet-managed.
    pub group: Option<GroupId>,
    /// Whether the node currently reports Ready.
    pub ready: bool,
    /// Allocatable capacity remaining on this node.
    pub allocatable: ResourceAmounts,
    /// When the node joined the cluster.
    pub created_at: DateTime<Utc>,
}

impl NodeRecord {
    /// Creates a ready node record.
    #[must_use]
    pub fn new(id: impl Into<String>, group: GroupId, allocatable: ResourceAmounts) -> Self {
        Self {
            id: NodeId::new(id),
            group: Some(group),
            ready: true,
            allocatable,
            created_at: Utc::now(),
        }
    }

    /// Sets readiness.
    #[must_use]
    pub const fn with_ready(mut self, ready: bool) -> Self {
        self.ready = ready;
        self
    }

    /// Sets the creation timestamp.
    #[must_use]
    pub const fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

/// Point-in-time view of cluster state relevant to scaling decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ClusterSnapshot {
    /// All cluster nodes.
    pub nodes: Vec<NodeRecord>,
    /// All scheduled pods.
    pub pods: Vec<PodInfo>,
    /// All disruption budgets.
    pub budgets: Vec<DisruptionBudget>,
    /// Pods awaiting scheduling (unschedulable demand).
    pub pending_pods: Vec<PodInfo>,
}

impl ClusterSnapshot {
    /// Fraction of cluster nodes reporting Ready, in `[0, 1]`.
    ///
    /// An empty cluster counts as fully healthy so that bootstrap does not
    /// read as an outage.
    #[must_use]
    pub fn ready_fraction(&self) -> f64 {
        if self.nodes.is_empty() {
            return 1.0;
        }
        let ready = self.nodes.iter().filter(|n| n.ready).count();
        ready as f64 / self.nodes.len() as f64
    }

    /// Nodes belonging to the given group.
    #[must_use]
    pub fn nodes_in_group(&self, group: &GroupId) -> Vec<&NodeRecord> {
        self.nodes
            .iter()
            .filter(|n| n.group.as_ref() == Some(group))
            .collect()
    }

    /// Ready nodes belonging to the given group.
    #[must_use]
    pub fn ready_in_group(&self, group: &GroupId) -> usize {
        self.nodes_in_group(group)
            .iter()
            .filter(|n| n.ready)
            .count()
    }

    /// Pods bound to the given node.
    #[must_use]
    pub fn pods_on(&self, node: &NodeId) -> Vec<&PodInfo> {
        self.pods
            .iter()
            .filter(|p| p.node.as_ref() == Some(node))
            .collect()
    }

    /// Total resource requests of pods bound to the given nodes.
    #[must_use]
    pub fn requests_on(&self, nodes: &HashSet<NodeId>) -> ResourceAmounts {
        self.pods
            .iter()
            .filter(|p| p.node.as_ref().is_some_and(|n| nodes.contains(n)))
            .fold(ResourceAmounts::default(), |acc, p| acc.plus(p.requests))
    }

    /// Total allocatable capacity on ready nodes outside the given set.
    #[must_use]
    pub fn allocatable_excluding(&self, excluded: &HashSet<NodeId>) -> ResourceAmounts {
        self.nodes
            .iter()
            .filter(|n| n.ready && !excluded.contains(&n.id))
            .fold(ResourceAmounts::default(), |acc, n| acc.plus(n.allocatable))
    }

    /// Total resource requests of pending (unschedulable) pods.
    #[must_use]
    pub fn pending_requests(&self) -> ResourceAmounts {
        self.pending_pods
            .iter()
            .fold(ResourceAmounts::default(), |acc, p| acc.plus(p.requests))
    }

    /// Set of node IDs present in this snapshot.
    #[must_use]
    pub fn node_ids(&self) -> HashSet<NodeId> {
        self.nodes.iter().map(|n| n.id.clone()).collect()
    }
}
