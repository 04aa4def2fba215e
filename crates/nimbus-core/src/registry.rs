//! Shared registry of managed nodes.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::{CoreError, Result};
use crate::types::{GroupId, ManagedNode, NodeId, NodePhase};

/// Process-wide index of [`ManagedNode`]s, keyed by node id.
///
/// The scale engine registers nodes it decides to create, the rebalance
/// executor registers replacements as it provisions them, and the drain
/// orchestrator retires entries once their backing instance is gone.
/// Reads copy out; callers never hold references into the map.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: RwLock<HashMap<NodeId, ManagedNode>>,
}

impl NodeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a node, replacing any entry with the same id.
    pub fn insert(&self, node: ManagedNode) {
        self.nodes.write().insert(node.id.clone(), node);
    }

    /// Returns a copy of the node, if registered.
    #[must_use]
    pub fn get(&self, id: &NodeId) -> Option<ManagedNode> {
        self.nodes.read().get(id).cloned()
    }

    /// Removes and returns the node, if registered.
    pub fn remove(&self, id: &NodeId) -> Option<ManagedNode> {
        self.nodes.write().remove(id)
    }

    /// Advances a node's phase, enforcing lifecycle rules.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownNode`] if the node is not registered,
    /// or [`CoreError::IllegalTransition`] if the lifecycle forbids the
    /// move.
    pub fn transition(&self, id: &NodeId, to: NodePhase) -> Result<()> {
        let mut nodes = self.nodes.write();
        let node = nodes.get_mut(id).ok_or_else(|| CoreError::UnknownNode { node: id.clone() })?;
        node.transition(to)
    }

    /// Copies of every node owned by the group.
    #[must_use]
    pub fn nodes_in_group(&self, group: &GroupId) -> Vec<ManagedNode> {
        self.nodes
            .read()
            .values()
            .filter(|node| &node.group == group)
            .cloned()
            .collect()
    }

    /// Number of registered nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    /// True when no nodes are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }
}
