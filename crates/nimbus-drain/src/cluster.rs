//! The [`ClusterApi`] capability and an in-memory fake.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;

use parking_lot::Mutex;
use thiserror::Error;

use nimbus_core::{NodeId, PodInfo};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A failed eviction attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvictError {
    /// The eviction would exceed a disruption budget. Retryable.
    #[error("eviction of {pod} blocked by disruption budget")]
    BudgetViolation {
        /// The pod whose eviction was rejected.
        pod: String,
    },

    /// The API rejected the call outright.
    #[error("eviction API error: {message}")]
    Api {
        /// Description of the failure.
        message: String,
    },
}

/// Capability to cordon nodes and evict pods.
///
/// Methods return boxed futures so the trait stays dyn-compatible and can
/// be injected as `Arc<dyn ClusterApi>`.
pub trait ClusterApi: Send + Sync {
    /// Marks the node unschedulable.
    fn cordon<'a>(&'a self, node: &'a NodeId) -> BoxFuture<'a, Result<(), String>>;

    /// Marks the node schedulable again.
    fn uncordon<'a>(&'a self, node: &'a NodeId) -> BoxFuture<'a, Result<(), String>>;

    /// Lists pods currently bound to the node.
    fn list_pods<'a>(&'a self, node: &'a NodeId) -> BoxFuture<'a, Result<Vec<PodInfo>, String>>;

    /// Requests eviction of one pod, honoring disruption budgets.
    fn evict<'a>(
        &'a self,
        node: &'a NodeId,
        pod: &'a str,
    ) -> BoxFuture<'a, Result<(), EvictError>>;

    /// Number of pods still bound to the node.
    fn pods_remaining<'a>(&'a self, node: &'a NodeId) -> BoxFuture<'a, usize>;
}

#[derive(Debug, Default)]
struct FakeClusterState {
    pods: HashMap<NodeId, Vec<PodInfo>>,
    cordoned: HashSet<NodeId>,
    // Pods whose eviction keeps hitting a budget until the counter drains.
    budget_blocks: HashMap<String, u32>,
    // Pods that linger after eviction until released explicitly.
    lingering: HashSet<String>,
    scripted_cordon_errors: VecDeque<String>,
    evictions: Vec<String>,
}

/// Deterministic in-memory cluster for tests.
///
/// Evicted pods disappear immediately unless marked lingering; budget
/// blocks are scripted per pod as a countdown of rejections.
#[derive(Debug, Default)]
pub struct InMemoryCluster {
    state: Mutex<FakeClusterState>,
}

impl InMemoryCluster {
    /// Creates an empty fake cluster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a pod to a node.
    pub fn add_pod(&self, node: &NodeId, pod: PodInfo) {
        self.state.lock().pods.entry(node.clone()).or_default().push(pod);
    }

    /// Scripts the next `rejections` eviction attempts for the pod to fail
    /// with a budget violation.
    pub fn block_eviction(&self, pod: &str, rejections: u32) {
        self.state.lock().budget_blocks.insert(pod.to_string(), rejections);
    }

    /// Marks a pod as lingering after eviction until [`Self::release_pod`].
    pub fn set_lingering(&self, pod: &str) {
        self.state.lock().lingering.insert(pod.to_string());
    }

    /// Removes a lingering pod from its node.
    pub fn release_pod(&self, node: &NodeId, pod: &str) {
        let mut state = self.state.lock();
        state.lingering.remove(pod);
        if let Some(pods) = state.pods.get_mut(node) {
            pods.retain(|p| p.name != pod);
        }
    }

    /// Queues an error for an upcoming `cordon` call.
    pub fn fail_next_cordon(&self, message: impl Into<String>) {
        self.state.lock().scripted_cordon_errors.push_back(message.into());
    }

    /// Whether the node is currently cordoned.
    #[must_use]
    pub fn is_cordoned(&self, node: &NodeId) -> bool {
        self.state.lock().cordoned.contains(node)
    }

    /// Pod names evicted so far, in order.
    #[must_use]
    pub fn evictions(&self) -> Vec<String> {
        self.state.lock().evictions.clone()
    }
}

impl ClusterApi for InMemoryCluster {
    fn cordon<'a>(&'a self, node: &'a NodeId) -> BoxFuture<'a, Result<(), String>> {
        Box::pin(async move {
            let mut state = self.state.lock();
            if let Some(message) = state.scripted_cordon_errors.pop_front() {
                return Err(message);
            }
            state.cordoned.insert(node.clone());
            Ok(())
        })
    }

    fn uncordon<'a>(&'a self, node: &'a NodeId) -> BoxFuture<'a, Result<(), String>> {
        Box::pin(async move {
            self.state.lock().cordoned.remove(node);
            Ok(())
        })
    }

    fn list_pods<'a>(&'a self, node: &'a NodeId) -> BoxFuture<'a, Result<Vec<PodInfo>, String>> {
        Box::pin(async move {
            Ok(self.state.lock().pods.get(node).cloned().unwrap_or_default())
        })
    }

    fn evict<'a>(
        &'a self,
        node: &'a NodeId,
        pod: &'a str,
    ) -> BoxFuture<'a, Result<(), EvictError>> {
        Box::pin(async move {
            let mut state = self.state.lock();
            if let Some(remaining) = state.budget_blocks.get_mut(pod) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(EvictError::BudgetViolation {
                        pod: pod.to_string(),
                    });
                }
            }
            state.evictions.push(pod.to_string());
            if !state.lingering.contains(pod) {
                if let Some(pods) = state.pods.get_mut(node) {
                    pods.retain(|p| p.name != pod);
                }
            }
            Ok(())
        })
    }

    fn pods_remaining<'a>(&'a self, node: &'a NodeId) -> BoxFuture<'a, usize> {
        Box::pin(async move {
            self.state.lock().pods.get(node).map_or(0, Vec::len)
        })
    }
}
