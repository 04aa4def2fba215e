//! The drain state machine.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use nimbus_core::{CoreError, EventSink, FleetEvent, NodeId, NodePhase, NodeRegistry, RebalancePolicy};
use nimbus_provider::{NodeHandle, Provisioner};

use crate::cluster::{ClusterApi, EvictError};
use crate::error::DrainError;

// Cleanup runs on its own clock; caller cancellation must not starve it.
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Where a drain ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DrainPhase {
    /// Node marked unschedulable.
    Cordoned,
    /// Evictions in flight.
    Evicting,
    /// All pods gone, instance still alive.
    Drained,
    /// Instance terminated.
    Deprovisioned,
    /// Drain cancelled before deprovisioning; node schedulable again.
    Aborted,
}

/// Summary of one completed or aborted drain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    /// The drained node.
    pub node: NodeId,
    /// Final phase reached.
    pub final_phase: DrainPhase,
    /// Pods evicted, in order.
    pub evicted_pods: Vec<String>,
    /// When the drain started.
    pub started_at: DateTime<Utc>,
    /// When the drain finished.
    pub finished_at: DateTime<Utc>,
}

/// Drives one node at a time through cordon, eviction, and
/// deprovisioning.
///
/// Cordon is reversed on abort or eviction failure under a fresh bounded
/// timeout, so a cancelled caller cannot leave a node unschedulable by
/// accident. A drain timeout deliberately leaves the node cordoned for
/// operator inspection.
pub struct DrainOrchestrator {
    cluster: Arc<dyn ClusterApi>,
    provisioner: Arc<dyn Provisioner>,
    registry: Arc<NodeRegistry>,
    events: Arc<dyn EventSink>,
    aborts: Mutex<HashSet<NodeId>>,
}

impl DrainOrchestrator {
    /// Creates an orchestrator over the given collaborators.
    #[must_use]
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        provisioner: Arc<dyn Provisioner>,
        registry: Arc<NodeRegistry>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            cluster,
            provisioner,
            registry,
            events,
            aborts: Mutex::new(HashSet::new()),
        }
    }

    /// Requests cancellation of an in-flight drain.
    ///
    /// Honored at the next checkpoint, and only before deprovisioning has
    /// started; the node returns to schedulable.
    pub fn request_abort(&self, node: &NodeId) {
        self.aborts.lock().insert(node.clone());
    }

    fn take_abort(&self, node: &NodeId) -> bool {
        self.aborts.lock().remove(node)
    }

    /// Drains the node and terminates its backing instance.
    ///
    /// # Errors
    ///
    /// Returns [`DrainError::Timeout`] when pods outlive the drain timeout
    /// (node left cordoned), [`DrainError::BudgetExhausted`] when eviction
    /// retries run out (node uncordoned), and [`DrainError::Provider`]
    /// when deprovisioning fails (node marked `Failed` in the registry).
    pub async fn drain(
        &self,
        node: &NodeId,
        handle: &NodeHandle,
        policy: &RebalancePolicy,
    ) -> Result<DrainReport, DrainError> {
        let started_at = Utc::now();
        self.events.publish(FleetEvent::DrainStarted { node: node.clone() });

        if let Err(message) = self.cluster.cordon(node).await {
            self.publish_failure(node, &message);
            return Err(DrainError::ClusterApi {
                node: node.clone(),
                message,
            });
        }
        info!(node = %node, "node cordoned");
        self.mark(node, NodePhase::Draining);

        if self.take_abort(node) {
            return Ok(self.abort(node, Vec::new(), started_at).await);
        }

        let pods = self
            .cluster
            .list_pods(node)
            .await
            .map_err(|message| DrainError::ClusterApi {
                node: node.clone(),
                message,
            })?;

        let mut evicted = Vec::with_capacity(pods.len());
        for pod in &pods {
            if self.take_abort(node) {
                return Ok(self.abort(node, evicted, started_at).await);
            }
            self.evict_with_backoff(node, &pod.name, policy).await?;
            evicted.push(pod.name.clone());
        }

        match self.wait_for_termination(node, policy).await {
            WaitOutcome::Drained => {}
            WaitOutcome::Aborted => {
                return Ok(self.abort(node, evicted, started_at).await);
            }
            WaitOutcome::TimedOut => {
                // Left cordoned on purpose.
                warn!(node = %node, "drain timed out; node left cordoned");
                self.publish_failure(node, "drain timeout");
                return Err(DrainError::Timeout { node: node.clone() });
            }
        }

        if self.take_abort(node) {
            return Ok(self.abort(node, evicted, started_at).await);
        }

        if let Err(err) = self.provisioner.deprovision(handle).await {
            warn!(node = %node, error = %err, "deprovision failed");
            self.mark(node, NodePhase::Failed);
            self.publish_failure(node, &err.to_string());
            return Err(DrainError::Provider(err));
        }
        self.mark(node, NodePhase::Terminating);
        self.mark(node, NodePhase::Removed);
        self.registry.remove(node);

        info!(node = %node, pods = evicted.len(), "drain completed");
        self.events.publish(FleetEvent::DrainCompleted {
            node: node.clone(),
            evicted_pods: evicted.len(),
        });
        Ok(DrainReport {
            node: node.clone(),
            final_phase: DrainPhase::Deprovisioned,
            evicted_pods: evicted,
            started_at,
            finished_at: Utc::now(),
        })
    }

    async fn evict_with_backoff(
        &self,
        node: &NodeId,
        pod: &str,
        policy: &RebalancePolicy,
    ) -> Result<(), DrainError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.cluster.evict(node, pod).await {
                Ok(()) => return Ok(()),
                Err(EvictError::BudgetViolation { .. }) if attempts <= policy.max_retries => {
                    let backoff = policy.health_check_interval * 2_u32.pow(attempts.min(5));
                    warn!(node = %node, pod, attempts, "eviction blocked by budget; backing off");
                    tokio::time::sleep(backoff).await;
                }
                Err(EvictError::BudgetViolation { .. }) => {
                    self.cleanup_uncordon(node).await;
                    self.mark(node, NodePhase::Ready);
                    self.publish_failure(node, "eviction retries exhausted");
                    return Err(DrainError::BudgetExhausted {
                        node: node.clone(),
                        pod: pod.to_string(),
                        attempts,
                    });
                }
                Err(EvictError::Api { message }) => {
                    self.cleanup_uncordon(node).await;
                    self.mark(node, NodePhase::Ready);
                    self.publish_failure(node, &message);
                    return Err(DrainError::ClusterApi {
                        node: node.clone(),
                        message,
                    });
                }
            }
        }
    }

    async fn wait_for_termination(&self, node: &NodeId, policy: &RebalancePolicy) -> WaitOutcome {
        let deadline = tokio::time::Instant::now() + policy.drain_timeout;
        loop {
            if self.cluster.pods_remaining(node).await == 0 {
                return WaitOutcome::Drained;
            }
            if self.take_abort(node) {
                return WaitOutcome::Aborted;
            }
            if tokio::time::Instant::now() >= deadline {
                return WaitOutcome::TimedOut;
            }
            tokio::time::sleep(policy.health_check_interval).await;
        }
    }

    async fn abort(
        &self,
        node: &NodeId,
        evicted: Vec<String>,
        started_at: DateTime<Utc>,
    ) -> DrainReport {
        info!(node = %node, "drain aborted; restoring node");
        self.cleanup_uncordon(node).await;
        self.mark(node, NodePhase::Ready);
        self.publish_failure(node, "drain aborted");
        DrainReport {
            node: node.clone(),
            final_phase: DrainPhase::Aborted,
            evicted_pods: evicted,
            started_at,
            finished_at: Utc::now(),
        }
    }

    // Runs on a detached task with its own timeout, so it completes even
    // if the calling future is dropped mid-drain.
    async fn cleanup_uncordon(&self, node: &NodeId) {
        let cluster = Arc::clone(&self.cluster);
        let node = node.clone();
        let task = tokio::spawn(async move {
            match tokio::time::timeout(CLEANUP_TIMEOUT, cluster.uncordon(&node)).await {
                Ok(Ok(())) => {}
                Ok(Err(message)) => warn!(node = %node, message, "uncordon failed"),
                Err(_) => warn!(node = %node, "uncordon timed out"),
            }
        });
        // Awaiting is best-effort; the task finishes either way.
        let _ = task.await;
    }

    // The registry only covers nodes this control loop created; nodes it
    // has never seen drain fine without a lifecycle entry.
    fn mark(&self, node: &NodeId, to: NodePhase) {
        match self.registry.transition(node, to) {
            Ok(()) | Err(CoreError::UnknownNode { .. }) => {}
            Err(err) => warn!(node = %node, error = %err, "phase update rejected"),
        }
    }

    fn publish_failure(&self, node: &NodeId, reason: &str) {
        self.events.publish(FleetEvent::DrainFailed {
            node: node.clone(),
            reason: reason.to_string(),
        });
    }
}

enum WaitOutcome {
    Drained,
    Aborted,
    TimedOut,
}
