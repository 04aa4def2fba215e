//! Batch-by-batch plan execution with per-batch rollback.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::future;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use nimbus_core::{
    CoreError, EventSink, FleetEvent, ManagedNode, NodeGroup, NodeId, NodePhase, NodeRegistry,
    RebalancePolicy,
};
use nimbus_drain::{DrainOrchestrator, DrainPhase};
use nimbus_provider::{NodeHandle, OfferingSpec, Provisioner, ProviderError};

use crate::types::{Batch, BatchStatus, CandidateNode, RebalancePlan};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Reports whether a freshly provisioned node has joined the cluster and
/// passed readiness checks.
///
/// Instance-phase from the provisioner is not enough; a running instance
/// may still be failing kubelet health.
pub trait ReadinessProbe: Send + Sync {
    /// Whether the node behind the handle reports ready.
    fn is_ready<'a>(&'a self, handle: &'a NodeHandle) -> BoxFuture<'a, bool>;
}

/// Terminal outcome of one plan execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionResult {
    /// Every batch succeeded (vacuously true for an empty plan).
    Succeeded,
    /// A batch failed beyond retry; later batches never started.
    Failed {
        /// Zero-based index of the failed batch.
        batch: usize,
        /// What went wrong.
        reason: String,
    },
}

/// Summary of one plan execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Terminal outcome.
    pub result: ExecutionResult,
    /// Final per-batch statuses, indexed like the plan's batches.
    pub statuses: Vec<BatchStatus>,
    /// Old node to replacement handle, for every completed swap.
    pub replaced: Vec<(NodeId, NodeHandle)>,
}

// Why a batch stopped, and whether its unearned replacements actually
// came back off the books.
struct BatchError {
    reason: String,
    rollback_complete: bool,
}

/// Walks a plan's batches in order, replacing nodes provision-first.
///
/// Batches execute strictly in planned order; within a batch the
/// replacements provision, and later the old nodes drain, concurrently
/// with no ordering among themselves. A replacement is always provisioned
/// and ready before the node it replaces is drained. When any step of a
/// batch fails, the batch's not-yet-earned replacements are deprovisioned
/// and the plan halts; the batch is marked rolled back, or failed when
/// that deprovisioning itself fails, and earlier batches stand.
pub struct RebalanceExecutor {
    provisioner: Arc<dyn Provisioner>,
    drains: Arc<DrainOrchestrator>,
    probe: Arc<dyn ReadinessProbe>,
    registry: Arc<NodeRegistry>,
    events: Arc<dyn EventSink>,
}

impl RebalanceExecutor {
    /// Creates an executor over the given collaborators.
    #[must_use]
    pub fn new(
        provisioner: Arc<dyn Provisioner>,
        drains: Arc<DrainOrchestrator>,
        probe: Arc<dyn ReadinessProbe>,
        registry: Arc<NodeRegistry>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            provisioner,
            drains,
            probe,
            registry,
            events,
        }
    }

    /// Executes the plan, mutating its per-batch statuses as it goes.
    ///
    /// `offerings` resolves replacement offering names; `old_handles` maps
    /// each candidate node to the provider handle backing it.
    pub async fn execute(
        &self,
        group: &NodeGroup,
        plan: &mut RebalancePlan,
        offerings: &HashMap<String, OfferingSpec>,
        old_handles: &HashMap<NodeId, NodeHandle>,
    ) -> ExecutionReport {
        let policy = &group.spec.rebalance_policy;
        let mut replaced = Vec::new();

        for i in 0..plan.batches.len() {
            plan.statuses[i] = BatchStatus::Running;
            let batch = plan.batches[i].clone();
            info!(
                group = %plan.group,
                batch = i,
                candidates = batch.candidates.len(),
                "rebalance batch started"
            );

            match self
                .execute_batch(group, &batch, policy, offerings, old_handles, &mut replaced)
                .await
            {
                Ok(swapped) => {
                    plan.statuses[i] = BatchStatus::Succeeded;
                    self.events.publish(FleetEvent::RebalanceBatchCompleted {
                        group: plan.group.clone(),
                        batch: i,
                        replaced: swapped,
                    });
                }
                Err(err) => {
                    plan.statuses[i] = if err.rollback_complete {
                        BatchStatus::RolledBack
                    } else {
                        BatchStatus::Failed
                    };
                    warn!(
                        group = %plan.group,
                        batch = i,
                        reason = %err.reason,
                        rolled_back = err.rollback_complete,
                        "rebalance batch failed"
                    );
                    self.events.publish(FleetEvent::RebalanceBatchFailed {
                        group: plan.group.clone(),
                        batch: i,
                        reason: err.reason.clone(),
                    });
                    return ExecutionReport {
                        result: ExecutionResult::Failed {
                            batch: i,
                            reason: err.reason,
                        },
                        statuses: plan.statuses.clone(),
                        replaced,
                    };
                }
            }
        }

        ExecutionReport {
            result: ExecutionResult::Succeeded,
            statuses: plan.statuses.clone(),
            replaced,
        }
    }

    // Runs one batch to completion. On error the batch's unearned
    // replacements have been released (best effort); old nodes whose
    // drains did not finish stand.
    async fn execute_batch(
        &self,
        group: &NodeGroup,
        batch: &Batch,
        policy: &RebalancePolicy,
        offerings: &HashMap<String, OfferingSpec>,
        old_handles: &HashMap<NodeId, NodeHandle>,
        replaced: &mut Vec<(NodeId, NodeHandle)>,
    ) -> Result<Vec<NodeId>, BatchError> {
        // Provision every replacement concurrently; no old node is
        // touched until all of them exist.
        let provisioned = future::join_all(batch.candidates.iter().map(|candidate| async move {
            let spec = offerings.get(&candidate.replacement_offering).ok_or_else(|| {
                format!(
                    "unknown replacement offering {}",
                    candidate.replacement_offering
                )
            })?;
            self.provision_with_retry(spec, policy)
                .await
                .map_err(|err| format!("provisioning failed: {err}"))
        }))
        .await;

        let mut new_handles: Vec<NodeHandle> = Vec::with_capacity(batch.candidates.len());
        let mut failure: Option<String> = None;
        for result in provisioned {
            match result {
                Ok(handle) => new_handles.push(handle),
                Err(reason) => {
                    if failure.is_none() {
                        failure = Some(reason);
                    }
                }
            }
        }
        if let Some(reason) = failure {
            let rollback_complete = self.release(&new_handles).await;
            return Err(BatchError {
                reason,
                rollback_complete,
            });
        }

        for (candidate, handle) in batch.candidates.iter().zip(&new_handles) {
            self.register_replacement(group, candidate, handle);
        }

        // Every replacement must report ready before any drain starts.
        if !self.wait_until_ready(&new_handles, policy).await {
            let rollback_complete = self.release(&new_handles).await;
            return Err(BatchError {
                reason: "replacements did not become ready in time".into(),
                rollback_complete,
            });
        }
        for handle in &new_handles {
            self.mark(&NodeId::new(handle.as_str()), NodePhase::Running);
            self.mark(&NodeId::new(handle.as_str()), NodePhase::Ready);
        }

        // Old nodes in the batch drain concurrently; order among them is
        // unspecified.
        let outcomes = future::join_all(batch.candidates.iter().map(|candidate| async move {
            let old_handle = old_handles
                .get(&candidate.node)
                .ok_or_else(|| format!("no provider handle for node {}", candidate.node))?;
            match self.drains.drain(&candidate.node, old_handle, policy).await {
                Ok(report) if report.final_phase == DrainPhase::Deprovisioned => Ok(()),
                Ok(report) => Err(format!(
                    "drain of {} ended in {:?}",
                    candidate.node, report.final_phase
                )),
                Err(err) => Err(format!("drain of {} failed: {err}", candidate.node)),
            }
        }))
        .await;

        let mut swapped = Vec::with_capacity(batch.candidates.len());
        let mut unearned = Vec::new();
        let mut failure: Option<String> = None;
        for ((candidate, handle), outcome) in
            batch.candidates.iter().zip(&new_handles).zip(outcomes)
        {
            match outcome {
                Ok(()) => {
                    replaced.push((candidate.node.clone(), handle.clone()));
                    swapped.push(candidate.node.clone());
                }
                Err(reason) => {
                    unearned.push(handle.clone());
                    if failure.is_none() {
                        failure = Some(reason);
                    }
                }
            }
        }
        if let Some(reason) = failure {
            let rollback_complete = self.release(&unearned).await;
            return Err(BatchError {
                reason,
                rollback_complete,
            });
        }
        Ok(swapped)
    }

    async fn provision_with_retry(
        &self,
        spec: &OfferingSpec,
        policy: &RebalancePolicy,
    ) -> Result<NodeHandle, ProviderError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.provisioner.provision(spec).await {
                Ok(handle) => return Ok(handle),
                // An open breaker means the provider is shedding load;
                // retrying synchronously would only feed it.
                Err(ProviderError::CircuitOpen) => return Err(ProviderError::CircuitOpen),
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) if attempts <= policy.max_retries => {
                    let backoff = policy.health_check_interval * 2_u32.pow(attempts.min(5));
                    warn!(offering = %spec.name, attempts, error = %err, "provision retry");
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn wait_until_ready(&self, handles: &[NodeHandle], policy: &RebalancePolicy) -> bool {
        let deadline = tokio::time::Instant::now() + policy.provision_timeout;
        loop {
            let ready = future::join_all(handles.iter().map(|handle| self.probe.is_ready(handle)))
                .await;
            if ready.iter().all(|r| *r) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(policy.health_check_interval).await;
        }
    }

    fn register_replacement(
        &self,
        group: &NodeGroup,
        candidate: &CandidateNode,
        handle: &NodeHandle,
    ) {
        let mut node = ManagedNode::new(
            handle.as_str(),
            group.id.clone(),
            candidate.replacement_offering.clone(),
        );
        node.provider_handle = Some(handle.to_string());
        self.registry.insert(node);
        self.mark(&NodeId::new(handle.as_str()), NodePhase::Provisioning);
    }

    // The registry only covers nodes this control loop created.
    fn mark(&self, node: &NodeId, to: NodePhase) {
        match self.registry.transition(node, to) {
            Ok(()) | Err(CoreError::UnknownNode { .. }) => {}
            Err(err) => warn!(node = %node, error = %err, "phase update rejected"),
        }
    }

    // Best-effort deprovision of replacements that did not earn their
    // place. Returns false when any instance could not be released; the
    // batch is then reported `Failed` rather than `RolledBack` and the
    // instance is left for the operator to reap.
    async fn release(&self, handles: &[NodeHandle]) -> bool {
        let mut complete = true;
        for handle in handles {
            match self.provisioner.deprovision(handle).await {
                Ok(()) => {
                    self.registry.remove(&NodeId::new(handle.as_str()));
                }
                Err(err) => {
                    warn!(handle = %handle, error = %err, "rollback deprovision failed");
                    complete = false;
                }
            }
        }
        complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::Planner;
    use crate::types::CandidateReason;
    use nimbus_core::{
        EventRecorder, GroupId, NodeGroupSpec, PodInfo, RebalancePolicy, ResourceAmounts,
        ScalePolicy,
    };
    use nimbus_drain::{ClusterApi, InMemoryCluster};
    use nimbus_provider::InMemoryProvisioner;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::time::Duration;

    struct FakeProbe {
        // None means every handle is ready.
        ready: Mutex<Option<HashSet<NodeHandle>>>,
    }

    impl FakeProbe {
        fn all_ready() -> Self {
            Self {
                ready: Mutex::new(None),
            }
        }

        fn none_ready() -> Self {
            Self {
                ready: Mutex::new(Some(HashSet::new())),
            }
        }
    }

    impl ReadinessProbe for FakeProbe {
        fn is_ready<'a>(&'a self, handle: &'a NodeHandle) -> BoxFuture<'a, bool> {
            Box::pin(async move {
                self.ready
                    .lock()
                    .as_ref()
                    .is_none_or(|set| set.contains(handle))
            })
        }
    }

    struct Fixture {
        cluster: Arc<InMemoryCluster>,
        provisioner: Arc<InMemoryProvisioner>,
        registry: Arc<NodeRegistry>,
        events: Arc<EventRecorder>,
        executor: RebalanceExecutor,
    }

    impl Fixture {
        fn new(probe: FakeProbe) -> Self {
            let cluster = Arc::new(InMemoryCluster::new());
            let provisioner = Arc::new(InMemoryProvisioner::new());
            let registry = Arc::new(NodeRegistry::new());
            let events = Arc::new(EventRecorder::new());
            let drains = Arc::new(DrainOrchestrator::new(
                Arc::clone(&cluster) as Arc<dyn ClusterApi>,
                Arc::clone(&provisioner) as Arc<dyn Provisioner>,
                Arc::clone(&registry),
                Arc::clone(&events) as Arc<dyn EventSink>,
            ));
            let executor = RebalanceExecutor::new(
                Arc::clone(&provisioner) as Arc<dyn Provisioner>,
                drains,
                Arc::new(probe),
                Arc::clone(&registry),
                Arc::clone(&events) as Arc<dyn EventSink>,
            );
            Self {
                cluster,
                provisioner,
                registry,
                events,
                executor,
            }
        }

        /// Provisions backing instances for pre-existing nodes.
        async fn seed_nodes(&self, names: &[&str]) -> HashMap<NodeId, NodeHandle> {
            let mut handles = HashMap::new();
            for name in names {
                let handle = self
                    .provisioner
                    .provision(&offering_spec("m5.large"))
                    .await
                    .unwrap();
                handles.insert(NodeId::new(*name), handle);
            }
            handles
        }
    }

    fn offering_spec(name: &str) -> OfferingSpec {
        OfferingSpec::new(name, ResourceAmounts::new(4000, 16 << 30))
    }

    fn catalog() -> HashMap<String, OfferingSpec> {
        [
            ("m5.large".to_string(), offering_spec("m5.large")),
            ("m7.large".to_string(), offering_spec("m7.large")),
        ]
        .into_iter()
        .collect()
    }

    fn group(min: u32, policy: RebalancePolicy) -> NodeGroup {
        NodeGroup::new(
            "workers",
            "Workers",
            NodeGroupSpec {
                min_nodes: min,
                max_nodes: 20,
                offerings: vec!["m5.large".to_string()],
                scale_policy: ScalePolicy::default(),
                rebalance_policy: policy,
            },
        )
        .unwrap()
    }

    fn fast_policy(max_concurrent: u32) -> RebalancePolicy {
        RebalancePolicy::builder()
            .max_concurrent(max_concurrent)
            .max_retries(3)
            .provision_timeout(Duration::from_secs(60))
            .drain_timeout(Duration::from_secs(30))
            .health_check_interval(Duration::from_millis(100))
            .build()
            .unwrap()
    }

    fn candidate(node: &str, priority: f64) -> CandidateNode {
        CandidateNode {
            node: NodeId::new(node),
            replacement_offering: "m7.large".to_string(),
            reason: CandidateReason::Manual,
            priority,
        }
    }

    fn plan_for(group: &NodeGroup, candidates: Vec<CandidateNode>) -> RebalancePlan {
        Planner::new().plan(group, candidates)
    }

    #[tokio::test]
    async fn empty_plan_succeeds_as_noop() {
        let fx = Fixture::new(FakeProbe::all_ready());
        let group = group(1, fast_policy(1));
        let mut plan = RebalancePlan::empty(GroupId::new("workers"));

        let report = fx
            .executor
            .execute(&group, &mut plan, &catalog(), &HashMap::new())
            .await;

        assert_eq!(report.result, ExecutionResult::Succeeded);
        assert!(report.replaced.is_empty());
        assert!(fx.events.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn single_swap_keeps_node_count() {
        let fx = Fixture::new(FakeProbe::all_ready());
        let group = group(2, fast_policy(1));
        let old_handles = fx.seed_nodes(&["n-0", "n-1"]).await;
        let mut plan = plan_for(&group, vec![candidate("n-1", 1.0)]);
        assert_eq!(plan.batches.len(), 1);

        let report = fx
            .executor
            .execute(&group, &mut plan, &catalog(), &old_handles)
            .await;

        assert_eq!(report.result, ExecutionResult::Succeeded);
        assert_eq!(plan.statuses, vec![BatchStatus::Succeeded]);
        assert_eq!(report.replaced.len(), 1);
        // Two seeded instances, one replacement, one deprovisioned old.
        assert_eq!(fx.provisioner.live_count(), 2);
        assert!(fx.events.events().iter().any(|e| matches!(
            e.event,
            FleetEvent::RebalanceBatchCompleted { batch: 0, .. }
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn replacement_nodes_walk_the_lifecycle_to_ready() {
        let fx = Fixture::new(FakeProbe::all_ready());
        let group = group(2, fast_policy(1));
        let old_handles = fx.seed_nodes(&["n-0", "n-1"]).await;
        let mut plan = plan_for(&group, vec![candidate("n-1", 1.0)]);

        let report = fx
            .executor
            .execute(&group, &mut plan, &catalog(), &old_handles)
            .await;

        let replacement = &report.replaced[0].1;
        let node = fx.registry.get(&NodeId::new(replacement.as_str())).unwrap();
        assert_eq!(node.phase, NodePhase::Ready);
        assert_eq!(node.offering, "m7.large");
        assert_eq!(node.provider_handle.as_deref(), Some(replacement.as_str()));
    }

    #[tokio::test(start_paused = true)]
    async fn batch_members_provision_concurrently() {
        let fx = Fixture::new(FakeProbe::all_ready());
        let group = group(1, fast_policy(2));
        let old_handles = fx.seed_nodes(&["n-0", "n-1"]).await;
        let mut plan = plan_for(&group, vec![candidate("n-0", 2.0), candidate("n-1", 1.0)]);
        assert_eq!(plan.batches.len(), 1);

        // Both replacements hit one transient failure and back off 200ms.
        fx.provisioner.fail_provision_call(
            3,
            ProviderError::Timeout {
                operation: "provision".into(),
            },
        );
        fx.provisioner.fail_provision_call(
            4,
            ProviderError::Timeout {
                operation: "provision".into(),
            },
        );

        let started = tokio::time::Instant::now();
        let report = fx
            .executor
            .execute(&group, &mut plan, &catalog(), &old_handles)
            .await;

        assert_eq!(report.result, ExecutionResult::Succeeded);
        assert_eq!(fx.provisioner.provision_calls(), 6);
        // Serial retries would stack the two backoffs.
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn old_nodes_are_never_drained_before_replacements_ready() {
        let fx = Fixture::new(FakeProbe::none_ready());
        let policy = RebalancePolicy::builder()
            .provision_timeout(Duration::from_secs(5))
            .health_check_interval(Duration::from_millis(100))
            .build()
            .unwrap();
        let group = group(1, policy);
        let old_handles = fx.seed_nodes(&["n-0"]).await;
        let mut plan = plan_for(&group, vec![candidate("n-0", 1.0)]);

        let report = fx
            .executor
            .execute(&group, &mut plan, &catalog(), &old_handles)
            .await;

        assert!(matches!(report.result, ExecutionResult::Failed { batch: 0, .. }));
        assert_eq!(plan.statuses, vec![BatchStatus::RolledBack]);
        // The replacement was rolled back; the old instance still stands.
        assert_eq!(fx.provisioner.live_count(), 1);
        assert!(fx.registry.is_empty());
        assert!(!old_handles
            .values()
            .any(|h| fx.provisioner.deprovisioned().contains(h)));
        assert!(!fx
            .events
            .events()
            .iter()
            .any(|e| matches!(e.event, FleetEvent::DrainStarted { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn mid_plan_failure_halts_without_undoing_earlier_batches() {
        let fx = Fixture::new(FakeProbe::all_ready());
        let group = group(1, fast_policy(1));
        let old_handles = fx.seed_nodes(&["n-0", "n-1", "n-2"]).await;
        let mut plan = plan_for(
            &group,
            vec![
                candidate("n-0", 3.0),
                candidate("n-1", 2.0),
                candidate("n-2", 1.0),
            ],
        );
        assert_eq!(plan.batches.len(), 3);

        // Seeding used calls 1-3; batch 1's replacement is call 4 and
        // batch 2's is call 5, which fails permanently.
        fx.provisioner.fail_provision_call(
            5,
            ProviderError::InvalidOffering {
                offering: "m7.large".into(),
            },
        );

        let report = fx
            .executor
            .execute(&group, &mut plan, &catalog(), &old_handles)
            .await;

        assert!(matches!(report.result, ExecutionResult::Failed { batch: 1, .. }));
        assert_eq!(
            plan.statuses,
            vec![
                BatchStatus::Succeeded,
                BatchStatus::RolledBack,
                BatchStatus::Pending
            ]
        );
        // Batch 1's swap stands: its old node is gone, replacement alive.
        assert_eq!(report.replaced.len(), 1);
        assert_eq!(report.replaced[0].0, NodeId::new("n-0"));
        assert!(fx
            .provisioner
            .deprovisioned()
            .contains(&old_handles[&NodeId::new("n-0")]));
        // Batch 3's node was never touched.
        assert!(!fx
            .provisioner
            .deprovisioned()
            .contains(&old_handles[&NodeId::new("n-2")]));
        assert!(fx.events.events().iter().any(|e| matches!(
            e.event,
            FleetEvent::RebalanceBatchFailed { batch: 1, .. }
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn partial_batch_provisioning_rolls_back_earlier_replacements() {
        let fx = Fixture::new(FakeProbe::all_ready());
        let group = group(1, fast_policy(2));
        let old_handles = fx.seed_nodes(&["n-0", "n-1"]).await;
        let mut plan = plan_for(&group, vec![candidate("n-0", 2.0), candidate("n-1", 1.0)]);
        assert_eq!(plan.batches.len(), 1);

        // Call 3 is the batch's first replacement; call 4 fails fatally.
        fx.provisioner.fail_provision_call(
            4,
            ProviderError::InvalidOffering {
                offering: "m7.large".into(),
            },
        );

        let report = fx
            .executor
            .execute(&group, &mut plan, &catalog(), &old_handles)
            .await;

        assert!(matches!(report.result, ExecutionResult::Failed { batch: 0, .. }));
        assert_eq!(plan.statuses, vec![BatchStatus::RolledBack]);
        // The partial replacement was deprovisioned; both old nodes stand.
        assert_eq!(fx.provisioner.live_count(), 2);
        assert_eq!(fx.provisioner.deprovisioned().len(), 1);
        assert!(report.replaced.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_rollback_marks_the_batch_failed() {
        let fx = Fixture::new(FakeProbe::none_ready());
        let policy = RebalancePolicy::builder()
            .provision_timeout(Duration::from_secs(5))
            .health_check_interval(Duration::from_millis(100))
            .build()
            .unwrap();
        let group = group(1, policy);
        let old_handles = fx.seed_nodes(&["n-0"]).await;
        let mut plan = plan_for(&group, vec![candidate("n-0", 1.0)]);

        // Readiness times out, and releasing the replacement fails too.
        fx.provisioner.fail_next_deprovision(ProviderError::Api {
            message: "terminate refused".into(),
        });

        let report = fx
            .executor
            .execute(&group, &mut plan, &catalog(), &old_handles)
            .await;

        assert!(matches!(report.result, ExecutionResult::Failed { batch: 0, .. }));
        assert_eq!(plan.statuses, vec![BatchStatus::Failed]);
        // The stuck replacement is still alive for the operator to reap.
        assert_eq!(fx.provisioner.live_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn circuit_open_fails_fast_without_retry() {
        let fx = Fixture::new(FakeProbe::all_ready());
        let group = group(1, fast_policy(1));
        let old_handles = fx.seed_nodes(&["n-0"]).await;
        let mut plan = plan_for(&group, vec![candidate("n-0", 1.0)]);

        fx.provisioner.fail_provision_call(2, ProviderError::CircuitOpen);

        let report = fx
            .executor
            .execute(&group, &mut plan, &catalog(), &old_handles)
            .await;

        assert!(matches!(report.result, ExecutionResult::Failed { .. }));
        // One seed call plus exactly one (unretried) provision attempt.
        assert_eq!(fx.provisioner.provision_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_provision_errors_are_retried() {
        let fx = Fixture::new(FakeProbe::all_ready());
        let group = group(1, fast_policy(1));
        let old_handles = fx.seed_nodes(&["n-0"]).await;
        let mut plan = plan_for(&group, vec![candidate("n-0", 1.0)]);

        fx.provisioner.fail_provision_call(
            2,
            ProviderError::Timeout {
                operation: "provision".into(),
            },
        );

        let report = fx
            .executor
            .execute(&group, &mut plan, &catalog(), &old_handles)
            .await;

        assert_eq!(report.result, ExecutionResult::Succeeded);
        assert_eq!(fx.provisioner.provision_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_failure_rolls_back_the_batch() {
        let fx = Fixture::new(FakeProbe::all_ready());
        let policy = RebalancePolicy::builder()
            .drain_timeout(Duration::from_secs(5))
            .health_check_interval(Duration::from_millis(100))
            .build()
            .unwrap();
        let group = group(1, policy);
        let old_handles = fx.seed_nodes(&["n-0"]).await;
        let mut plan = plan_for(&group, vec![candidate("n-0", 1.0)]);

        // A pod that never finishes terminating forces a drain timeout.
        fx.cluster.add_pod(
            &NodeId::new("n-0"),
            PodInfo::new("stuck", NodeId::new("n-0"), ResourceAmounts::new(100, 1 << 20)),
        );
        fx.cluster.set_lingering("stuck");

        let report = fx
            .executor
            .execute(&group, &mut plan, &catalog(), &old_handles)
            .await;

        assert!(matches!(report.result, ExecutionResult::Failed { batch: 0, .. }));
        assert_eq!(plan.statuses, vec![BatchStatus::RolledBack]);
        // Replacement rolled back, old instance untouched, still cordoned
        // for inspection.
        assert_eq!(fx.provisioner.live_count(), 1);
        assert!(fx.cluster.is_cordoned(&NodeId::new("n-0")));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_offering_fails_the_batch() {
        let fx = Fixture::new(FakeProbe::all_ready());
        let group = group(1, fast_policy(1));
        let old_handles = fx.seed_nodes(&["n-0"]).await;
        let mut plan = plan_for(
            &group,
            vec![CandidateNode {
                node: NodeId::new("n-0"),
                replacement_offering: "z9.mystery".to_string(),
                reason: CandidateReason::Manual,
                priority: 1.0,
            }],
        );

        let report = fx
            .executor
            .execute(&group, &mut plan, &catalog(), &old_handles)
            .await;

        match report.result {
            ExecutionResult::Failed { reason, .. } => assert!(reason.contains("z9.mystery")),
            ExecutionResult::Succeeded => panic!("expected failure"),
        }
        assert_eq!(fx.provisioner.live_count(), 1);
    }
}
