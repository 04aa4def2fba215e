//! The [`Provisioner`] capability and an in-memory fake.
//!
//! Trait methods return boxed futures so the trait stays dyn-compatible
//! and can be injected as `Arc<dyn Provisioner>` into the engines.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;

use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::{ProviderError, Result};
use crate::types::{NodeHandle, OfferingSpec, ProvisionPhase};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Capability to create, destroy, and inspect cloud instances.
///
/// Implementations are expected to already apply retry/backoff and a
/// circuit breaker; callers treat [`ProviderError::CircuitOpen`] as
/// fail-fast and requeue instead of retrying inline.
pub trait Provisioner: Send + Sync {
    /// Provisions one instance of the given offering.
    fn provision<'a>(&'a self, offering: &'a OfferingSpec) -> BoxFuture<'a, Result<NodeHandle>>;

    /// Terminates the instance behind the given handle.
    fn deprovision<'a>(&'a self, handle: &'a NodeHandle) -> BoxFuture<'a, Result<()>>;

    /// Reports the current phase of the instance behind the given handle.
    fn status<'a>(&'a self, handle: &'a NodeHandle) -> BoxFuture<'a, Result<ProvisionPhase>>;
}

#[derive(Debug, Default)]
struct FakeState {
    instances: HashMap<NodeHandle, (OfferingSpec, ProvisionPhase)>,
    scripted_provision_errors: VecDeque<ProviderError>,
    scripted_call_errors: HashMap<usize, ProviderError>,
    scripted_deprovision_errors: VecDeque<ProviderError>,
    deprovisioned: Vec<NodeHandle>,
    provision_calls: usize,
}

/// Deterministic in-memory provisioner for tests.
///
/// Instances report `Running` immediately unless a phase is set
/// explicitly; provisioning failures can be scripted per call.
#[derive(Debug, Default)]
pub struct InMemoryProvisioner {
    state: Mutex<FakeState>,
}

impl InMemoryProvisioner {
    /// Creates an empty fake provisioner.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an error to be returned by an upcoming `provision` call.
    ///
    /// Errors are consumed in FIFO order before any successful provision.
    pub fn fail_next_provision(&self, error: ProviderError) {
        self.state.lock().scripted_provision_errors.push_back(error);
    }

    /// Scripts an error for the nth `provision` call (1-based), leaving
    /// other calls unaffected.
    pub fn fail_provision_call(&self, call: usize, error: ProviderError) {
        self.state.lock().scripted_call_errors.insert(call, error);
    }

    /// Queues an error to be returned by an upcoming `deprovision` call.
    pub fn fail_next_deprovision(&self, error: ProviderError) {
        self.state.lock().scripted_deprovision_errors.push_back(error);
    }

    /// Overrides the reported phase of an existing instance.
    pub fn set_phase(&self, handle: &NodeHandle, phase: ProvisionPhase) {
        let mut state = self.state.lock();
        if let Some(entry) = state.instances.get_mut(handle) {
            entry.1 = phase;
        }
    }

    /// Handles of instances that have been deprovisioned, in order.
    #[must_use]
    pub fn deprovisioned(&self) -> Vec<NodeHandle> {
        self.state.lock().deprovisioned.clone()
    }

    /// Number of instances currently alive.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.state
            .lock()
            .instances
            .values()
            .filter(|(_, phase)| *phase != ProvisionPhase::Terminated)
            .count()
    }

    /// Total number of `provision` calls, including failed ones.
    #[must_use]
    pub fn provision_calls(&self) -> usize {
        self.state.lock().provision_calls
    }
}

impl Provisioner for InMemoryProvisioner {
    fn provision<'a>(&'a self, offering: &'a OfferingSpec) -> BoxFuture<'a, Result<NodeHandle>> {
        Box::pin(async move {
            let mut state = self.state.lock();
            state.provision_calls += 1;
            let call = state.provision_calls;
            if let Some(err) = state.scripted_call_errors.remove(&call) {
                debug!(offering = %offering.name, call, error = %err, "scripted provision failure");
                return Err(err);
            }
            if let Some(err) = state.scripted_provision_errors.pop_front() {
                debug!(offering = %offering.name, error = %err, "scripted provision failure");
                return Err(err);
            }
            let handle = NodeHandle::new(format!("i-{}", Uuid::new_v4().simple()));
            state
                .instances
                .insert(handle.clone(), (offering.clone(), ProvisionPhase::Running));
            debug!(offering = %offering.name, handle = %handle, "provisioned fake instance");
            Ok(handle)
        })
    }

    fn deprovision<'a>(&'a self, handle: &'a NodeHandle) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut state = self.state.lock();
            if let Some(err) = state.scripted_deprovision_errors.pop_front() {
                debug!(handle = %handle, error = %err, "scripted deprovision failure");
                return Err(err);
            }
            match state.instances.get_mut(handle) {
                Some(entry) => {
                    entry.1 = ProvisionPhase::Terminated;
                    state.deprovisioned.push(handle.clone());
                    debug!(handle = %handle, "deprovisioned fake instance");
                    Ok(())
                }
                None => Err(ProviderError::UnknownHandle {
                    handle: handle.to_string(),
                }),
            }
        })
    }

    fn status<'a>(&'a self, handle: &'a NodeHandle) -> BoxFuture<'a, Result<ProvisionPhase>> {
        Box::pin(async move {
            let state = self.state.lock();
            state
                .instances
                .get(handle)
                .map(|(_, phase)| *phase)
                .ok_or_else(|| ProviderError::UnknownHandle {
                    handle: handle.to_string(),
                })
        })
    }
}
