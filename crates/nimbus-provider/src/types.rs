//! Provisioning request and handle types.

use nimbus_core::ResourceAmounts;
use serde::{Deserialize, Serialize};

/// Specification of a cloud instance offering to provision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferingSpec {
    /// Offering name (instance type), e.g. `m5.large`.
    pub name: String,
    /// Capacity a node of this offering contributes.
    pub capacity: ResourceAmounts,
}

impl OfferingSpec {
    /// Creates a new offering spec.
    #[must_use]
    pub fn new(name: impl Into<String>, capacity: ResourceAmounts) -> Self {
        Self {
            name: name.into(),
            capacity,
        }
    }
}

/// Opaque handle identifying one provisioned cloud instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeHandle(String);

impl NodeHandle {
    /// Wraps a provider-issued handle string.
    #[must_use]
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    /// Returns the handle as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle phase of a cloud instance as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProvisionPhase {
    /// Instance creation in progress.
    Creating,
    /// Instance is up and reachable.
    Running,
    /// Instance has been terminated.
    Terminated,
    /// Instance creation failed.
    Failed,
}
