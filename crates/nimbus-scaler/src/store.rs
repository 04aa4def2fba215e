//! In-memory node group store with optimistic status patching.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;

use nimbus_core::{GroupId, NodeGroup, NodeGroupStatus};

use crate::error::ScalerError;

const DEFAULT_PATCH_ATTEMPTS: u32 = 10;

/// Shared store of node groups.
///
/// Status writes go through read-modify-patch with a generation check, so
/// racing reconcile cycles (including a replica during leadership
/// handoff) can never clobber each other's updates. Spec fields are
/// operator-owned and replaced wholesale.
#[derive(Debug, Default)]
pub struct GroupStore {
    groups: RwLock<HashMap<GroupId, NodeGroup>>,
}

impl GroupStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a group.
    pub fn upsert(&self, group: NodeGroup) {
        self.groups.write().insert(group.id.clone(), group);
    }

    /// Removes a group, returning it if present.
    pub fn remove(&self, id: &GroupId) -> Option<NodeGroup> {
        self.groups.write().remove(id)
    }

    /// Copy of the group, if present.
    #[must_use]
    pub fn get(&self, id: &GroupId) -> Option<NodeGroup> {
        self.groups.read().get(id).cloned()
    }

    /// IDs of all stored groups.
    #[must_use]
    pub fn group_ids(&self) -> Vec<GroupId> {
        self.groups.read().keys().cloned().collect()
    }

    /// Applies a single status patch conditioned on the generation the
    /// writer read.
    ///
    /// # Errors
    ///
    /// Returns [`ScalerError::StatusConflict`] if another writer patched
    /// the status since `expected_generation` was read.
    pub fn patch_status<F>(
        &self,
        id: &GroupId,
        expected_generation: u64,
        patch: F,
    ) -> Result<u64, ScalerError>
    where
        F: FnOnce(&mut NodeGroupStatus),
    {
        let mut groups = self.groups.write();
        let group = groups
            .get_mut(id)
            .ok_or_else(|| ScalerError::UnknownGroup { group: id.clone() })?;

        if group.status.generation != expected_generation {
            return Err(ScalerError::StatusConflict {
                group: id.clone(),
                expected: expected_generation,
                actual: group.status.generation,
            });
        }

        patch(&mut group.status);
        group.status.generation = expected_generation + 1;
        Ok(group.status.generation)
    }

    /// Read-modify-patch loop that retries on generation conflicts.
    ///
    /// The closure may run multiple times and must be idempotent over the
    /// status it is handed.
    ///
    /// # Errors
    ///
    /// Returns [`ScalerError::UnknownGroup`] if the group vanishes, or
    /// [`ScalerError::PatchRetriesExhausted`] under sustained contention.
    pub fn update_status<F>(&self, id: &GroupId, mut patch: F) -> Result<u64, ScalerError>
    where
        F: FnMut(&mut NodeGroupStatus),
    {
        for attempt in 1..=DEFAULT_PATCH_ATTEMPTS {
            let observed = self
                .get(id)
                .ok_or_else(|| ScalerError::UnknownGroup { group: id.clone() })?
                .status
                .generation;

            match self.patch_status(id, observed, &mut patch) {
                Ok(generation) => return Ok(generation),
                Err(ScalerError::StatusConflict { .. }) => {
                    debug!(group = %id, attempt, "status patch conflict; retrying");
                }
                Err(other) => return Err(other),
            }
        }
        Err(ScalerError::PatchRetriesExhausted {
            group: id.clone(),
            attempts: DEFAULT_PATCH_ATTEMPTS,
        })
    }
}
