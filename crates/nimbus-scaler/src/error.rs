//! Error types for the scale engine and group store.

use nimbus_core::GroupId;
use thiserror::Error;

/// Errors that can occur when scaling or patching group state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScalerError {
    /// The group is not present in the store.
    #[error("unknown node group: {group}")]
    UnknownGroup {
        /// The missing group.
        group: GroupId,
    },

    /// A status patch raced another writer.
    #[error(
        "status patch conflict on group {group}: expected generation {expected}, found {actual}"
    )]
    StatusConflict {
        /// The contended group.
        group: GroupId,
        /// Generation the writer read.
        expected: u64,
        /// Generation found at patch time.
        actual: u64,
    },

    /// Patch retries were exhausted under sustained contention.
    #[error("status patch on group {group} gave up after {attempts} attempts")]
    PatchRetriesExhausted {
        /// The contended group.
        group: GroupId,
        /// Number of attempts made.
        attempts: u32,
    },

    /// Core validation error.
    #[error(transparent)]
    Core(#[from] nimbus_core::CoreError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_core::CoreError;

    #[test]
    fn core_errors_convert_and_compare() {
        let core = CoreError::InvalidNodeGroup {
            reason: "empty offerings".into(),
        };
        let a = ScalerError::from(core.clone());
        let b = ScalerError::from(core);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "invalid node group: empty offerings");
    }
}
