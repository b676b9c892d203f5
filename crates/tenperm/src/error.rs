use tenperm_common::DeviceId;
use thiserror::Error;

use crate::kernel::KernelError;
use crate::memory::AllocError;

/// Result codes of the planner boundary operations.
#[derive(Error, Debug)]
pub enum PermuteError {
    /// The handle does not name a live plan.
    #[error("invalid plan handle")]
    InvalidPlan,

    /// Malformed rank, shape, permutation or element width. Rejected
    /// before any device interaction.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The plan was executed on a device other than the one it was
    /// created for.
    #[error("plan was created for {expected} but the caller is on {actual}")]
    InvalidDevice {
        /// Device the plan is bound to.
        expected: DeviceId,
        /// Device the caller is currently on.
        actual: DeviceId,
    },

    /// Underlying accelerator runtime failure (allocation, launch).
    #[error("accelerator runtime failure\nCaused by:\n  {0}")]
    Internal(String),

    /// Unclassified failure: the backend reported an error after the
    /// work had already been accepted (a failed synchronization), so it
    /// cannot be attributed to a specific operation.
    #[error("unclassified failure\nCaused by:\n  {0}")]
    Undefined(String),
}

impl From<AllocError> for PermuteError {
    fn from(err: AllocError) -> Self {
        PermuteError::Internal(err.to_string())
    }
}

impl From<KernelError> for PermuteError {
    fn from(err: KernelError) -> Self {
        match err {
            KernelError::Launch(_) => PermuteError::Internal(err.to_string()),
            KernelError::Sync(_) => PermuteError::Undefined(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_failures_map_by_attribution() {
        let launch = PermuteError::from(KernelError::Launch("bad grid".to_string()));
        assert!(matches!(launch, PermuteError::Internal(_)));

        // A failed wait arrives after the launch was accepted.
        let sync = PermuteError::from(KernelError::Sync("device lost".to_string()));
        assert!(matches!(sync, PermuteError::Undefined(_)));
    }

    #[test]
    fn allocation_failures_are_internal() {
        let err = PermuteError::from(AllocError::Backend("driver".to_string()));
        assert!(matches!(err, PermuteError::Internal(_)));
    }
}
