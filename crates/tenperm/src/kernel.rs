use core::time::Duration;

use tenperm_common::{DeviceId, HardwareProperties};
use thiserror::Error;

use crate::memory::DevicePtr;
use crate::plan::TransposePlan;

/// Scalar factors applied during execution:
/// `output[p(i)] = alpha * input[i] + beta * output[p(i)]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scale {
    /// Factor on the input element.
    pub alpha: f64,
    /// Factor on the previous output element.
    pub beta: f64,
}

impl Default for Scale {
    fn default() -> Self {
        // Pure copy-permute.
        Self {
            alpha: 1.0,
            beta: 0.0,
        }
    }
}

/// An error raised by the kernel backend.
#[derive(Error, Debug)]
pub enum KernelError {
    /// The launch could not be enqueued or failed to execute.
    #[error("kernel launch failed: {0}")]
    Launch(String),

    /// Waiting for the work to finish failed.
    #[error("device synchronization failed: {0}")]
    Sync(String),
}

/// The external data-movement kernels, treated as opaque operations
/// parameterized by a plan's launch geometry and index tables.
///
/// Implementations own the actual per-element kernels for all five
/// strategies and the stream machinery. The planner never touches device
/// code; it hands a fully built, activated [`TransposePlan`] plus the two
/// data pointers to the backend.
pub trait TransposeKernel: Send + Sync {
    /// Device the calling thread is currently bound to.
    fn current_device(&self) -> DeviceId;

    /// Microarchitectural limits of the given device.
    fn properties(&self, device: DeviceId) -> HardwareProperties;

    /// Enqueue the data movement described by `plan` on the plan's
    /// stream. Returns once enqueued; completion follows the stream's
    /// submission order.
    fn launch(
        &self,
        plan: &TransposePlan,
        input: DevicePtr,
        output: DevicePtr,
        scale: Scale,
    ) -> Result<(), KernelError>;

    /// Enqueue like [`launch`](Self::launch), then block until this
    /// work finishes and report the device time it took. Used by the
    /// autotuner, which must time one candidate at a time because the
    /// stream executes enqueued work in submission order.
    fn launch_timed(
        &self,
        plan: &TransposePlan,
        input: DevicePtr,
        output: DevicePtr,
        scale: Scale,
    ) -> Result<Duration, KernelError>;
}
