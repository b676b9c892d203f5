use core::cmp::Ordering;

use derive_new::new;

/// Identifies one accelerator device as enumerated by the backend.
#[derive(Debug, Hash, PartialEq, Eq, Clone, Copy, new, serde::Serialize, serde::Deserialize)]
pub struct DeviceId {
    /// Index of the device.
    pub index: u32,
}

impl core::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "device-{}", self.index)
    }
}

impl Ord for DeviceId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.index.cmp(&other.index)
    }
}

impl PartialOrd for DeviceId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Opaque token naming one execution stream of a device.
///
/// The planner never interprets the value; it is recorded in a plan at
/// creation time and handed back to the backend on every launch. The
/// default value designates the backend's null stream.
#[derive(
    Debug,
    Default,
    Hash,
    PartialEq,
    Eq,
    Clone,
    Copy,
    PartialOrd,
    Ord,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct StreamId {
    /// Backend-defined stream token.
    pub value: u64,
}

impl core::fmt::Display for StreamId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "stream-{}", self.value)
    }
}
