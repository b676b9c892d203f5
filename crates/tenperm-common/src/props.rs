use crate::Dim3;

/// Microarchitectural limits of one device, queried from the backend at
/// plan-creation time.
///
/// The warp (wavefront) width is deliberately runtime data rather than a
/// build-time constant: it sizes the shared-memory tile and the launch
/// geometry, and differs between vendors and even between devices of one
/// vendor.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct HardwareProperties {
    /// Number of threads that execute in lockstep.
    pub warp_size: u32,
    /// Maximum number of threads of one work group.
    pub max_threads_per_group: u32,
    /// Shared memory available to one work group, in bytes.
    pub max_shared_memory: usize,
    /// Shared memory of one compute processor, in bytes. Bounds how many
    /// groups can be resident at once.
    pub shared_memory_per_processor: usize,
    /// Maximum work groups resident on one compute processor.
    pub max_groups_per_processor: u32,
    /// Maximum threads resident on one compute processor.
    pub max_threads_per_processor: u32,
    /// Number of compute processors on the device.
    pub processor_count: u32,
    /// Grid-shape limits for a launch.
    pub max_grid: Dim3,
    /// First-level cache line width in bytes.
    pub cache_line_l1: u32,
    /// Second-level cache line (memory transaction segment) width in bytes.
    pub cache_line_l2: u32,
}

impl HardwareProperties {
    /// First-level cache line width in elements of the given byte width.
    pub fn l1_elems(&self, elem_bytes: usize) -> usize {
        (self.cache_line_l1 as usize / elem_bytes).max(1)
    }

    /// Memory transaction width in elements of the given byte width.
    pub fn l2_elems(&self, elem_bytes: usize) -> usize {
        (self.cache_line_l2 as usize / elem_bytes).max(1)
    }
}
