//! Launch geometry derivation.

use tenperm_common::{Dim3, ElemSize, HardwareProperties};

use super::split::{AxisPartition, Strategy};

/// Thread-group and grid dimensions of one candidate, plus its
/// shared-memory and register footprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchGeometry {
    /// Threads per group.
    pub group: Dim3,
    /// Groups in the grid.
    pub grid: Dim3,
    /// Dynamic shared memory per group, in bytes.
    pub shmem_bytes: usize,
    /// Elements held in registers per thread (packed strategies only,
    /// 1 elsewhere).
    pub reg_storage: u32,
}

impl LaunchGeometry {
    /// Derive the geometry for a partition, or `None` when the candidate
    /// cannot run on this device (tile exceeding shared memory, thread
    /// count exceeding the group limit).
    pub fn derive(
        part: &AxisPartition,
        elem: ElemSize,
        reg_storage: u32,
        props: &HardwareProperties,
    ) -> Option<Self> {
        let shmem_bytes = part.shmem_alloc(elem);
        if shmem_bytes > props.max_shared_memory {
            return None;
        }

        let total = part.vol_mbar * part.vol_mmk;
        match part.strategy {
            Strategy::Trivial => {
                let threads = (props.warp_size * 8).min(props.max_threads_per_group);
                let blocks = total.div_ceil(threads as usize) as u64;
                let grid_x = blocks.min(props.max_grid.x as u64) as u32;
                Some(Self {
                    group: Dim3::new_1d(threads),
                    grid: Dim3::new_1d(grid_x.max(1)),
                    shmem_bytes,
                    reg_storage: 1,
                })
            }
            Strategy::Tiled | Strategy::TiledCopy => {
                let tile = part.tile as u32;
                let rows_y = if part.strategy == Strategy::Tiled {
                    part.vol_mk
                } else {
                    part.vol_mk_bar
                };
                let tiles_x = part.vol_mm.div_ceil(part.tile) as u32;
                let tiles_y = rows_y.div_ceil(part.tile) as u32;
                let grid_x = (tiles_x as u64 * tiles_y as u64).min(props.max_grid.x as u64) as u32;
                let grid_z = (part.vol_mbar as u64).min(props.max_grid.z as u64) as u32;
                Some(Self {
                    group: Dim3::new_2d(tile, tile / 4),
                    grid: Dim3 {
                        x: grid_x.max(1),
                        y: 1,
                        z: grid_z.max(1),
                    },
                    shmem_bytes,
                    reg_storage: 1,
                })
            }
            Strategy::Packed | Strategy::PackedSplit => {
                let vol = part.vol_mmk_split();
                let warps = vol.div_ceil(reg_storage as usize).div_ceil(part.tile);
                let threads = (warps * part.tile) as u32;
                if threads > props.max_threads_per_group {
                    return None;
                }
                let blocks = (part.vol_mbar * part.num_split) as u64;
                let grid_x = blocks.min(props.max_grid.x as u64) as u32;
                Some(Self {
                    group: Dim3::new_1d(threads.max(part.tile as u32)),
                    grid: Dim3::new_1d(grid_x.max(1)),
                    shmem_bytes,
                    reg_storage,
                })
            }
        }
    }

    /// Thread groups that can be resident on one processor at once,
    /// limited by threads, shared memory and the group cap.
    pub fn max_active_groups(&self, props: &HardwareProperties) -> u32 {
        let threads = self.group.num_elems();
        let by_threads = props.max_threads_per_processor / threads.max(1);
        let by_shmem = if self.shmem_bytes > 0 {
            (props.shared_memory_per_processor / self.shmem_bytes) as u32
        } else {
            u32::MAX
        };
        by_threads
            .min(by_shmem)
            .min(props.max_groups_per_processor)
            .max(1)
    }
}
