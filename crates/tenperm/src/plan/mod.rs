//! Plan construction and selection.
//!
//! A [`TransposePlan`] is everything one kernel launch needs: the
//! reduced shape and permutation, the axis partition, the launch
//! geometry, the host-side index tables and the predicted cost. Plans
//! are built in bulk by [`enumerate_plans`], ranked by
//! [`TransposePlan::cmp_rank`], and upload their tables lazily through
//! [`TransposePlan::activate`].

pub mod geometry;
pub mod split;
pub mod tables;

mod enumerate;

pub use enumerate::enumerate_plans;
pub use geometry::LaunchGeometry;
pub use split::{AxisPartition, Strategy};

use std::cmp::Ordering;
use std::sync::{Arc, Mutex, MutexGuard};

use tenperm_common::{DeviceId, ElemSize, HardwareProperties, StreamId};

use crate::memory::{AllocError, DeviceAllocator, DeviceBuffer};
use split::mmk_membership;
use tables::{TensorConv, TensorConvInOut};

/// Predicted memory traffic and cycle count of one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CostMetrics {
    /// Global load requests.
    pub gld_req: u64,
    /// Global store requests.
    pub gst_req: u64,
    /// Global load transactions.
    pub gld_tran: u64,
    /// Global store transactions.
    pub gst_tran: u64,
    /// Fully covered L2 cache lines.
    pub cl_full_l2: u64,
    /// Partially covered L2 cache lines.
    pub cl_part_l2: u64,
    /// Fully covered L1 cache lines.
    pub cl_full_l1: u64,
    /// Partially covered L1 cache lines.
    pub cl_part_l1: u64,
    /// Shared-memory load requests.
    pub sld_req: u64,
    /// Shared-memory store requests.
    pub sst_req: u64,
    /// Shared-memory load transactions.
    pub sld_tran: u64,
    /// Shared-memory store transactions.
    pub sst_tran: u64,
    /// Memory-level parallelism factor.
    pub mlp: f64,
    /// Predicted cycles; the ranking key.
    pub cycles: f64,
}

/// Device copies of the index tables, uploaded on activation.
struct DeviceTables {
    mbar: DeviceBuffer,
    mmk: DeviceBuffer,
    msh: DeviceBuffer,
    split: DeviceBuffer,
}

/// One fully derived execution plan.
pub struct TransposePlan {
    /// Device the plan was built for; execution is refused elsewhere.
    pub device: DeviceId,
    /// Stream the plan launches on.
    pub stream: StreamId,
    /// Element width.
    pub elem: ElemSize,
    /// Reduced shape, axis 0 fastest varying.
    pub shape: Vec<usize>,
    /// Reduced permutation over the reduced axes.
    pub permutation: Vec<usize>,
    /// Axis partition behind this plan.
    pub partition: AxisPartition,
    /// Thread-group and grid dimensions.
    pub geometry: LaunchGeometry,
    /// Resident groups per processor at this geometry.
    pub active_groups: u32,
    /// Input stride of the tile's column axis (tiled strategies).
    pub cu_dim_mk: usize,
    /// Output stride of the tile's row axis (tiled strategies).
    pub cu_dim_mm: usize,
    /// Tile-plane extents `(rows, columns)` for tiled strategies.
    pub tiled_vol: (usize, usize),
    /// Outer-loop iterations one thread group runs.
    pub num_iter: usize,
    /// Predicted cost; filled in by the cost model after construction.
    pub metrics: CostMetrics,

    pub(crate) host_mbar: Vec<TensorConvInOut>,
    pub(crate) host_mmk: Vec<TensorConvInOut>,
    pub(crate) host_msh: Vec<TensorConv>,
    pub(crate) host_split: Vec<TensorConvInOut>,

    tables: Mutex<Option<DeviceTables>>,
}

impl core::fmt::Debug for TransposePlan {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TransposePlan")
            .field("strategy", &self.partition.strategy)
            .field("shape", &self.shape)
            .field("permutation", &self.permutation)
            .field("geometry", &self.geometry)
            .field("cycles", &self.metrics.cycles)
            .finish()
    }
}

impl TransposePlan {
    /// Assemble a plan from a finished partition, or `None` when the
    /// launch geometry does not fit the device.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        partition: AxisPartition,
        shape: &[usize],
        permutation: &[usize],
        elem: ElemSize,
        reg_storage: u32,
        device: DeviceId,
        stream: StreamId,
        props: &HardwareProperties,
    ) -> Option<Self> {
        let geometry = LaunchGeometry::derive(&partition, elem, reg_storage, props)?;
        let active_groups = geometry.max_active_groups(props);

        let rank = shape.len();
        let in_mmk = mmk_membership(partition.size_mm, partition.size_mk, rank, permutation);
        let istr = tables::input_strides(shape);
        let ostr = tables::output_strides_by_input_axis(shape, permutation);

        let host_mbar = tables::build_mbar(shape, permutation, &in_mmk);
        let (host_mmk, host_msh) = match partition.strategy {
            Strategy::Packed | Strategy::PackedSplit => (
                tables::build_mmk(shape, permutation, &in_mmk),
                tables::build_msh(shape, permutation, &in_mmk),
            ),
            _ => (Vec::new(), Vec::new()),
        };
        let host_split = if partition.num_split > 1 {
            tables::build_split(
                shape,
                permutation,
                partition.split_axis,
                partition.split_extent,
                partition.num_split,
            )
        } else {
            Vec::new()
        };

        let (cu_dim_mk, cu_dim_mm, tiled_vol) = match partition.strategy {
            // The tile plane is input axis 0 by output axis perm[0];
            // cu_dim_mk strides a tile row on the input side, cu_dim_mm
            // strides a tile column on the output side.
            Strategy::Tiled => (
                istr[permutation[0]],
                ostr[0],
                (partition.vol_mm, partition.vol_mk),
            ),
            // Input axis 0 leads on both sides; the second output axis
            // spans the other tile dimension.
            Strategy::TiledCopy => (
                istr[permutation[1]],
                ostr[permutation[1]],
                (partition.vol_mm, partition.vol_mk_bar),
            ),
            _ => (0, 0, (0, 0)),
        };

        let total = partition.vol_mbar * partition.vol_mmk;
        let num_iter = match partition.strategy {
            Strategy::Trivial => {
                let per_pass = geometry.group.num_elems() as usize * geometry.grid.x as usize;
                total.div_ceil(per_pass)
            }
            Strategy::Tiled | Strategy::TiledCopy => {
                partition.vol_mbar.div_ceil(geometry.grid.z as usize)
            }
            Strategy::Packed => partition.vol_mbar.div_ceil(geometry.grid.x as usize),
            Strategy::PackedSplit => (partition.vol_mbar * partition.num_split)
                .div_ceil(geometry.grid.x as usize),
        };

        Some(Self {
            device,
            stream,
            elem,
            shape: shape.to_vec(),
            permutation: permutation.to_vec(),
            partition,
            geometry,
            active_groups,
            cu_dim_mk,
            cu_dim_mm,
            tiled_vol,
            num_iter,
            metrics: CostMetrics::default(),
            host_mbar,
            host_mmk,
            host_msh,
            host_split,
            tables: Mutex::new(None),
        })
    }

    fn lock_tables(&self) -> MutexGuard<'_, Option<DeviceTables>> {
        match self.tables.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Upload the index tables to the device. Idempotent: a second call
    /// on an already activated plan returns without touching the
    /// allocator.
    pub fn activate(&self, allocator: &Arc<dyn DeviceAllocator>) -> Result<(), AllocError> {
        let mut guard = self.lock_tables();
        if guard.is_some() {
            return Ok(());
        }
        let upload = |bytes: &[u8]| {
            DeviceBuffer::with_data(Arc::clone(allocator), self.device, bytes)
        };
        *guard = Some(DeviceTables {
            mbar: upload(bytemuck::cast_slice(&self.host_mbar))?,
            mmk: upload(bytemuck::cast_slice(&self.host_mmk))?,
            msh: upload(bytemuck::cast_slice(&self.host_msh))?,
            split: upload(bytemuck::cast_slice(&self.host_split))?,
        });
        Ok(())
    }

    /// Whether [`activate`](Self::activate) has run.
    pub fn is_active(&self) -> bool {
        self.lock_tables().is_some()
    }

    /// Total rank order for candidate ranking: predicted cycles first,
    /// then structural simplicity, then shared-memory footprint, then
    /// register storage. Two distinct candidates practically never
    /// compare equal, so selection is deterministic.
    pub fn cmp_rank(&self, other: &Self) -> Ordering {
        self.metrics
            .cycles
            .total_cmp(&other.metrics.cycles)
            .then_with(|| self.partition.strategy.cmp(&other.partition.strategy))
            .then_with(|| self.geometry.shmem_bytes.cmp(&other.geometry.shmem_bytes))
            .then_with(|| self.geometry.reg_storage.cmp(&other.geometry.reg_storage))
    }

    /// A human-readable summary of the plan.
    pub fn describe(&self) -> PlanDescription {
        PlanDescription {
            strategy: self.partition.strategy,
            shape: self.shape.clone(),
            permutation: self.permutation.clone(),
            group: self.geometry.group,
            grid: self.geometry.grid,
            shmem_bytes: self.geometry.shmem_bytes,
            reg_storage: self.geometry.reg_storage,
            num_split: self.partition.num_split,
            num_iter: self.num_iter,
            cycles: self.metrics.cycles,
        }
    }
}

/// Pick the lowest-ranked plan. The first minimum wins, so the result
/// is stable for a given candidate order.
pub fn select_best(plans: Vec<TransposePlan>) -> Option<TransposePlan> {
    plans.into_iter().min_by(|a, b| a.cmp_rank(b))
}

/// Snapshot of a plan's launch parameters, for logging and inspection.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct PlanDescription {
    /// Execution strategy.
    pub strategy: Strategy,
    /// Reduced shape.
    pub shape: Vec<usize>,
    /// Reduced permutation.
    pub permutation: Vec<usize>,
    /// Threads per group.
    pub group: tenperm_common::Dim3,
    /// Groups in the grid.
    pub grid: tenperm_common::Dim3,
    /// Dynamic shared memory per group.
    pub shmem_bytes: usize,
    /// Elements per thread in registers.
    pub reg_storage: u32,
    /// Split pieces.
    pub num_split: usize,
    /// Outer-loop iterations.
    pub num_iter: usize,
    /// Predicted cycles.
    pub cycles: f64,
}

impl core::fmt::Display for PlanDescription {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{} plan for shape {:?} permutation {:?}: group ({}, {}, {}), grid ({}, {}, {}), \
             {} B shared, {} regs, {} iterations, {:.0} cycles",
            self.strategy,
            self.shape,
            self.permutation,
            self.group.x,
            self.group.y,
            self.group.z,
            self.grid.x,
            self.grid.y,
            self.grid.z,
            self.shmem_bytes,
            self.reg_storage,
            self.num_iter,
            self.cycles,
        )
    }
}

/// Collapse extent-1 axes and merge axes that stay adjacent in both the
/// input and the output layout. The permuted result is unchanged; the
/// reduced problem is what plans are built from.
pub fn reduce_ranks(shape: &[usize], permutation: &[usize]) -> (Vec<usize>, Vec<usize>) {
    let kept: Vec<usize> = (0..shape.len()).filter(|&a| shape[a] > 1).collect();
    if kept.is_empty() {
        return (vec![1], vec![0]);
    }

    // Output position of each kept axis, counted over kept axes only.
    let mut opos = vec![0usize; shape.len()];
    let mut next = 0usize;
    for &axis in permutation {
        if shape[axis] > 1 {
            opos[axis] = next;
            next += 1;
        }
    }

    // Merge runs of kept axes that are consecutive in both layouts.
    let mut groups: Vec<(usize, usize)> = Vec::new(); // (extent, first opos)
    for (i, &axis) in kept.iter().enumerate() {
        if i > 0 && opos[axis] == opos[kept[i - 1]] + 1 {
            if let Some(group) = groups.last_mut() {
                group.0 *= shape[axis];
            }
        } else {
            groups.push((shape[axis], opos[axis]));
        }
    }

    let new_shape: Vec<usize> = groups.iter().map(|&(extent, _)| extent).collect();
    let mut order: Vec<usize> = (0..groups.len()).collect();
    order.sort_by_key(|&g| groups[g].1);
    (new_shape, order)
}
