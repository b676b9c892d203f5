//! Candidate enumeration.

use tenperm_common::{DeviceId, ElemSize, HardwareProperties, StreamId};

use crate::cost;
use crate::error::PermuteError;

use super::split::{AxisPartition, Strategy};
use super::{reduce_ranks, TransposePlan};

/// Largest number of elements a packed thread keeps in registers.
const MAX_REG_STORAGE: u32 = 8;

/// Build every viable plan for the problem on the given device.
///
/// The shape and permutation are rank-reduced first; each strategy then
/// contributes the candidates whose launch geometry fits the device,
/// with the cost model evaluated on each. An empty result is an
/// internal error: any valid problem admits at least one strategy.
#[allow(clippy::too_many_arguments)]
pub fn enumerate_plans(
    shape: &[usize],
    permutation: &[usize],
    elem: ElemSize,
    device: DeviceId,
    stream: StreamId,
    props: &HardwareProperties,
    samples: usize,
) -> Result<Vec<TransposePlan>, PermuteError> {
    let (shape, permutation) = reduce_ranks(shape, permutation);
    let rank = shape.len();
    let tile = props.warp_size as usize;
    let identity = permutation.iter().enumerate().all(|(i, &a)| i == a);

    let mut plans = Vec::new();
    let mut push = |part: AxisPartition, reg_storage: u32| {
        if let Some(mut plan) = TransposePlan::build(
            part,
            &shape,
            &permutation,
            elem,
            reg_storage,
            device,
            stream,
            props,
        ) {
            plan.metrics = cost::estimate(&plan, props, samples);
            plans.push(plan);
        }
    };

    for strategy in Strategy::ALL {
        match strategy {
            Strategy::Trivial => {
                if identity {
                    let mut part = AxisPartition::new(strategy, tile);
                    part.update(rank, rank, &shape, &permutation);
                    push(part, 1);
                }
            }
            Strategy::Tiled => {
                if rank >= 2 && permutation[0] != 0 {
                    let mut part = AxisPartition::new(strategy, tile);
                    part.update(1, 1, &shape, &permutation);
                    push(part, 1);
                }
            }
            Strategy::TiledCopy => {
                if rank >= 2 && permutation[0] == 0 {
                    let mut part = AxisPartition::new(strategy, tile);
                    part.update(1, 2, &shape, &permutation);
                    push(part, 1);
                }
            }
            Strategy::Packed => {
                if rank < 2 {
                    continue;
                }
                for size_mm in 1..=rank {
                    for size_mk in 1..=rank {
                        let mut part = AxisPartition::new(strategy, tile);
                        part.update(size_mm, size_mk, &shape, &permutation);
                        // Tiles a single warp pass could cover belong to
                        // the tiled strategies.
                        if part.vol_mmk <= tile * tile {
                            continue;
                        }
                        if part.shmem_alloc(elem) > props.max_shared_memory {
                            continue;
                        }
                        for reg_storage in 1..=MAX_REG_STORAGE {
                            push(part.clone(), reg_storage);
                        }
                    }
                }
            }
            Strategy::PackedSplit => {
                if rank < 2 {
                    continue;
                }
                let max_elems =
                    props.max_threads_per_group as usize * MAX_REG_STORAGE as usize;
                for size_mm in 1..=rank {
                    for size_mk in 1..=rank {
                        let mut part = AxisPartition::new(strategy, tile);
                        part.update(size_mm, size_mk, &shape, &permutation);
                        // Splitting only pays when no unsplit packed
                        // launch could run the tile, either because it
                        // overflows shared memory or because one thread
                        // group cannot address it.
                        if part.shmem_alloc(elem) <= props.max_shared_memory
                            && part.vol_mmk <= max_elems
                        {
                            continue;
                        }
                        if let Some(part) = split_to_fit(part, &shape, &permutation, elem, props) {
                            for reg_storage in 1..=MAX_REG_STORAGE {
                                push(part.clone(), reg_storage);
                            }
                        }
                    }
                }
            }
        }
    }

    if plans.is_empty() {
        return Err(PermuteError::Internal(format!(
            "no viable plan for shape {shape:?} permutation {permutation:?}"
        )));
    }
    log::debug!(
        "enumerated {} candidates for shape {:?} permutation {:?}",
        plans.len(),
        shape,
        permutation
    );
    Ok(plans)
}

/// Find the smallest split count whose piece both fits in shared memory
/// and is addressable by one full-register thread group, or `None` when
/// even per-element pieces do not fit.
fn split_to_fit(
    mut part: AxisPartition,
    shape: &[usize],
    permutation: &[usize],
    elem: ElemSize,
    props: &HardwareProperties,
) -> Option<AxisPartition> {
    let max_elems = props.max_threads_per_group as usize * MAX_REG_STORAGE as usize;
    for num_split in 2.. {
        part.apply_split(num_split, shape, permutation);
        if num_split > part.split_extent {
            return None;
        }
        if part.shmem_alloc(elem) <= props.max_shared_memory
            && part.vol_mmk_split() <= max_elems
        {
            return Some(part);
        }
    }
    unreachable!()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenperm_common::Dim3;

    fn props() -> HardwareProperties {
        HardwareProperties {
            warp_size: 32,
            max_threads_per_group: 1024,
            max_shared_memory: 48_000,
            shared_memory_per_processor: 96_000,
            max_groups_per_processor: 16,
            max_threads_per_processor: 2048,
            processor_count: 16,
            max_grid: Dim3::new_3d(u32::MAX, 65_535, 65_535),
            cache_line_l1: 128,
            cache_line_l2: 32,
        }
    }

    fn enumerate(shape: &[usize], perm: &[usize]) -> Vec<TransposePlan> {
        enumerate_plans(
            shape,
            perm,
            ElemSize::Bytes4,
            DeviceId::new(0),
            StreamId::default(),
            &props(),
            32,
        )
        .unwrap()
    }

    #[test]
    fn identity_yields_only_the_trivial_plan() {
        let plans = enumerate(&[4, 5, 6], &[0, 1, 2]);
        // Reduces to rank 1, where nothing else applies.
        assert!(plans
            .iter()
            .all(|p| p.partition.strategy == Strategy::Trivial));
        assert_eq!(plans.len(), 1);
    }

    #[test]
    fn matrix_transpose_yields_tiled_and_packed_candidates() {
        let plans = enumerate(&[64, 100], &[1, 0]);
        assert!(plans
            .iter()
            .any(|p| p.partition.strategy == Strategy::Tiled));
        assert!(plans
            .iter()
            .any(|p| p.partition.strategy == Strategy::Packed));
        assert!(!plans
            .iter()
            .any(|p| p.partition.strategy == Strategy::Trivial));
    }

    #[test]
    fn leading_axis_fixed_yields_tiled_copy() {
        let plans = enumerate(&[64, 32, 48], &[0, 2, 1]);
        assert!(plans
            .iter()
            .any(|p| p.partition.strategy == Strategy::TiledCopy));
        assert!(!plans
            .iter()
            .any(|p| p.partition.strategy == Strategy::Tiled));
    }

    #[test]
    fn oversized_tiles_fall_back_to_split_candidates() {
        // vol_mmk = 4M elements: far past 48 kB of shared memory.
        let plans = enumerate(&[2048, 2048], &[1, 0]);
        let split: Vec<_> = plans
            .iter()
            .filter(|p| p.partition.strategy == Strategy::PackedSplit)
            .collect();
        assert!(!split.is_empty());
        for plan in split {
            assert!(plan.geometry.shmem_bytes <= props().max_shared_memory);
            assert!(plan.partition.num_split > 1);
        }
    }

    #[test]
    fn unaddressable_tiles_fall_back_to_split_candidates() {
        // vol_mmk = 10000 fits 48 kB of shared memory but exceeds the
        // 1024 threads x 8 registers a single group can address, so no
        // packed geometry exists and splitting must step in.
        let plans = enumerate(&[100, 100], &[1, 0]);
        assert!(!plans
            .iter()
            .any(|p| p.partition.strategy == Strategy::Packed));
        let split: Vec<_> = plans
            .iter()
            .filter(|p| p.partition.strategy == Strategy::PackedSplit)
            .collect();
        assert!(!split.is_empty());
        for plan in split {
            assert!(plan.partition.vol_mmk_split() <= 1024 * 8);
            assert!(plan.partition.num_split > 1);
        }
    }

    #[test]
    fn every_candidate_carries_a_finite_cost() {
        for plan in enumerate(&[64, 32, 48], &[2, 0, 1]) {
            assert!(plan.metrics.cycles.is_finite());
            assert!(plan.metrics.cycles > 0.0);
            assert!(plan.metrics.gld_tran > 0);
        }
    }

    #[test]
    fn enumeration_is_deterministic() {
        let a = enumerate(&[64, 32, 48], &[2, 0, 1]);
        let b = enumerate(&[64, 32, 48], &[2, 0, 1]);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.partition, y.partition);
            assert_eq!(x.metrics.cycles, y.metrics.cycles);
        }
    }
}
