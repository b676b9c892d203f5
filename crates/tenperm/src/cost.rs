//! Analytic cost model.
//!
//! Every candidate gets a predicted cycle count before anything touches
//! the device. Memory traffic is counted the way the hardware sees it:
//! per-warp transactions against the transaction width and cache-line
//! coverage against the line width, evaluated at deterministically
//! sampled positions so huge outer volumes stay cheap to model. The
//! latency constants are uncalibrated scale factors; only the relative
//! order of candidates matters.

use tenperm_common::{ElemSize, HardwareProperties};

use crate::plan::split::Strategy;
use crate::plan::tables::{apply_in, apply_out};
use crate::plan::{CostMetrics, TransposePlan};

const LAT_GLOBAL: f64 = 360.0;
const LAT_SHARED: f64 = 24.0;
const ITER_OVERHEAD: f64 = 60.0;

/// Cap on sampled tile rows per side.
const ROW_SAMPLES: usize = 32;
/// Cap on sampled contiguous segments per side.
const SEGMENT_SAMPLES: usize = 16;

/// Transactions one warp issues for `n` consecutive elements starting
/// at element position `pos`, with `width` elements per transaction.
pub fn transactions(pos: usize, n: usize, width: usize) -> u64 {
    if n == 0 {
        return 0;
    }
    ((pos + n - 1) / width - pos / width + 1) as u64
}

/// Cache lines `(full, partial)` covered by `n` consecutive elements at
/// `pos`, with `width` elements per line.
pub fn cache_lines(pos: usize, n: usize, width: usize) -> (u64, u64) {
    if n == 0 {
        return (0, 0);
    }
    let touched = (pos + n - 1) / width - pos / width + 1;
    let full = ((pos + n) / width).saturating_sub(pos.div_ceil(width));
    (full as u64, (touched - full) as u64)
}

/// Evenly spaced positions in `0..n`, at most `cap` of them, with the
/// weight each sample stands for. The same inputs always produce the
/// same samples.
pub fn sample_positions(n: usize, cap: usize) -> (Vec<usize>, f64) {
    let count = n.min(cap).max(1);
    let positions = (0..count).map(|i| i * n / count).collect();
    (positions, n as f64 / count as f64)
}

/// Predict the cost of a plan on the given device.
pub fn estimate(plan: &TransposePlan, props: &HardwareProperties, samples: usize) -> CostMetrics {
    let mut metrics = match plan.partition.strategy {
        Strategy::Trivial => estimate_trivial(plan, props),
        Strategy::Tiled | Strategy::TiledCopy => estimate_tiled(plan, props, samples),
        Strategy::Packed | Strategy::PackedSplit => estimate_packed(plan, props, samples),
    };
    metrics.cycles = cycles(plan, &metrics, props);
    metrics
}

fn widths(elem: ElemSize, props: &HardwareProperties) -> (usize, usize) {
    (props.l1_elems(elem.bytes()), props.l2_elems(elem.bytes()))
}

fn estimate_trivial(plan: &TransposePlan, props: &HardwareProperties) -> CostMetrics {
    let (acc, cl) = widths(plan.elem, props);
    let total = plan.partition.vol_mbar * plan.partition.vol_mmk;
    let warp = props.warp_size as usize;

    // Contiguous and aligned on both sides.
    let req = total.div_ceil(warp) as u64;
    let tran = total.div_ceil(acc) as u64;
    CostMetrics {
        gld_req: req,
        gst_req: req,
        gld_tran: tran,
        gst_tran: tran,
        cl_full_l2: (total / cl) as u64,
        cl_part_l2: (total % cl != 0) as u64,
        cl_full_l1: (total / acc) as u64,
        cl_part_l1: (total % acc != 0) as u64,
        mlp: 4.0,
        ..CostMetrics::default()
    }
}

/// One side of a tiled access pattern: rows of `row_len` contiguous
/// elements spaced `row_stride` apart, over `rows` rows and
/// `width_vol` columns split into warp-wide blocks.
struct TiledSide {
    width_vol: usize,
    rows: usize,
    row_stride: usize,
}

fn estimate_tiled(plan: &TransposePlan, props: &HardwareProperties, samples: usize) -> CostMetrics {
    let (acc, cl) = widths(plan.elem, props);
    let part = &plan.partition;
    let tile = part.tile;
    let vol_mbar = part.vol_mbar;

    let (rows_in, rows_out) = if part.strategy == Strategy::Tiled {
        (part.vol_mk, part.vol_mm)
    } else {
        (part.vol_mk_bar, part.vol_mk_bar)
    };
    let load = TiledSide {
        width_vol: part.vol_mm,
        rows: rows_in,
        row_stride: plan.cu_dim_mk,
    };
    let store = if part.strategy == Strategy::Tiled {
        TiledSide {
            width_vol: part.vol_mk,
            rows: rows_out,
            row_stride: plan.cu_dim_mm,
        }
    } else {
        TiledSide {
            width_vol: part.vol_mm,
            rows: rows_out,
            row_stride: plan.cu_dim_mm,
        }
    };

    let (mbar_pos, mbar_w) = sample_positions(vol_mbar, samples.max(1));
    let side_tran = |side: &TiledSide, base_of: &dyn Fn(usize) -> usize, count_cl: bool| {
        let blocks = side.width_vol.div_ceil(tile);
        let (row_pos, row_w) = sample_positions(side.rows, ROW_SAMPLES);
        let mut tran = 0.0;
        let mut full_l2 = 0.0;
        let mut part_l2 = 0.0;
        let mut full_l1 = 0.0;
        let mut part_l1 = 0.0;
        for &pm in &mbar_pos {
            let base = base_of(pm);
            for block in 0..blocks {
                let len = tile.min(side.width_vol - block * tile);
                for &row in &row_pos {
                    let pos = base + block * tile + row * side.row_stride;
                    let weight = mbar_w * row_w;
                    tran += transactions(pos, len, acc) as f64 * weight;
                    if count_cl {
                        let (f2, p2) = cache_lines(pos, len, cl);
                        let (f1, p1) = cache_lines(pos, len, acc);
                        full_l2 += f2 as f64 * weight;
                        part_l2 += p2 as f64 * weight;
                        full_l1 += f1 as f64 * weight;
                        part_l1 += p1 as f64 * weight;
                    }
                }
            }
        }
        (tran, full_l2, part_l2, full_l1, part_l1)
    };

    let (gld_tran, ..) = side_tran(&load, &|pm| apply_in(&plan.host_mbar, pm), false);
    let (gst_tran, full_l2, part_l2, full_l1, part_l1) =
        side_tran(&store, &|pm| apply_out(&plan.host_mbar, pm), true);

    let gld_req = (vol_mbar * load.width_vol.div_ceil(tile) * load.rows) as u64;
    let gst_req = (vol_mbar * store.width_vol.div_ceil(tile) * store.rows) as u64;

    // The padded tile keeps shared traffic conflict-free; transposed
    // shuffling happens only in the genuinely tiled case.
    let (sld_req, sst_req) = if part.strategy == Strategy::Tiled {
        (gst_req, gld_req)
    } else {
        (0, 0)
    };

    CostMetrics {
        gld_req,
        gst_req,
        gld_tran: gld_tran.round() as u64,
        gst_tran: gst_tran.round() as u64,
        cl_full_l2: full_l2.round() as u64,
        cl_part_l2: part_l2.round() as u64,
        cl_full_l1: full_l1.round() as u64,
        cl_part_l1: part_l1.round() as u64,
        sld_req,
        sst_req,
        sld_tran: sld_req,
        sst_tran: sst_req,
        mlp: 4.0,
        ..CostMetrics::default()
    }
}

fn estimate_packed(plan: &TransposePlan, props: &HardwareProperties, samples: usize) -> CostMetrics {
    let (acc, cl) = widths(plan.elem, props);
    let part = &plan.partition;
    let warp = props.warp_size as usize;
    let vol = part.vol_mmk_split();
    let blocks = part.vol_mbar * part.num_split;

    // A split piece breaks the contiguous run at the split axis.
    let in_cont = cont_volume(
        plan.shape.iter().enumerate().map(|(a, &e)| (a, e)),
        plan,
    )
    .min(vol)
    .max(1);
    let out_cont = cont_volume(
        plan.permutation.iter().map(|&a| (a, plan.shape[a])),
        plan,
    )
    .min(vol)
    .max(1);

    let (mbar_pos, mbar_w) = sample_positions(part.vol_mbar, samples.max(1));
    let side_tran = |cont: usize, base_of: &dyn Fn(usize) -> usize, seg_of: &dyn Fn(usize) -> usize, count_cl: bool| {
        let nseg = vol.div_ceil(cont);
        let (seg_pos, seg_w) = sample_positions(nseg, SEGMENT_SAMPLES);
        let mut tran = 0.0;
        let mut full_l2 = 0.0;
        let mut part_l2 = 0.0;
        let mut full_l1 = 0.0;
        let mut part_l1 = 0.0;
        for &pm in &mbar_pos {
            let base = base_of(pm);
            for &s in &seg_pos {
                let start = base + seg_of(s * cont);
                let len = cont.min(vol - s * cont);
                // A segment is walked by consecutive warp-wide chunks.
                let mut offset = 0;
                while offset < len {
                    let n = warp.min(len - offset);
                    let pos = start + offset;
                    let weight = mbar_w * seg_w;
                    tran += transactions(pos, n, acc) as f64 * weight;
                    if count_cl {
                        let (f2, p2) = cache_lines(pos, n, cl);
                        let (f1, p1) = cache_lines(pos, n, acc);
                        full_l2 += f2 as f64 * weight;
                        part_l2 += p2 as f64 * weight;
                        full_l1 += f1 as f64 * weight;
                        part_l1 += p1 as f64 * weight;
                    }
                    offset += n;
                }
            }
        }
        let scale = part.num_split as f64;
        (
            tran * scale,
            full_l2 * scale,
            part_l2 * scale,
            full_l1 * scale,
            part_l1 * scale,
        )
    };

    let (gld_tran, ..) = side_tran(
        in_cont,
        &|pm| apply_in(&plan.host_mbar, pm),
        &|p| apply_in(&plan.host_mmk, p),
        false,
    );
    let (gst_tran, full_l2, part_l2, full_l1, part_l1) = side_tran(
        out_cont,
        &|pm| apply_out(&plan.host_mbar, pm),
        &|p| apply_out(&plan.host_mmk, p),
        true,
    );

    let req = (vol.div_ceil(warp) * blocks) as u64;
    CostMetrics {
        gld_req: req,
        gst_req: req,
        gld_tran: gld_tran.round() as u64,
        gst_tran: gst_tran.round() as u64,
        cl_full_l2: full_l2.round() as u64,
        cl_part_l2: part_l2.round() as u64,
        cl_full_l1: full_l1.round() as u64,
        cl_part_l1: part_l1.round() as u64,
        sld_req: req,
        sst_req: req,
        sld_tran: req,
        sst_tran: req,
        mlp: plan.geometry.reg_storage as f64,
        ..CostMetrics::default()
    }
}

/// Contiguous element run at the start of the Mmk tile when walked in
/// the given axis order, honoring the piece boundary of a split axis.
fn cont_volume(order: impl Iterator<Item = (usize, usize)>, plan: &TransposePlan) -> usize {
    let part = &plan.partition;
    let in_mmk = crate::plan::split::mmk_membership(
        part.size_mm,
        part.size_mk,
        plan.shape.len(),
        &plan.permutation,
    );
    let piece = if part.num_split > 1 {
        part.split_extent.div_ceil(part.num_split)
    } else {
        0
    };
    let mut vol = 1;
    for (axis, extent) in order {
        if !in_mmk[axis] {
            break;
        }
        if part.num_split > 1 && axis == part.split_axis {
            vol *= piece;
            break;
        }
        vol *= extent;
    }
    vol
}

/// Fold the traffic counts into a cycle prediction: global and shared
/// latency divided by the warps in flight, plus a fixed overhead per
/// extra outer-loop iteration.
fn cycles(plan: &TransposePlan, metrics: &CostMetrics, props: &HardwareProperties) -> f64 {
    let grid = &plan.geometry.grid;
    let groups_total = grid.x as u64 * grid.y as u64 * grid.z as u64;
    let resident =
        (plan.active_groups as u64 * props.processor_count as u64).min(groups_total.max(1));
    let warps_per_group =
        (plan.geometry.group.num_elems().div_ceil(props.warp_size)) as u64;
    let in_flight = (resident * warps_per_group) as f64 * metrics.mlp.max(1.0);

    let mem = (metrics.gld_tran + metrics.gst_tran) as f64 * LAT_GLOBAL / in_flight;
    let shared = (metrics.sld_tran + metrics.sst_tran) as f64 * LAT_SHARED / in_flight;
    mem + shared + (plan.num_iter.saturating_sub(1)) as f64 * ITER_OVERHEAD
}
