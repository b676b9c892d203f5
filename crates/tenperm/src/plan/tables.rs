//! Index-conversion tables.
//!
//! Kernels never compute multi-dimensional coordinates directly; they
//! decompose a flat position with small per-axis records of the form
//! `((i / c) % d) * ct`, where `c` is the cumulative volume of the axes
//! below, `d` the axis extent and `ct` the stride in the target layout.
//! The tables below are built on the host, uploaded once per plan, and
//! are also evaluated on the host by the cost model and the tests.

use bytemuck::{Pod, Zeroable};

/// One-sided axis record: maps a flat position to an offset in a single
/// layout.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct TensorConv {
    /// Cumulative volume of the axes below this one.
    pub c: u32,
    /// Axis extent.
    pub d: u32,
    /// Stride of this axis in the target layout.
    pub ct: u32,
}

/// Two-sided axis record: decomposes one flat position into both an
/// input offset and an output offset.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct TensorConvInOut {
    /// Cumulative volume below this axis, input walk.
    pub c_in: u32,
    /// Axis extent, input walk.
    pub d_in: u32,
    /// Input-layout stride.
    pub ct_in: u32,
    /// Cumulative volume below this axis, output walk.
    pub c_out: u32,
    /// Axis extent, output walk.
    pub d_out: u32,
    /// Output-layout stride.
    pub ct_out: u32,
}

/// Element strides of each input axis, axis 0 fastest varying.
pub fn input_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; shape.len()];
    for i in 1..shape.len() {
        strides[i] = strides[i - 1] * shape[i - 1];
    }
    strides
}

/// Element stride of each input axis in the *output* layout.
pub fn output_strides_by_input_axis(shape: &[usize], permutation: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; shape.len()];
    let mut vol = 1usize;
    for &axis in permutation {
        strides[axis] = vol;
        vol *= shape[axis];
    }
    strides
}

/// Table over the Mbar axes, in input axis order. One flat Mbar
/// position yields both the input and the output base offset of a tile.
pub fn build_mbar(
    shape: &[usize],
    permutation: &[usize],
    in_mmk: &[bool],
) -> Vec<TensorConvInOut> {
    let istr = input_strides(shape);
    let ostr = output_strides_by_input_axis(shape, permutation);

    let mut table = Vec::new();
    let mut c = 1u32;
    for (axis, &extent) in shape.iter().enumerate() {
        if in_mmk[axis] {
            continue;
        }
        table.push(TensorConvInOut {
            c_in: c,
            d_in: extent as u32,
            ct_in: istr[axis] as u32,
            c_out: c,
            d_out: extent as u32,
            ct_out: ostr[axis] as u32,
        });
        c *= extent as u32;
    }
    table
}

/// Table over the Mmk axes. The input half decomposes a flat Mmk
/// position over the axes in input order with global input strides; the
/// output half decomposes the *same* volume over the axes in output
/// order with global output strides.
pub fn build_mmk(
    shape: &[usize],
    permutation: &[usize],
    in_mmk: &[bool],
) -> Vec<TensorConvInOut> {
    let istr = input_strides(shape);
    let ostr = output_strides_by_input_axis(shape, permutation);

    let in_axes: Vec<usize> = (0..shape.len()).filter(|&a| in_mmk[a]).collect();
    let out_axes: Vec<usize> = permutation.iter().copied().filter(|&a| in_mmk[a]).collect();
    debug_assert_eq!(in_axes.len(), out_axes.len());

    let mut table = Vec::with_capacity(in_axes.len());
    let mut c_in = 1u32;
    let mut c_out = 1u32;
    for (&ia, &oa) in in_axes.iter().zip(&out_axes) {
        table.push(TensorConvInOut {
            c_in,
            d_in: shape[ia] as u32,
            ct_in: istr[ia] as u32,
            c_out,
            d_out: shape[oa] as u32,
            ct_out: ostr[oa] as u32,
        });
        c_in *= shape[ia] as u32;
        c_out *= shape[oa] as u32;
    }
    table
}

/// Table mapping an output-ordered Mmk position to its position inside
/// the shared-memory tile, which is laid out in input order.
pub fn build_msh(shape: &[usize], permutation: &[usize], in_mmk: &[bool]) -> Vec<TensorConv> {
    let in_axes: Vec<usize> = (0..shape.len()).filter(|&a| in_mmk[a]).collect();
    let out_axes: Vec<usize> = permutation.iter().copied().filter(|&a| in_mmk[a]).collect();

    // Stride of each Mmk axis inside the tile (input order).
    let mut tile_stride = hashbrown::HashMap::new();
    let mut vol = 1usize;
    for &axis in &in_axes {
        tile_stride.insert(axis, vol);
        vol *= shape[axis];
    }

    let mut table = Vec::with_capacity(out_axes.len());
    let mut c = 1u32;
    for &axis in &out_axes {
        table.push(TensorConv {
            c,
            d: shape[axis] as u32,
            ct: tile_stride[&axis] as u32,
        });
        c *= shape[axis] as u32;
    }
    table
}

/// Single-record table carrying the per-piece offsets of a split axis.
pub fn build_split(
    shape: &[usize],
    permutation: &[usize],
    split_axis: usize,
    split_extent: usize,
    num_split: usize,
) -> Vec<TensorConvInOut> {
    let istr = input_strides(shape);
    let ostr = output_strides_by_input_axis(shape, permutation);
    let piece = split_extent.div_ceil(num_split);
    vec![TensorConvInOut {
        c_in: 1,
        d_in: num_split as u32,
        ct_in: (piece * istr[split_axis]) as u32,
        c_out: 1,
        d_out: num_split as u32,
        ct_out: (piece * ostr[split_axis]) as u32,
    }]
}

/// Host evaluation of the input half of a two-sided table.
pub fn apply_in(table: &[TensorConvInOut], pos: usize) -> usize {
    let pos = pos as u32;
    table
        .iter()
        .map(|t| (((pos / t.c_in) % t.d_in) * t.ct_in) as usize)
        .sum()
}

/// Host evaluation of the output half of a two-sided table.
pub fn apply_out(table: &[TensorConvInOut], pos: usize) -> usize {
    let pos = pos as u32;
    table
        .iter()
        .map(|t| (((pos / t.c_out) % t.d_out) * t.ct_out) as usize)
        .sum()
}

/// Host evaluation of a one-sided table.
pub fn apply(table: &[TensorConv], pos: usize) -> usize {
    let pos = pos as u32;
    table
        .iter()
        .map(|t| (((pos / t.c) % t.d) * t.ct) as usize)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::split::mmk_membership;

    #[test]
    fn input_strides_are_row_major_from_axis_zero() {
        assert_eq!(input_strides(&[4, 5, 6]), vec![1, 4, 20]);
    }

    #[test]
    fn output_strides_follow_the_permutation() {
        // Output order is axis 2, axis 0, axis 1.
        assert_eq!(
            output_strides_by_input_axis(&[4, 5, 6], &[2, 0, 1]),
            vec![6, 24, 1]
        );
    }

    #[test]
    fn mbar_table_reproduces_both_offsets() {
        let shape = [4, 5, 6];
        let perm = [2, 0, 1];
        // Mmk = {0, 2}, Mbar = {1}.
        let in_mmk = mmk_membership(1, 1, 3, &perm);
        let table = build_mbar(&shape, &perm, &in_mmk);
        assert_eq!(table.len(), 1);

        let istr = input_strides(&shape);
        let ostr = output_strides_by_input_axis(&shape, &perm);
        for pos in 0..5 {
            assert_eq!(apply_in(&table, pos), pos * istr[1]);
            assert_eq!(apply_out(&table, pos), pos * ostr[1]);
        }
    }

    #[test]
    fn mmk_table_matches_direct_coordinate_math() {
        let shape = [4, 5, 6];
        let perm = [1, 2, 0];
        // Full-tensor Mmk.
        let in_mmk = vec![true; 3];
        let table = build_mmk(&shape, &perm, &in_mmk);

        let istr = input_strides(&shape);
        let ostr = output_strides_by_input_axis(&shape, &perm);
        let total: usize = shape.iter().product();
        for flat in 0..total {
            // Decompose the input-ordered flat position by hand.
            let coord = [flat % 4, (flat / 4) % 5, flat / 20];
            let expect_in: usize = (0..3).map(|a| coord[a] * istr[a]).sum();
            assert_eq!(apply_in(&table, flat), expect_in);

            // The output walk decomposes the same counter over output
            // order: axis 1, then 2, then 0.
            let ocoord = [flat % 5, (flat / 5) % 6, flat / 30];
            let expect_out =
                ocoord[0] * ostr[1] + ocoord[1] * ostr[2] + ocoord[2] * ostr[0];
            assert_eq!(apply_out(&table, flat), expect_out);
        }
    }

    #[test]
    fn msh_table_is_a_bijection_on_the_tile() {
        let shape = [4, 5, 6];
        let perm = [2, 0, 1];
        let in_mmk = vec![true; 3];
        let table = build_msh(&shape, &perm, &in_mmk);

        let total: usize = shape.iter().product();
        let mut seen = vec![false; total];
        for pos in 0..total {
            let tile_pos = apply(&table, pos);
            assert!(tile_pos < total);
            assert!(!seen[tile_pos], "tile position {tile_pos} hit twice");
            seen[tile_pos] = true;
        }
    }

    #[test]
    fn split_table_steps_by_whole_pieces() {
        let shape = [16, 200, 8];
        let perm = [1, 0, 2];
        let table = build_split(&shape, &perm, 1, 200, 4);
        assert_eq!(table.len(), 1);
        // piece = 50, input stride of axis 1 = 16, output stride = 1.
        assert_eq!(apply_in(&table, 2), 2 * 50 * 16);
        assert_eq!(apply_out(&table, 3), 3 * 50);
    }
}
