use tenperm_common::ElemSize;

/// The five mutually exclusive execution strategies.
///
/// Declaration order doubles as the structural-simplicity order used to
/// break cost ties: earlier variants are simpler.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    serde::Serialize,
    serde::Deserialize,
)]
pub enum Strategy {
    /// The permutation reduces to the identity: a plain contiguous copy
    /// with no transpose addressing at all.
    Trivial,
    /// Classic shared-memory square-tile transpose over one input axis
    /// and one distinct output axis.
    Tiled,
    /// Tiled traversal whose layout coincides on input and output, so no
    /// shuffle happens inside the tile.
    TiledCopy,
    /// The whole Mmk volume is staged through shared memory with several
    /// elements of per-thread register storage.
    Packed,
    /// Packed with one axis subdivided across additional thread groups
    /// because one group cannot address the whole Mmk volume.
    PackedSplit,
}

impl Strategy {
    /// All strategies, in enumeration order.
    pub const ALL: [Strategy; 5] = [
        Strategy::Trivial,
        Strategy::Tiled,
        Strategy::TiledCopy,
        Strategy::Packed,
        Strategy::PackedSplit,
    ];
}

impl core::fmt::Display for Strategy {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Strategy::Trivial => "trivial",
            Strategy::Tiled => "tiled",
            Strategy::TiledCopy => "tiled-copy",
            Strategy::Packed => "packed",
            Strategy::PackedSplit => "packed-split",
        };
        f.write_str(name)
    }
}

/// How the tensor axes are split into cooperating groups for one
/// candidate strategy.
///
/// `Mm` is the leading input-contiguous axes, `Mk` the leading
/// output-contiguous axes (`permutation[..size_mk]`), `Mmk` their union,
/// `MkBar` the part of `Mk` outside `Mm`, and `Mbar` every remaining
/// axis. `size_mm` and `size_mk` fully define the split; every derived
/// field is recomputed from scratch by [`update`](Self::update).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxisPartition {
    /// Strategy this partition was built for.
    pub strategy: Strategy,
    /// Shared-memory tile width in elements; the device warp width.
    pub tile: usize,

    /// Number of leading input axes in Mm.
    pub size_mm: usize,
    /// Volume of Mm.
    pub vol_mm: usize,
    /// Number of leading output axes in Mk.
    pub size_mk: usize,
    /// Volume of Mk.
    pub vol_mk: usize,
    /// Number of axes in Mm ∪ Mk.
    pub size_mmk: usize,
    /// Volume of Mm ∪ Mk.
    pub vol_mmk: usize,
    /// Number of axes in Mk \ Mm.
    pub size_mk_bar: usize,
    /// Volume of Mk \ Mm.
    pub vol_mk_bar: usize,
    /// Number of remaining axes.
    pub size_mbar: usize,
    /// Volume of the remaining axes; `vol_mbar * vol_mmk` equals the
    /// total element count.
    pub vol_mbar: usize,

    /// Contiguous volume at the start of Mmk in input axis order.
    pub vol_mmk_in_cont: usize,
    /// Contiguous volume at the start of Mmk in output axis order.
    pub vol_mmk_out_cont: usize,

    /// Number of pieces the split axis is subdivided into; 1 when the
    /// partition is unsplit.
    pub num_split: usize,
    /// Input axis that is subdivided (meaningful when `num_split > 1`).
    pub split_axis: usize,
    /// Extent of the split axis.
    pub split_extent: usize,
    /// Mmk volume excluding the split axis.
    pub vol_mmk_unsplit: usize,
}

impl AxisPartition {
    /// A blank partition for the given strategy and tile width.
    pub fn new(strategy: Strategy, tile: usize) -> Self {
        Self {
            strategy,
            tile,
            size_mm: 0,
            vol_mm: 1,
            size_mk: 0,
            vol_mk: 1,
            size_mmk: 0,
            vol_mmk: 1,
            size_mk_bar: 0,
            vol_mk_bar: 1,
            size_mbar: 0,
            vol_mbar: 1,
            vol_mmk_in_cont: 1,
            vol_mmk_out_cont: 1,
            num_split: 1,
            split_axis: 0,
            split_extent: 0,
            vol_mmk_unsplit: 1,
        }
    }

    /// Recompute every derived field from the split sizes, the shape and
    /// the permutation. Two calls with equal inputs produce bit-identical
    /// partitions; no other state is retained between calls.
    pub fn update(
        &mut self,
        size_mm: usize,
        size_mk: usize,
        shape: &[usize],
        permutation: &[usize],
    ) {
        let rank = shape.len();
        debug_assert!(size_mm >= 1 && size_mm <= rank);
        debug_assert!(size_mk >= 1 && size_mk <= rank);
        debug_assert_eq!(permutation.len(), rank);

        let in_mmk = mmk_membership(size_mm, size_mk, rank, permutation);

        self.size_mm = size_mm;
        self.vol_mm = shape[..size_mm].iter().product();
        self.size_mk = size_mk;
        self.vol_mk = permutation[..size_mk].iter().map(|&a| shape[a]).product();

        self.size_mmk = 0;
        self.vol_mmk = 1;
        self.size_mk_bar = 0;
        self.vol_mk_bar = 1;
        for axis in 0..rank {
            if in_mmk[axis] {
                self.size_mmk += 1;
                self.vol_mmk *= shape[axis];
            }
        }
        for &axis in &permutation[..size_mk] {
            if axis >= size_mm {
                self.size_mk_bar += 1;
                self.vol_mk_bar *= shape[axis];
            }
        }

        let total: usize = shape.iter().product();
        self.size_mbar = rank - self.size_mmk;
        self.vol_mbar = total / self.vol_mmk;

        self.vol_mmk_in_cont = 1;
        for axis in 0..rank {
            if !in_mmk[axis] {
                break;
            }
            self.vol_mmk_in_cont *= shape[axis];
        }
        self.vol_mmk_out_cont = 1;
        for &axis in permutation {
            if !in_mmk[axis] {
                break;
            }
            self.vol_mmk_out_cont *= shape[axis];
        }

        self.num_split = 1;
        self.split_axis = 0;
        self.split_extent = 0;
        self.vol_mmk_unsplit = self.vol_mmk;
    }

    /// Subdivide the largest-extent axis of Mmk into `num_split` pieces
    /// (the lowest such axis on ties, so the choice is deterministic).
    pub fn apply_split(&mut self, num_split: usize, shape: &[usize], permutation: &[usize]) {
        debug_assert!(num_split > 1);
        let in_mmk = mmk_membership(self.size_mm, self.size_mk, shape.len(), permutation);

        let mut split_axis = 0;
        let mut split_extent = 0;
        for (axis, &extent) in shape.iter().enumerate() {
            if in_mmk[axis] && extent > split_extent {
                split_axis = axis;
                split_extent = extent;
            }
        }

        self.num_split = num_split;
        self.split_axis = split_axis;
        self.split_extent = split_extent;
        self.vol_mmk_unsplit = self.vol_mmk / split_extent;
    }

    /// Mmk volume one thread group handles: the whole of Mmk when
    /// unsplit, otherwise the largest split piece.
    pub fn vol_mmk_split(&self) -> usize {
        if self.num_split == 1 {
            self.vol_mmk
        } else {
            self.vol_mmk_unsplit * self.split_extent.div_ceil(self.num_split)
        }
    }

    /// Number of elements of the shared-memory tile for this partition.
    pub fn shmem(&self) -> usize {
        match self.strategy {
            // No staging: straight copies.
            Strategy::Trivial | Strategy::TiledCopy => 0,
            // One padding element per tile row avoids bank conflicts on
            // the transposed read-out.
            Strategy::Tiled => self.tile * (self.tile + 1),
            Strategy::Packed => self.vol_mmk,
            Strategy::PackedSplit => self.vol_mmk_split(),
        }
    }

    /// Number of tile elements touched by real data; less than the
    /// allocated capacity when padding is present.
    pub fn vol_mmk_used(&self) -> usize {
        match self.strategy {
            Strategy::Trivial | Strategy::TiledCopy => 0,
            Strategy::Tiled => self.vol_mm.min(self.tile) * self.vol_mk.min(self.tile),
            Strategy::Packed => self.vol_mmk,
            Strategy::PackedSplit => self.vol_mmk_split(),
        }
    }

    /// Bytes of shared memory that must be allocated for the tile,
    /// including padding.
    pub fn shmem_alloc(&self, elem: ElemSize) -> usize {
        let mut elems = self.shmem();
        // Packed tiles whose size is a multiple of the warp width would
        // stride over the same banks; offset them by one element.
        if matches!(self.strategy, Strategy::Packed | Strategy::PackedSplit)
            && elems > 0
            && elems % self.tile == 0
        {
            elems += 1;
        }
        elems * elem.bytes()
    }
}

/// Membership of each axis in Mm ∪ Mk.
pub(crate) fn mmk_membership(
    size_mm: usize,
    size_mk: usize,
    rank: usize,
    permutation: &[usize],
) -> Vec<bool> {
    let mut in_mmk = vec![false; rank];
    for flag in in_mmk.iter_mut().take(size_mm) {
        *flag = true;
    }
    for &axis in &permutation[..size_mk] {
        in_mmk[axis] = true;
    }
    in_mmk
}
