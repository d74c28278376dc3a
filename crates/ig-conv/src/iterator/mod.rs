//! Stateful tile cursors over the convolution operands.
//!
//! Each iterator walks the reduction dimension one tile at a time, producing
//! masked loads into a [`Fragment`](crate::fragment::Fragment). The last,
//! possibly short "residue" tile is visited first so that steady-state
//! advances are plain offset bumps with no length special-casing.

pub mod direct;
pub mod filter;
pub mod precomp;

pub use direct::{DgradSrcIterator, DirectSrcIterator, WgradSrcIterator};
pub use filter::{DgradFilterIterator, FpropFilterIterator, WgradDyIterator};
pub use precomp::{PrecompSrcIterator, SrcIterParams};

use crate::fragment::Fragment;
use crate::problem::Conv2dProblemSize;
use crate::tile_map::{ColumnOrder, TileMap};
use ig_tensor::{Element, Layout};

/// A cursor that yields one operand tile per reduction tile.
pub trait TileLoader {
    type Elem: Element;

    /// Fills the fragment for the current tile. Masked lanes are written as
    /// zero, never read from memory.
    fn load(&mut self, frag: &mut Fragment<Self::Elem>);

    /// Moves to the next tile. The first call leaves the residue tile; all
    /// subsequent calls are O(1) state bumps.
    fn advance(&mut self);
}

/// Saved boundary predicate state of a masked iterator, for save/restore
/// across an outer loop reusing the same iterator position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    pub rows: Vec<u32>,
    pub cols: Vec<u32>,
}

/// Residue-first traversal schedule of the reduction dimension.
///
/// Tile 0 covers steps `0..residue`; tile t > 0 covers
/// `residue + (t-1)*tile_k ..` for `tile_k` steps, so every steady-state
/// tile is full length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepSchedule {
    tile_k: usize,
    residue: usize,
    total: usize,
}

impl StepSchedule {
    pub fn new(total: usize, tile_k: usize) -> Self {
        debug_assert!(total > 0 && tile_k > 0);
        let mut residue = total % tile_k;
        if residue == 0 {
            residue = tile_k;
        }
        StepSchedule {
            tile_k,
            residue,
            total,
        }
    }

    pub fn tile_k(&self) -> usize {
        self.tile_k
    }

    pub fn residue(&self) -> usize {
        self.residue
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn num_tiles(&self) -> usize {
        (self.total - self.residue) / self.tile_k + 1
    }

    /// Global reduction step visited by `lane` of tile `tile_idx`.
    pub fn step(&self, tile_idx: usize, lane: usize) -> usize {
        if tile_idx == 0 {
            lane
        } else {
            self.residue + (tile_idx - 1) * self.tile_k + lane
        }
    }

    /// Whether the lane holds a live reduction step in this tile.
    pub fn valid(&self, tile_idx: usize, lane: usize) -> bool {
        if tile_idx == 0 {
            lane < self.residue
        } else {
            self.step(tile_idx, lane) < self.total
        }
    }
}

/// Problem geometry shared by the forward source iterators: the layout, the
/// column map onto output pixels, and the conv window parameters in signed
/// form.
#[derive(Debug, Clone, Copy)]
pub struct SrcGeometry {
    pub layout: Layout,
    pub tile_map: TileMap,
    pub stride_h: isize,
    pub stride_w: isize,
    pub pad_h: isize,
    pub pad_w: isize,
    pub dil_h: isize,
    pub dil_w: isize,
    pub n: isize,
    pub h: isize,
    pub w: isize,
    pub r: usize,
    pub s: usize,
}

impl SrcGeometry {
    pub fn new(problem: &Conv2dProblemSize, layout: Layout) -> Self {
        Self::with_order(problem, layout, ColumnOrder::BatchMajor)
    }

    pub fn with_order(problem: &Conv2dProblemSize, layout: Layout, order: ColumnOrder) -> Self {
        SrcGeometry {
            layout,
            tile_map: TileMap::new(order, problem.n, problem.p, problem.q),
            stride_h: problem.stride_h as isize,
            stride_w: problem.stride_w as isize,
            pad_h: problem.pad_h as isize,
            pad_w: problem.pad_w as isize,
            dil_h: problem.dilation_h as isize,
            dil_w: problem.dilation_w as isize,
            n: problem.n as isize,
            h: problem.h as isize,
            w: problem.w as isize,
            r: problem.r,
            s: problem.s,
        }
    }

    /// Origin offset and boundary predicate bits for one GEMM column.
    ///
    /// The masks are computed once per column because the padding condition
    /// depends only on the output spatial position and the filter tap, never
    /// on the reduction step. Columns past the GEMM extent get empty masks.
    pub fn column_origin(&self, col: usize) -> (isize, u32, u32) {
        if col >= self.tile_map.columns() {
            return (0, 0, 0);
        }
        let (n, p, q) = self.tile_map.column_to_nyx(col);
        let h0 = p as isize * self.stride_h - self.pad_h;
        let w0 = q as isize * self.stride_w - self.pad_w;

        let base = (n * self.layout.batch_stride()) as isize
            + h0 * self.layout.row_stride() as isize
            + w0 * self.layout.pixel_stride() as isize;

        let mut row_mask = 0u32;
        for fh in 0..self.r {
            let hh = h0 + fh as isize * self.dil_h;
            if (n as isize) < self.n && hh >= 0 && hh < self.h {
                row_mask |= 1 << fh;
            }
        }
        let mut col_mask = 0u32;
        for fw in 0..self.s {
            let ww = w0 + fw as isize * self.dil_w;
            if ww >= 0 && ww < self.w {
                col_mask |= 1 << fw;
            }
        }
        (base, row_mask, col_mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::ConvMode;

    #[test]
    fn test_schedule_residue_first() {
        let sched = StepSchedule::new(36, 8);
        assert_eq!(sched.residue(), 4);
        assert_eq!(sched.num_tiles(), 5);
        assert_eq!(sched.step(0, 0), 0);
        assert!(sched.valid(0, 3));
        assert!(!sched.valid(0, 4));
        assert_eq!(sched.step(1, 0), 4);
        assert_eq!(sched.step(4, 7), 35);
        assert!(sched.valid(4, 7));
    }

    #[test]
    fn test_schedule_visits_each_step_once() {
        for (total, tile_k) in [(36, 8), (16, 8), (5, 8), (12, 3)] {
            let sched = StepSchedule::new(total, tile_k);
            let mut seen = vec![0usize; total];
            for t in 0..sched.num_tiles() {
                for lane in 0..tile_k {
                    if sched.valid(t, lane) {
                        seen[sched.step(t, lane)] += 1;
                    }
                }
            }
            assert!(
                seen.iter().all(|&count| count == 1),
                "total={} tile_k={}: steps not covered exactly once: {:?}",
                total,
                tile_k,
                seen
            );
        }
    }

    #[test]
    fn test_column_origin_masks_padding() {
        // 5x5 input, 3x3 filter, pad 1: output pixel (0,0) has the first
        // filter row and column out of bounds.
        let problem =
            Conv2dProblemSize::simple(1, 1, 5, 5, 1, 3, 3, 1, 1, ConvMode::CrossCorrelation)
                .unwrap();
        let geom = SrcGeometry::new(&problem, Layout::nchw(1, 1, 5, 5));

        let (_, rows, cols) = geom.column_origin(0);
        assert_eq!(rows, 0b110);
        assert_eq!(cols, 0b110);

        // Center pixel: every tap in bounds.
        let col = geom.tile_map.nyx_to_column(0, 2, 2);
        let (base, rows, cols) = geom.column_origin(col);
        assert_eq!(rows, 0b111);
        assert_eq!(cols, 0b111);
        assert_eq!(base, 5 + 1); // (h0, w0) = (1, 1)

        // Past the column extent: fully masked.
        assert_eq!(geom.column_origin(25), (0, 0, 0));
    }
}
