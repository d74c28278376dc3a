use crate::error::{ConvError, Result};
use crate::problem::Conv2dProblemSize;
use crate::tile::MAX_FILTER_PIXELS;
use ig_tensor::Layout;

/// Decomposes a reduction step into (channel group, filter row, filter col).
///
/// The reduction dimension linearizes channel-group x filter-row x filter-col
/// with the channel group outermost, fixing the accumulation order.
pub fn decompose_step(step: usize, filter_pixels: usize, s_extent: usize) -> (usize, usize, usize) {
    let group = step / filter_pixels;
    let tap = step % filter_pixels;
    (group, tap / s_extent, tap % s_extent)
}

/// Element offset of reduction step `step` relative to a tile column's
/// origin (batch image at channel group 0, spatial position of the first
/// tap).
pub fn absolute_offset(layout: &Layout, problem: &Conv2dProblemSize, step: usize) -> isize {
    let (group, fh, fw) = decompose_step(step, problem.filter_pixels(), problem.s);
    (group * layout.group_stride()
        + fh * problem.dilation_h * layout.row_stride()
        + fw * problem.dilation_w * layout.pixel_stride()) as isize
}

/// One reduction step of the precomputed table: the element delta to apply
/// to the running per-step offset, and the filter tap the step touches
/// (checked against the predicate masks at load time).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetEntry {
    pub delta: isize,
    pub fh: i8,
    pub fw: i8,
}

/// Precomputed per-problem offset table.
///
/// Built once per convolution invocation and shared read-only by every tile
/// instance. Three regions, `tile_k` entries each segment:
///
/// - segment 0: absolute offsets of steps `0..tile_k` — the residue tile,
///   which is visited first;
/// - segment 1: deltas moving each lane from the residue tile to the first
///   steady-state tile;
/// - segments 2..2+filter_pixels: steady-state deltas. The delta between a
///   step and the step one tile later depends only on the step's position
///   within the filter-tap cycle, so the pattern repeats with period
///   `filter_pixels` and the advance index rewinds instead of growing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetTable {
    entries: Vec<OffsetEntry>,
    tile_k: usize,
    residue_steps: usize,
    total_steps: usize,
    index_max: usize,
    rewind: isize,
}

impl OffsetTable {
    /// Builds the table for one problem/layout pairing.
    ///
    /// # Errors
    /// Returns a capacity error if the filter exceeds [`MAX_FILTER_PIXELS`]
    /// taps or the reduction tile exceeds `max_steps`.
    pub fn build(
        problem: &Conv2dProblemSize,
        layout: &Layout,
        tile_k: usize,
        max_steps: usize,
    ) -> Result<Self> {
        let fp = problem.filter_pixels();
        if fp > MAX_FILTER_PIXELS {
            return Err(ConvError::FilterTooLarge {
                r: problem.r,
                s: problem.s,
                max: MAX_FILTER_PIXELS,
            });
        }
        if tile_k > max_steps {
            return Err(ConvError::TableCapacity {
                steps: tile_k,
                max: max_steps,
            });
        }

        let total_steps = layout.channel_groups() * fp;
        let mut residue_steps = total_steps % tile_k;
        if residue_steps == 0 {
            residue_steps = tile_k;
        }

        let abs = |step: usize| absolute_offset(layout, problem, step);
        let taps = |step: usize| {
            let (_, fh, fw) = decompose_step(step, fp, problem.s);
            (fh as i8, fw as i8)
        };

        let mut entries = Vec::with_capacity((2 + fp) * tile_k);
        // Residue tile: absolute offsets.
        for s in 0..tile_k {
            let (fh, fw) = taps(s);
            entries.push(OffsetEntry {
                delta: abs(s),
                fh,
                fw,
            });
        }
        // Residue tile -> first steady-state tile.
        for s in 0..tile_k {
            let dest = s + residue_steps;
            let (fh, fw) = taps(dest);
            entries.push(OffsetEntry {
                delta: abs(dest) - abs(s),
                fh,
                fw,
            });
        }
        // Steady state: one segment per filter-tap phase.
        for i in 0..fp {
            for s in 0..tile_k {
                let dest = (i + 1) * tile_k + s + residue_steps;
                let (fh, fw) = taps(dest);
                entries.push(OffsetEntry {
                    delta: abs(dest) - abs(dest - tile_k),
                    fh,
                    fw,
                });
            }
        }

        Ok(OffsetTable {
            entries,
            tile_k,
            residue_steps,
            total_steps,
            index_max: (1 + fp) * tile_k,
            rewind: tile_k as isize * (1 - fp as isize),
        })
    }

    pub fn tile_k(&self) -> usize {
        self.tile_k
    }

    /// Number of valid reduction steps in the residue tile.
    pub fn residue_steps(&self) -> usize {
        self.residue_steps
    }

    /// Total reduction steps of the whole problem.
    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    /// Number of reduction tiles, residue tile included.
    pub fn num_tiles(&self) -> usize {
        (self.total_steps - self.residue_steps) / self.tile_k + 1
    }

    pub fn entry(&self, index: usize) -> OffsetEntry {
        self.entries[index]
    }

    /// Index of the residue-tile segment the traversal starts from.
    pub fn start_index(&self) -> usize {
        0
    }

    /// Advances the table index by one tile, rewinding once the steady-state
    /// phase cycle completes.
    pub fn advance_index(&self, index: usize) -> usize {
        if index < self.index_max {
            index + self.tile_k
        } else {
            (index as isize + self.rewind) as usize
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::ConvMode;
    use crate::tile::MAX_FILTER_PIXELS;

    fn problem(c: usize, h: usize, w: usize, r: usize, s: usize) -> Conv2dProblemSize {
        Conv2dProblemSize::simple(1, c, h, w, 1, r, s, r / 2, 1, ConvMode::CrossCorrelation)
            .unwrap()
    }

    /// Cumulative deltas must reproduce the directly computed absolute
    /// offset at every step of the traversal, for every lane.
    fn check_round_trip(problem: &Conv2dProblemSize, layout: &Layout, tile_k: usize) {
        let table = OffsetTable::build(problem, layout, tile_k, 8).unwrap();
        let fp = problem.filter_pixels();

        let mut strided: Vec<isize> = (0..tile_k).map(|s| table.entry(s).delta).collect();
        let mut index = table.start_index();

        // Residue tile: lanes below the residue length sit at steps 0..residue.
        for (s, &off) in strided.iter().enumerate() {
            if s < table.residue_steps() {
                assert_eq!(off, absolute_offset(layout, problem, s));
            }
        }

        for tile in 1..table.num_tiles() {
            index = table.advance_index(index);
            for (s, off) in strided.iter_mut().enumerate() {
                let entry = table.entry(index + s);
                *off += entry.delta;

                let step = table.residue_steps() + (tile - 1) * tile_k + s;
                assert_eq!(
                    *off,
                    absolute_offset(layout, problem, step),
                    "lane {} of tile {} diverged",
                    s,
                    tile
                );
                let (_, fh, fw) = decompose_step(step, fp, problem.s);
                assert_eq!((entry.fh as usize, entry.fw as usize), (fh, fw));
            }
        }
    }

    #[test]
    fn test_round_trip_planar() {
        let p = problem(4, 5, 5, 3, 3);
        let layout = Layout::nchw(1, 4, 5, 5);
        // 4 * 9 = 36 steps; residue of 4 with tile_k 8.
        check_round_trip(&p, &layout, 8);
        check_round_trip(&p, &layout, 4);
        check_round_trip(&p, &layout, 5);
    }

    #[test]
    fn test_round_trip_interleaved() {
        let p = problem(8, 6, 6, 3, 3);
        let layout = Layout::ncxhwx(1, 8, 6, 6, 4).unwrap();
        // 2 groups * 9 taps = 18 steps.
        check_round_trip(&p, &layout, 8);
        check_round_trip(&p, &layout, 6);
    }

    #[test]
    fn test_round_trip_dilated() {
        let p = Conv2dProblemSize::new(1, 3, 9, 9, 1, 3, 3, 2, 2, 1, 1, 2, 2, ConvMode::CrossCorrelation)
            .unwrap();
        let layout = Layout::nchw(1, 3, 9, 9);
        check_round_trip(&p, &layout, 8);
    }

    #[test]
    fn test_round_trip_non_square_filter() {
        let p = problem(4, 7, 7, 1, 5);
        let layout = Layout::nchw(1, 4, 7, 7);
        check_round_trip(&p, &layout, 7);
    }

    #[test]
    fn test_residue_is_full_tile_when_divisible() {
        let p = problem(4, 5, 5, 2, 2);
        let layout = Layout::nchw(1, 4, 5, 5);
        // 16 steps, tile_k 8: residue collapses to a full tile.
        let table = OffsetTable::build(&p, &layout, 8, 8).unwrap();
        assert_eq!(table.residue_steps(), 8);
        assert_eq!(table.num_tiles(), 2);
    }

    #[test]
    fn test_single_short_tile() {
        let p = problem(1, 5, 5, 2, 2);
        let layout = Layout::nchw(1, 1, 5, 5);
        let table = OffsetTable::build(&p, &layout, 8, 8).unwrap();
        assert_eq!(table.total_steps(), 4);
        assert_eq!(table.residue_steps(), 4);
        assert_eq!(table.num_tiles(), 1);
    }

    #[test]
    fn test_capacity_errors() {
        let layout = Layout::nchw(1, 1, 20, 20);
        let p = Conv2dProblemSize::simple(1, 1, 20, 20, 1, 8, 8, 0, 1, ConvMode::CrossCorrelation)
            .unwrap();
        assert_eq!(
            OffsetTable::build(&p, &layout, 8, 8),
            Err(ConvError::FilterTooLarge {
                r: 8,
                s: 8,
                max: MAX_FILTER_PIXELS
            })
        );

        let p = problem(1, 5, 5, 3, 3);
        let layout = Layout::nchw(1, 1, 5, 5);
        assert_eq!(
            OffsetTable::build(&p, &layout, 9, 8),
            Err(ConvError::TableCapacity { steps: 9, max: 8 })
        );
    }
}
