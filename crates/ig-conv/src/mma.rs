use crate::fragment::Fragment;
use crate::iterator::TileLoader;
use crate::numeric::{Accumulator, Promote};
use crate::tile::PipelineStages;

/// Accumulator tile of one GEMM block: `tile_m` rows by `tile_n` columns of
/// wide partial sums.
#[derive(Debug, Clone)]
pub struct AccumTile<A: Accumulator> {
    acc: Vec<A>,
    tile_m: usize,
    tile_n: usize,
}

impl<A: Accumulator> AccumTile<A> {
    pub fn new(tile_m: usize, tile_n: usize) -> Self {
        AccumTile {
            acc: vec![A::default(); tile_m * tile_n],
            tile_m,
            tile_n,
        }
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> A {
        debug_assert!(i < self.tile_m && j < self.tile_n);
        self.acc[i * self.tile_n + j]
    }

    /// Accumulates one loaded tile pair: filter rows against source columns,
    /// reduction steps outermost, interleave lanes inner. That ordering fixes
    /// the floating-point summation order to ascending (channel group, filter
    /// row, filter col, lane within group) across the whole reduction.
    pub fn multiply_accumulate<E, F>(&mut self, flt: &Fragment<F>, src: &Fragment<E>)
    where
        E: Promote<A>,
        F: Promote<A>,
    {
        debug_assert_eq!(flt.steps(), src.steps());
        debug_assert_eq!(flt.lanes(), src.lanes());
        debug_assert_eq!(flt.count(), self.tile_m);
        debug_assert_eq!(src.count(), self.tile_n);

        for s in 0..flt.steps() {
            for lane in 0..flt.lanes() {
                for i in 0..self.tile_m {
                    let a = flt.get(s, i, lane).promote();
                    for j in 0..self.tile_n {
                        let b = src.get(s, j, lane).promote();
                        self.acc[i * self.tile_n + j] =
                            self.acc[i * self.tile_n + j].mul_add(a, b);
                    }
                }
            }
        }
    }
}

/// Runs the reduction mainloop over one GEMM block.
///
/// Both iterators must be positioned at the residue tile and agree on the
/// number of reduction tiles. The double-buffered variant stages tile t+1
/// while tile t is consumed; both variants visit the tiles in the same order
/// and produce identical accumulators.
#[allow(clippy::too_many_arguments)]
pub fn run_mainloop<SrcIt, FltIt, A>(
    src_it: &mut SrcIt,
    flt_it: &mut FltIt,
    num_tiles: usize,
    tile_m: usize,
    tile_n: usize,
    tile_k: usize,
    lanes: usize,
    stages: PipelineStages,
) -> AccumTile<A>
where
    SrcIt: TileLoader,
    FltIt: TileLoader,
    SrcIt::Elem: Promote<A>,
    FltIt::Elem: Promote<A>,
    A: Accumulator,
{
    let mut acc = AccumTile::new(tile_m, tile_n);

    match stages {
        PipelineStages::Single => {
            let mut src_frag = Fragment::new(tile_k, tile_n, lanes);
            let mut flt_frag = Fragment::new(tile_k, tile_m, lanes);
            for tile in 0..num_tiles {
                if tile > 0 {
                    src_it.advance();
                    flt_it.advance();
                }
                src_it.load(&mut src_frag);
                flt_it.load(&mut flt_frag);
                acc.multiply_accumulate(&flt_frag, &src_frag);
            }
        }
        PipelineStages::Double => {
            let mut src_frag = [
                Fragment::new(tile_k, tile_n, lanes),
                Fragment::new(tile_k, tile_n, lanes),
            ];
            let mut flt_frag = [
                Fragment::new(tile_k, tile_m, lanes),
                Fragment::new(tile_k, tile_m, lanes),
            ];
            src_it.load(&mut src_frag[0]);
            flt_it.load(&mut flt_frag[0]);

            for tile in 0..num_tiles {
                let cur = tile % 2;
                let next = 1 - cur;
                if tile + 1 < num_tiles {
                    src_it.advance();
                    flt_it.advance();
                    src_it.load(&mut src_frag[next]);
                    flt_it.load(&mut flt_frag[next]);
                }
                acc.multiply_accumulate(&flt_frag[cur], &src_frag[cur]);
            }
        }
    }
    acc
}
