use rayon::prelude::*;

use crate::epilogue::EpilogueParams;
use crate::error::{ConvError, Result};
use crate::iterator::{
    DgradFilterIterator, DgradSrcIterator, DirectSrcIterator, FpropFilterIterator,
    PrecompSrcIterator, SrcGeometry, SrcIterParams, StepSchedule, TileLoader, WgradDyIterator,
    WgradSrcIterator,
};
use crate::iterator::direct::{DgradParams, WgradParams};
use crate::mma::run_mainloop;
use crate::numeric::{Accumulator, OutputElement, Promote};
use crate::parallel::SyncSliceMut;
use crate::problem::Conv2dProblemSize;
use crate::tile::{KernelConfig, PipelineStages, TileShape, MAX_FILTER_EXTENT};
use crate::tile_map::TileMap;
use ig_tensor::{Coord4d, FilterRef, FilterRefMut, TensorRef, TensorRefMut};

/// Host-side driver for one convolution problem.
///
/// Binds a problem descriptor to a kernel configuration and launches the
/// three passes over a pool of independent output tiles. Each tile owns a
/// disjoint block of the output, so the workers store without coordination.
#[derive(Debug, Clone, Copy)]
pub struct Convolution {
    problem: Conv2dProblemSize,
    config: KernelConfig,
}

impl Convolution {
    pub fn new(problem: Conv2dProblemSize, config: KernelConfig) -> Self {
        Convolution { problem, config }
    }

    pub fn with_default_config(problem: Conv2dProblemSize) -> Self {
        Convolution {
            problem,
            config: KernelConfig::default(),
        }
    }

    pub fn problem(&self) -> &Conv2dProblemSize {
        &self.problem
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Forward pass: out = epilogue(src (*) filter).
    ///
    /// Uses the precomputed-offset iterator when the filter and reduction
    /// tile fit its capacity bounds, falling back to the strides-only
    /// iterator otherwise; the two paths produce identical results.
    ///
    /// # Errors
    /// Returns an error if any tensor extent or interleave disagrees with
    /// the problem, the kernel configuration is invalid for the layouts, or
    /// an epilogue term is enabled without its operand.
    pub fn fprop<E, F, A, D>(
        &self,
        src: TensorRef<'_, E>,
        filter: FilterRef<'_, F>,
        bias: Option<&[A]>,
        residual: Option<TensorRef<'_, D>>,
        out: &mut TensorRefMut<'_, D>,
        epilogue: &EpilogueParams<'_>,
    ) -> Result<()>
    where
        E: Promote<A>,
        F: Promote<A>,
        A: Accumulator,
        D: OutputElement,
    {
        let p = &self.problem;
        check_extent(src.layout().extent(), [p.n, p.c, p.h, p.w])?;
        check_extent(filter.layout().extent(), [p.k, p.c, p.r, p.s])?;
        check_extent(out.layout().extent(), [p.n, p.k, p.p, p.q])?;
        if src.layout().interleave() != filter.layout().interleave() {
            return Err(ConvError::InterleaveMismatch {
                src: src.layout().interleave(),
                filter: filter.layout().interleave(),
            });
        }
        check_filter_extent(p.r, p.s)?;
        let lanes = src.layout().interleave();
        self.config.validate(lanes)?;

        let ep = epilogue.resolve();
        check_bias(bias, p.k, ep.is_bias_needed())?;
        if ep.is_source_needed() {
            let res = residual.ok_or_else(|| {
                ConvError::InvalidProblem("residual tensor required when gamma != 0".to_string())
            })?;
            check_extent(res.layout().extent(), out.layout().extent())?;
        }

        let tile = self.config.tile;
        let total_steps = src.layout().channel_groups() * p.filter_pixels();
        let sched = StepSchedule::new(total_steps, tile.k);
        let tile_map = TileMap::new(self.config.column_order, p.n, p.p, p.q);
        let out_layout = out.layout();
        let view = SyncSliceMut::new(out.data_mut());

        let store = |k: usize, col: usize, acc: A| {
            let (n, pp, q) = tile_map.column_to_nyx(col);
            let bias_v = match bias {
                Some(b) if ep.is_bias_needed() => b[k].into_compute(),
                _ => 0.0,
            };
            let res_v = match residual {
                Some(r) if ep.is_source_needed() => r.at(n, k, pp, q).to_compute(),
                _ => 0.0,
            };
            let value: D = ep.apply(acc, bias_v, res_v);
            let off = out_layout.offset(Coord4d::new(
                n as isize,
                k as isize,
                pp as isize,
                q as isize,
            ));
            unsafe { view.store(off, value) };
        };

        let make_flt = |br: usize| {
            FpropFilterIterator::new(p, filter.layout(), sched, filter.data(), br, tile.m)
        };

        if self.config.can_precompute(p.r, p.s) {
            let params = SrcIterParams::with_order(
                p,
                src.layout(),
                tile.k,
                self.config.max_table_steps,
                self.config.column_order,
            )?;
            let make_src = |bc: usize| {
                PrecompSrcIterator::new(&params, src.data(), bc, tile.n, self.config.access_width)
            };
            run_blocks::<A, _, _, _, _, _>(
                p.k,
                p.output_pixels(),
                tile,
                lanes,
                self.config.stages,
                sched.num_tiles(),
                make_src,
                make_flt,
                store,
            );
        } else {
            let geom = SrcGeometry::with_order(p, src.layout(), self.config.column_order);
            let make_src = |bc: usize| {
                DirectSrcIterator::new(
                    &geom,
                    sched,
                    src.data(),
                    bc,
                    tile.n,
                    self.config.access_width,
                )
            };
            run_blocks::<A, _, _, _, _, _>(
                p.k,
                p.output_pixels(),
                tile,
                lanes,
                self.config.stages,
                sched.num_tiles(),
                make_src,
                make_flt,
                store,
            );
        }
        Ok(())
    }

    /// Input-gradient pass: dx = epilogue(dy (*) filter^T).
    ///
    /// # Errors
    /// Same validation failures as [`fprop`](Self::fprop), against the
    /// gradient extents.
    pub fn dgrad<E, F, A, D>(
        &self,
        dy: TensorRef<'_, E>,
        filter: FilterRef<'_, F>,
        bias: Option<&[A]>,
        residual: Option<TensorRef<'_, D>>,
        dx: &mut TensorRefMut<'_, D>,
        epilogue: &EpilogueParams<'_>,
    ) -> Result<()>
    where
        E: Promote<A>,
        F: Promote<A>,
        A: Accumulator,
        D: OutputElement,
    {
        let p = &self.problem;
        check_extent(dy.layout().extent(), [p.n, p.k, p.p, p.q])?;
        check_extent(filter.layout().extent(), [p.k, p.c, p.r, p.s])?;
        check_extent(dx.layout().extent(), [p.n, p.c, p.h, p.w])?;
        check_filter_extent(p.r, p.s)?;
        let lanes = dy.layout().interleave();
        self.config.validate(lanes)?;

        let ep = epilogue.resolve();
        check_bias(bias, p.c, ep.is_bias_needed())?;
        if ep.is_source_needed() {
            let res = residual.ok_or_else(|| {
                ConvError::InvalidProblem("residual tensor required when gamma != 0".to_string())
            })?;
            check_extent(res.layout().extent(), dx.layout().extent())?;
        }

        let tile = self.config.tile;
        let total_steps = dy.layout().channel_groups() * p.filter_pixels();
        let sched = StepSchedule::new(total_steps, tile.k);
        let tile_map = TileMap::batch_major(p.n, p.h, p.w);
        let dx_layout = dx.layout();
        let view = SyncSliceMut::new(dx.data_mut());

        let store = |c: usize, col: usize, acc: A| {
            let (n, h, w) = tile_map.column_to_nyx(col);
            let bias_v = match bias {
                Some(b) if ep.is_bias_needed() => b[c].into_compute(),
                _ => 0.0,
            };
            let res_v = match residual {
                Some(r) if ep.is_source_needed() => r.at(n, c, h, w).to_compute(),
                _ => 0.0,
            };
            let value: D = ep.apply(acc, bias_v, res_v);
            let off =
                dx_layout.offset(Coord4d::new(n as isize, c as isize, h as isize, w as isize));
            unsafe { view.store(off, value) };
        };

        let params = DgradParams::new(p, dy.layout());
        let make_src = |bc: usize| DgradSrcIterator::new(&params, sched, dy.data(), bc, tile.n);
        let make_flt = |br: usize| {
            DgradFilterIterator::new(p, filter.layout(), sched, filter.data(), br, tile.m, lanes)
        };
        run_blocks::<A, _, _, _, _, _>(
            p.c,
            p.input_pixels(),
            tile,
            lanes,
            self.config.stages,
            sched.num_tiles(),
            make_src,
            make_flt,
            store,
        );
        Ok(())
    }

    /// Weight-gradient pass: dw = epilogue(dy (*) x), reducing over every
    /// output pixel of the batch.
    ///
    /// # Errors
    /// Same validation failures as [`fprop`](Self::fprop), against the
    /// gradient extents. The access width must be 1; the gather has no
    /// contiguous lane groups to vectorize.
    pub fn wgrad<E, F, A, D>(
        &self,
        dy: TensorRef<'_, E>,
        x: TensorRef<'_, F>,
        bias: Option<&[A]>,
        residual: Option<FilterRef<'_, D>>,
        dw: &mut FilterRefMut<'_, D>,
        epilogue: &EpilogueParams<'_>,
    ) -> Result<()>
    where
        E: Promote<A>,
        F: Promote<A>,
        A: Accumulator,
        D: OutputElement,
    {
        let p = &self.problem;
        check_extent(dy.layout().extent(), [p.n, p.k, p.p, p.q])?;
        check_extent(x.layout().extent(), [p.n, p.c, p.h, p.w])?;
        check_extent(dw.layout().extent(), [p.k, p.c, p.r, p.s])?;
        self.config.validate(1)?;

        let ep = epilogue.resolve();
        check_bias(bias, p.k, ep.is_bias_needed())?;
        if ep.is_source_needed() {
            let res = residual.ok_or_else(|| {
                ConvError::InvalidProblem("residual tensor required when gamma != 0".to_string())
            })?;
            check_extent(res.layout().extent(), dw.layout().extent())?;
        }

        let tile = self.config.tile;
        let fp = p.filter_pixels();
        let sched = StepSchedule::new(p.output_pixels(), tile.k);
        let dw_layout = dw.layout();
        let view = SyncSliceMut::new(dw.data_mut());

        let store = |k: usize, col: usize, acc: A| {
            let c = col / fp;
            let (fh, fw) = ((col % fp) / p.s, col % p.s);
            let bias_v = match bias {
                Some(b) if ep.is_bias_needed() => b[k].into_compute(),
                _ => 0.0,
            };
            let res_v = match residual {
                Some(r) if ep.is_source_needed() => r.at(k, c, fh, fw).to_compute(),
                _ => 0.0,
            };
            let value: D = ep.apply(acc, bias_v, res_v);
            unsafe { view.store(dw_layout.offset(k, c, fh, fw), value) };
        };

        let params = WgradParams::new(p, x.layout());
        let make_src = |bc: usize| WgradSrcIterator::new(&params, sched, x.data(), bc, tile.n);
        let make_flt =
            |br: usize| WgradDyIterator::new(p, dy.layout(), sched, dy.data(), br, tile.m);
        run_blocks::<A, _, _, _, _, _>(
            p.k,
            p.c * fp,
            tile,
            1,
            self.config.stages,
            sched.num_tiles(),
            make_src,
            make_flt,
            store,
        );
        Ok(())
    }
}

fn check_extent(got: [usize; 4], expected: [usize; 4]) -> Result<()> {
    if got != expected {
        return Err(ConvError::ExtentMismatch { expected, got });
    }
    Ok(())
}

// The row/col predicates hold one bit per filter row or column, so either
// extent past the mask word width cannot be represented.
fn check_filter_extent(r: usize, s: usize) -> Result<()> {
    if r > MAX_FILTER_EXTENT || s > MAX_FILTER_EXTENT {
        return Err(ConvError::FilterExtentTooLarge {
            r,
            s,
            max: MAX_FILTER_EXTENT,
        });
    }
    Ok(())
}

fn check_bias<A>(bias: Option<&[A]>, channels: usize, needed: bool) -> Result<()> {
    match bias {
        Some(b) if b.len() != channels => Err(ConvError::BiasLength {
            expected: channels,
            got: b.len(),
        }),
        None if needed => Err(ConvError::InvalidProblem(
            "bias required when beta != 0".to_string(),
        )),
        _ => Ok(()),
    }
}

/// Launches one worker per GEMM block over the rayon pool. Blocks partition
/// the output, so the store callback touches disjoint elements.
#[allow(clippy::too_many_arguments)]
fn run_blocks<A, SI, FI, SF, FF, ST>(
    rows: usize,
    cols: usize,
    tile: TileShape,
    lanes: usize,
    stages: PipelineStages,
    num_tiles: usize,
    make_src: SF,
    make_flt: FF,
    store: ST,
) where
    A: Accumulator,
    SI: TileLoader,
    FI: TileLoader,
    SI::Elem: Promote<A>,
    FI::Elem: Promote<A>,
    SF: Fn(usize) -> SI + Sync,
    FF: Fn(usize) -> FI + Sync,
    ST: Fn(usize, usize, A) + Sync,
{
    let row_blocks = rows.div_ceil(tile.m);
    let col_blocks = cols.div_ceil(tile.n);

    (0..row_blocks * col_blocks).into_par_iter().for_each(|b| {
        let block_row = (b / col_blocks) * tile.m;
        let block_col = (b % col_blocks) * tile.n;
        let mut src_it = make_src(block_col);
        let mut flt_it = make_flt(block_row);
        let acc = run_mainloop::<SI, FI, A>(
            &mut src_it,
            &mut flt_it,
            num_tiles,
            tile.m,
            tile.n,
            tile.k,
            lanes,
            stages,
        );
        for i in 0..tile.m {
            let row = block_row + i;
            if row >= rows {
                break;
            }
            for j in 0..tile.n {
                let col = block_col + j;
                if col >= cols {
                    break;
                }
                store(row, col, acc.get(i, j));
            }
        }
    });
}
