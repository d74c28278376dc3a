use crate::fragment::Fragment;
use crate::iterator::{StepSchedule, TileLoader};
use crate::offsets::decompose_step;
use crate::problem::{Conv2dProblemSize, ConvMode};
use crate::tile_map::TileMap;
use ig_tensor::{Coord4d, Element, FilterLayout, Layout};

/// Forward filter tile iterator.
///
/// Rows walk output channels k; the reduction step selects the channel group
/// and filter tap, matching the source iterator's traversal step for step.
/// Filter storage interleaves the input channel, so one access pulls the
/// whole lane group contiguously.
#[derive(Debug)]
pub struct FpropFilterIterator<'a, T: Element> {
    layout: FilterLayout,
    sched: StepSchedule,
    data: &'a [T],
    block_row: usize,
    tile_m: usize,
    k: usize,
    r: usize,
    s: usize,
    flip: bool,
    lanes: usize,
    tile_idx: usize,
}

impl<'a, T: Element> FpropFilterIterator<'a, T> {
    pub fn new(
        problem: &Conv2dProblemSize,
        layout: FilterLayout,
        sched: StepSchedule,
        data: &'a [T],
        block_row: usize,
        tile_m: usize,
    ) -> Self {
        FpropFilterIterator {
            layout,
            sched,
            data,
            block_row,
            tile_m,
            k: problem.k,
            r: problem.r,
            s: problem.s,
            flip: matches!(problem.mode, ConvMode::Convolution),
            lanes: layout.interleave(),
            tile_idx: 0,
        }
    }
}

impl<T: Element> TileLoader for FpropFilterIterator<'_, T> {
    type Elem = T;

    fn load(&mut self, frag: &mut Fragment<T>) {
        let fp = self.r * self.s;
        for s in 0..self.sched.tile_k() {
            let live = self.sched.valid(self.tile_idx, s);
            let step = self.sched.step(self.tile_idx, s);
            let (group, fh, fw) = decompose_step(step.min(self.sched.total() - 1), fp, self.s);
            let (tr, ts) = if self.flip {
                (self.r - 1 - fh, self.s - 1 - fw)
            } else {
                (fh, fw)
            };

            for i in 0..self.tile_m {
                let k = self.block_row + i;
                let dst = frag.lane_group_mut(s, i);
                if live && k < self.k {
                    let off = self.layout.offset(k, group * self.lanes, tr, ts);
                    dst.copy_from_slice(&self.data[off..off + self.lanes]);
                } else {
                    dst.fill(T::default());
                }
            }
        }
    }

    fn advance(&mut self) {
        self.tile_idx += 1;
    }
}

/// Filter tile iterator for the input-gradient pass.
///
/// Rows walk input channels c; the reduction step selects the output channel
/// group of dy and the filter tap. Lanes walk k within the group, which is
/// strided in filter storage, so each lane is a separate access.
#[derive(Debug)]
pub struct DgradFilterIterator<'a, T: Element> {
    layout: FilterLayout,
    sched: StepSchedule,
    data: &'a [T],
    block_row: usize,
    tile_m: usize,
    c: usize,
    k: usize,
    r: usize,
    s: usize,
    flip: bool,
    lanes: usize,
    tile_idx: usize,
}

impl<'a, T: Element> DgradFilterIterator<'a, T> {
    /// `lanes` is the output-gradient interleave, the k-group width of one
    /// reduction step.
    pub fn new(
        problem: &Conv2dProblemSize,
        layout: FilterLayout,
        sched: StepSchedule,
        data: &'a [T],
        block_row: usize,
        tile_m: usize,
        lanes: usize,
    ) -> Self {
        DgradFilterIterator {
            layout,
            sched,
            data,
            block_row,
            tile_m,
            c: problem.c,
            k: problem.k,
            r: problem.r,
            s: problem.s,
            flip: matches!(problem.mode, ConvMode::Convolution),
            lanes,
            tile_idx: 0,
        }
    }
}

impl<T: Element> TileLoader for DgradFilterIterator<'_, T> {
    type Elem = T;

    fn load(&mut self, frag: &mut Fragment<T>) {
        let fp = self.r * self.s;
        for s in 0..self.sched.tile_k() {
            let live = self.sched.valid(self.tile_idx, s);
            let step = self.sched.step(self.tile_idx, s);
            let (kg, fh, fw) = decompose_step(step.min(self.sched.total() - 1), fp, self.s);
            let (tr, ts) = if self.flip {
                (self.r - 1 - fh, self.s - 1 - fw)
            } else {
                (fh, fw)
            };

            for i in 0..self.tile_m {
                let c = self.block_row + i;
                for lane in 0..self.lanes {
                    let k = kg * self.lanes + lane;
                    let value = if live && c < self.c && k < self.k {
                        self.data[self.layout.offset(k, c, tr, ts)]
                    } else {
                        T::default()
                    };
                    frag.set(s, i, lane, value);
                }
            }
        }
    }

    fn advance(&mut self) {
        self.tile_idx += 1;
    }
}

/// Output-gradient tile iterator for the weight-gradient pass.
///
/// Rows walk output channels k; the reduction step walks output pixels
/// (n, p, q) in batch-major order.
#[derive(Debug)]
pub struct WgradDyIterator<'a, T: Element> {
    layout: Layout,
    sched: StepSchedule,
    data: &'a [T],
    step_map: TileMap,
    block_row: usize,
    tile_m: usize,
    k: usize,
    tile_idx: usize,
}

impl<'a, T: Element> WgradDyIterator<'a, T> {
    /// `layout` addresses the output-gradient tensor dy (N, K, P, Q).
    pub fn new(
        problem: &Conv2dProblemSize,
        layout: Layout,
        sched: StepSchedule,
        data: &'a [T],
        block_row: usize,
        tile_m: usize,
    ) -> Self {
        WgradDyIterator {
            layout,
            sched,
            data,
            step_map: TileMap::batch_major(problem.n, problem.p, problem.q),
            block_row,
            tile_m,
            k: problem.k,
            tile_idx: 0,
        }
    }
}

impl<T: Element> TileLoader for WgradDyIterator<'_, T> {
    type Elem = T;

    fn load(&mut self, frag: &mut Fragment<T>) {
        for s in 0..self.sched.tile_k() {
            let live = self.sched.valid(self.tile_idx, s);
            let step = self.sched.step(self.tile_idx, s);
            let (n, p, q) = self.step_map.column_to_nyx(step.min(self.sched.total() - 1));

            for i in 0..self.tile_m {
                let k = self.block_row + i;
                let value = if live && k < self.k {
                    let coord = Coord4d::new(n as isize, k as isize, p as isize, q as isize);
                    self.data[self.layout.offset(coord)]
                } else {
                    T::default()
                };
                frag.set(s, i, 0, value);
            }
        }
    }

    fn advance(&mut self) {
        self.tile_idx += 1;
    }
}
