use crate::fragment::Fragment;
use crate::iterator::{Mask, SrcGeometry, StepSchedule, TileLoader};
use crate::offsets::decompose_step;
use crate::problem::Conv2dProblemSize;
use crate::tile_map::TileMap;
use ig_tensor::{Coord4d, Element, Layout};

/// Strides-only forward source iterator.
///
/// Serves the configurations the precomputed table cannot (filter larger
/// than the table bound, reduction tile longer than the step cap): each load
/// recomputes the step offset from the layout strides instead of replaying a
/// table delta. Masking and traversal order are identical to the precomputed
/// path.
#[derive(Debug)]
pub struct DirectSrcIterator<'a, T: Element> {
    geom: &'a SrcGeometry,
    sched: StepSchedule,
    data: &'a [T],
    col_base: Vec<isize>,
    row_mask: Vec<u32>,
    col_mask: Vec<u32>,
    tile_idx: usize,
    lanes: usize,
    access: usize,
}

impl<'a, T: Element> DirectSrcIterator<'a, T> {
    pub fn new(
        geom: &'a SrcGeometry,
        sched: StepSchedule,
        data: &'a [T],
        block_col: usize,
        tile_n: usize,
        access: usize,
    ) -> Self {
        let mut col_base = Vec::with_capacity(tile_n);
        let mut row_mask = Vec::with_capacity(tile_n);
        let mut col_mask = Vec::with_capacity(tile_n);
        for j in 0..tile_n {
            let (base, rows, cols) = geom.column_origin(block_col + j);
            col_base.push(base);
            row_mask.push(rows);
            col_mask.push(cols);
        }
        DirectSrcIterator {
            geom,
            sched,
            data,
            col_base,
            row_mask,
            col_mask,
            tile_idx: 0,
            lanes: geom.layout.interleave(),
            access,
        }
    }

    pub fn clear_mask(&mut self) {
        self.row_mask.fill(0);
        self.col_mask.fill(0);
    }

    pub fn enable_mask(&mut self) {
        // Wide shift: r and s may be the full mask width of 32.
        self.row_mask.fill(((1u64 << self.geom.r) - 1) as u32);
        self.col_mask.fill(((1u64 << self.geom.s) - 1) as u32);
    }

    pub fn get_mask(&self) -> Mask {
        Mask {
            rows: self.row_mask.clone(),
            cols: self.col_mask.clone(),
        }
    }

    pub fn set_mask(&mut self, mask: &Mask) {
        self.row_mask.copy_from_slice(&mask.rows);
        self.col_mask.copy_from_slice(&mask.cols);
    }
}

impl<T: Element> TileLoader for DirectSrcIterator<'_, T> {
    type Elem = T;

    fn load(&mut self, frag: &mut Fragment<T>) {
        let fp = self.geom.r * self.geom.s;
        for s in 0..self.sched.tile_k() {
            let live = self.sched.valid(self.tile_idx, s);
            let step = self.sched.step(self.tile_idx, s);
            let (group, fh, fw) = decompose_step(step.min(self.sched.total() - 1), fp, self.geom.s);
            let rel = (group * self.geom.layout.group_stride()) as isize
                + fh as isize * self.geom.dil_h * self.geom.layout.row_stride() as isize
                + fw as isize * self.geom.dil_w * self.geom.layout.pixel_stride() as isize;

            for j in 0..self.col_base.len() {
                let guard = live
                    && self.row_mask[j] & (1 << fh) != 0
                    && self.col_mask[j] & (1 << fw) != 0;
                let dst = frag.lane_group_mut(s, j);
                if guard {
                    let off = (self.col_base[j] + rel) as usize;
                    for a in (0..self.lanes).step_by(self.access) {
                        dst[a..a + self.access]
                            .copy_from_slice(&self.data[off + a..off + a + self.access]);
                    }
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

/// Column geometry of the input-gradient gather: columns walk dx pixels,
/// reduction steps walk (dy channel group, filter row, filter col).
#[derive(Debug, Clone, Copy)]
pub struct DgradParams {
    pub layout: Layout,
    pub tile_map: TileMap,
    pub stride_h: isize,
    pub stride_w: isize,
    pub pad_h: isize,
    pub pad_w: isize,
    pub dil_h: isize,
    pub dil_w: isize,
    pub n: isize,
    pub p: isize,
    pub q: isize,
    pub r: usize,
    pub s: usize,
}

impl DgradParams {
    /// `layout` addresses the output-gradient tensor dy (N, K, P, Q).
    pub fn new(problem: &Conv2dProblemSize, layout: Layout) -> Self {
        DgradParams {
            layout,
            tile_map: TileMap::batch_major(problem.n, problem.h, problem.w),
            stride_h: problem.stride_h as isize,
            stride_w: problem.stride_w as isize,
            pad_h: problem.pad_h as isize,
            pad_w: problem.pad_w as isize,
            dil_h: problem.dilation_h as isize,
            dil_w: problem.dilation_w as isize,
            n: problem.n as isize,
            p: problem.p as isize,
            q: problem.q as isize,
            r: problem.r,
            s: problem.s,
        }
    }
}

/// Input-gradient source iterator: gathers dy values contributing to a tile
/// of dx pixels.
///
/// The in-range predicate per (pixel, tap) adds stride-divisibility tests on
/// top of the bounds tests, but it still depends only on the column and the
/// tap, so the same per-column bitmask scheme applies. The mapped output
/// position is recomputed on guarded accesses (integer division breaks the
/// delta linearity the forward table exploits).
#[derive(Debug)]
pub struct DgradSrcIterator<'a, T: Element> {
    params: &'a DgradParams,
    sched: StepSchedule,
    data: &'a [T],
    col_nhw: Vec<(isize, isize, isize)>,
    row_mask: Vec<u32>,
    col_mask: Vec<u32>,
    tile_idx: usize,
    lanes: usize,
}

impl<'a, T: Element> DgradSrcIterator<'a, T> {
    pub fn new(
        params: &'a DgradParams,
        sched: StepSchedule,
        data: &'a [T],
        block_col: usize,
        tile_n: usize,
    ) -> Self {
        let mut col_nhw = Vec::with_capacity(tile_n);
        let mut row_mask = Vec::with_capacity(tile_n);
        let mut col_mask = Vec::with_capacity(tile_n);
        for j in 0..tile_n {
            let col = block_col + j;
            if col >= params.tile_map.columns() {
                col_nhw.push((0, 0, 0));
                row_mask.push(0);
                col_mask.push(0);
                continue;
            }
            let (n, h, w) = params.tile_map.column_to_nyx(col);
            col_nhw.push((n as isize, h as isize, w as isize));

            let mut rows = 0u32;
            for fh in 0..params.r {
                let num = h as isize + params.pad_h - fh as isize * params.dil_h;
                if (n as isize) < params.n
                    && num >= 0
                    && num % params.stride_h == 0
                    && num / params.stride_h < params.p
                {
                    rows |= 1 << fh;
                }
            }
            let mut cols = 0u32;
            for fw in 0..params.s {
                let num = w as isize + params.pad_w - fw as isize * params.dil_w;
                if num >= 0 && num % params.stride_w == 0 && num / params.stride_w < params.q {
                    cols |= 1 << fw;
                }
            }
            row_mask.push(rows);
            col_mask.push(cols);
        }
        DgradSrcIterator {
            params,
            sched,
            data,
            col_nhw,
            row_mask,
            col_mask,
            tile_idx: 0,
            lanes: params.layout.interleave(),
        }
    }

    pub fn clear_mask(&mut self) {
        self.row_mask.fill(0);
        self.col_mask.fill(0);
    }

    pub fn get_mask(&self) -> Mask {
        Mask {
            rows: self.row_mask.clone(),
            cols: self.col_mask.clone(),
        }
    }

    pub fn set_mask(&mut self, mask: &Mask) {
        self.row_mask.copy_from_slice(&mask.rows);
        self.col_mask.copy_from_slice(&mask.cols);
    }
}

impl<T: Element> TileLoader for DgradSrcIterator<'_, T> {
    type Elem = T;

    fn load(&mut self, frag: &mut Fragment<T>) {
        let params = self.params;
        let fp = params.r * params.s;
        for s in 0..self.sched.tile_k() {
            let live = self.sched.valid(self.tile_idx, s);
            let step = self.sched.step(self.tile_idx, s);
            let (group, fh, fw) = decompose_step(step.min(self.sched.total() - 1), fp, params.s);

            for j in 0..self.col_nhw.len() {
                let guard = live
                    && self.row_mask[j] & (1 << fh) != 0
                    && self.col_mask[j] & (1 << fw) != 0;
                let dst = frag.lane_group_mut(s, j);
                if guard {
                    let (n, h, w) = self.col_nhw[j];
                    let p = (h + params.pad_h - fh as isize * params.dil_h) / params.stride_h;
                    let q = (w + params.pad_w - fw as isize * params.dil_w) / params.stride_w;
                    let off = n as usize * params.layout.batch_stride()
                        + group * params.layout.group_stride()
                        + p as usize * params.layout.row_stride()
                        + q as usize * params.layout.pixel_stride();
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

/// Geometry of the weight-gradient gather: columns walk filter elements
/// (c, fh, fw), reduction steps walk output pixels (n, p, q).
#[derive(Debug, Clone, Copy)]
pub struct WgradParams {
    pub layout: Layout,
    pub step_map: TileMap,
    pub stride_h: isize,
    pub stride_w: isize,
    pub pad_h: isize,
    pub pad_w: isize,
    pub dil_h: isize,
    pub dil_w: isize,
    pub c: usize,
    pub h: isize,
    pub w: isize,
    pub r: usize,
    pub s: usize,
    pub flip: bool,
}

impl WgradParams {
    /// `layout` addresses the source activation tensor x (N, C, H, W).
    pub fn new(problem: &Conv2dProblemSize, layout: Layout) -> Self {
        WgradParams {
            layout,
            step_map: TileMap::batch_major(problem.n, problem.p, problem.q),
            stride_h: problem.stride_h as isize,
            stride_w: problem.stride_w as isize,
            pad_h: problem.pad_h as isize,
            pad_w: problem.pad_w as isize,
            dil_h: problem.dilation_h as isize,
            dil_w: problem.dilation_w as isize,
            c: problem.c,
            h: problem.h as isize,
            w: problem.w as isize,
            r: problem.r,
            s: problem.s,
            flip: matches!(problem.mode, crate::problem::ConvMode::Convolution),
        }
    }
}

/// Weight-gradient source iterator: gathers x values for a tile of filter
/// elements.
///
/// The bounds predicate couples the column's filter tap with the step's
/// output position, so guards are evaluated per access; no per-column
/// bitmask is possible here.
#[derive(Debug)]
pub struct WgradSrcIterator<'a, T: Element> {
    params: &'a WgradParams,
    sched: StepSchedule,
    data: &'a [T],
    col_taps: Vec<Option<(usize, usize, usize)>>,
    tile_idx: usize,
}

impl<'a, T: Element> WgradSrcIterator<'a, T> {
    pub fn new(
        params: &'a WgradParams,
        sched: StepSchedule,
        data: &'a [T],
        block_col: usize,
        tile_n: usize,
    ) -> Self {
        let fp = params.r * params.s;
        let columns = params.c * fp;
        let col_taps = (0..tile_n)
            .map(|j| {
                let col = block_col + j;
                if col >= columns {
                    return None;
                }
                let c = col / fp;
                let tap = col % fp;
                let (fh, fw) = (tap / params.s, tap % params.s);
                // The tap addressing x is flipped in convolution mode; the
                // output element stays at (c, fh, fw).
                let (tr, ts) = if params.flip {
                    (params.r - 1 - fh, params.s - 1 - fw)
                } else {
                    (fh, fw)
                };
                Some((c, tr, ts))
            })
            .collect();
        WgradSrcIterator {
            params,
            sched,
            data,
            col_taps,
            tile_idx: 0,
        }
    }
}

impl<T: Element> TileLoader for WgradSrcIterator<'_, T> {
    type Elem = T;

    fn load(&mut self, frag: &mut Fragment<T>) {
        let params = self.params;
        for s in 0..self.sched.tile_k() {
            let live = self.sched.valid(self.tile_idx, s);
            let step = self.sched.step(self.tile_idx, s);
            let (n, p, q) = params
                .step_map
                .column_to_nyx(step.min(self.sched.total() - 1));

            for (j, tap) in self.col_taps.iter().enumerate() {
                let mut value = T::default();
                if live {
                    if let Some((c, tr, ts)) = *tap {
                        let h = p as isize * params.stride_h - params.pad_h
                            + tr as isize * params.dil_h;
                        let w = q as isize * params.stride_w - params.pad_w
                            + ts as isize * params.dil_w;
                        if h >= 0 && h < params.h && w >= 0 && w < params.w {
                            let coord = Coord4d::new(n as isize, c as isize, h, w);
                            value = self.data[params.layout.offset(coord)];
                        }
                    }
                }
                frag.set(s, j, 0, value);
            }
        }
    }

    fn advance(&mut self) {
        self.tile_idx += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::ConvMode;
    use ig_tensor::Tensor;

    #[test]
    fn test_direct_matches_precomp() {
        use crate::iterator::precomp::{PrecompSrcIterator, SrcIterParams};

        let problem =
            Conv2dProblemSize::simple(1, 4, 5, 5, 2, 3, 3, 1, 1, ConvMode::CrossCorrelation)
                .unwrap();
        let layout = Layout::nchw(1, 4, 5, 5);
        let mut src = Tensor::<f32>::zeros(layout);
        for (i, v) in src.data_mut().iter_mut().enumerate() {
            *v = (i % 37) as f32 - 11.0;
        }

        let tile_k = 8;
        let tile_n = 4;
        let params = SrcIterParams::new(&problem, layout, tile_k, 8).unwrap();
        let geom = SrcGeometry::new(&problem, layout);
        let sched = StepSchedule::new(params.table.total_steps(), tile_k);

        for block_col in (0..problem.output_pixels()).step_by(tile_n) {
            let mut pre = PrecompSrcIterator::new(&params, src.data(), block_col, tile_n, 1);
            let mut dir = DirectSrcIterator::new(&geom, sched, src.data(), block_col, tile_n, 1);
            let mut frag_a = Fragment::new(tile_k, tile_n, 1);
            let mut frag_b = Fragment::new(tile_k, tile_n, 1);
            for tile in 0..sched.num_tiles() {
                if tile > 0 {
                    pre.advance();
                    dir.advance();
                }
                pre.load(&mut frag_a);
                dir.load(&mut frag_b);
                for s in 0..tile_k {
                    for j in 0..tile_n {
                        assert_eq!(
                            frag_a.get(s, j, 0),
                            frag_b.get(s, j, 0),
                            "tile {} step {} col {}",
                            tile,
                            s,
                            block_col + j
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_dgrad_divisibility_predicates() {
        // Stride 2: only every other dx row can receive a contribution from
        // a given tap.
        let problem =
            Conv2dProblemSize::simple(1, 1, 7, 7, 1, 3, 3, 1, 2, ConvMode::CrossCorrelation)
                .unwrap();
        let dy_layout = Layout::nchw(1, 1, problem.p, problem.q);
        let params = DgradParams::new(&problem, dy_layout);
        let sched = StepSchedule::new(problem.filter_pixels(), 8);
        let dy = Tensor::<f32>::zeros(dy_layout);

        // dx pixel (0, 0): num_h = 0 + 1 - fh; divisible by 2 only for
        // fh = 1 (num 0); fh = 0 gives num 1 (odd), fh = 2 gives -1.
        let it = DgradSrcIterator::new(&params, sched, dy.data(), 0, 1);
        assert_eq!(it.get_mask().rows[0], 0b010);
        assert_eq!(it.get_mask().cols[0], 0b010);
    }

    #[test]
    fn test_wgrad_gathers_padded_source() {
        let problem =
            Conv2dProblemSize::simple(1, 1, 3, 3, 1, 3, 3, 1, 1, ConvMode::CrossCorrelation)
                .unwrap();
        let layout = Layout::nchw(1, 1, 3, 3);
        let mut x = Tensor::<f32>::zeros(layout);
        for (i, v) in x.data_mut().iter_mut().enumerate() {
            *v = i as f32 + 1.0;
        }
        let params = WgradParams::new(&problem, layout);
        let sched = StepSchedule::new(problem.output_pixels(), 4);
        let mut it = WgradSrcIterator::new(&params, sched, x.data(), 0, 2);

        let mut frag = Fragment::new(4, 2, 1);
        it.load(&mut frag);
        // Residue tile: 9 pixels, tile_k 4 -> residue 1, step 0 = pixel
        // (0, 0, 0). Column 0 is tap (0, 0): h = 0 - 1 + 0 = -1, padded.
        assert_eq!(frag.get(0, 0, 0), 0.0);
        // Column 1 is tap (0, 1): h = -1 still padded.
        assert_eq!(frag.get(0, 1, 0), 0.0);

        it.advance();
        it.load(&mut frag);
        // Steady tile: steps 1..5 = pixels (0,0,1), (0,0,2), (0,1,0), (0,1,1).
        // Column 4 would be tap (1, 1): for pixel (0,0,1), h = 0, w = 1.
        let mut it2 = WgradSrcIterator::new(&params, sched, x.data(), 4, 1);
        it2.advance();
        let mut frag2 = Fragment::new(4, 1, 1);
        it2.load(&mut frag2);
        assert_eq!(frag2.get(0, 0, 0), x.at(0, 0, 0, 1));
    }
}
