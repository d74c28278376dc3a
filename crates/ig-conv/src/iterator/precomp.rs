use crate::error::Result;
use crate::fragment::Fragment;
use crate::iterator::{Mask, SrcGeometry, TileLoader};
use crate::offsets::OffsetTable;
use crate::problem::Conv2dProblemSize;
use ig_tensor::{Element, Layout};

/// Precomputed state for the forward source iterator: the offset table plus
/// the column geometry.
///
/// Host-constructed once per invocation, then shared read-only by every tile
/// instance (it is a value type; parallel workers borrow it).
#[derive(Debug, Clone)]
pub struct SrcIterParams {
    pub table: OffsetTable,
    pub geom: SrcGeometry,
}

impl SrcIterParams {
    /// Builds the table and geometry for one problem/layout pairing.
    ///
    /// # Errors
    /// Propagates the table's capacity errors (filter too large, reduction
    /// tile longer than the table cap).
    pub fn new(
        problem: &Conv2dProblemSize,
        layout: Layout,
        tile_k: usize,
        max_steps: usize,
    ) -> Result<Self> {
        let table = OffsetTable::build(problem, &layout, tile_k, max_steps)?;
        Ok(SrcIterParams {
            table,
            geom: SrcGeometry::new(problem, layout),
        })
    }

    /// Same, with an explicit column ordering over output pixels.
    pub fn with_order(
        problem: &Conv2dProblemSize,
        layout: Layout,
        tile_k: usize,
        max_steps: usize,
        order: crate::tile_map::ColumnOrder,
    ) -> Result<Self> {
        let table = OffsetTable::build(problem, &layout, tile_k, max_steps)?;
        Ok(SrcIterParams {
            table,
            geom: SrcGeometry::with_order(problem, layout, order),
        })
    }
}

/// Forward source tile iterator driven by the precomputed offset table.
///
/// Per column it keeps one base offset and two predicate words (one bit per
/// filter row, one per filter column), computed once at construction. Per
/// reduction lane it keeps a running offset that a table delta advances each
/// tile; the load recovers the lane's filter tap from the table entry and
/// tests it against the masks.
#[derive(Debug)]
pub struct PrecompSrcIterator<'a, T: Element> {
    params: &'a SrcIterParams,
    data: &'a [T],
    col_base: Vec<isize>,
    row_mask: Vec<u32>,
    col_mask: Vec<u32>,
    strided: Vec<isize>,
    index: usize,
    residue_extent: usize,
    is_residue: bool,
    lanes: usize,
    access: usize,
}

impl<'a, T: Element> PrecompSrcIterator<'a, T> {
    /// Positions the iterator at the residue tile of the reduction walk for
    /// the tile of columns starting at `block_col`.
    pub fn new(
        params: &'a SrcIterParams,
        data: &'a [T],
        block_col: usize,
        tile_n: usize,
        access: usize,
    ) -> Self {
        let table = &params.table;
        let mut col_base = Vec::with_capacity(tile_n);
        let mut row_mask = Vec::with_capacity(tile_n);
        let mut col_mask = Vec::with_capacity(tile_n);
        for j in 0..tile_n {
            let (base, rows, cols) = params.geom.column_origin(block_col + j);
            col_base.push(base);
            row_mask.push(rows);
            col_mask.push(cols);
        }
        let strided = (0..table.tile_k()).map(|s| table.entry(s).delta).collect();

        PrecompSrcIterator {
            params,
            data,
            col_base,
            row_mask,
            col_mask,
            strided,
            index: table.start_index(),
            residue_extent: table.residue_steps(),
            is_residue: true,
            lanes: params.geom.layout.interleave(),
            access,
        }
    }

    /// Clears every boundary predicate; all subsequent loads are zero-fill.
    pub fn clear_mask(&mut self) {
        self.row_mask.fill(0);
        self.col_mask.fill(0);
    }

    /// Sets every boundary predicate, dropping the precomputed bounds tests.
    pub fn enable_mask(&mut self) {
        // Wide shift: r and s may be the full mask width of 32.
        let rows = ((1u64 << self.params.geom.r) - 1) as u32;
        let cols = ((1u64 << self.params.geom.s) - 1) as u32;
        self.row_mask.fill(rows);
        self.col_mask.fill(cols);
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

impl<T: Element> TileLoader for PrecompSrcIterator<'_, T> {
    type Elem = T;

    fn load(&mut self, frag: &mut Fragment<T>) {
        let table = &self.params.table;
        for s in 0..self.strided.len() {
            let entry = table.entry(self.index + s);
            let (fh, fw) = (entry.fh as u32, entry.fw as u32);
            let live = !self.is_residue || s < self.residue_extent;

            for j in 0..self.col_base.len() {
                let guard = live
                    && self.row_mask[j] & (1 << fh) != 0
                    && self.col_mask[j] & (1 << fw) != 0;
                let dst = frag.lane_group_mut(s, j);
                if guard {
                    let off = (self.col_base[j] + self.strided[s]) as usize;
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
        self.index = self.params.table.advance_index(self.index);
        for (s, off) in self.strided.iter_mut().enumerate() {
            *off += self.params.table.entry(self.index + s).delta;
        }
        self.is_residue = false;
    }
}
