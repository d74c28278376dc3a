use ig_tensor::Coord4d;

/// Placement of the batch axis within the GEMM column ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnOrder {
    /// Columns enumerate (batch, row, col) with batch outermost; the
    /// conventional ordering for forward convolution.
    BatchMajor,
    /// Columns enumerate (row, col, batch) with batch innermost; used by
    /// batch-interleaved orderings where adjacent columns share a spatial
    /// position.
    BatchInterleaved,
}

/// Pure map between a logical GEMM coordinate and a physical tensor
/// coordinate.
///
/// The GEMM row axis carries channels; the column axis linearizes
/// batch x spatial according to `ColumnOrder`. `forward` and `inverse` are
/// total over the declared extents and side-effect free, which is what lets
/// the same multiply-accumulate engine serve either operand ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileMap {
    order: ColumnOrder,
    n: usize,
    y: usize,
    x: usize,
}

impl TileMap {
    pub fn new(order: ColumnOrder, n: usize, y: usize, x: usize) -> Self {
        TileMap { order, n, y, x }
    }

    pub fn batch_major(n: usize, y: usize, x: usize) -> Self {
        TileMap {
            order: ColumnOrder::BatchMajor,
            n,
            y,
            x,
        }
    }

    pub fn batch_interleaved(n: usize, y: usize, x: usize) -> Self {
        TileMap {
            order: ColumnOrder::BatchInterleaved,
            n,
            y,
            x,
        }
    }

    /// GEMM column extent.
    pub fn columns(&self) -> usize {
        self.n * self.y * self.x
    }

    /// Splits a GEMM column into (batch, spatial row, spatial col).
    pub fn column_to_nyx(&self, col: usize) -> (usize, usize, usize) {
        debug_assert!(col < self.columns());
        match self.order {
            ColumnOrder::BatchMajor => {
                let pixels = self.y * self.x;
                let n = col / pixels;
                let rest = col % pixels;
                (n, rest / self.x, rest % self.x)
            }
            ColumnOrder::BatchInterleaved => {
                let n = col % self.n;
                let rest = col / self.n;
                (n, rest / self.x, rest % self.x)
            }
        }
    }

    /// Inverse of [`column_to_nyx`](Self::column_to_nyx).
    pub fn nyx_to_column(&self, n: usize, y: usize, x: usize) -> usize {
        debug_assert!(n < self.n && y < self.y && x < self.x);
        match self.order {
            ColumnOrder::BatchMajor => (n * self.y + y) * self.x + x,
            ColumnOrder::BatchInterleaved => (y * self.x + x) * self.n + n,
        }
    }

    /// Full forward map: (GEMM row, GEMM column) to a logical tensor
    /// coordinate, with the row carried on the channel axis.
    pub fn forward(&self, row: usize, col: usize) -> Coord4d {
        let (n, y, x) = self.column_to_nyx(col);
        Coord4d::new(n as isize, row as isize, y as isize, x as isize)
    }

    /// Inverse of [`forward`](Self::forward).
    pub fn inverse(&self, coord: Coord4d) -> (usize, usize) {
        (
            coord.c as usize,
            self.nyx_to_column(coord.n as usize, coord.h as usize, coord.w as usize),
        )
    }
}
