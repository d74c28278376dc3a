use crate::error::{ConvError, Result};
use crate::tile_map::ColumnOrder;

/// Hard bound on filter taps the precomputed offset table can describe.
pub const MAX_FILTER_PIXELS: usize = 7 * 7;

/// Widest filter extent the masked iterators can serve: the boundary
/// predicates keep one bit per filter row and per filter column in a u32
/// word.
pub const MAX_FILTER_EXTENT: usize = 32;

/// Shape of one GEMM tile.
///
/// `m` rows (output channels), `n` columns (output pixels), `k` reduction
/// steps per tile. For interleaved layouts one reduction step covers one
/// channel group, so each step moves `interleave` channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileShape {
    pub m: usize,
    pub n: usize,
    pub k: usize,
}

impl TileShape {
    pub fn new(m: usize, n: usize, k: usize) -> Self {
        TileShape { m, n, k }
    }
}

/// Number of pipeline stages in the multiply-accumulate mainloop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStages {
    /// Load tile, compute, repeat. No overlap; smallest scratch footprint.
    Single,
    /// Double-buffered: the next tile is staged while the current one is
    /// consumed. Default whenever two tiles fit in scratch.
    Double,
}

/// Static configuration of one convolution kernel instantiation.
///
/// `max_table_steps` bounds the reduction-tile length the precomputed offset
/// table may serve (the original target hardware capped this at 8 because the
/// table lived in a fixed-size constant parameter buffer). Problems whose
/// reduction tile exceeds the cap, or whose filter exceeds
/// [`MAX_FILTER_PIXELS`], fall back to the strides-only iterator path rather
/// than failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    pub tile: TileShape,
    pub stages: PipelineStages,
    /// Elements moved per guarded access; must divide the interleave
    /// quantity (the per-step contiguous element count).
    pub access_width: usize,
    pub max_table_steps: usize,
    /// Ordering of the forward pass's GEMM columns over output pixels.
    pub column_order: ColumnOrder,
}

impl KernelConfig {
    pub fn new(tile: TileShape, stages: PipelineStages) -> Self {
        KernelConfig {
            tile,
            stages,
            access_width: 1,
            max_table_steps: 8,
            column_order: ColumnOrder::BatchMajor,
        }
    }

    /// Configuration with the access width matched to a layout's interleave
    /// quantity, so one access moves a whole channel group.
    pub fn for_interleave(tile: TileShape, stages: PipelineStages, interleave: usize) -> Self {
        KernelConfig {
            tile,
            stages,
            access_width: interleave,
            max_table_steps: 8,
            column_order: ColumnOrder::BatchMajor,
        }
    }

    pub fn with_column_order(mut self, order: ColumnOrder) -> Self {
        self.column_order = order;
        self
    }

    /// Fail-fast validation of the tile/access pairing, performed before any
    /// tile is processed.
    ///
    /// # Errors
    /// Returns an error if any tile dimension is zero or the access width
    /// does not divide the per-step element count (the interleave quantity).
    pub fn validate(&self, interleave: usize) -> Result<()> {
        if self.tile.m == 0 || self.tile.n == 0 || self.tile.k == 0 {
            return Err(ConvError::InvalidProblem(
                "tile dimensions must be >= 1".to_string(),
            ));
        }
        if self.access_width == 0 || interleave % self.access_width != 0 {
            return Err(ConvError::AccessWidthMismatch {
                access: self.access_width,
                elements: interleave,
            });
        }
        Ok(())
    }

    /// Whether the precomputed-table path can serve a filter of `r`x`s` taps
    /// under this configuration.
    pub fn can_precompute(&self, r: usize, s: usize) -> bool {
        r * s <= MAX_FILTER_PIXELS && self.tile.k <= self.max_table_steps
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        KernelConfig::new(TileShape::new(8, 16, 8), PipelineStages::Double)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_matched_access() {
        let cfg = KernelConfig::for_interleave(TileShape::new(4, 4, 4), PipelineStages::Single, 4);
        assert!(cfg.validate(4).is_ok());

        // Narrower access that still divides the group is fine.
        let mut cfg = cfg;
        cfg.access_width = 2;
        assert!(cfg.validate(4).is_ok());
    }

    #[test]
    fn test_validate_rejects_mismatched_access() {
        let mut cfg = KernelConfig::default();
        cfg.access_width = 3;
        assert_eq!(
            cfg.validate(4),
            Err(ConvError::AccessWidthMismatch {
                access: 3,
                elements: 4
            })
        );
    }

    #[test]
    fn test_validate_rejects_access_wider_than_group() {
        let mut cfg = KernelConfig::default();
        cfg.access_width = 4;
        assert_eq!(
            cfg.validate(1),
            Err(ConvError::AccessWidthMismatch {
                access: 4,
                elements: 1
            })
        );
    }

    #[test]
    fn test_zero_tile_rejected() {
        let cfg = KernelConfig::new(TileShape::new(0, 4, 4), PipelineStages::Single);
        assert!(cfg.validate(1).is_err());
    }

    #[test]
    fn test_can_precompute_bounds() {
        let cfg = KernelConfig::default();
        assert!(cfg.can_precompute(7, 7));
        assert!(!cfg.can_precompute(8, 8));

        let big_k = KernelConfig::new(TileShape::new(8, 16, 9), PipelineStages::Double);
        assert!(!big_k.can_precompute(3, 3));
    }
}
