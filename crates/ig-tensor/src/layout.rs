use crate::coord::Coord4d;
use crate::error::{LayoutError, Result};

/// Interleave quantities with vectorized-access support.
pub const SUPPORTED_INTERLEAVE: [usize; 4] = [1, 4, 32, 64];

/// Activation tensor layout: the NCxHWx family.
///
/// Channels are split into groups of `interleave` elements; within one batch
/// image the groups are stored planar (group-major, then row-major spatial)
/// and the `interleave` channels of a group are packed contiguously at each
/// spatial position. `interleave == 1` degenerates to planar NCHW.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    extent: [usize; 4],
    interleave: usize,
}

impl Layout {
    /// Planar NCHW layout.
    pub fn nchw(n: usize, c: usize, h: usize, w: usize) -> Self {
        Layout {
            extent: [n, c, h, w],
            interleave: 1,
        }
    }

    /// Channel-interleaved NCxHWx layout.
    ///
    /// # Errors
    /// Returns an error if `interleave` is not one of 1/4/32/64 or does not
    /// divide the channel extent.
    pub fn ncxhwx(n: usize, c: usize, h: usize, w: usize, interleave: usize) -> Result<Self> {
        if !SUPPORTED_INTERLEAVE.contains(&interleave) {
            return Err(LayoutError::UnsupportedInterleave(interleave));
        }
        if c % interleave != 0 {
            return Err(LayoutError::InterleaveMismatch {
                channels: c,
                interleave,
            });
        }
        Ok(Layout {
            extent: [n, c, h, w],
            interleave,
        })
    }

    /// Logical extent as [N, C, H, W].
    pub fn extent(&self) -> [usize; 4] {
        self.extent
    }

    pub fn interleave(&self) -> usize {
        self.interleave
    }

    /// Number of channel groups (C / interleave).
    pub fn channel_groups(&self) -> usize {
        self.extent[1] / self.interleave
    }

    /// Total number of elements the layout addresses.
    pub fn required_len(&self) -> usize {
        self.extent.iter().product()
    }

    /// Elements between adjacent spatial columns within one channel group.
    pub fn pixel_stride(&self) -> usize {
        self.interleave
    }

    /// Elements between adjacent spatial rows within one channel group.
    pub fn row_stride(&self) -> usize {
        self.extent[3] * self.interleave
    }

    /// Elements between adjacent channel groups of one image.
    pub fn group_stride(&self) -> usize {
        self.extent[2] * self.extent[3] * self.interleave
    }

    /// Elements between adjacent batch images.
    pub fn batch_stride(&self) -> usize {
        self.channel_groups() * self.group_stride()
    }

    /// Maps an in-bounds logical coordinate to a linear element offset.
    ///
    /// # Panics
    /// Debug builds panic if the coordinate is out of bounds; release builds
    /// produce an unspecified offset. Callers gate out-of-bounds coordinates
    /// with predicate masks before ever indexing.
    pub fn offset(&self, coord: Coord4d) -> usize {
        debug_assert!(
            coord.in_bounds(self.extent),
            "coordinate {:?} out of bounds for extent {:?}",
            coord,
            self.extent
        );
        let (n, c, h, w) = (
            coord.n as usize,
            coord.c as usize,
            coord.h as usize,
            coord.w as usize,
        );
        let group = c / self.interleave;
        let lane = c % self.interleave;
        n * self.batch_stride() + group * self.group_stride() + h * self.row_stride()
            + w * self.pixel_stride()
            + lane
    }

    /// Intra-group offset of a channel: its lane within the packed group.
    pub fn intra_group(&self, c: usize) -> usize {
        c % self.interleave
    }
}

/// Filter tensor layout: the KCRSx family.
///
/// Input channels are interleaved with the same quantity as the matching
/// activation layout so one vectorized access pairs a source group with the
/// corresponding filter group. `interleave == 1` is planar KCRS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterLayout {
    extent: [usize; 4],
    interleave: usize,
}

impl FilterLayout {
    /// Planar KCRS layout.
    pub fn kcrs(k: usize, c: usize, r: usize, s: usize) -> Self {
        FilterLayout {
            extent: [k, c, r, s],
            interleave: 1,
        }
    }

    /// Input-channel-interleaved KCRSx layout.
    ///
    /// # Errors
    /// Returns an error if `interleave` is not one of 1/4/32/64 or does not
    /// divide the input channel extent.
    pub fn kcrsx(k: usize, c: usize, r: usize, s: usize, interleave: usize) -> Result<Self> {
        if !SUPPORTED_INTERLEAVE.contains(&interleave) {
            return Err(LayoutError::UnsupportedInterleave(interleave));
        }
        if c % interleave != 0 {
            return Err(LayoutError::InterleaveMismatch {
                channels: c,
                interleave,
            });
        }
        Ok(FilterLayout {
            extent: [k, c, r, s],
            interleave,
        })
    }

    /// Logical extent as [K, C, R, S].
    pub fn extent(&self) -> [usize; 4] {
        self.extent
    }

    pub fn interleave(&self) -> usize {
        self.interleave
    }

    pub fn channel_groups(&self) -> usize {
        self.extent[1] / self.interleave
    }

    pub fn required_len(&self) -> usize {
        self.extent.iter().product()
    }

    /// Maps (output channel, input channel, filter row, filter col) to a
    /// linear element offset.
    ///
    /// # Panics
    /// Debug builds panic if any component is out of bounds.
    pub fn offset(&self, k: usize, c: usize, r: usize, s: usize) -> usize {
        debug_assert!(
            k < self.extent[0] && c < self.extent[1] && r < self.extent[2] && s < self.extent[3],
            "filter coordinate ({}, {}, {}, {}) out of bounds for extent {:?}",
            k,
            c,
            r,
            s,
            self.extent
        );
        let group = c / self.interleave;
        let lane = c % self.interleave;
        (((k * self.channel_groups() + group) * self.extent[2] + r) * self.extent[3] + s)
            * self.interleave
            + lane
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nchw_offsets_are_planar() {
        let layout = Layout::nchw(2, 3, 4, 5);
        // Row-major over (n, c, h, w).
        let mut expected = 0usize;
        for n in 0..2 {
            for c in 0..3 {
                for h in 0..4 {
                    for w in 0..5 {
                        assert_eq!(layout.offset(Coord4d::new(n, c, h, w)), expected);
                        expected += 1;
                    }
                }
            }
        }
        assert_eq!(layout.required_len(), 120);
    }

    #[test]
    fn test_interleaved_packing() {
        let layout = Layout::ncxhwx(1, 8, 2, 2, 4).unwrap();
        // Lanes of one group are adjacent at a spatial position.
        let base = layout.offset(Coord4d::new(0, 0, 1, 1));
        for lane in 1..4 {
            assert_eq!(layout.offset(Coord4d::new(0, lane, 1, 1)), base + lane as usize);
        }
        // Second group starts one image plane later.
        assert_eq!(
            layout.offset(Coord4d::new(0, 4, 0, 0)),
            layout.group_stride()
        );
        assert_eq!(layout.channel_groups(), 2);
        assert_eq!(layout.intra_group(6), 2);
    }

    #[test]
    fn test_interleave_validation() {
        assert!(matches!(
            Layout::ncxhwx(1, 8, 2, 2, 3),
            Err(LayoutError::UnsupportedInterleave(3))
        ));
        assert!(matches!(
            Layout::ncxhwx(1, 6, 2, 2, 4),
            Err(LayoutError::InterleaveMismatch { .. })
        ));
    }

    #[test]
    fn test_offsets_are_unique_and_dense() {
        let layout = Layout::ncxhwx(2, 8, 3, 3, 4).unwrap();
        let mut seen = vec![false; layout.required_len()];
        for n in 0..2 {
            for c in 0..8 {
                for h in 0..3 {
                    for w in 0..3 {
                        let off = layout.offset(Coord4d::new(n, c, h, w));
                        assert!(!seen[off], "offset {} visited twice", off);
                        seen[off] = true;
                    }
                }
            }
        }
        assert!(seen.iter().all(|&v| v));
    }

    #[test]
    fn test_filter_kcrs_planar() {
        let layout = FilterLayout::kcrs(2, 3, 3, 3);
        assert_eq!(layout.offset(0, 0, 0, 0), 0);
        assert_eq!(layout.offset(0, 0, 0, 1), 1);
        assert_eq!(layout.offset(0, 0, 1, 0), 3);
        assert_eq!(layout.offset(0, 1, 0, 0), 9);
        assert_eq!(layout.offset(1, 0, 0, 0), 27);
        assert_eq!(layout.required_len(), 54);
    }

    #[test]
    fn test_filter_interleaved_lanes_adjacent() {
        let layout = FilterLayout::kcrsx(2, 8, 3, 3, 4).unwrap();
        let base = layout.offset(0, 0, 1, 2);
        for lane in 1..4 {
            assert_eq!(layout.offset(0, lane, 1, 2), base + lane);
        }
    }
}
