use crate::error::{ConvError, Result};

/// Selects whether filter taps are read forward (cross-correlation, the
/// common "convolution" of inference frameworks) or spatially flipped
/// (mathematical convolution).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvMode {
    CrossCorrelation,
    Convolution,
}

/// Immutable descriptor of one 2-D convolution problem.
///
/// Input is (N, C, H, W), filter (K, C, R, S), output (N, K, P, Q). The
/// output extents P and Q are derived at construction and the descriptor is
/// read-only thereafter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conv2dProblemSize {
    pub n: usize,
    pub c: usize,
    pub h: usize,
    pub w: usize,
    pub k: usize,
    pub r: usize,
    pub s: usize,
    pub p: usize,
    pub q: usize,
    pub pad_h: usize,
    pub pad_w: usize,
    pub stride_h: usize,
    pub stride_w: usize,
    pub dilation_h: usize,
    pub dilation_w: usize,
    pub mode: ConvMode,
}

impl Conv2dProblemSize {
    /// Construct a problem descriptor, deriving the output extents:
    ///
    /// P = floor((H + 2*pad_h - dilation_h*(R-1) - 1) / stride_h) + 1
    ///
    /// and symmetrically for Q.
    ///
    /// # Errors
    /// Returns an error if any extent, stride or dilation is zero, or if the
    /// derived output extent would be empty.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        n: usize,
        c: usize,
        h: usize,
        w: usize,
        k: usize,
        r: usize,
        s: usize,
        pad_h: usize,
        pad_w: usize,
        stride_h: usize,
        stride_w: usize,
        dilation_h: usize,
        dilation_w: usize,
        mode: ConvMode,
    ) -> Result<Self> {
        for (name, value) in [
            ("N", n),
            ("C", c),
            ("H", h),
            ("W", w),
            ("K", k),
            ("R", r),
            ("S", s),
            ("stride_h", stride_h),
            ("stride_w", stride_w),
            ("dilation_h", dilation_h),
            ("dilation_w", dilation_w),
        ] {
            if value == 0 {
                return Err(ConvError::InvalidProblem(format!("{} must be >= 1", name)));
            }
        }

        let span_h = dilation_h * (r - 1) + 1;
        let span_w = dilation_w * (s - 1) + 1;
        if h + 2 * pad_h < span_h || w + 2 * pad_w < span_w {
            return Err(ConvError::InvalidProblem(format!(
                "filter span ({}, {}) exceeds padded input ({}, {})",
                span_h,
                span_w,
                h + 2 * pad_h,
                w + 2 * pad_w
            )));
        }
        let p = (h + 2 * pad_h - span_h) / stride_h + 1;
        let q = (w + 2 * pad_w - span_w) / stride_w + 1;

        Ok(Conv2dProblemSize {
            n,
            c,
            h,
            w,
            k,
            r,
            s,
            p,
            q,
            pad_h,
            pad_w,
            stride_h,
            stride_w,
            dilation_h,
            dilation_w,
            mode,
        })
    }

    /// Shorthand for the common unit-stride, unit-dilation case.
    pub fn simple(
        n: usize,
        c: usize,
        h: usize,
        w: usize,
        k: usize,
        r: usize,
        s: usize,
        pad: usize,
        stride: usize,
        mode: ConvMode,
    ) -> Result<Self> {
        Self::new(n, c, h, w, k, r, s, pad, pad, stride, stride, 1, 1, mode)
    }

    /// Number of filter taps per channel.
    pub fn filter_pixels(&self) -> usize {
        self.r * self.s
    }

    /// Number of output pixels across the batch (the forward GEMM column
    /// extent).
    pub fn output_pixels(&self) -> usize {
        self.n * self.p * self.q
    }

    /// Number of input pixels across the batch (the Dgrad GEMM column
    /// extent).
    pub fn input_pixels(&self) -> usize {
        self.n * self.h * self.w
    }

    /// The filter tap actually multiplied when the traversal visits source
    /// tap (fh, fw): identity for cross-correlation, spatially flipped for
    /// convolution.
    pub fn filter_tap(&self, fh: usize, fw: usize) -> (usize, usize) {
        match self.mode {
            ConvMode::CrossCorrelation => (fh, fw),
            ConvMode::Convolution => (self.r - 1 - fh, self.s - 1 - fw),
        }
    }
}
