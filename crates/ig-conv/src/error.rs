use thiserror::Error;

/// Errors reported before any tile processing begins.
///
/// Boundary conditions during normal operation (padding, out-of-range taps)
/// are handled by predicate masks and are never surfaced here.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConvError {
    #[error("invalid problem: {0}")]
    InvalidProblem(String),
    #[error("access width {access} does not divide the per-step element count {elements}")]
    AccessWidthMismatch { access: usize, elements: usize },
    #[error("filter {r}x{s} exceeds the precomputed table bound of {max} filter pixels")]
    FilterTooLarge { r: usize, s: usize, max: usize },
    #[error("filter extent {r}x{s} exceeds the {max}-bit predicate mask width")]
    FilterExtentTooLarge { r: usize, s: usize, max: usize },
    #[error("reduction tile of {steps} steps exceeds the table step cap {max}")]
    TableCapacity { steps: usize, max: usize },
    #[error("source interleave {src} does not match filter interleave {filter}")]
    InterleaveMismatch { src: usize, filter: usize },
    #[error("tensor extent {got:?} does not match problem extent {expected:?}")]
    ExtentMismatch {
        expected: [usize; 4],
        got: [usize; 4],
    },
    #[error("bias length {got} does not match channel extent {expected}")]
    BiasLength { expected: usize, got: usize },
    #[error(transparent)]
    Layout(#[from] ig_tensor::LayoutError),
}

pub type Result<T> = std::result::Result<T, ConvError>;
