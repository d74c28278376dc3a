use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("channel extent {channels} is not a multiple of interleave {interleave}")]
    InterleaveMismatch { channels: usize, interleave: usize },
    #[error("unsupported interleave quantity {0} (expected 1, 4, 32 or 64)")]
    UnsupportedInterleave(usize),
    #[error("storage holds {len} elements but layout requires {required}")]
    StorageTooSmall { len: usize, required: usize },
}

pub type Result<T> = std::result::Result<T, LayoutError>;
