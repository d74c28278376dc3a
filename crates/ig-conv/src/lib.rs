//! `ig-conv` - Implicit-GEMM 2-D convolution engine.
//!
//! Convolution is evaluated as a blocked matrix multiply without ever
//! materializing the im2col matrix: tile iterators compute source addresses
//! on the fly, with a precomputed per-problem offset table serving the
//! forward pass and predicate bitmasks replacing per-element bounds checks.
//! Three passes share one multiply-accumulate mainloop:
//!
//! - forward (`fprop`): output channels x output pixels
//! - input gradient (`dgrad`): input channels x input pixels
//! - weight gradient (`wgrad`): output channels x filter elements
//!
//! A fused epilogue applies `alpha * acc + beta * bias + gamma * residual`,
//! an optional activation, and the rounding/saturating conversion into the
//! output element type. Output tiles are independent and are processed in
//! parallel over the rayon pool.

pub mod convolution;
pub mod epilogue;
pub mod error;
pub mod fragment;
pub mod iterator;
pub mod mma;
pub mod numeric;
pub mod offsets;
pub mod parallel;
pub mod problem;
pub mod tile;
pub mod tile_map;

pub use convolution::Convolution;
pub use epilogue::{Activation, Epilogue, EpilogueParams};
pub use error::{ConvError, Result};
pub use numeric::{Accumulator, OutputElement, Promote};
pub use problem::{Conv2dProblemSize, ConvMode};
pub use tile::{KernelConfig, PipelineStages, TileShape, MAX_FILTER_EXTENT, MAX_FILTER_PIXELS};
pub use tile_map::{ColumnOrder, TileMap};
