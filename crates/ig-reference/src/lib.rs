//! `ig-reference` - Naive convolution oracles for testing the engine.
//!
//! Straightforward loop nests over the problem extents, sharing the engine's
//! numeric traits and epilogue. The reduction runs in the engine's canonical
//! order (channel group ascending, then filter row, filter col, lane within
//! group), so floating-point results compare bitwise equal against the tiled
//! engine, not just approximately.

pub mod dgrad;
pub mod fprop;
pub mod wgrad;

pub use dgrad::dgrad;
pub use fprop::fprop;
pub use wgrad::wgrad;
