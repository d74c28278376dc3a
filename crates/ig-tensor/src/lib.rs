//! `ig-tensor` - Tensor views and layouts for the implicit-gemm workspace.
//!
//! This crate provides:
//! - `DType` tags and the `Element` trait binding Rust scalar types to them
//! - The NCxHWx activation layout family (planar NCHW plus channel
//!   interleaving by 4/32/64) and the matching KCRSx filter layouts
//! - Non-owning `TensorRef` / `TensorRefMut` views over caller-owned storage
//! - An owning `Tensor` used by hosts and tests

pub mod coord;
pub mod dtype;
pub mod error;
pub mod layout;
pub mod tensor;

// Re-export primary types at the crate root for convenience.
pub use coord::Coord4d;
pub use dtype::{DType, Element};
pub use error::{LayoutError, Result};
pub use layout::{FilterLayout, Layout};
pub use tensor::{FilterRef, FilterRefMut, FilterTensor, Tensor, TensorRef, TensorRefMut};
