//! `me-tensor` - Tensor library and traceable op seam for mlir-export.
//!
//! This crate provides:
//! - A `Tensor` type backed by shared CPU storage
//! - A `ComputeBackend` trait and the reference `CpuBackend`
//! - The `Ops` trait models are written against, and the `Module` trait
//!   for single-output callables
//! - `Eager`, the `Ops` implementation that computes immediately
//! - Shape utilities, broadcasting and data type definitions

pub mod backend;
pub mod cpu;
pub mod dtype;
pub mod eager;
pub mod error;
pub mod ops;
pub mod shape;
pub mod storage;
pub mod tensor;

// Re-export primary types at the crate root for convenience.
pub use backend::ComputeBackend;
pub use cpu::CpuBackend;
pub use dtype::DType;
pub use eager::Eager;
pub use error::{Result, TensorError};
pub use ops::{Module, Ops, TensorLike};
pub use shape::Shape;
pub use storage::CpuStorage;
pub use tensor::Tensor;
