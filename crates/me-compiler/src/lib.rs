//! `me-compiler` - Compiler bridge from traceable modules to MLIR text.
//!
//! A [`me_tensor::Module`] is run once through [`Tracer`], which records a
//! [`Graph`] instead of computing. The graph is then decomposed into
//! primitives and lowered to the MHLO or TOSA dialect:
//!
//! ```text
//! trace -> prune -> decompose -> lower::{mhlo,tosa} -> text
//! ```

pub mod compile;
pub mod decompose;
pub mod error;
pub mod graph;
pub mod lower;
pub mod mlir;
pub mod module;
pub mod tracer;

pub use compile::{compile, trace};
pub use error::{CompileError, Result};
pub use graph::{Graph, Node, NodeId, Op, ReduceKind};
pub use module::{IrModule, OutputType, TracingMode};
pub use tracer::{Traced, Tracer};
