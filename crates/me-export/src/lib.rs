//! `me-export` - Writes a pretrained masked language model out as MLIR.
//!
//! [`run`] loads the model named by an [`ExportConfig`], wraps it so that
//! it returns logits only, traces it on a random batch of token ids and
//! writes the lowered module to disk.

pub mod config;
pub mod error;
pub mod input;
pub mod run;

pub use config::ExportConfig;
pub use error::{ExportError, Result};
pub use input::random_token_ids;
pub use run::{confirmation_line, run};
