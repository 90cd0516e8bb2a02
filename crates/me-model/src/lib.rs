//! `me-model` - Pretrained masked language models for mlir-export.
//!
//! This crate provides:
//! - `ModelProvider`, which resolves model identifiers to local checkpoints
//! - `BertForMaskedLM`, loaded from `config.json` + `model.safetensors`
//! - `MaskedLmWrapper`, the single-output adapter a compiler can trace
//! - Synthetic checkpoints for offline use

pub mod architecture;
pub mod bert;
pub mod checkpoint;
pub mod error;
pub mod output;
pub mod provider;
pub mod synthetic;
pub mod wrapper;

pub use architecture::ModelArchitecture;
pub use bert::{BertConfig, BertForMaskedLM};
pub use error::{ModelError, Result};
pub use output::{MaskedLmRecord, Mode, ModelOutput, OutputConvention};
pub use provider::ModelProvider;
pub use wrapper::MaskedLmWrapper;
