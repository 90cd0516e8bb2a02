use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot load model '{identifier}': {reason}")]
    ModelLoad { identifier: String, reason: String },
    #[error("invalid config '{}': {reason}", path.display())]
    InvalidConfig { path: PathBuf, reason: String },
    #[error("safetensors error in '{}': {reason}", path.display())]
    SafeTensors { path: PathBuf, reason: String },
    #[error("tensor not found: {0}")]
    TensorNotFound(String),
    #[error("tensor '{name}' has shape {got:?}, expected {expected:?}")]
    WeightShape {
        name: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    #[error("unsupported checkpoint dtype for '{name}': {dtype}")]
    UnsupportedDType { name: String, dtype: String },
    #[error("unsupported architecture: {0}")]
    UnsupportedArchitecture(String),
    #[error("tensor error: {0}")]
    TensorError(#[from] me_tensor::TensorError),
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ModelError>;
