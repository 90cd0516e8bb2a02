use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("model load failed: {0}")]
    Model(#[from] me_model::ModelError),
    #[error("compilation failed: {0}")]
    Compile(#[from] me_compiler::CompileError),
    #[error("cannot write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("tensor error: {0}")]
    Tensor(#[from] me_tensor::TensorError),
}

pub type Result<T> = std::result::Result<T, ExportError>;
