use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompileError {
    #[error("tracing failed: {0}")]
    Tracing(#[from] me_tensor::TensorError),
    #[error("tracing mode '{0}' is not supported, use 'trace'")]
    UnsupportedTracingMode(String),
    #[error("cannot lower '{op}' to the {dialect} dialect")]
    Lowering { op: String, dialect: String },
    #[error("unknown output type '{0}', expected one of raw, mhlo, tosa")]
    UnknownOutputType(String),
}

pub type Result<T> = std::result::Result<T, CompileError>;
