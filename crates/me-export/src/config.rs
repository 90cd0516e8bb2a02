use std::path::PathBuf;

use me_compiler::{OutputType, TracingMode};

pub const DEFAULT_MODEL: &str = "prajjwal1/bert-tiny";
pub const DEFAULT_OUTPUT: &str = "./bert_tiny_mhlo.mlir";

/// Everything an export run needs.
///
/// `Default` reproduces the fixed export: bert-tiny, a 2x128 batch of
/// token ids, MHLO through tracing, written to `./bert_tiny_mhlo.mlir`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportConfig {
    pub model_id: String,
    pub batch: usize,
    pub seq_len: usize,
    pub output_type: OutputType,
    pub tracing_mode: TracingMode,
    pub output_path: PathBuf,
    /// Local directories searched for `<root>/<model_id>` before the hub
    /// cache.
    pub search_roots: Vec<PathBuf>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        ExportConfig {
            model_id: DEFAULT_MODEL.to_string(),
            batch: 2,
            seq_len: 128,
            output_type: OutputType::Mhlo,
            tracing_mode: TracingMode::Trace,
            output_path: PathBuf::from(DEFAULT_OUTPUT),
            search_roots: Vec::new(),
        }
    }
}
