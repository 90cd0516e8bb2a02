use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use me_compiler::{compile, OutputType};
use me_model::{MaskedLmWrapper, ModelProvider};

use crate::config::ExportConfig;
use crate::error::{ExportError, Result};
use crate::input::random_token_ids;

/// The line printed once the module is on disk, naming the dialect that
/// was written.
pub fn confirmation_line(path: &Path, output_type: OutputType) -> String {
    let ir = match output_type {
        OutputType::Mhlo => "MHLO IR",
        OutputType::Tosa => "TOSA IR",
        OutputType::Raw => "Raw graph IR",
    };
    format!(
        "{} of tiny bert successfully written into {}",
        ir,
        path.display()
    )
}

/// Load, trace, lower and write the model described by `config`.
///
/// Returns the path written. The output file is only created once the
/// module compiled, so a failed run leaves no file behind.
pub fn run(config: &ExportConfig) -> Result<PathBuf> {
    let provider = config
        .search_roots
        .iter()
        .fold(ModelProvider::new(), |p, root| p.with_search_root(root.clone()));

    let mut wrapper = MaskedLmWrapper::new(&provider, &config.model_id)?;
    wrapper.eval();
    tracing::info!(
        "loaded '{}' ({} parameters, vocab {})",
        config.model_id,
        wrapper.model().weights.num_parameters(),
        wrapper.vocab_size()
    );

    let input = random_token_ids(config.batch, config.seq_len, wrapper.vocab_size())?;
    let module = compile(&wrapper, &input, config.output_type, config.tracing_mode)?;

    write_text(&config.output_path, module.to_text())?;
    tracing::info!("wrote {}", config.output_path.display());
    Ok(config.output_path.clone())
}

/// Truncate `path` and write `text` to it as UTF-8.
fn write_text(path: &Path, text: &str) -> Result<()> {
    let io_err = |source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::create(path).map_err(io_err)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(text.as_bytes()).map_err(io_err)?;
    writer.flush().map_err(io_err)
}
