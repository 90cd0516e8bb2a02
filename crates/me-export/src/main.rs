//! # bert-export
//!
//! Exports `prajjwal1/bert-tiny` to MHLO text.
//!
//! ## Usage
//! ```bash
//! # The fixed export: 2x128 ids, MHLO, ./bert_tiny_mhlo.mlir
//! bert-export
//!
//! # TOSA from a local checkpoint directory
//! bert-export --search-root ./models --output-type tosa --output bert.tosa.mlir
//! ```

use std::path::PathBuf;

use clap::Parser;
use me_compiler::{OutputType, TracingMode};
use me_export::{confirmation_line, run, ExportConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "bert-export",
    about = "Trace a masked language model and write it out as MLIR",
    version
)]
struct Cli {
    /// Model identifier or checkpoint directory.
    #[arg(short, long)]
    model: Option<String>,

    #[arg(long)]
    batch: Option<usize>,

    #[arg(long)]
    seq_len: Option<usize>,

    /// Target dialect: mhlo, tosa or raw.
    #[arg(long)]
    output_type: Option<OutputType>,

    /// trace or script.
    #[arg(long)]
    tracing_mode: Option<TracingMode>,

    /// Output file.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Directory searched for `<dir>/<model>` (repeatable).
    #[arg(long = "search-root")]
    search_roots: Vec<PathBuf>,

    /// Enable verbose logging (repeat for more: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn into_config(self) -> ExportConfig {
        let defaults = ExportConfig::default();
        ExportConfig {
            model_id: self.model.unwrap_or(defaults.model_id),
            batch: self.batch.unwrap_or(defaults.batch),
            seq_len: self.seq_len.unwrap_or(defaults.seq_len),
            output_type: self.output_type.unwrap_or(defaults.output_type),
            tracing_mode: self.tracing_mode.unwrap_or(defaults.tracing_mode),
            output_path: self.output.unwrap_or(defaults.output_path),
            search_roots: self.search_roots,
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(level))
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = cli.into_config();
    let path = run(&config)?;
    println!("{}", confirmation_line(&path, config.output_type));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_arguments_is_the_default_export() {
        let cli = Cli::parse_from(["bert-export"]);
        assert_eq!(cli.into_config(), ExportConfig::default());
    }

    #[test]
    fn test_overrides() {
        let cli = Cli::parse_from([
            "bert-export",
            "--model",
            "local/bert",
            "--seq-len",
            "16",
            "--output-type",
            "TOSA",
            "--search-root",
            "/a",
            "--search-root",
            "/b",
            "-vv",
        ]);
        assert_eq!(cli.verbose, 2);
        let config = cli.into_config();
        assert_eq!(config.model_id, "local/bert");
        assert_eq!((config.batch, config.seq_len), (2, 16));
        assert_eq!(config.output_type, OutputType::Tosa);
        assert_eq!(config.search_roots, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
    }

    #[test]
    fn test_bad_output_type_is_rejected() {
        assert!(Cli::try_parse_from(["bert-export", "--output-type", "linalg"]).is_err());
    }
}
