//! Transposes a sparse matrix file under a bounded memory budget.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use config::MatrixConfig;
use tracing::info;

/// Transpose a sparse matrix file.
#[derive(Parser, Debug)]
#[command(name = "matrix-transpose")]
#[command(about = "Transpose a sparse matrix file out of core")]
struct Args {
    /// Sparse matrix file to read.
    input: PathBuf,

    /// Where to write the transposed matrix.
    output: PathBuf,

    /// Memory budget per batch in MiB (default: derived from physical memory
    /// or MATRIX_BUFFER_MB).
    #[arg(value_parser = clap::value_parser!(u32).range(1..))]
    buffer_mb: Option<u32>,

    /// Log at debug level.
    #[arg(short, long)]
    verbose: bool,
}

fn run(args: &Args) -> Result<()> {
    let mut config = MatrixConfig::from_env();
    if let Some(mb) = args.buffer_mb {
        config = config.with_transpose_buffer_mb(mb as usize);
    }
    let stats = engine::transpose_with(&args.input, &args.output, &config)?;
    info!(
        rows = stats.rows,
        entries = stats.entries,
        batches = stats.batches,
        output = %args.output.display(),
        "done"
    );
    Ok(())
}

fn main() {
    let args = Args::parse();
    cli::init_tracing(args.verbose);
    if let Err(e) = run(&args) {
        cli::exit_with_error(e);
    }
}
