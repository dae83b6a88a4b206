//! Rewrites a sparse or dense matrix file with its rows in ascending id order.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Sort the rows of a matrix file by id.
#[derive(Parser, Debug)]
#[command(name = "matrix-sort")]
#[command(about = "Rewrite a matrix file with rows in ascending id order")]
struct Args {
    /// Matrix file to read.
    input: PathBuf,

    /// Where to write the sorted matrix.
    output: PathBuf,

    /// Log at debug level.
    #[arg(short, long)]
    verbose: bool,
}

fn run(args: &Args) -> Result<()> {
    let kind = engine::sort_matrix(&args.input, &args.output)?;
    info!(kind = %kind, output = %args.output.display(), "done");
    Ok(())
}

fn main() {
    let args = Args::parse();
    cli::init_tracing(args.verbose);
    if let Err(e) = run(&args) {
        cli::exit_with_error(e);
    }
}
