//! # CLI - Matrix Command Line Tools
//!
//! Two binaries wrap the [`engine`] crate:
//!
//! ```text
//! matrix-sort <input> <output>                    rows in ascending id order
//! matrix-transpose <input> <output> [buffer_mb]   out-of-core transpose
//! ```
//!
//! Both log to stderr through `tracing-subscriber`. The level defaults to
//! `info` and is overridden by `RUST_LOG`; `-v` raises it to `debug`.
//! Matrix settings come from the `MATRIX_*` variables read by
//! [`config::MatrixConfig::from_env`].
//!
//! ## Exit Codes
//!
//! ```text
//! 0   success
//! 1   runtime error (the full error chain is printed to stderr)
//! 2   usage error (reported by clap)
//! ```

use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global stderr subscriber.
///
/// With `verbose` unset the filter comes from `RUST_LOG`, falling back to
/// `info`; with `verbose` set it is `debug`.
pub fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Prints `err` with its causes and exits with status 1.
pub fn exit_with_error(err: anyhow::Error) -> ! {
    eprintln!("error: {err:#}");
    std::process::exit(1);
}
