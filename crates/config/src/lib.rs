//! # Config - Matrix Engine Settings
//!
//! Runtime knobs shared by the matrix reader, the transposer and the command
//! line tools. Every value has a compiled-in default and can be overridden
//! through the environment:
//!
//! ```text
//! MATRIX_PAGE_MB     Max size of one memory-mapped window  (default: 1024 = 1 GiB)
//! MATRIX_HEADER_MB   Initial header mapping size           (default: 100)
//! MATRIX_BUFFER_MB   Transpose memory budget               (default: derived from RAM)
//! ```
//!
//! Unparseable or zero values fall back to the default rather than failing,
//! matching how the command line tools treat their environment.

use tracing::debug;

/// Bytes in one mebibyte.
pub const MB: usize = 1024 * 1024;

/// Default upper bound on the length of a single mapped window (1 GiB).
pub const DEFAULT_PAGE_SIZE: usize = 1024 * MB;

/// Default size of the initial header mapping (100 MiB). Larger headers are
/// remapped at their computed size.
pub const DEFAULT_HEADER_WINDOW: usize = 100 * MB;

/// Lower clamp for the derived transpose budget, in MiB.
pub const MIN_BUFFER_MB: usize = 350;

/// Upper clamp for the derived transpose budget, in MiB.
pub const MAX_BUFFER_MB: usize = 5000;

/// Below this much physical memory (MiB) the budget is a flat third of it.
pub const SMALL_MEMORY_MB: usize = 1000;

/// Assumed physical memory when `/proc/meminfo` cannot be read.
pub const FALLBACK_TOTAL_MEMORY_MB: usize = 4096;

/// Settings consumed by the matrix engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixConfig {
    /// Max length in bytes of one memory-mapped window over a matrix body.
    pub page_size: usize,
    /// Size in bytes of the first header mapping made by `open`.
    pub header_window: usize,
    /// Memory budget for one transpose batch, in MiB.
    pub transpose_buffer_mb: usize,
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            header_window: DEFAULT_HEADER_WINDOW,
            transpose_buffer_mb: default_transpose_buffer_mb(),
        }
    }
}

impl MatrixConfig {
    /// Loads the configuration from `MATRIX_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the configuration through an arbitrary key lookup.
    ///
    /// Missing, unparseable and zero values keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(mb) = parse_positive(&lookup, "MATRIX_PAGE_MB") {
            config.page_size = mb.saturating_mul(MB);
        }
        if let Some(mb) = parse_positive(&lookup, "MATRIX_HEADER_MB") {
            config.header_window = mb.saturating_mul(MB);
        }
        if let Some(mb) = parse_positive(&lookup, "MATRIX_BUFFER_MB") {
            config.transpose_buffer_mb = mb;
        }
        debug!(?config, "loaded matrix configuration");
        config
    }

    /// Returns a copy with a different window size limit.
    #[must_use]
    pub fn with_page_size(mut self, bytes: usize) -> Self {
        self.page_size = bytes.max(1);
        self
    }

    /// Returns a copy with a different initial header mapping size.
    #[must_use]
    pub fn with_header_window(mut self, bytes: usize) -> Self {
        self.header_window = bytes.max(1);
        self
    }

    /// Returns a copy with a different transpose budget.
    #[must_use]
    pub fn with_transpose_buffer_mb(mut self, mb: usize) -> Self {
        self.transpose_buffer_mb = mb.max(1);
        self
    }
}

fn parse_positive<F>(lookup: &F, key: &str) -> Option<usize>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|v| *v > 0)
}

/// Transpose budget in MiB for a machine with `total_mb` of memory.
///
/// A third of memory on small machines, otherwise a sixth clamped to
/// `[MIN_BUFFER_MB, MAX_BUFFER_MB]`.
pub fn buffer_mb_for_total(total_mb: usize) -> usize {
    if total_mb < SMALL_MEMORY_MB {
        (total_mb / 3).max(1)
    } else {
        (total_mb / 6).clamp(MIN_BUFFER_MB, MAX_BUFFER_MB)
    }
}

/// Transpose budget derived from this machine's physical memory.
pub fn default_transpose_buffer_mb() -> usize {
    buffer_mb_for_total(total_memory_mb())
}

/// Physical memory in MiB, or [`FALLBACK_TOTAL_MEMORY_MB`] if unknown.
pub fn total_memory_mb() -> usize {
    std::fs::read_to_string("/proc/meminfo")
        .ok()
        .and_then(|text| parse_meminfo_total_mb(&text))
        .unwrap_or(FALLBACK_TOTAL_MEMORY_MB)
}

/// Extracts `MemTotal` (reported in kB) from `/proc/meminfo` text, in MiB.
pub fn parse_meminfo_total_mb(text: &str) -> Option<usize> {
    let line = text.lines().find(|l| l.starts_with("MemTotal:"))?;
    let kb: usize = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb / 1024)
}
