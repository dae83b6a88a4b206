//! Memory-mapped access to row records.
//!
//! The body of a matrix file is covered by read-only windows, each mapped
//! separately. Windows are laid out in disk order and grow one whole row at
//! a time while they stay within the configured page size, so every row
//! lies entirely inside exactly one window:
//!
//! ```text
//! file:    [header | row a | row b | row c | row d | row e ]
//! windows:          [ window 0      ][ window 1            ]
//! ```
//!
//! A row longer than the page size gets a window of its own.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use memmap2::{Mmap, MmapOptions};
use tracing::{debug, warn};

use crate::error::{MatrixError, Result};

/// Byte range `[start, end)` of one mapped window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSpan {
    pub start: u64,
    pub end: u64,
}

impl WindowSpan {
    #[must_use]
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

struct Window {
    span: WindowSpan,
    map: Mmap,
}

/// Row id → row bytes over a set of mapped windows.
///
/// Lookups take `&self` and never block each other; the only shared mutable
/// state is the cached disk-order id list.
pub struct PagedRows {
    path: PathBuf,
    /// Held for the lifetime of the maps.
    _file: File,
    row_ids: Vec<i32>,
    offsets: Vec<u64>,
    windows: Vec<Window>,
    disk_order: Mutex<Option<Arc<[i32]>>>,
}

impl PagedRows {
    /// Maps the rows of `file`.
    ///
    /// `row_ids` must be strictly increasing and `offsets[i]` is the absolute
    /// position of row `row_ids[i]`. Every offset must lie in
    /// `[data_start, file_len)`.
    ///
    /// # Errors
    ///
    /// [`MatrixError::Format`] for misordered ids or out-of-range offsets,
    /// [`MatrixError::Io`] if mapping fails.
    pub fn new(
        file: File,
        path: &Path,
        row_ids: Vec<i32>,
        offsets: Vec<u64>,
        data_start: u64,
        page_size: usize,
    ) -> Result<Self> {
        if row_ids.len() != offsets.len() {
            return Err(MatrixError::Format(format!(
                "{} row ids but {} offsets",
                row_ids.len(),
                offsets.len()
            )));
        }
        if row_ids.windows(2).any(|w| w[0] >= w[1]) {
            return Err(MatrixError::format("invalid ordering of row ids"));
        }
        let file_len = file.metadata()?.len();
        if let Some(bad) = offsets
            .iter()
            .find(|&&o| o < data_start || o >= file_len)
        {
            return Err(MatrixError::Format(format!(
                "row offset {bad} outside body [{data_start}, {file_len})"
            )));
        }

        let mut starts = offsets.clone();
        starts.sort_unstable();
        starts.dedup();
        let spans = plan_windows(&starts, file_len, page_size.max(1) as u64);

        let mut windows = Vec::with_capacity(spans.len());
        for span in spans {
            if span.len() > page_size as u64 {
                warn!(
                    path = %path.display(),
                    start = span.start,
                    len = span.len(),
                    page_size,
                    "row larger than page size, mapping it alone"
                );
            }
            let len = usize::try_from(span.len()).map_err(|_| {
                MatrixError::Format(format!("window of {} bytes cannot be mapped", span.len()))
            })?;
            // SAFETY: matrix files are written once and renamed into place;
            // nothing modifies them while they are open for reading.
            let map = unsafe { MmapOptions::new().offset(span.start).len(len).map(&file)? };
            windows.push(Window { span, map });
        }

        debug!(
            path = %path.display(),
            rows = row_ids.len(),
            windows = windows.len(),
            page_size,
            "mapped matrix body"
        );

        Ok(Self {
            path: path.to_path_buf(),
            _file: file,
            row_ids,
            offsets,
            windows,
            disk_order: Mutex::new(None),
        })
    }

    /// Bytes from the start of row `row_id` to the end of its window, or
    /// `None` if the id is not in the index.
    #[must_use]
    pub fn get_row(&self, row_id: i32) -> Option<&[u8]> {
        let idx = self.row_ids.binary_search(&row_id).ok()?;
        let offset = self.offsets[idx];
        let w = self.window_for(offset)?;
        let rel = usize::try_from(offset - w.span.start).ok()?;
        w.map.get(rel..)
    }

    fn window_for(&self, offset: u64) -> Option<&Window> {
        let pos = self.windows.partition_point(|w| w.span.start <= offset);
        let w = self.windows.get(pos.checked_sub(1)?)?;
        (offset < w.span.end).then_some(w)
    }

    /// Row ids in ascending order.
    #[must_use]
    pub fn row_ids(&self) -> &[i32] {
        &self.row_ids
    }

    /// Absolute offsets, parallel to [`row_ids`](PagedRows::row_ids).
    #[must_use]
    pub fn offsets(&self) -> &[u64] {
        &self.offsets
    }

    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.row_ids.len()
    }

    #[must_use]
    pub fn contains(&self, row_id: i32) -> bool {
        self.row_ids.binary_search(&row_id).is_ok()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Row ids ordered by file position, computed once and cached.
    pub fn row_ids_in_disk_order(&self) -> Arc<[i32]> {
        let mut cache = self
            .disk_order
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(ids) = cache.as_ref() {
            return Arc::clone(ids);
        }
        let mut pairs: Vec<(u64, i32)> = self
            .offsets
            .iter()
            .copied()
            .zip(self.row_ids.iter().copied())
            .collect();
        pairs.sort_unstable();
        let ids: Arc<[i32]> = pairs.into_iter().map(|(_, id)| id).collect();
        *cache = Some(Arc::clone(&ids));
        ids
    }

    /// Drops the cached disk-order ids; the next call recomputes them.
    pub fn invalidate_disk_order(&self) {
        let mut cache = self
            .disk_order
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *cache = None;
    }

    /// Layout of the mapped windows, in file order.
    #[must_use]
    pub fn windows(&self) -> Vec<WindowSpan> {
        self.windows.iter().map(|w| w.span).collect()
    }

    /// Unmaps every window and closes the file.
    pub fn close(self) {
        debug!(path = %self.path.display(), "closing matrix body");
    }
}

/// Groups sorted, distinct row starts into windows of at most `page_size`
/// bytes. Each row extends to the next row's start, the last to `file_len`.
fn plan_windows(starts: &[u64], file_len: u64, page_size: u64) -> Vec<WindowSpan> {
    let mut spans = Vec::new();
    let mut i = 0;
    while i < starts.len() {
        let start = starts[i];
        let mut end = row_end(starts, i, file_len);
        let mut j = i + 1;
        while j < starts.len() {
            let next_end = row_end(starts, j, file_len);
            if next_end - start > page_size {
                break;
            }
            end = next_end;
            j += 1;
        }
        spans.push(WindowSpan { start, end });
        i = j;
    }
    spans
}

fn row_end(starts: &[u64], i: usize, file_len: u64) -> u64 {
    starts.get(i + 1).copied().unwrap_or(file_len)
}
