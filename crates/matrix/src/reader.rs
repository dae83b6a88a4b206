use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use config::MatrixConfig;
use memmap2::MmapOptions;
use tracing::{debug, info};

use crate::bytes::ByteView;
use crate::dense_row::DenseRow;
use crate::error::{MatrixError, Result};
use crate::format::{FixedHeader, Header, MatrixKind};
use crate::paging::{PagedRows, WindowSpan};
use crate::row::MatrixRow;
use crate::sparse_row::{is_increasing, SparseRow};
use crate::ValueConf;

/// Row lookup shared by file-backed and in-memory matrices.
pub trait Matrix {
    type Row<'a>: MatrixRow
    where
        Self: 'a;

    /// The row with id `row_id`, or `None` if the matrix has no such row.
    fn get_row(&self, row_id: i32) -> Result<Option<Self::Row<'_>>>;

    /// Every row id, in the matrix's natural iteration order.
    fn row_ids(&self) -> Arc<[i32]>;

    fn num_rows(&self) -> usize;
}

/// Read-only view of a sparse matrix file.
///
/// Opening parses and copies the header index, then maps the body in
/// windows (see [`PagedRows`]). Rows returned by
/// [`get_row`](SparseMatrix::get_row) borrow from those maps and are valid
/// while the matrix is alive.
pub struct SparseMatrix {
    conf: ValueConf,
    rows: PagedRows,
}

impl SparseMatrix {
    /// Opens `path` with page and header window sizes from the environment.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, &MatrixConfig::from_env())
    }

    /// # Errors
    ///
    /// [`MatrixError::Format`] if the file is not a sparse matrix, the header
    /// is truncated or the index is misordered.
    pub fn open_with<P: AsRef<Path>>(path: P, config: &MatrixConfig) -> Result<Self> {
        let (fixed, _, rows) = open_body(path.as_ref(), MatrixKind::Sparse, config)?;
        Ok(Self {
            conf: fixed.conf,
            rows,
        })
    }

    /// The row with id `row_id`, or `Ok(None)` if it is not in the file.
    pub fn get_row(&self, row_id: i32) -> Result<Option<SparseRow<'_>>> {
        let Some(bytes) = self.rows.get_row(row_id) else {
            return Ok(None);
        };
        let row = SparseRow::from_bytes(self.conf, ByteView::borrowed(bytes))?;
        check_row_id(row_id, row.row_id())?;
        Ok(Some(row))
    }

    /// Iterates rows in disk order. Each call starts from the beginning.
    #[must_use]
    pub fn iter(&self) -> SparseRowIter<'_> {
        SparseRowIter {
            matrix: self,
            ids: self.rows.row_ids_in_disk_order(),
            pos: 0,
        }
    }

    /// Row ids in disk order.
    #[must_use]
    pub fn row_ids(&self) -> Arc<[i32]> {
        self.rows.row_ids_in_disk_order()
    }

    /// Row ids in ascending order.
    #[must_use]
    pub fn sorted_row_ids(&self) -> &[i32] {
        self.rows.row_ids()
    }

    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.rows.num_rows()
    }

    #[must_use]
    pub fn value_conf(&self) -> &ValueConf {
        &self.conf
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.rows.path()
    }

    #[must_use]
    pub fn windows(&self) -> Vec<WindowSpan> {
        self.rows.windows()
    }

    /// Releases the maps and the file handle.
    pub fn close(self) {
        self.rows.close();
    }
}

impl Matrix for SparseMatrix {
    type Row<'a> = SparseRow<'a>;

    fn get_row(&self, row_id: i32) -> Result<Option<SparseRow<'_>>> {
        SparseMatrix::get_row(self, row_id)
    }

    fn row_ids(&self) -> Arc<[i32]> {
        SparseMatrix::row_ids(self)
    }

    fn num_rows(&self) -> usize {
        SparseMatrix::num_rows(self)
    }
}

impl<'a> IntoIterator for &'a SparseMatrix {
    type Item = Result<SparseRow<'a>>;
    type IntoIter = SparseRowIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Disk-order iterator over a [`SparseMatrix`].
pub struct SparseRowIter<'a> {
    matrix: &'a SparseMatrix,
    ids: Arc<[i32]>,
    pos: usize,
}

impl<'a> Iterator for SparseRowIter<'a> {
    type Item = Result<SparseRow<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = *self.ids.get(self.pos)?;
        self.pos += 1;
        Some(self.matrix.get_row(id).and_then(|row| indexed(id, row)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.ids.len() - self.pos;
        (left, Some(left))
    }
}

/// Read-only view of a dense matrix file.
///
/// All rows share one column-id array, read from the header.
pub struct DenseMatrix {
    conf: ValueConf,
    col_ids: Arc<[i32]>,
    rows: PagedRows,
}

impl DenseMatrix {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, &MatrixConfig::from_env())
    }

    /// # Errors
    ///
    /// As [`SparseMatrix::open_with`]; also [`MatrixError::Format`] if the
    /// column ids are not strictly increasing.
    pub fn open_with<P: AsRef<Path>>(path: P, config: &MatrixConfig) -> Result<Self> {
        let (fixed, col_ids, rows) = open_body(path.as_ref(), MatrixKind::Dense, config)?;
        if !is_increasing(col_ids.iter().copied()) {
            return Err(MatrixError::format("dense column ids are not strictly increasing"));
        }
        Ok(Self {
            conf: fixed.conf,
            col_ids: Arc::from(col_ids),
            rows,
        })
    }

    pub fn get_row(&self, row_id: i32) -> Result<Option<DenseRow<'_>>> {
        let Some(bytes) = self.rows.get_row(row_id) else {
            return Ok(None);
        };
        let row = DenseRow::from_bytes(
            self.conf,
            Arc::clone(&self.col_ids),
            ByteView::borrowed(bytes),
        )?;
        check_row_id(row_id, row.row_id())?;
        Ok(Some(row))
    }

    #[must_use]
    pub fn iter(&self) -> DenseRowIter<'_> {
        DenseRowIter {
            matrix: self,
            ids: self.rows.row_ids_in_disk_order(),
            pos: 0,
        }
    }

    /// The column ids shared by every row.
    #[must_use]
    pub fn col_ids(&self) -> &Arc<[i32]> {
        &self.col_ids
    }

    #[must_use]
    pub fn row_ids(&self) -> Arc<[i32]> {
        self.rows.row_ids_in_disk_order()
    }

    #[must_use]
    pub fn sorted_row_ids(&self) -> &[i32] {
        self.rows.row_ids()
    }

    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.rows.num_rows()
    }

    #[must_use]
    pub fn value_conf(&self) -> &ValueConf {
        &self.conf
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.rows.path()
    }

    #[must_use]
    pub fn windows(&self) -> Vec<WindowSpan> {
        self.rows.windows()
    }

    pub fn close(self) {
        self.rows.close();
    }
}

impl Matrix for DenseMatrix {
    type Row<'a> = DenseRow<'a>;

    fn get_row(&self, row_id: i32) -> Result<Option<DenseRow<'_>>> {
        DenseMatrix::get_row(self, row_id)
    }

    fn row_ids(&self) -> Arc<[i32]> {
        DenseMatrix::row_ids(self)
    }

    fn num_rows(&self) -> usize {
        DenseMatrix::num_rows(self)
    }
}

impl<'a> IntoIterator for &'a DenseMatrix {
    type Item = Result<DenseRow<'a>>;
    type IntoIter = DenseRowIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Disk-order iterator over a [`DenseMatrix`].
pub struct DenseRowIter<'a> {
    matrix: &'a DenseMatrix,
    ids: Arc<[i32]>,
    pos: usize,
}

impl<'a> Iterator for DenseRowIter<'a> {
    type Item = Result<DenseRow<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = *self.ids.get(self.pos)?;
        self.pos += 1;
        Some(self.matrix.get_row(id).and_then(|row| indexed(id, row)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.ids.len() - self.pos;
        (left, Some(left))
    }
}

fn indexed<R>(row_id: i32, row: Option<R>) -> Result<R> {
    row.ok_or_else(|| MatrixError::InvalidState(format!("indexed row {row_id} has no bytes")))
}

fn check_row_id(expected: i32, found: i32) -> Result<()> {
    if expected != found {
        return Err(MatrixError::Format(format!(
            "index points row {expected} at a record for row {found}"
        )));
    }
    Ok(())
}

/// Parses the header of `path` and maps its body. Returns the fixed fields
/// and the column ids alongside the mapped rows.
///
/// The first `header_window` bytes (never fewer than the fixed fields of
/// `kind`, never more than the file) are mapped to read the fixed fields. If
/// the full header turns out to be larger, it is mapped again at its real
/// size. The index is copied out and the header map dropped before the body
/// is mapped.
fn open_body(
    path: &Path,
    kind: MatrixKind,
    config: &MatrixConfig,
) -> Result<(FixedHeader, Vec<i32>, PagedRows)> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    if file_len < kind.fixed_header_bytes() {
        return Err(MatrixError::Format(format!(
            "file too small for {kind} matrix header: {file_len} bytes"
        )));
    }

    let window = file_len.min((config.header_window as u64).max(kind.fixed_header_bytes()));
    let header = {
        // SAFETY: matrix files are immutable once written.
        let map = unsafe { MmapOptions::new().len(to_usize(window)?).map(&file)? };
        let fixed = FixedHeader::parse(&ByteView::borrowed(&map), kind)?;
        let needed = fixed.header_bytes();
        if needed > file_len {
            return Err(MatrixError::Format(format!(
                "truncated header: needs {needed} bytes, file has {file_len}"
            )));
        }
        if needed > window {
            debug!(path = %path.display(), needed, window, "remapping large header");
            // SAFETY: as above.
            let map = unsafe { MmapOptions::new().len(to_usize(needed)?).map(&file)? };
            Header::parse(&ByteView::borrowed(&map), fixed)?
        } else {
            Header::parse(&ByteView::borrowed(&map), fixed)?
        }
    };

    let Header {
        fixed,
        row_ids,
        offsets,
        col_ids,
    } = header;
    let data_start = fixed.header_bytes();
    info!(
        path = %path.display(),
        kind = %kind,
        rows = fixed.num_rows,
        cols = fixed.num_cols,
        header_bytes = data_start,
        "opened matrix"
    );

    let rows = PagedRows::new(file, path, row_ids, offsets, data_start, config.page_size)?;
    Ok((fixed, col_ids, rows))
}

fn to_usize(n: u64) -> Result<usize> {
    usize::try_from(n).map_err(|_| MatrixError::Format(format!("{n} bytes cannot be mapped")))
}
