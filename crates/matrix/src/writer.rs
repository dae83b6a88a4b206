use std::collections::HashMap;
use std::fs::{self, rename, File, OpenOptions};
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::dense_row::DenseRow;
use crate::error::{MatrixError, Result};
use crate::format::{padding_for, write_dense_header, write_sparse_header, MatrixKind, ROW_PADDING};
use crate::row::{MatrixRow, PackedRow};
use crate::sparse_row::{is_increasing, SparseRow};
use crate::ValueConf;

/// Streams sparse rows into a new matrix file.
///
/// Rows may arrive in any id order. Their bytes go to a temporary body file
/// next to the destination; [`finish`](SparseMatrixWriter::finish) then
/// writes the header and the sorted index and copies the body behind them.
///
/// `write_row` takes `&self` and is serialized internally, so a writer can
/// be shared across threads. Body offsets follow call order.
///
/// # Crash Safety
///
/// The finished file is assembled at `<path>.tmp`, fsynced and renamed over
/// `path`. An interrupted writer leaves no partial matrix at `path`.
pub struct SparseMatrixWriter {
    body: RowBody,
}

impl SparseMatrixWriter {
    /// Creates a writer for `path` using the default [`ValueConf`].
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::with_conf(path, ValueConf::default())
    }

    pub fn with_conf<P: AsRef<Path>>(path: P, conf: ValueConf) -> Result<Self> {
        Ok(Self {
            body: RowBody::create(path.as_ref(), conf)?,
        })
    }

    #[must_use]
    pub fn value_conf(&self) -> &ValueConf {
        &self.body.conf
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.body.path
    }

    /// Number of rows written so far.
    pub fn num_rows(&self) -> Result<usize> {
        Ok(self.body.lock()?.index.len())
    }

    /// Appends one row.
    ///
    /// # Errors
    ///
    /// * [`MatrixError::ConfigMismatch`] if the row was packed under bounds
    ///   that are not almost equal to the writer's.
    /// * [`MatrixError::DuplicateRow`] if the row id was already written.
    ///
    /// Nothing is written when an error is returned.
    pub fn write_row(&self, row: &SparseRow<'_>) -> Result<()> {
        self.body.check_conf(row.value_conf())?;
        self.body.append(row.row_id(), row.as_bytes(), None)
    }

    /// Writes the header, index and body to `path`. Consumes the writer.
    pub fn finish(self) -> Result<()> {
        let (conf, path, state) = self.body.into_parts()?;
        let num_rows = state.index.len();
        let header_bytes = MatrixKind::Sparse.header_bytes(num_rows as u64, 0);
        let index = state.sorted_index(header_bytes);
        finalize(&path, state, |w| write_sparse_header(w, &conf, &index))?;
        info!(path = %path.display(), rows = num_rows, "wrote sparse matrix");
        Ok(())
    }

    /// Writes `rows` to a new sparse matrix at `path` with the default conf.
    pub fn write_all<'r, P, I>(path: P, rows: I) -> Result<()>
    where
        P: AsRef<Path>,
        I: IntoIterator<Item = SparseRow<'r>>,
    {
        Self::write_all_with_conf(path, rows, ValueConf::default())
    }

    pub fn write_all_with_conf<'r, P, I>(path: P, rows: I, conf: ValueConf) -> Result<()>
    where
        P: AsRef<Path>,
        I: IntoIterator<Item = SparseRow<'r>>,
    {
        let writer = Self::with_conf(path, conf)?;
        for row in rows {
            writer.write_row(&row)?;
        }
        writer.finish()
    }
}

/// Streams dense rows into a new matrix file.
///
/// The first row fixes the shared column ids unless
/// [`with_columns`](DenseMatrixWriter::with_columns) set them already. They
/// must be strictly increasing, and every later row must carry the same ids.
pub struct DenseMatrixWriter {
    body: RowBody,
}

impl DenseMatrixWriter {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::with_conf(path, ValueConf::default())
    }

    pub fn with_conf<P: AsRef<Path>>(path: P, conf: ValueConf) -> Result<Self> {
        Ok(Self {
            body: RowBody::create(path.as_ref(), conf)?,
        })
    }

    /// Creates a writer whose column ids are fixed up front, so a matrix
    /// with no rows still records them. Every row must carry `col_ids`.
    pub fn with_columns<P, C>(path: P, conf: ValueConf, col_ids: C) -> Result<Self>
    where
        P: AsRef<Path>,
        C: Into<Arc<[i32]>>,
    {
        let col_ids = col_ids.into();
        if !is_increasing(col_ids.iter().copied()) {
            return Err(MatrixError::InvalidArgument(
                "column ids are not strictly increasing".to_string(),
            ));
        }
        let body = RowBody::create(path.as_ref(), conf)?;
        body.lock()?.col_ids = Some(col_ids);
        Ok(Self { body })
    }

    #[must_use]
    pub fn value_conf(&self) -> &ValueConf {
        &self.body.conf
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.body.path
    }

    pub fn num_rows(&self) -> Result<usize> {
        Ok(self.body.lock()?.index.len())
    }

    /// Appends one row.
    ///
    /// # Errors
    ///
    /// As [`SparseMatrixWriter::write_row`], plus
    /// [`MatrixError::ColumnMismatch`] if the row's columns differ from the
    /// first row's or are not strictly increasing.
    pub fn write_row(&self, row: &DenseRow<'_>) -> Result<()> {
        self.body.check_conf(row.value_conf())?;
        self.body
            .append(row.row_id(), row.as_bytes(), Some(row.col_ids()))
    }

    /// Writes the header (including the shared column ids), index and body.
    pub fn finish(self) -> Result<()> {
        let (conf, path, mut state) = self.body.into_parts()?;
        let col_ids = state.col_ids.take().unwrap_or_else(|| Arc::from(Vec::new()));
        let num_rows = state.index.len();
        let header_bytes = MatrixKind::Dense.header_bytes(num_rows as u64, col_ids.len() as u64);
        let index = state.sorted_index(header_bytes);
        finalize(&path, state, |w| {
            write_dense_header(w, &conf, &index, &col_ids)
        })?;
        info!(
            path = %path.display(),
            rows = num_rows,
            cols = col_ids.len(),
            "wrote dense matrix"
        );
        Ok(())
    }

    /// Writes `rows` to a new dense matrix at `path` with the default conf.
    pub fn write_all<'r, P, I>(path: P, rows: I) -> Result<()>
    where
        P: AsRef<Path>,
        I: IntoIterator<Item = DenseRow<'r>>,
    {
        Self::write_all_with_conf(path, rows, ValueConf::default())
    }

    pub fn write_all_with_conf<'r, P, I>(path: P, rows: I, conf: ValueConf) -> Result<()>
    where
        P: AsRef<Path>,
        I: IntoIterator<Item = DenseRow<'r>>,
    {
        let writer = Self::with_conf(path, conf)?;
        for row in rows {
            writer.write_row(&row)?;
        }
        writer.finish()
    }
}

/// Append-only body file plus the bookkeeping both writers share.
struct RowBody {
    path: PathBuf,
    conf: ValueConf,
    state: Mutex<BodyState>,
}

struct BodyState {
    body: BufWriter<NamedTempFile>,
    /// Bytes written to the body so far; always a multiple of 8 between rows.
    offset: u64,
    /// Row id → body-relative offset.
    index: HashMap<i32, u64>,
    /// Dense only: columns fixed by the first row.
    col_ids: Option<Arc<[i32]>>,
}

impl BodyState {
    /// Index sorted by row id, with offsets shifted past a header of
    /// `header_bytes`.
    fn sorted_index(&self, header_bytes: u64) -> Vec<(i32, u64)> {
        let mut index: Vec<(i32, u64)> = self
            .index
            .iter()
            .map(|(&id, &off)| (id, off + header_bytes))
            .collect();
        index.sort_unstable_by_key(|e| e.0);
        index
    }
}

impl RowBody {
    fn create(path: &Path, conf: ValueConf) -> Result<Self> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let tmp = NamedTempFile::new_in(&dir)?;
        debug!(path = %path.display(), body = %tmp.path().display(), "opened matrix writer");
        Ok(Self {
            path: path.to_path_buf(),
            conf,
            state: Mutex::new(BodyState {
                body: BufWriter::new(tmp),
                offset: 0,
                index: HashMap::new(),
                col_ids: None,
            }),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BodyState>> {
        self.state
            .lock()
            .map_err(|e| MatrixError::InvalidState(format!("writer lock poisoned: {e}")))
    }

    fn check_conf(&self, row_conf: &ValueConf) -> Result<()> {
        if !self.conf.almost_equals(row_conf) {
            return Err(MatrixError::ConfigMismatch {
                expected: self.conf,
                actual: *row_conf,
            });
        }
        Ok(())
    }

    fn append(&self, row_id: i32, bytes: &[u8], cols: Option<&Arc<[i32]>>) -> Result<()> {
        let mut state = self.lock()?;
        if state.index.contains_key(&row_id) {
            return Err(MatrixError::DuplicateRow(row_id));
        }
        if let Some(cols) = cols {
            match state.col_ids.clone() {
                Some(fixed) => {
                    if !Arc::ptr_eq(&fixed, cols) && fixed[..] != cols[..] {
                        return Err(MatrixError::ColumnMismatch {
                            row_id,
                            detail: if cols.len() == fixed.len() {
                                "column ids differ from the matrix's".to_string()
                            } else {
                                format!(
                                    "row has {} columns, matrix has {}",
                                    cols.len(),
                                    fixed.len()
                                )
                            },
                        });
                    }
                }
                None => {
                    if !is_increasing(cols.iter().copied()) {
                        return Err(MatrixError::ColumnMismatch {
                            row_id,
                            detail: "column ids are not strictly increasing".to_string(),
                        });
                    }
                    state.col_ids = Some(Arc::clone(cols));
                }
            }
        }

        let start = state.offset;
        state.body.write_all(bytes)?;
        let end = start + bytes.len() as u64;
        let pad = padding_for(end);
        for _ in 0..pad {
            state.body.write_all(&[ROW_PADDING])?;
        }
        state.offset = end + pad;
        state.index.insert(row_id, start);
        Ok(())
    }

    fn into_parts(self) -> Result<(ValueConf, PathBuf, BodyState)> {
        let state = self
            .state
            .into_inner()
            .map_err(|e| MatrixError::InvalidState(format!("writer lock poisoned: {e}")))?;
        Ok((self.conf, self.path, state))
    }
}

/// Assembles `<path>.tmp` from a header and the body, then renames it over
/// `path` and syncs the parent directory. On failure `<path>.tmp` is removed.
fn finalize<F>(path: &Path, state: BodyState, write_header: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    let expected = state.offset;
    let mut body = state
        .body
        .into_inner()
        .map_err(|e| MatrixError::Io(e.into_error()))?;
    body.as_file_mut().seek(SeekFrom::Start(0))?;

    let tmp_path = sibling_tmp_path(path);
    if let Err(e) = assemble(path, &tmp_path, body.as_file_mut(), expected, write_header) {
        if fs::remove_file(&tmp_path).is_ok() {
            debug!(path = %tmp_path.display(), "removed partial matrix file");
        }
        return Err(e);
    }

    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    // temp body is removed when `body` drops
    Ok(())
}

fn assemble<F>(
    path: &Path,
    tmp_path: &Path,
    body: &mut File,
    expected: u64,
    write_header: F,
) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    let raw = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(tmp_path)?;
    let mut out = BufWriter::new(raw);

    write_header(&mut out)?;
    let copied = io::copy(body, &mut out)?;
    if copied != expected {
        return Err(MatrixError::InvalidState(format!(
            "body file holds {copied} bytes, expected {expected}"
        )));
    }

    out.flush()?;
    out.into_inner()
        .map_err(|e| MatrixError::Io(e.into_error()))?
        .sync_all()?;
    rename(tmp_path, path)?;
    Ok(())
}

fn sibling_tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}
