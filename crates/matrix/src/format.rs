//! Matrix file format constants and header read/write helpers.
//!
//! ## Sparse header (`16 + 12 × rows` bytes)
//!
//! ```text
//! [magic: u32 = 0x00ABCDEF][min_score: f32][max_score: f32][num_rows: i32]
//! [row_id: i32 × num_rows][offset: i64 × num_rows]
//! ```
//!
//! ## Dense header (`20 + 12 × rows + 4 × cols` bytes)
//!
//! ```text
//! [magic: u32 = 0x00ABCCBA][min_score: f32][max_score: f32][num_rows: i32][num_cols: i32]
//! [row_id: i32 × num_rows][offset: i64 × num_rows][col_id: i32 × num_cols]
//! ```
//!
//! All integers are big-endian. Row ids are sorted ascending and offsets are
//! absolute file positions of each row record.

use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::bytes::ByteView;
use crate::error::{MatrixError, Result};
use crate::ValueConf;

/// Magic number opening every sparse matrix file.
pub const SPARSE_MAGIC: u32 = 0x00AB_CDEF;

/// Magic number opening every dense matrix file.
pub const DENSE_MAGIC: u32 = 0x00AB_CCBA;

/// Magic number opening every sparse row record.
pub const SPARSE_ROW_MAGIC: u32 = 0xFEFE_FEFE;

/// Magic number opening every dense row record.
pub const DENSE_ROW_MAGIC: u32 = 0xFEFE_FEFA;

/// Filler byte written after each row up to the next 8-byte boundary.
pub const ROW_PADDING: u8 = 0x80;

/// Row records start at multiples of this many body bytes.
pub const ROW_ALIGNMENT: u64 = 8;

/// Fixed part of the sparse header: magic + bounds + row count.
pub const SPARSE_FIXED_HEADER_BYTES: u64 = 4 + 4 + 4 + 4;

/// Fixed part of the dense header: sparse fixed part + column count.
pub const DENSE_FIXED_HEADER_BYTES: u64 = SPARSE_FIXED_HEADER_BYTES + 4;

/// Index bytes per row: 4 (`row_id`) + 8 (`offset`).
pub const INDEX_ENTRY_BYTES: u64 = 4 + 8;

/// Which family a matrix file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixKind {
    Sparse,
    Dense,
}

impl MatrixKind {
    #[must_use]
    pub fn magic(&self) -> u32 {
        match self {
            MatrixKind::Sparse => SPARSE_MAGIC,
            MatrixKind::Dense => DENSE_MAGIC,
        }
    }

    #[must_use]
    pub fn from_magic(magic: u32) -> Option<Self> {
        match magic {
            SPARSE_MAGIC => Some(MatrixKind::Sparse),
            DENSE_MAGIC => Some(MatrixKind::Dense),
            _ => None,
        }
    }

    #[must_use]
    pub fn fixed_header_bytes(&self) -> u64 {
        match self {
            MatrixKind::Sparse => SPARSE_FIXED_HEADER_BYTES,
            MatrixKind::Dense => DENSE_FIXED_HEADER_BYTES,
        }
    }

    /// Total header size for `num_rows` rows and `num_cols` shared columns.
    #[must_use]
    pub fn header_bytes(&self, num_rows: u64, num_cols: u64) -> u64 {
        match self {
            MatrixKind::Sparse => SPARSE_FIXED_HEADER_BYTES + INDEX_ENTRY_BYTES * num_rows,
            MatrixKind::Dense => {
                DENSE_FIXED_HEADER_BYTES + INDEX_ENTRY_BYTES * num_rows + 4 * num_cols
            }
        }
    }
}

impl std::fmt::Display for MatrixKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatrixKind::Sparse => write!(f, "sparse"),
            MatrixKind::Dense => write!(f, "dense"),
        }
    }
}

/// Reads the leading magic of the file at `path` to tell sparse from dense.
///
/// # Errors
///
/// Returns [`MatrixError::Format`] for an unknown magic or a file shorter
/// than four bytes.
pub fn detect_kind<P: AsRef<Path>>(path: P) -> Result<MatrixKind> {
    let mut r = BufReader::new(File::open(path.as_ref())?);
    let magic = r
        .read_u32::<BigEndian>()
        .map_err(|_| MatrixError::format("file too small for matrix header"))?;
    MatrixKind::from_magic(magic)
        .ok_or_else(|| MatrixError::Format(format!("invalid file header: {magic:#x}")))
}

/// Number of filler bytes needed to move `offset` to the next row boundary.
#[must_use]
pub fn padding_for(offset: u64) -> u64 {
    (ROW_ALIGNMENT - offset % ROW_ALIGNMENT) % ROW_ALIGNMENT
}

/// Fields stored at fixed positions at the start of every matrix file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedHeader {
    pub kind: MatrixKind,
    pub conf: ValueConf,
    pub num_rows: usize,
    pub num_cols: usize,
}

impl FixedHeader {
    /// Decodes the fixed fields, checking the magic against `expected`.
    pub fn parse(view: &ByteView<'_>, expected: MatrixKind) -> Result<Self> {
        let magic = view
            .read_u32_at(0)
            .map_err(|_| MatrixError::format("file too small for matrix header"))?;
        if magic != expected.magic() {
            return Err(MatrixError::Format(format!(
                "invalid file header: {magic:#x} (expected {expected} magic {:#x})",
                expected.magic()
            )));
        }
        let conf = ValueConf::new(view.read_f32_at(4)?, view.read_f32_at(8)?)
            .map_err(|e| MatrixError::Format(format!("bad value conf in header: {e}")))?;
        let num_rows = non_negative(view.read_i32_at(12)?, "row count")?;
        let num_cols = match expected {
            MatrixKind::Sparse => 0,
            MatrixKind::Dense => non_negative(view.read_i32_at(16)?, "column count")?,
        };
        Ok(Self {
            kind: expected,
            conf,
            num_rows,
            num_cols,
        })
    }

    /// Total header size implied by these fields.
    #[must_use]
    pub fn header_bytes(&self) -> u64 {
        self.kind
            .header_bytes(self.num_rows as u64, self.num_cols as u64)
    }
}

fn non_negative(v: i32, what: &str) -> Result<usize> {
    usize::try_from(v).map_err(|_| MatrixError::Format(format!("negative {what}: {v}")))
}

/// Fully decoded header: fixed fields plus the row index and column ids.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub fixed: FixedHeader,
    pub row_ids: Vec<i32>,
    pub offsets: Vec<u64>,
    pub col_ids: Vec<i32>,
}

impl Header {
    /// Decodes the index arrays from a view holding at least the whole header.
    pub fn parse(view: &ByteView<'_>, fixed: FixedHeader) -> Result<Self> {
        let n = fixed.num_rows;
        let ids_at = fixed.kind.fixed_header_bytes() as usize;
        let offsets_at = ids_at + 4 * n;
        let cols_at = offsets_at + 8 * n;

        let row_ids = view.read_i32s_at(ids_at, n)?;
        let offsets = view
            .read_i64s_at(offsets_at, n)?
            .into_iter()
            .map(|o| {
                u64::try_from(o).map_err(|_| MatrixError::Format(format!("negative row offset {o}")))
            })
            .collect::<Result<Vec<u64>>>()?;
        let col_ids = view.read_i32s_at(cols_at, fixed.num_cols)?;

        Ok(Self {
            fixed,
            row_ids,
            offsets,
            col_ids,
        })
    }
}

/// Writes a complete sparse header.
///
/// `index` must be sorted by row id and hold absolute offsets.
pub fn write_sparse_header<W: Write>(
    w: &mut W,
    conf: &ValueConf,
    index: &[(i32, u64)],
) -> Result<()> {
    write_fixed(w, MatrixKind::Sparse, conf, index.len(), 0)?;
    write_index(w, index)
}

/// Writes a complete dense header.
pub fn write_dense_header<W: Write>(
    w: &mut W,
    conf: &ValueConf,
    index: &[(i32, u64)],
    col_ids: &[i32],
) -> Result<()> {
    write_fixed(w, MatrixKind::Dense, conf, index.len(), col_ids.len())?;
    write_index(w, index)?;
    for &c in col_ids {
        w.write_i32::<BigEndian>(c)?;
    }
    Ok(())
}

fn write_fixed<W: Write>(
    w: &mut W,
    kind: MatrixKind,
    conf: &ValueConf,
    num_rows: usize,
    num_cols: usize,
) -> Result<()> {
    w.write_u32::<BigEndian>(kind.magic())?;
    w.write_f32::<BigEndian>(conf.min_score())?;
    w.write_f32::<BigEndian>(conf.max_score())?;
    w.write_i32::<BigEndian>(count_to_i32(num_rows, "row count")?)?;
    if kind == MatrixKind::Dense {
        w.write_i32::<BigEndian>(count_to_i32(num_cols, "column count")?)?;
    }
    Ok(())
}

fn write_index<W: Write>(w: &mut W, index: &[(i32, u64)]) -> Result<()> {
    for (row_id, _) in index {
        w.write_i32::<BigEndian>(*row_id)?;
    }
    for (_, offset) in index {
        let offset = i64::try_from(*offset)
            .map_err(|_| MatrixError::InvalidState(format!("row offset {offset} too large")))?;
        w.write_i64::<BigEndian>(offset)?;
    }
    Ok(())
}

pub(crate) fn count_to_i32(n: usize, what: &str) -> Result<i32> {
    i32::try_from(n).map_err(|_| MatrixError::InvalidArgument(format!("{what} {n} exceeds i32")))
}
