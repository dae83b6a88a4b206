//! Sparse rows: variable length, strictly increasing column ids.
//!
//! ```text
//! [magic: u32 = 0xFEFEFEFE][row_id: i32][num_cols: i32]
//! [col_id: i32 × num_cols][packed: i16 × num_cols]
//! ```

use byteorder::{BigEndian, WriteBytesExt};

use crate::bytes::{i16_at, i32_at, ByteView};
use crate::error::{MatrixError, Result};
use crate::format::{count_to_i32, SPARSE_ROW_MAGIC};
use crate::row::{MatrixRow, PackedRow};
use crate::ValueConf;

/// Bytes before the column ids: magic + row id + column count.
pub const SPARSE_ROW_HEADER_BYTES: usize = 4 + 4 + 4;

/// A sparse row, either built in memory or borrowed from a mapped file.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseRow<'a> {
    bytes: ByteView<'a>,
    conf: ValueConf,
    num_cols: usize,
}

impl SparseRow<'static> {
    /// Builds a row from parallel column id and score arrays.
    ///
    /// Columns need not be sorted; they are reordered (with their values) if
    /// necessary.
    ///
    /// # Errors
    ///
    /// [`MatrixError::InvalidArgument`] if the arrays differ in length,
    /// [`MatrixError::InvalidState`] if a column id repeats.
    pub fn new(conf: ValueConf, row_id: i32, col_ids: &[i32], values: &[f32]) -> Result<Self> {
        let packed: Vec<i16> = values.iter().map(|v| conf.pack(*v)).collect();
        Self::from_packed(conf, row_id, col_ids, &packed)
    }

    /// Builds a row from `(column id, score)` pairs in any order.
    pub fn from_pairs<I>(conf: ValueConf, row_id: i32, pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (i32, f32)>,
    {
        let (col_ids, values): (Vec<i32>, Vec<f32>) = pairs.into_iter().unzip();
        Self::new(conf, row_id, &col_ids, &values)
    }

    /// Builds a row from already-packed codes.
    pub fn from_packed(
        conf: ValueConf,
        row_id: i32,
        col_ids: &[i32],
        packed: &[i16],
    ) -> Result<Self> {
        if col_ids.len() != packed.len() {
            return Err(MatrixError::InvalidArgument(format!(
                "row {row_id}: {} column ids but {} values",
                col_ids.len(),
                packed.len()
            )));
        }

        let mut entries: Vec<(i32, i16)> =
            col_ids.iter().copied().zip(packed.iter().copied()).collect();
        if !is_increasing(entries.iter().map(|e| e.0)) {
            entries.sort_unstable_by_key(|e| e.0);
            if !is_increasing(entries.iter().map(|e| e.0)) {
                return Err(MatrixError::InvalidState(format!(
                    "row {row_id} has repeated column ids"
                )));
            }
        }

        let n = entries.len();
        let mut buf = Vec::with_capacity(SPARSE_ROW_HEADER_BYTES + 6 * n);
        buf.write_u32::<BigEndian>(SPARSE_ROW_MAGIC)?;
        buf.write_i32::<BigEndian>(row_id)?;
        buf.write_i32::<BigEndian>(count_to_i32(n, "column count")?)?;
        for (col, _) in &entries {
            buf.write_i32::<BigEndian>(*col)?;
        }
        for (_, code) in &entries {
            buf.write_i16::<BigEndian>(*code)?;
        }

        Ok(Self {
            bytes: ByteView::owned(buf),
            conf,
            num_cols: n,
        })
    }
}

impl<'a> SparseRow<'a> {
    /// Wraps a serialized record, e.g. the bytes returned by a mapped window.
    ///
    /// `bytes` may extend past the end of the record; the view is narrowed to
    /// exactly one row.
    ///
    /// # Errors
    ///
    /// [`MatrixError::Format`] if the row magic is wrong or the record is
    /// truncated.
    pub fn from_bytes(conf: ValueConf, bytes: ByteView<'a>) -> Result<Self> {
        let magic = bytes.read_u32_at(0)?;
        if magic != SPARSE_ROW_MAGIC {
            return Err(MatrixError::Format(format!(
                "invalid sparse row header: {magic:#x}"
            )));
        }
        let raw = bytes.read_i32_at(8)?;
        let num_cols = usize::try_from(raw)
            .map_err(|_| MatrixError::Format(format!("negative column count {raw}")))?;
        let len = SPARSE_ROW_HEADER_BYTES + 6 * num_cols;
        let bytes = bytes.truncate(len)?;
        Ok(Self {
            bytes,
            conf,
            num_cols,
        })
    }

    /// Copies the record out of the buffer it borrows from.
    pub fn into_owned(self) -> SparseRow<'static> {
        SparseRow {
            bytes: self.bytes.into_owned(),
            conf: self.conf,
            num_cols: self.num_cols,
        }
    }

    /// Column ids in ascending order.
    pub fn col_ids(&self) -> Vec<i32> {
        (0..self.num_cols).map(|i| self.col_id_at(i)).collect()
    }

    /// Raw codes in column order.
    pub fn packed_values(&self) -> Vec<i16> {
        (0..self.num_cols).map(|i| self.packed_value_at(i)).collect()
    }

    fn values_start(&self) -> usize {
        SPARSE_ROW_HEADER_BYTES + 4 * self.num_cols
    }
}

impl MatrixRow for SparseRow<'_> {
    fn row_id(&self) -> i32 {
        i32_at(self.bytes.as_slice(), 4)
    }

    fn num_cols(&self) -> usize {
        self.num_cols
    }

    fn col_id_at(&self, i: usize) -> i32 {
        assert!(i < self.num_cols, "column {i} out of range");
        i32_at(self.bytes.as_slice(), SPARSE_ROW_HEADER_BYTES + 4 * i)
    }

    fn value_at(&self, i: usize) -> f32 {
        self.conf.unpack(self.packed_value_at(i))
    }

    fn index_for_id(&self, col_id: i32) -> Option<usize> {
        // columns are strictly increasing
        let (mut lo, mut hi) = (0, self.num_cols);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.col_id_at(mid).cmp(&col_id) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Some(mid),
            }
        }
        None
    }
}

impl PackedRow for SparseRow<'_> {
    fn packed_value_at(&self, i: usize) -> i16 {
        assert!(i < self.num_cols, "column {i} out of range");
        i16_at(self.bytes.as_slice(), self.values_start() + 2 * i)
    }

    fn value_conf(&self) -> &ValueConf {
        &self.conf
    }

    fn as_bytes(&self) -> &[u8] {
        self.bytes.as_slice()
    }
}

pub(crate) fn is_increasing<I: Iterator<Item = i32>>(mut ids: I) -> bool {
    let Some(mut last) = ids.next() else {
        return true;
    };
    for id in ids {
        if id <= last {
            return false;
        }
        last = id;
    }
    true
}
