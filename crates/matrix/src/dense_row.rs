//! Dense rows: one packed value per column of the owning matrix.
//!
//! ```text
//! [magic: u32 = 0xFEFEFEFA][row_id: i32][packed: i16 × num_cols]
//! ```
//!
//! Column ids are not stored per row. Every row of a dense matrix shares the
//! matrix's column-id array, held here behind an `Arc`.

use std::sync::Arc;

use byteorder::{BigEndian, WriteBytesExt};

use crate::bytes::{i16_at, ByteView};
use crate::error::{MatrixError, Result};
use crate::format::DENSE_ROW_MAGIC;
use crate::row::{MatrixRow, PackedRow};
use crate::ValueConf;

/// Bytes before the packed values: magic + row id.
pub const DENSE_ROW_HEADER_BYTES: usize = 4 + 4;

#[derive(Debug, Clone, PartialEq)]
pub struct DenseRow<'a> {
    bytes: ByteView<'a>,
    conf: ValueConf,
    col_ids: Arc<[i32]>,
}

impl DenseRow<'static> {
    /// Packs `values` in the order of `col_ids`. No reordering happens here;
    /// aligning values to the shared columns is the caller's job.
    ///
    /// # Errors
    ///
    /// [`MatrixError::InvalidArgument`] if the lengths differ.
    pub fn new(
        conf: ValueConf,
        row_id: i32,
        col_ids: impl Into<Arc<[i32]>>,
        values: &[f32],
    ) -> Result<Self> {
        let packed: Vec<i16> = values.iter().map(|v| conf.pack(*v)).collect();
        Self::from_packed(conf, row_id, col_ids, &packed)
    }

    pub fn from_packed(
        conf: ValueConf,
        row_id: i32,
        col_ids: impl Into<Arc<[i32]>>,
        packed: &[i16],
    ) -> Result<Self> {
        let col_ids = col_ids.into();
        if col_ids.len() != packed.len() {
            return Err(MatrixError::InvalidArgument(format!(
                "dense row {row_id}: {} column ids but {} values",
                col_ids.len(),
                packed.len()
            )));
        }
        let mut buf = Vec::with_capacity(DENSE_ROW_HEADER_BYTES + 2 * packed.len());
        buf.write_u32::<BigEndian>(DENSE_ROW_MAGIC)?;
        buf.write_i32::<BigEndian>(row_id)?;
        for code in packed {
            buf.write_i16::<BigEndian>(*code)?;
        }
        Ok(Self {
            bytes: ByteView::owned(buf),
            conf,
            col_ids,
        })
    }
}

impl<'a> DenseRow<'a> {
    /// Wraps a serialized record belonging to a matrix with columns `col_ids`.
    ///
    /// # Errors
    ///
    /// [`MatrixError::Format`] on a wrong row magic or a truncated record.
    pub fn from_bytes(conf: ValueConf, col_ids: Arc<[i32]>, bytes: ByteView<'a>) -> Result<Self> {
        let magic = bytes.read_u32_at(0)?;
        if magic != DENSE_ROW_MAGIC {
            return Err(MatrixError::Format(format!(
                "invalid dense row header: {magic:#x}"
            )));
        }
        let bytes = bytes.truncate(DENSE_ROW_HEADER_BYTES + 2 * col_ids.len())?;
        Ok(Self {
            bytes,
            conf,
            col_ids,
        })
    }

    pub fn into_owned(self) -> DenseRow<'static> {
        DenseRow {
            bytes: self.bytes.into_owned(),
            conf: self.conf,
            col_ids: self.col_ids,
        }
    }

    /// The shared column ids this row's values line up with.
    #[must_use]
    pub fn col_ids(&self) -> &Arc<[i32]> {
        &self.col_ids
    }

    /// Values in column order.
    pub fn values(&self) -> Vec<f32> {
        (0..self.num_cols()).map(|i| self.value_at(i)).collect()
    }

    /// Dot product with another row over the same columns.
    ///
    /// # Errors
    ///
    /// [`MatrixError::ColumnMismatch`] if the rows have different columns.
    pub fn dot(&self, other: &DenseRow<'_>) -> Result<f64> {
        self.check_same_columns(other)?;
        Ok((0..self.num_cols())
            .map(|i| self.value_at(i) as f64 * other.value_at(i) as f64)
            .sum())
    }

    /// Cosine of the angle between two rows over the same columns; `0.0` if
    /// either row has zero norm.
    pub fn cosine_similarity(&self, other: &DenseRow<'_>) -> Result<f64> {
        let dot = self.dot(other)?;
        let denom = self.norm() * other.norm();
        if denom == 0.0 {
            return Ok(0.0);
        }
        Ok(dot / denom)
    }

    fn check_same_columns(&self, other: &DenseRow<'_>) -> Result<()> {
        if Arc::ptr_eq(&self.col_ids, &other.col_ids) || self.col_ids == other.col_ids {
            return Ok(());
        }
        Err(MatrixError::ColumnMismatch {
            row_id: other.row_id(),
            detail: format!(
                "{} columns vs {} columns in row {}",
                other.col_ids.len(),
                self.col_ids.len(),
                self.row_id()
            ),
        })
    }
}

impl MatrixRow for DenseRow<'_> {
    fn row_id(&self) -> i32 {
        crate::bytes::i32_at(self.bytes.as_slice(), 4)
    }

    fn num_cols(&self) -> usize {
        self.col_ids.len()
    }

    fn col_id_at(&self, i: usize) -> i32 {
        self.col_ids[i]
    }

    fn value_at(&self, i: usize) -> f32 {
        self.conf.unpack(self.packed_value_at(i))
    }
}

impl PackedRow for DenseRow<'_> {
    fn packed_value_at(&self, i: usize) -> i16 {
        assert!(i < self.col_ids.len(), "column {i} out of range");
        i16_at(self.bytes.as_slice(), DENSE_ROW_HEADER_BYTES + 2 * i)
    }

    fn value_conf(&self) -> &ValueConf {
        &self.conf
    }

    fn as_bytes(&self) -> &[u8] {
        self.bytes.as_slice()
    }
}
