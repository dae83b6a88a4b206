//! Common row contract shared by sparse, dense and in-memory rows.

use std::collections::BTreeMap;

use crate::ValueConf;

/// Read access to one matrix row.
///
/// Positional accessors (`col_id_at`, `value_at`) panic when `i` is not in
/// `0..num_cols()`, like slice indexing. The id-based lookups are linear
/// scans, which is fine because rows are short relative to the matrix.
pub trait MatrixRow {
    fn row_id(&self) -> i32;

    fn num_cols(&self) -> usize;

    fn col_id_at(&self, i: usize) -> i32;

    fn value_at(&self, i: usize) -> f32;

    /// Euclidean norm over the row's values.
    fn norm(&self) -> f64 {
        (0..self.num_cols())
            .map(|i| {
                let v = self.value_at(i) as f64;
                v * v
            })
            .sum::<f64>()
            .sqrt()
    }

    /// Position of column `col_id` in this row, if present.
    fn index_for_id(&self, col_id: i32) -> Option<usize> {
        (0..self.num_cols()).find(|&i| self.col_id_at(i) == col_id)
    }

    fn value_for_id(&self, col_id: i32) -> Option<f32> {
        self.index_for_id(col_id).map(|i| self.value_at(i))
    }

    /// Column id → value, ordered by column id.
    fn as_map(&self) -> BTreeMap<i32, f32> {
        (0..self.num_cols())
            .map(|i| (self.col_id_at(i), self.value_at(i)))
            .collect()
    }

    /// `(column id, value)` pairs in row order.
    fn to_pairs(&self) -> Vec<(i32, f32)> {
        (0..self.num_cols())
            .map(|i| (self.col_id_at(i), self.value_at(i)))
            .collect()
    }
}

/// A row whose values are stored as 16-bit codes under a [`ValueConf`].
pub trait PackedRow: MatrixRow {
    /// Raw code at position `i`, for copy-without-unpack paths.
    fn packed_value_at(&self, i: usize) -> i16;

    fn value_conf(&self) -> &ValueConf;

    /// The serialized record, without trailing padding.
    fn as_bytes(&self) -> &[u8];
}
