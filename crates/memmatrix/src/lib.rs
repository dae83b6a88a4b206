//! # MemMatrix - Fully Materialized Sparse Matrix
//!
//! Holds every row of a sparse matrix in plain vectors with a hash index from
//! row id to position, trading memory for O(1) row access without mapping or
//! offset lookups. Used for matrices small enough to fit in RAM and for
//! compacting intermediate results before a final write.
//!
//! Values are kept as `f64` and are only quantized when the matrix is written
//! back to disk with [`InMemoryMatrix::write_to`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use matrix::{
    Matrix, MatrixError, MatrixRow, Result, SparseMatrix, SparseMatrixWriter, SparseRow, ValueConf,
};
use tracing::{debug, info};

/// A borrowed row of an [`InMemoryMatrix`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InMemoryRow<'a> {
    row_id: i32,
    col_ids: &'a [i32],
    values: &'a [f64],
}

impl<'a> InMemoryRow<'a> {
    #[must_use]
    pub fn col_ids(&self) -> &'a [i32] {
        self.col_ids
    }

    /// Unquantized values, parallel to [`col_ids`](InMemoryRow::col_ids).
    #[must_use]
    pub fn values(&self) -> &'a [f64] {
        self.values
    }
}

impl MatrixRow for InMemoryRow<'_> {
    fn row_id(&self) -> i32 {
        self.row_id
    }

    fn num_cols(&self) -> usize {
        self.col_ids.len()
    }

    fn col_id_at(&self, i: usize) -> i32 {
        self.col_ids[i]
    }

    fn value_at(&self, i: usize) -> f32 {
        self.values[i] as f32
    }

    fn norm(&self) -> f64 {
        self.values.iter().map(|v| v * v).sum::<f64>().sqrt()
    }
}

/// Sparse matrix held entirely in memory as parallel per-row vectors.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMatrix {
    row_ids: Vec<i32>,
    col_ids: Vec<Vec<i32>>,
    values: Vec<Vec<f64>>,
    /// Row id → position in the vectors above.
    row_index: HashMap<i32, usize>,
    /// Raw id → compressed id, once [`compress_ids`](Self::compress_ids) ran.
    id_map: Option<HashMap<i32, i32>>,
}

impl InMemoryMatrix {
    /// Builds a matrix from parallel arrays. Rows keep the given order.
    ///
    /// # Errors
    ///
    /// [`MatrixError::InvalidArgument`] if the outer arrays or any row's
    /// column and value arrays differ in length,
    /// [`MatrixError::DuplicateRow`] if a row id repeats.
    pub fn new(row_ids: Vec<i32>, col_ids: Vec<Vec<i32>>, values: Vec<Vec<f64>>) -> Result<Self> {
        if row_ids.len() != col_ids.len() || row_ids.len() != values.len() {
            return Err(MatrixError::InvalidArgument(format!(
                "{} row ids, {} column arrays, {} value arrays",
                row_ids.len(),
                col_ids.len(),
                values.len()
            )));
        }
        if let Some((i, _)) = col_ids
            .iter()
            .zip(&values)
            .enumerate()
            .find(|(_, (c, v))| c.len() != v.len())
        {
            return Err(MatrixError::InvalidArgument(format!(
                "row {} has {} columns but {} values",
                row_ids[i],
                col_ids[i].len(),
                values[i].len()
            )));
        }
        let row_index = index_rows(&row_ids)?;
        Ok(Self {
            row_ids,
            col_ids,
            values,
            row_index,
            id_map: None,
        })
    }

    /// Copies every row of `source`, in its iteration order.
    pub fn from_matrix<M: Matrix>(source: &M) -> Result<Self> {
        let ids = source.row_ids();
        let mut row_ids = Vec::with_capacity(ids.len());
        let mut col_ids = Vec::with_capacity(ids.len());
        let mut values = Vec::with_capacity(ids.len());
        for &id in ids.iter() {
            let row = source.get_row(id)?.ok_or_else(|| {
                MatrixError::InvalidState(format!("source lists row {id} but has no such row"))
            })?;
            if row.row_id() != id {
                return Err(MatrixError::InvalidState(format!(
                    "source returned row {} for id {id}",
                    row.row_id()
                )));
            }
            let n = row.num_cols();
            row_ids.push(id);
            col_ids.push((0..n).map(|i| row.col_id_at(i)).collect());
            values.push((0..n).map(|i| row.value_at(i) as f64).collect());
        }
        Self::new(row_ids, col_ids, values)
    }

    /// Reads the sparse matrix file at `path` into memory and closes it.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let source = SparseMatrix::open(path.as_ref())?;
        let loaded = Self::from_matrix(&source)?;
        source.close();
        info!(path = %path.as_ref().display(), rows = loaded.num_rows(), "loaded matrix into memory");
        Ok(loaded)
    }

    /// Remaps all ids onto `0..`: rows take `0..num_rows` in row order, then
    /// column ids not already used by a row take the following ids in order
    /// of first appearance. Each row's columns are re-sorted afterwards.
    ///
    /// The forward mapping is available from [`id_map`](Self::id_map).
    ///
    /// # Errors
    ///
    /// [`MatrixError::InvalidState`] if ids were already compressed.
    pub fn compress_ids(&mut self) -> Result<()> {
        if self.id_map.is_some() {
            return Err(MatrixError::InvalidState("ids already compressed".to_string()));
        }
        let mut map: HashMap<i32, i32> = HashMap::with_capacity(self.row_ids.len());
        for (i, id) in self.row_ids.iter_mut().enumerate() {
            let new_id = to_id(i)?;
            if map.insert(*id, new_id).is_some() {
                return Err(MatrixError::DuplicateRow(*id));
            }
            *id = new_id;
        }

        for (cols, vals) in self.col_ids.iter_mut().zip(self.values.iter_mut()) {
            for c in cols.iter_mut() {
                let next = to_id(map.len())?;
                *c = *map.entry(*c).or_insert(next);
            }
            sort_row(cols, vals);
        }

        self.row_index = index_rows(&self.row_ids)?;
        debug!(ids = map.len(), rows = self.row_ids.len(), "compressed matrix ids");
        self.id_map = Some(map);
        Ok(())
    }

    /// Raw id → compressed id, if [`compress_ids`](Self::compress_ids) ran.
    #[must_use]
    pub fn id_map(&self) -> Option<&HashMap<i32, i32>> {
        self.id_map.as_ref()
    }

    #[must_use]
    pub fn get_row(&self, row_id: i32) -> Option<InMemoryRow<'_>> {
        self.row_index.get(&row_id).map(|&i| self.row_at(i))
    }

    fn row_at(&self, i: usize) -> InMemoryRow<'_> {
        InMemoryRow {
            row_id: self.row_ids[i],
            col_ids: &self.col_ids[i],
            values: &self.values[i],
        }
    }

    /// Rows in storage order.
    pub fn iter(&self) -> impl Iterator<Item = InMemoryRow<'_>> + '_ {
        (0..self.row_ids.len()).map(move |i| self.row_at(i))
    }

    #[must_use]
    pub fn row_ids(&self) -> &[i32] {
        &self.row_ids
    }

    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.row_ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.row_ids.is_empty()
    }

    /// Total number of stored entries.
    #[must_use]
    pub fn num_entries(&self) -> usize {
        self.col_ids.iter().map(Vec::len).sum()
    }

    /// Smallest and largest stored value, or `None` if there are no entries.
    #[must_use]
    pub fn value_range(&self) -> Option<(f64, f64)> {
        self.values.iter().flatten().fold(None, |acc, &v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
    }

    /// Writes the matrix as a sparse file at `path`, packing values under a
    /// conf spanning the observed value range.
    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let conf = match self.value_range() {
            Some((lo, hi)) => ValueConf::from_range(lo as f32, hi as f32)?,
            None => ValueConf::default(),
        };
        let writer = SparseMatrixWriter::with_conf(path, conf)?;
        for row in self.iter() {
            let values: Vec<f32> = row.values().iter().map(|&v| v as f32).collect();
            writer.write_row(&SparseRow::new(conf, row.row_id(), row.col_ids(), &values)?)?;
        }
        writer.finish()
    }
}

impl Matrix for InMemoryMatrix {
    type Row<'a> = InMemoryRow<'a>;

    fn get_row(&self, row_id: i32) -> Result<Option<InMemoryRow<'_>>> {
        Ok(InMemoryMatrix::get_row(self, row_id))
    }

    fn row_ids(&self) -> Arc<[i32]> {
        Arc::from(self.row_ids.as_slice())
    }

    fn num_rows(&self) -> usize {
        self.row_ids.len()
    }
}

fn index_rows(row_ids: &[i32]) -> Result<HashMap<i32, usize>> {
    let mut index = HashMap::with_capacity(row_ids.len());
    for (i, &id) in row_ids.iter().enumerate() {
        if index.insert(id, i).is_some() {
            return Err(MatrixError::DuplicateRow(id));
        }
    }
    Ok(index)
}

fn to_id(n: usize) -> Result<i32> {
    i32::try_from(n).map_err(|_| MatrixError::InvalidArgument(format!("id {n} exceeds i32")))
}

/// Sorts a row's columns ascending, moving values along with them.
fn sort_row(cols: &mut Vec<i32>, vals: &mut Vec<f64>) {
    if cols.windows(2).all(|w| w[0] < w[1]) {
        return;
    }
    let mut pairs: Vec<(i32, f64)> = cols.iter().copied().zip(vals.iter().copied()).collect();
    pairs.sort_unstable_by_key(|p| p.0);
    let (c, v): (Vec<i32>, Vec<f64>) = pairs.into_iter().unzip();
    *cols = c;
    *vals = v;
}

#[cfg(test)]
mod tests;
