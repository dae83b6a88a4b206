use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use matrix::{MatrixRow, PackedRow, SparseMatrix, SparseMatrixWriter, SparseRow, ValueConf};

/// Writes a sparse matrix under the default conf, rows in the given order.
pub fn write_sparse(path: &Path, rows: &[(i32, &[(i32, f32)])]) -> Result<()> {
    let conf = ValueConf::default();
    let rows = rows
        .iter()
        .map(|(id, pairs)| SparseRow::from_pairs(conf, *id, pairs.iter().copied()))
        .collect::<matrix::Result<Vec<_>>>()?;
    SparseMatrixWriter::write_all(path, rows)?;
    Ok(())
}

/// Every `(row, col) → packed code` entry of the matrix at `path`.
pub fn packed_entries(path: &Path) -> Result<BTreeMap<(i32, i32), i16>> {
    let m = SparseMatrix::open(path)?;
    let mut out = BTreeMap::new();
    for row in m.iter() {
        let row = row?;
        for i in 0..row.num_cols() {
            out.insert((row.row_id(), row.col_id_at(i)), row.packed_value_at(i));
        }
    }
    Ok(out)
}

/// `entries` with every key's row and column swapped.
pub fn swapped(entries: &BTreeMap<(i32, i32), i16>) -> BTreeMap<(i32, i32), i16> {
    entries.iter().map(|(&(r, c), &v)| ((c, r), v)).collect()
}
