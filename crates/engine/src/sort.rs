//! Rewrites a matrix file so its rows sit on disk in ascending id order.
//!
//! Iterating a sorted file visits rows in id order while reading the body
//! front to back.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use config::MatrixConfig;
use matrix::{
    detect_kind, DenseMatrix, DenseMatrixWriter, MatrixKind, SparseMatrix, SparseMatrixWriter,
};
use tracing::{debug, info};

/// Sorts the matrix at `input` into `output`, detecting sparse or dense from
/// the file's magic. Returns the detected kind.
pub fn sort_matrix<P: AsRef<Path>, Q: AsRef<Path>>(input: P, output: Q) -> Result<MatrixKind> {
    let input = input.as_ref();
    let kind = detect_kind(input).with_context(|| format!("reading {}", input.display()))?;
    let config = MatrixConfig::from_env();
    let rows = match kind {
        MatrixKind::Sparse => sort_sparse(input, output.as_ref(), &config)?,
        MatrixKind::Dense => sort_dense(input, output.as_ref(), &config)?,
    };
    debug!(kind = %kind, rows, "sort finished");
    Ok(kind)
}

/// Copies a sparse matrix row by row in ascending id order. Returns the
/// number of rows written.
pub fn sort_sparse(input: &Path, output: &Path, config: &MatrixConfig) -> Result<usize> {
    let matrix = SparseMatrix::open_with(input, config)
        .with_context(|| format!("opening sparse matrix {}", input.display()))?;
    let writer = SparseMatrixWriter::with_conf(output, *matrix.value_conf())?;
    for &id in matrix.sorted_row_ids() {
        if let Some(row) = matrix.get_row(id)? {
            writer.write_row(&row)?;
        }
    }
    let rows = writer.num_rows()?;
    writer
        .finish()
        .with_context(|| format!("writing {}", output.display()))?;
    matrix.close();
    info!(input = %input.display(), output = %output.display(), rows, "sorted sparse matrix");
    Ok(rows)
}

/// Dense counterpart of [`sort_sparse`]; the column ids carry over as is,
/// even when the input has no rows.
pub fn sort_dense(input: &Path, output: &Path, config: &MatrixConfig) -> Result<usize> {
    let matrix = DenseMatrix::open_with(input, config)
        .with_context(|| format!("opening dense matrix {}", input.display()))?;
    let writer = DenseMatrixWriter::with_columns(
        output,
        *matrix.value_conf(),
        Arc::clone(matrix.col_ids()),
    )?;
    for &id in matrix.sorted_row_ids() {
        if let Some(row) = matrix.get_row(id)? {
            writer.write_row(&row)?;
        }
    }
    let rows = writer.num_rows()?;
    writer
        .finish()
        .with_context(|| format!("writing {}", output.display()))?;
    matrix.close();
    info!(input = %input.display(), output = %output.display(), rows, "sorted dense matrix");
    Ok(rows)
}
