//! Out-of-core transpose of a sparse matrix file.
//!
//! ```text
//! pass 0      scan all rows, count entries per column
//! plan        split the sorted column ids into contiguous batches whose
//!             accumulators fit the memory budget
//! pass 1..k   scan all rows again, collect entries for this batch's columns,
//!             verify each column's count, emit one output row per column
//! ```
//!
//! Packed codes are copied through unchanged, so the output is stored under
//! the input's [`ValueConf`](matrix::ValueConf) without a second rounding.

use std::collections::HashMap;
use std::mem::size_of;
use std::ops::Range;
use std::path::Path;

use anyhow::{Context, Result};
use config::{MatrixConfig, MB};
use matrix::{MatrixError, MatrixRow, PackedRow, SparseMatrix, SparseMatrixWriter, SparseRow};
use tracing::{debug, info};

/// Entries collected for one output row.
#[derive(Debug)]
pub(crate) struct ColumnAccumulator {
    col_id: i32,
    row_ids: Vec<i32>,
    values: Vec<i16>,
}

/// Estimated bytes held while accumulating a column with `count` entries.
///
/// Accumulators are allocated at their final size, so this is exact up to
/// allocator overhead.
#[must_use]
pub fn column_cost(count: usize) -> usize {
    size_of::<ColumnAccumulator>() + count * (size_of::<i32>() + size_of::<i16>())
}

/// Splits `counts` (sorted by column id) into contiguous index ranges whose
/// summed [`column_cost`] stays within `budget_bytes`.
///
/// Every range holds at least one column, so a column larger than the whole
/// budget still gets a batch of its own.
#[must_use]
pub fn plan_batches(counts: &[(i32, usize)], budget_bytes: usize) -> Vec<Range<usize>> {
    let mut batches = Vec::new();
    let mut i = 0;
    while i < counts.len() {
        let start = i;
        let mut used = 0usize;
        while i < counts.len() {
            let cost = column_cost(counts[i].1);
            if i > start && used.saturating_add(cost) > budget_bytes {
                break;
            }
            used = used.saturating_add(cost);
            i += 1;
        }
        batches.push(start..i);
    }
    batches
}

/// Summary of a finished transpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransposeStats {
    /// Rows in the output, i.e. distinct columns in the input.
    pub rows: usize,
    pub entries: u64,
    pub batches: usize,
}

/// Transposes one open sparse matrix under a memory budget.
pub struct Transposer<'a> {
    matrix: &'a SparseMatrix,
    budget_bytes: usize,
}

impl<'a> Transposer<'a> {
    /// Uses the budget from [`MatrixConfig::from_env`].
    pub fn new(matrix: &'a SparseMatrix) -> Self {
        Self::with_config(matrix, &MatrixConfig::from_env())
    }

    pub fn with_config(matrix: &'a SparseMatrix, config: &MatrixConfig) -> Self {
        Self {
            matrix,
            budget_bytes: config.transpose_buffer_mb.saturating_mul(MB),
        }
    }

    /// Overrides the budget with an exact byte count.
    #[must_use]
    pub fn with_budget_bytes(mut self, bytes: usize) -> Self {
        self.budget_bytes = bytes;
        self
    }

    #[must_use]
    pub fn budget_bytes(&self) -> usize {
        self.budget_bytes
    }

    /// Entry count per column, sorted by column id.
    pub fn column_counts(&self) -> Result<Vec<(i32, usize)>> {
        let mut counts: HashMap<i32, usize> = HashMap::new();
        for row in self.matrix.iter() {
            let row = row?;
            for i in 0..row.num_cols() {
                *counts.entry(row.col_id_at(i)).or_insert(0) += 1;
            }
        }
        let mut counts: Vec<(i32, usize)> = counts.into_iter().collect();
        counts.sort_unstable_by_key(|c| c.0);
        Ok(counts)
    }

    /// Writes the transpose to `output` and returns what was written.
    ///
    /// # Errors
    ///
    /// I/O and format errors from reading or writing, and
    /// [`MatrixError::Consistency`] if a batch scan finds a different number
    /// of entries for a column than the counting pass did.
    pub fn transpose_to<P: AsRef<Path>>(&self, output: P) -> Result<TransposeStats> {
        let output = output.as_ref();
        let counts = self.column_counts().context("counting column entries")?;
        let batches = plan_batches(&counts, self.budget_bytes);
        info!(
            input = %self.matrix.path().display(),
            columns = counts.len(),
            batches = batches.len(),
            budget_mb = self.budget_bytes / MB,
            "transposing matrix"
        );

        let conf = *self.matrix.value_conf();
        let writer = SparseMatrixWriter::with_conf(output, conf)?;
        let mut entries = 0u64;
        for (n, batch) in batches.iter().enumerate() {
            let columns = &counts[batch.clone()];
            let accumulators = self.scan_batch(columns)?;
            for acc in accumulators {
                entries += acc.row_ids.len() as u64;
                let row = SparseRow::from_packed(conf, acc.col_id, &acc.row_ids, &acc.values)?;
                writer.write_row(&row)?;
            }
            debug!(batch = n, columns = columns.len(), "wrote transpose batch");
        }
        writer
            .finish()
            .with_context(|| format!("finishing {}", output.display()))?;

        Ok(TransposeStats {
            rows: counts.len(),
            entries,
            batches: batches.len(),
        })
    }

    /// One full scan collecting the entries of `columns`.
    pub(crate) fn scan_batch(&self, columns: &[(i32, usize)]) -> Result<Vec<ColumnAccumulator>> {
        let (Some(&(lo, _)), Some(&(hi, _))) = (columns.first(), columns.last()) else {
            return Ok(Vec::new());
        };
        let mut accumulators: Vec<ColumnAccumulator> = columns
            .iter()
            .map(|&(col_id, count)| ColumnAccumulator {
                col_id,
                row_ids: Vec::with_capacity(count),
                values: Vec::with_capacity(count),
            })
            .collect();

        for row in self.matrix.iter() {
            let row = row?;
            let start = (0..row.num_cols()).position(|i| row.col_id_at(i) >= lo);
            let Some(start) = start else { continue };
            for i in start..row.num_cols() {
                let col = row.col_id_at(i);
                if col > hi {
                    break;
                }
                if let Ok(k) = accumulators.binary_search_by_key(&col, |a| a.col_id) {
                    accumulators[k].row_ids.push(row.row_id());
                    accumulators[k].values.push(row.packed_value_at(i));
                }
            }
        }

        for (acc, &(col_id, expected)) in accumulators.iter().zip(columns) {
            if acc.row_ids.len() != expected {
                return Err(MatrixError::Consistency {
                    col_id,
                    expected,
                    actual: acc.row_ids.len(),
                }
                .into());
            }
        }
        Ok(accumulators)
    }
}

/// Transposes the sparse matrix at `input` into `output`, with settings from
/// the environment.
pub fn transpose<P: AsRef<Path>, Q: AsRef<Path>>(input: P, output: Q) -> Result<TransposeStats> {
    transpose_with(input, output, &MatrixConfig::from_env())
}

pub fn transpose_with<P: AsRef<Path>, Q: AsRef<Path>>(
    input: P,
    output: Q,
    config: &MatrixConfig,
) -> Result<TransposeStats> {
    let input = input.as_ref();
    let matrix = SparseMatrix::open_with(input, config)
        .with_context(|| format!("opening {}", input.display()))?;
    let stats = Transposer::with_config(&matrix, config).transpose_to(output)?;
    matrix.close();
    Ok(stats)
}
