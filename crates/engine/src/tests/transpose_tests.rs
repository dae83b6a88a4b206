use super::helpers::{packed_entries, swapped, write_sparse};
use crate::*;
use anyhow::Result;
use config::MatrixConfig;
use matrix::{MatrixError, MatrixRow, SparseMatrix};
use memmatrix::InMemoryMatrix;
use std::fs;
use tempfile::tempdir;

// -------------------- Batch planning --------------------

#[test]
fn plan_packs_columns_up_to_budget() {
    let counts = vec![(1, 10), (2, 1000), (3, 10), (4, 10)];
    let budget = 2 * column_cost(10);
    assert_eq!(plan_batches(&counts, budget), vec![0..1, 1..2, 2..4]);
}

#[test]
fn plan_gives_oversized_column_its_own_batch() {
    let counts = vec![(7, 1_000_000)];
    assert_eq!(plan_batches(&counts, 16), vec![0..1]);
    // zero budget still makes progress, one column at a time
    let counts = vec![(1, 1), (2, 1), (3, 1)];
    assert_eq!(plan_batches(&counts, 0), vec![0..1, 1..2, 2..3]);
}

#[test]
fn plan_for_no_columns_is_empty() {
    assert!(plan_batches(&[], 1024).is_empty());
}

#[test]
fn plan_with_large_budget_is_one_batch() {
    let counts: Vec<(i32, usize)> = (0..100).map(|c| (c, 5)).collect();
    assert_eq!(plan_batches(&counts, usize::MAX), vec![0..100]);
}

// -------------------- Transpose --------------------

#[test]
fn worked_example() -> Result<()> {
    let dir = tempdir()?;
    let input = dir.path().join("in.matrix");
    let output = dir.path().join("out.matrix");
    write_sparse(&input, &[(1, &[(2, 0.5), (5, -0.3)]), (2, &[(1, 1.0)])])?;

    let stats = transpose_with(&input, &output, &MatrixConfig::default())?;
    assert_eq!(stats.rows, 3);
    assert_eq!(stats.entries, 3);

    let t = SparseMatrix::open(&output)?;
    assert_eq!(t.sorted_row_ids(), &[1, 2, 5]);
    let step = t.value_conf().step();

    let row = t.get_row(2)?.expect("row 2");
    assert_eq!(row.col_ids(), vec![1]);
    assert!((row.value_at(0) - 0.5).abs() <= step);
    let row = t.get_row(5)?.expect("row 5");
    assert_eq!(row.col_ids(), vec![1]);
    assert!((row.value_at(0) + 0.3).abs() <= step);
    let row = t.get_row(1)?.expect("row 1");
    assert_eq!(row.col_ids(), vec![2]);
    assert!((row.value_at(0) - 1.0).abs() <= step);
    Ok(())
}

#[test]
fn transpose_swaps_every_entry_exactly() -> Result<()> {
    let dir = tempdir()?;
    let input = dir.path().join("in.matrix");
    let output = dir.path().join("out.matrix");
    write_sparse(
        &input,
        &[
            (10, &[(-4, 0.1), (3, 0.2), (7, 0.3)]),
            (-2, &[(3, -0.9)]),
            (4, &[]),
            (0, &[(7, 1.0), (100, -1.0)]),
        ],
    )?;

    let stats = transpose_with(&input, &output, &MatrixConfig::default())?;
    let before = packed_entries(&input)?;
    let after = packed_entries(&output)?;
    assert_eq!(stats.entries as usize, before.len());
    assert_eq!(after, swapped(&before));
    // the empty row contributes no column
    assert_eq!(stats.rows, 4);
    Ok(())
}

#[test]
fn output_keeps_input_value_conf() -> Result<()> {
    let dir = tempdir()?;
    let input = dir.path().join("in.matrix");
    let output = dir.path().join("out.matrix");
    let m = InMemoryMatrix::new(vec![1, 2], vec![vec![1, 2], vec![2]], vec![vec![3.0, 40.0], vec![7.5]])?;
    m.write_to(&input)?;

    transpose_with(&input, &output, &MatrixConfig::default())?;
    let a = SparseMatrix::open(&input)?;
    let b = SparseMatrix::open(&output)?;
    assert_eq!(a.value_conf(), b.value_conf());
    Ok(())
}

#[test]
fn double_transpose_restores_matrix() -> Result<()> {
    let dir = tempdir()?;
    let input = dir.path().join("in.matrix");
    let once = dir.path().join("once.matrix");
    let twice = dir.path().join("twice.matrix");

    let row_ids: Vec<i32> = (0..50).map(|r| r * 3 + 1).collect();
    let col_ids: Vec<Vec<i32>> = row_ids
        .iter()
        .map(|&r| (0..(r % 7)).map(|c| (r * 13 + c * 29) % 97).collect::<Vec<_>>())
        .map(|mut cols| {
            cols.sort_unstable();
            cols.dedup();
            cols
        })
        .collect();
    let values: Vec<Vec<f64>> = col_ids
        .iter()
        .map(|cols| cols.iter().map(|&c| (c as f64 / 97.0) - 0.5).collect())
        .collect();
    InMemoryMatrix::new(row_ids, col_ids, values)?.write_to(&input)?;

    let config = MatrixConfig::default();
    transpose_with(&input, &once, &config)?;
    transpose_with(&once, &twice, &config)?;

    let original = packed_entries(&input)?;
    assert_eq!(packed_entries(&twice)?, original);

    let a = InMemoryMatrix::load(&input)?;
    let b = InMemoryMatrix::load(&twice)?;
    assert_eq!(a.num_entries(), b.num_entries());
    for row in b.iter() {
        if row.num_cols() > 0 {
            let src = a.get_row(row.row_id()).expect("row in source");
            assert_eq!(src.col_ids(), row.col_ids());
        }
    }
    Ok(())
}

#[test]
fn tiny_budget_gives_same_file_as_one_batch() -> Result<()> {
    let dir = tempdir()?;
    let input = dir.path().join("in.matrix");
    let small = dir.path().join("small.matrix");
    let large = dir.path().join("large.matrix");

    let rows: Vec<(i32, Vec<(i32, f32)>)> = (0..40)
        .map(|r| (r, (0..(r % 5 + 1)).map(|c| (c * 11 + r % 3, 0.02 * c as f32)).collect()))
        .collect();
    let borrowed: Vec<(i32, &[(i32, f32)])> =
        rows.iter().map(|(id, cols)| (*id, cols.as_slice())).collect();
    write_sparse(&input, &borrowed)?;

    let m = SparseMatrix::open(&input)?;
    let tiny = Transposer::with_config(&m, &MatrixConfig::default()).with_budget_bytes(column_cost(1));
    let stats = tiny.transpose_to(&small)?;
    assert!(stats.batches > 1);
    assert_eq!(stats.batches, stats.rows);

    let one = Transposer::with_config(&m, &MatrixConfig::default())
        .with_budget_bytes(usize::MAX)
        .transpose_to(&large)?;
    assert_eq!(one.batches, 1);
    assert_eq!(one.entries, stats.entries);
    assert_eq!(fs::read(&small)?, fs::read(&large)?);
    Ok(())
}

#[test]
fn column_counts_match_entries() -> Result<()> {
    let dir = tempdir()?;
    let input = dir.path().join("in.matrix");
    write_sparse(&input, &[(1, &[(2, 0.5), (5, -0.3)]), (2, &[(2, 1.0)])])?;
    let m = SparseMatrix::open(&input)?;
    let counts = Transposer::with_config(&m, &MatrixConfig::default()).column_counts()?;
    assert_eq!(counts, vec![(2, 2), (5, 1)]);
    Ok(())
}

#[test]
fn count_mismatch_is_consistency_error() -> Result<()> {
    let dir = tempdir()?;
    let input = dir.path().join("in.matrix");
    write_sparse(&input, &[(1, &[(2, 0.5)]), (2, &[(2, 1.0)])])?;
    let m = SparseMatrix::open(&input)?;
    let t = Transposer::with_config(&m, &MatrixConfig::default());

    let err = t.scan_batch(&[(2, 3)]).err().expect("count mismatch");
    match err.downcast_ref::<MatrixError>() {
        Some(MatrixError::Consistency {
            col_id,
            expected,
            actual,
        }) => {
            assert_eq!((*col_id, *expected, *actual), (2, 3, 2));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    Ok(())
}

#[test]
fn empty_matrix_transposes_to_empty() -> Result<()> {
    let dir = tempdir()?;
    let input = dir.path().join("in.matrix");
    let output = dir.path().join("out.matrix");
    write_sparse(&input, &[])?;
    let stats = transpose_with(&input, &output, &MatrixConfig::default())?;
    assert_eq!(stats, TransposeStats { rows: 0, entries: 0, batches: 0 });
    assert_eq!(SparseMatrix::open(&output)?.num_rows(), 0);
    Ok(())
}

#[test]
fn missing_input_reports_path() -> Result<()> {
    let dir = tempdir()?;
    let input = dir.path().join("absent.matrix");
    let err = transpose_with(&input, dir.path().join("out"), &MatrixConfig::default())
        .err()
        .expect("missing input");
    assert!(format!("{err:#}").contains("absent.matrix"), "{err:#}");
    Ok(())
}
