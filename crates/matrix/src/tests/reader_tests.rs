use super::{assert_row, sparse};
use crate::*;
use anyhow::Result;
use byteorder::{BigEndian, WriteBytesExt};
use config::MatrixConfig;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn write_sample(path: &Path) -> Result<()> {
    SparseMatrixWriter::write_all(
        path,
        vec![
            sparse(5, &[(1, 0.1)]),
            sparse(3, &[(2, 0.2), (4, 0.4)]),
            sparse(9, &[(3, 0.3)]),
        ],
    )?;
    Ok(())
}

fn total_entries<M: Matrix>(m: &M) -> crate::Result<usize> {
    let mut n = 0;
    for id in m.row_ids().iter() {
        if let Some(row) = m.get_row(*id)? {
            n += row.num_cols();
        }
    }
    Ok(n)
}

// -------------------- Open & validate --------------------

#[test]
fn rejects_unknown_magic() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("junk");
    fs::write(&path, vec![0x42u8; 64])?;
    assert!(matches!(SparseMatrix::open(&path), Err(MatrixError::Format(_))));
    assert!(matches!(detect_kind(&path), Err(MatrixError::Format(_))));
    Ok(())
}

#[test]
fn rejects_tiny_file() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("tiny");
    fs::write(&path, [0x00, 0xAB])?;
    assert!(matches!(SparseMatrix::open(&path), Err(MatrixError::Format(_))));
    Ok(())
}

#[test]
fn rejects_truncated_header() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("m.matrix");
    write_sample(&path)?;
    let bytes = fs::read(&path)?;
    fs::write(&path, &bytes[..24])?;
    let err = SparseMatrix::open(&path).err().expect("truncated header");
    assert!(matches!(err, MatrixError::Format(_)), "{err}");
    Ok(())
}

#[test]
fn rejects_misordered_index() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("bad.matrix");

    // two rows whose ids are stored out of order
    let mut buf = Vec::new();
    buf.write_u32::<BigEndian>(SPARSE_MAGIC)?;
    buf.write_f32::<BigEndian>(DEFAULT_MIN_SCORE)?;
    buf.write_f32::<BigEndian>(DEFAULT_MAX_SCORE)?;
    buf.write_i32::<BigEndian>(2)?;
    buf.write_i32::<BigEndian>(2)?;
    buf.write_i32::<BigEndian>(1)?;
    buf.write_i64::<BigEndian>(40)?;
    buf.write_i64::<BigEndian>(64)?;
    for id in [2, 1] {
        let row = sparse(id, &[(1, 0.5)]);
        buf.extend_from_slice(row.as_bytes());
        buf.extend_from_slice(&[ROW_PADDING; 6]);
    }
    fs::write(&path, &buf)?;

    let err = SparseMatrix::open(&path).err().expect("misordered");
    assert!(matches!(err, MatrixError::Format(_)), "{err}");
    Ok(())
}

#[test]
fn rejects_offset_outside_file() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("bad.matrix");
    let mut buf = Vec::new();
    buf.write_u32::<BigEndian>(SPARSE_MAGIC)?;
    buf.write_f32::<BigEndian>(DEFAULT_MIN_SCORE)?;
    buf.write_f32::<BigEndian>(DEFAULT_MAX_SCORE)?;
    buf.write_i32::<BigEndian>(1)?;
    buf.write_i32::<BigEndian>(1)?;
    buf.write_i64::<BigEndian>(4096)?;
    fs::write(&path, &buf)?;

    assert!(matches!(SparseMatrix::open(&path), Err(MatrixError::Format(_))));
    Ok(())
}

#[test]
fn dense_file_is_not_sparse() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("d.matrix");
    let row = DenseRow::new(ValueConf::default(), 1, vec![1], &[0.5])?;
    DenseMatrixWriter::write_all(&path, vec![row])?;
    assert!(matches!(SparseMatrix::open(&path), Err(MatrixError::Format(_))));
    assert_eq!(detect_kind(&path)?, MatrixKind::Dense);
    Ok(())
}

#[test]
fn large_header_is_remapped() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("m.matrix");
    let rows: Vec<_> = (0..500).map(|i| sparse(i, &[(i, 0.5)])).collect();
    SparseMatrixWriter::write_all(&path, rows)?;

    // smaller than the 16 + 12 × 500 byte header
    let config = MatrixConfig::default().with_header_window(64);
    let m = SparseMatrix::open_with(&path, &config)?;
    assert_eq!(m.num_rows(), 500);
    assert_eq!(m.get_row(499)?.expect("row").col_ids(), vec![499]);
    Ok(())
}

// -------------------- Lookup & iteration --------------------

#[test]
fn iteration_follows_disk_order() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("m.matrix");
    write_sample(&path)?;

    let m = SparseMatrix::open(&path)?;
    assert_eq!(m.sorted_row_ids(), &[3, 5, 9]);
    assert_eq!(&m.row_ids()[..], &[5, 3, 9]);

    let first: Vec<i32> = m.iter().map(|r| r.map(|r| r.row_id())).collect::<crate::Result<_>>()?;
    assert_eq!(first, vec![5, 3, 9]);

    // restartable
    let mut second = Vec::new();
    for row in &m {
        second.push(row?.row_id());
    }
    assert_eq!(second, first);
    assert_eq!(m.iter().size_hint(), (3, Some(3)));
    Ok(())
}

#[test]
fn rows_borrow_from_the_matrix() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("m.matrix");
    write_sample(&path)?;

    let m = SparseMatrix::open(&path)?;
    let a = m.get_row(3)?.expect("row 3");
    let b = m.get_row(9)?.expect("row 9");
    assert_row(&a, &[(2, 0.2), (4, 0.4)], m.value_conf());
    assert_row(&b, &[(3, 0.3)], m.value_conf());

    let owned = a.into_owned();
    drop(b);
    m.close();
    assert_eq!(owned.col_ids(), vec![2, 4]);
    Ok(())
}

#[test]
fn generic_over_matrix_trait() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("m.matrix");
    write_sample(&path)?;
    let m = SparseMatrix::open(&path)?;
    assert_eq!(total_entries(&m)?, 4);
    Ok(())
}

#[test]
fn two_readers_on_one_file() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("m.matrix");
    write_sample(&path)?;
    let a = SparseMatrix::open(&path)?;
    let b = SparseMatrix::open(&path)?;
    assert_eq!(a.get_row(5)?, b.get_row(5)?);
    assert_eq!(a.path(), path.as_path());
    Ok(())
}

#[test]
fn header_window_smaller_than_fixed_fields() -> Result<()> {
    let dir = tempdir()?;
    let config = MatrixConfig::default().with_header_window(8);

    let path = dir.path().join("s.matrix");
    write_sample(&path)?;
    let m = SparseMatrix::open_with(&path, &config)?;
    assert_eq!(m.sorted_row_ids(), &[3, 5, 9]);
    assert_row(&m.get_row(3)?.expect("row 3"), &[(2, 0.2), (4, 0.4)], m.value_conf());

    // the dense fixed fields are 20 bytes
    let path = dir.path().join("d.matrix");
    let cols: std::sync::Arc<[i32]> = std::sync::Arc::from(vec![1, 2]);
    DenseMatrixWriter::write_all(
        &path,
        vec![DenseRow::new(ValueConf::default(), 4, cols, &[0.5, -0.5])?],
    )?;
    let d = DenseMatrix::open_with(&path, &config)?;
    assert_eq!(&d.col_ids()[..], &[1, 2]);
    assert_eq!(d.num_rows(), 1);
    Ok(())
}

// -------------------- Sharing --------------------

fn assert_send_sync<T: Send + Sync>() {}

#[test]
fn readers_are_send_and_sync() {
    assert_send_sync::<SparseMatrix>();
    assert_send_sync::<DenseMatrix>();
    assert_send_sync::<PagedRows>();
}

#[test]
fn one_reader_shared_by_threads() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("m.matrix");
    let rows: Vec<_> = (0..200).map(|i| sparse(i, &[(i, 0.25), (i + 1, -0.25)])).collect();
    SparseMatrixWriter::write_all(&path, rows)?;

    let config = MatrixConfig::default().with_page_size(256);
    let m = SparseMatrix::open_with(&path, &config)?;
    let shared = &m;
    let totals: Vec<usize> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|t| {
                s.spawn(move || -> crate::Result<usize> {
                    let mut n = 0;
                    for id in (t..200).step_by(4) {
                        let row = shared.get_row(id)?.expect("row written");
                        assert_eq!(row.row_id(), id);
                        assert_eq!(row.col_ids(), vec![id, id + 1]);
                        n += row.num_cols();
                    }
                    for row in shared.iter() {
                        n += row?.num_cols();
                    }
                    Ok(n)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("reader thread panicked"))
            .collect::<crate::Result<Vec<_>>>()
    })?;
    assert_eq!(totals.len(), 4);
    for n in totals {
        assert_eq!(n, 100 + 400);
    }
    Ok(())
}
