use super::*;
use anyhow::Result;
use tempfile::tempdir;

fn sample() -> InMemoryMatrix {
    InMemoryMatrix::new(
        vec![100, 50, 75],
        vec![vec![50, 200], vec![100, 300, 400], vec![]],
        vec![vec![0.5, -0.25], vec![1.0, 2.0, 3.0], vec![]],
    )
    .unwrap()
}

// -------------------- Construction --------------------

#[test]
fn rows_by_id() {
    let m = sample();
    assert_eq!(m.num_rows(), 3);
    assert_eq!(m.num_entries(), 5);
    let row = m.get_row(50).unwrap();
    assert_eq!(row.row_id(), 50);
    assert_eq!(row.col_ids(), &[100, 300, 400]);
    assert_eq!(row.value_for_id(300), Some(2.0));
    assert!(m.get_row(51).is_none());
    assert_eq!(m.get_row(75).unwrap().num_cols(), 0);
}

#[test]
fn rejects_mismatched_lengths() {
    let err = InMemoryMatrix::new(vec![1, 2], vec![vec![]], vec![vec![], vec![]]).unwrap_err();
    assert!(matches!(err, MatrixError::InvalidArgument(_)));

    let err = InMemoryMatrix::new(vec![1], vec![vec![1, 2]], vec![vec![0.1]]).unwrap_err();
    assert!(matches!(err, MatrixError::InvalidArgument(_)));
}

#[test]
fn rejects_duplicate_rows() {
    let err = InMemoryMatrix::new(vec![1, 1], vec![vec![], vec![]], vec![vec![], vec![]])
        .unwrap_err();
    assert!(matches!(err, MatrixError::DuplicateRow(1)));
}

#[test]
fn value_range_and_norm() {
    let m = sample();
    assert_eq!(m.value_range(), Some((-0.25, 3.0)));
    let row = m.get_row(50).unwrap();
    assert!((row.norm() - 14f64.sqrt()).abs() < 1e-12);
    assert_eq!(InMemoryMatrix::default().value_range(), None);
}

// -------------------- Id compression --------------------

#[test]
fn compress_ids_rows_first_then_columns() -> Result<()> {
    let mut m = sample();
    m.compress_ids()?;

    assert_eq!(m.row_ids(), &[0, 1, 2]);
    let map = m.id_map().expect("map");
    assert_eq!(map[&100], 0);
    assert_eq!(map[&50], 1);
    assert_eq!(map[&75], 2);
    assert_eq!(map[&200], 3);
    assert_eq!(map[&300], 4);
    assert_eq!(map[&400], 5);
    assert_eq!(map.len(), 6);

    // row 100 → 0 had columns 50, 200 → 1, 3
    let row = m.get_row(0).expect("row 0");
    assert_eq!(row.col_ids(), &[1, 3]);
    assert_eq!(row.values(), &[0.5, -0.25]);
    assert!(m.get_row(100).is_none());
    Ok(())
}

#[test]
fn compress_ids_resorts_columns() -> Result<()> {
    // column 9 is seen first so it gets the smaller compressed id
    let mut m = InMemoryMatrix::new(
        vec![1, 2],
        vec![vec![9], vec![3, 9]],
        vec![vec![0.9], vec![0.3, 0.99]],
    )?;
    m.compress_ids()?;

    let row = m.get_row(1).expect("row 1");
    let map = m.id_map().expect("map");
    assert_eq!(map[&9], 2);
    assert_eq!(map[&3], 3);
    assert_eq!(row.col_ids(), &[2, 3]);
    assert_eq!(row.values(), &[0.99, 0.3]);
    Ok(())
}

#[test]
fn compress_twice_is_an_error() -> Result<()> {
    let mut m = sample();
    m.compress_ids()?;
    assert!(matches!(m.compress_ids(), Err(MatrixError::InvalidState(_))));
    Ok(())
}

// -------------------- Files --------------------

#[test]
fn write_then_load() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("m.matrix");
    let m = sample();
    m.write_to(&path)?;

    let disk = SparseMatrix::open(&path)?;
    assert_eq!(disk.value_conf().min_score(), -0.25);
    assert_eq!(disk.value_conf().max_score(), 3.0);
    let step = disk.value_conf().step() as f64;
    disk.close();

    let loaded = InMemoryMatrix::load(&path)?;
    assert_eq!(loaded.row_ids(), &[100, 50, 75]);
    for row in m.iter() {
        let back = loaded.get_row(row.row_id()).expect("row loaded");
        assert_eq!(back.col_ids(), row.col_ids());
        for (a, b) in back.values().iter().zip(row.values()) {
            assert!((a - b).abs() <= step, "{a} vs {b}");
        }
    }
    Ok(())
}

#[test]
fn from_matrix_copies_generic_source() -> Result<()> {
    let m = sample();
    let copy = InMemoryMatrix::from_matrix(&m)?;
    assert_eq!(copy.row_ids(), m.row_ids());
    assert_eq!(copy.num_entries(), m.num_entries());
    Ok(())
}

#[test]
fn write_empty_matrix() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("empty.matrix");
    InMemoryMatrix::default().write_to(&path)?;
    assert!(InMemoryMatrix::load(&path)?.is_empty());
    Ok(())
}
