use super::{assert_row, sparse};
use crate::*;

// -------------------- Construction --------------------

#[test]
fn unsorted_columns_are_sorted_with_their_values() {
    let conf = ValueConf::default();
    let row = SparseRow::new(conf, 7, &[5, 2, 9], &[0.1, 0.2, 0.3]).unwrap();
    assert_eq!(row.row_id(), 7);
    assert_eq!(row.col_ids(), vec![2, 5, 9]);
    assert_row(&row, &[(2, 0.2), (5, 0.1), (9, 0.3)], &conf);
}

#[test]
fn repeated_column_is_invalid_state() {
    let err = SparseRow::new(ValueConf::default(), 1, &[3, 1, 3], &[0.1, 0.2, 0.3]).unwrap_err();
    assert!(matches!(err, MatrixError::InvalidState(_)), "{err}");
}

#[test]
fn length_mismatch_is_invalid_argument() {
    let err = SparseRow::new(ValueConf::default(), 1, &[1, 2], &[0.1]).unwrap_err();
    assert!(matches!(err, MatrixError::InvalidArgument(_)), "{err}");
}

#[test]
fn from_packed_keeps_codes_verbatim() {
    let conf = ValueConf::default();
    let row = SparseRow::from_packed(conf, 4, &[10, 3], &[123, -4567]).unwrap();
    assert_eq!(row.col_ids(), vec![3, 10]);
    assert_eq!(row.packed_values(), vec![-4567, 123]);
    assert_eq!(row.packed_value_at(1), 123);
}

#[test]
fn empty_row() {
    let row = sparse(3, &[]);
    assert_eq!(row.num_cols(), 0);
    assert_eq!(row.norm(), 0.0);
    assert!(row.as_map().is_empty());
    assert_eq!(row.as_bytes().len(), SPARSE_ROW_HEADER_BYTES);
}

// -------------------- Serialization --------------------

#[test]
fn serialized_layout_is_big_endian() {
    let row = sparse(258, &[(1, 0.0)]);
    let b = row.as_bytes();
    assert_eq!(b.len(), SPARSE_ROW_HEADER_BYTES + 6);
    assert_eq!(&b[0..4], &[0xFE, 0xFE, 0xFE, 0xFE]);
    assert_eq!(&b[4..8], &[0, 0, 1, 2]);
    assert_eq!(&b[8..12], &[0, 0, 0, 1]);
    assert_eq!(&b[12..16], &[0, 0, 0, 1]);
}

#[test]
fn parse_back_ignores_trailing_bytes() {
    let conf = ValueConf::default();
    let row = sparse(12, &[(4, 0.25), (8, -0.75)]);
    let mut bytes = row.as_bytes().to_vec();
    bytes.extend_from_slice(&[ROW_PADDING; 4]);
    bytes.extend_from_slice(&SPARSE_ROW_MAGIC.to_be_bytes());

    let parsed = SparseRow::from_bytes(conf, ByteView::borrowed(&bytes)).unwrap();
    assert_eq!(parsed.row_id(), 12);
    assert_eq!(parsed.as_bytes(), row.as_bytes());
    assert_row(&parsed, &[(4, 0.25), (8, -0.75)], &conf);
    assert_eq!(parsed.into_owned(), row);
}

#[test]
fn parse_rejects_wrong_magic() {
    let dense = DenseRow::new(ValueConf::default(), 1, vec![1, 2], &[0.1, 0.2]).unwrap();
    let err = SparseRow::from_bytes(ValueConf::default(), ByteView::borrowed(dense.as_bytes()))
        .unwrap_err();
    assert!(matches!(err, MatrixError::Format(_)), "{err}");
}

#[test]
fn parse_rejects_truncated_record() {
    let row = sparse(1, &[(1, 0.1), (2, 0.2)]);
    let short = &row.as_bytes()[..row.as_bytes().len() - 1];
    let err = SparseRow::from_bytes(ValueConf::default(), ByteView::borrowed(short)).unwrap_err();
    assert!(matches!(err, MatrixError::Format(_)), "{err}");
}

// -------------------- Lookups --------------------

#[test]
fn id_lookups() {
    let conf = ValueConf::default();
    let row = sparse(1, &[(2, 0.5), (5, -0.3), (11, 1.0)]);
    assert_eq!(row.index_for_id(5), Some(1));
    assert_eq!(row.index_for_id(11), Some(2));
    assert_eq!(row.index_for_id(3), None);
    assert!((row.value_for_id(2).unwrap() - 0.5).abs() <= conf.step());
    assert_eq!(row.value_for_id(4), None);

    let map = row.as_map();
    assert_eq!(map.keys().copied().collect::<Vec<_>>(), vec![2, 5, 11]);
}

#[test]
fn norm_over_values() {
    let row = sparse(1, &[(1, 0.6), (2, 0.8)]);
    assert!((row.norm() - 1.0).abs() < 1e-3);
}
