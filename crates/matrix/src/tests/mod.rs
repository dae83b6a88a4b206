mod reader_tests;
mod row_tests;
mod value_conf_tests;

use crate::{MatrixRow, SparseRow, ValueConf};

/// Sparse row under the default conf.
pub(crate) fn sparse(row_id: i32, pairs: &[(i32, f32)]) -> SparseRow<'static> {
    SparseRow::from_pairs(ValueConf::default(), row_id, pairs.iter().copied())
        .expect("valid test row")
}

/// Asserts a row holds `expected` pairs, comparing values within one step.
pub(crate) fn assert_row<R: MatrixRow>(row: &R, expected: &[(i32, f32)], conf: &ValueConf) {
    assert_eq!(row.num_cols(), expected.len(), "column count of row {}", row.row_id());
    for (i, &(col, value)) in expected.iter().enumerate() {
        assert_eq!(row.col_id_at(i), col, "column {i} of row {}", row.row_id());
        let got = row.value_at(i);
        assert!(
            (got - value).abs() <= conf.step(),
            "row {} col {col}: got {got}, expected {value}",
            row.row_id()
        );
    }
}
