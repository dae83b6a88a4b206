//! # Matrix - Packed Sparse/Dense Matrix Files
//!
//! Write-once, read-many storage for large numeric matrices (link graphs,
//! co-occurrence tables, relatedness vectors) that may not fit in memory.
//!
//! A [`SparseMatrixWriter`] or [`DenseMatrixWriter`] streams rows to disk in
//! any order and finalizes one file. [`SparseMatrix`] and [`DenseMatrix`]
//! open it read-only, copy the row index into memory and map the body in
//! bounded windows, so row lookups are a binary search plus a slice.
//!
//! ## File layout
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ HEADER                                                         │
//! │                                                               │
//! │ magic (u32) | min_score (f32) | max_score (f32)                │
//! │ num_rows (i32) | [num_cols (i32), dense only]                  │
//! ├───────────────────────────────────────────────────────────────┤
//! │ INDEX (sorted by row id)                                       │
//! │                                                               │
//! │ row_id (i32) × num_rows                                        │
//! │ offset (i64) × num_rows    absolute file position of each row  │
//! │ [col_id (i32) × num_cols, dense only]                          │
//! ├───────────────────────────────────────────────────────────────┤
//! │ BODY (rows in write order)                                     │
//! │                                                               │
//! │ sparse: 0xFEFEFEFE | row_id | n | col_id × n | packed × n      │
//! │ dense:  0xFEFEFEFA | row_id | packed × num_cols                │
//! │                                                               │
//! │ each row padded with 0x80 to a multiple of 8 bytes             │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are big-endian. Values are stored as `i16` codes under the
//! file's [`ValueConf`], so reads return scores within one quantization step
//! of what was written.

mod bytes;
mod dense_row;
mod error;
mod format;
mod paging;
mod reader;
mod row;
mod sparse_row;
mod value_conf;
mod writer;

pub use bytes::ByteView;
pub use dense_row::{DenseRow, DENSE_ROW_HEADER_BYTES};
pub use error::{MatrixError, Result};
pub use format::{
    detect_kind, padding_for, MatrixKind, DENSE_MAGIC, DENSE_ROW_MAGIC, ROW_ALIGNMENT,
    ROW_PADDING, SPARSE_MAGIC, SPARSE_ROW_MAGIC,
};
pub use paging::{PagedRows, WindowSpan};
pub use reader::{DenseMatrix, DenseRowIter, Matrix, SparseMatrix, SparseRowIter};
pub use row::{MatrixRow, PackedRow};
pub use sparse_row::{SparseRow, SPARSE_ROW_HEADER_BYTES};
pub use value_conf::{ValueConf, DEFAULT_MAX_SCORE, DEFAULT_MIN_SCORE, PACKED_RANGE};
pub use writer::{DenseMatrixWriter, SparseMatrixWriter};

#[cfg(test)]
mod tests;
