//! Error type shared by every matrix operation.
//!
//! An unknown row id is never an error: lookups return `Ok(None)`.

use std::io;

use thiserror::Error;

use crate::ValueConf;

/// Errors that can occur while building, opening or reading a matrix.
#[derive(Debug, Error)]
pub enum MatrixError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Bad magic number, truncated header, misordered index or corrupt row.
    #[error("invalid matrix format: {0}")]
    Format(String),

    /// A row's quantization bounds are incompatible with the writer's.
    #[error("value conf mismatch: writer has {expected:?}, row has {actual:?}")]
    ConfigMismatch { expected: ValueConf, actual: ValueConf },

    /// A dense row does not carry the column ids fixed by the first row.
    #[error("column mismatch in dense row {row_id}: {detail}")]
    ColumnMismatch { row_id: i32, detail: String },

    /// The same row id was written twice to one matrix.
    #[error("duplicate row id {0}")]
    DuplicateRow(i32),

    /// Data that should be impossible to construct, e.g. repeated column ids.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A caller-supplied argument was rejected.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Transpose bookkeeping disagreed with the source matrix.
    #[error("consistency check failed for column {col_id}: expected {expected} entries, found {actual}")]
    Consistency {
        col_id: i32,
        expected: usize,
        actual: usize,
    },
}

/// Result type for matrix operations.
pub type Result<T> = std::result::Result<T, MatrixError>;

impl MatrixError {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        MatrixError::Format(msg.into())
    }
}
