//! Index engine error types.

use thiserror::Error;

use crate::schema::{DecodeError, SchemaError};
use crate::storage::page::PageId;
use crate::storage::StorageError;

/// Errors that can occur in the B-tree index engine.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("key bytes do not decode under the index key type: {0}")]
    Key(#[from] DecodeError),

    #[error("key of {size} bytes exceeds the {max}-byte limit for this index")]
    KeyTooLarge { size: usize, max: usize },

    #[error("duplicate key in unique index")]
    DuplicateKey,

    #[error("tree order must lie in {min}..={max}, got {got}")]
    InvalidOrder { got: usize, min: usize, max: usize },

    #[error("structural invariant violation on page {page_id}: {detail}")]
    StructuralInvariantViolation { page_id: PageId, detail: &'static str },

    #[error("index is halted after a structural invariant violation")]
    Halted,
}

/// Result type for index operations.
pub type IndexResult<T> = Result<T, IndexError>;
