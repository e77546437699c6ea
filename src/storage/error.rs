//! Storage layer error types.

use thiserror::Error;

use crate::storage::page::PageId;

/// Errors that can occur in the page and buffer layer.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O fault: {0}")]
    Io(#[from] std::io::Error),

    #[error("checksum mismatch on page {page_id}: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        page_id: PageId,
        stored: u32,
        computed: u32,
    },

    #[error("page {0} is beyond the end of the file")]
    PageNotFound(PageId),

    #[error("buffer pool exhausted: all {capacity} frames are pinned")]
    PoolExhausted { capacity: usize },

    #[error("page {0} is pinned and cannot be freed")]
    PagePinned(PageId),

    #[error("page 0 is reserved for the superblock")]
    ReservedPage,

    #[error("not a stratadb file: bad superblock magic")]
    BadMagic,

    #[error("unsupported file format version {0}")]
    UnsupportedVersion(u16),

    #[error("file page size {file} does not match compiled page size {compiled}")]
    PageSizeMismatch { file: u32, compiled: u32 },

    #[error("slot {slot} on page {page_id} is empty or out of bounds")]
    SlotNotFound { page_id: PageId, slot: u16 },

    #[error("record of {size} bytes cannot fit in a page")]
    RecordTooLarge { size: usize },
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
