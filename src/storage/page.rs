//! Page format: the common header shared by every on-disk page.
//!
//! Every page starts with a 24-byte header:
//!
//! ```text
//! offset  size  field
//! 0       4     page id (u32)
//! 4       1     page kind
//! 5       1     reserved
//! 6       2     free-space offset (u16, meaning owned by the kind)
//! 8       4     stored-type id (u32)
//! 12      4     checksum (crc32 of the page with this field zeroed)
//! 16      8     reserved
//! ```
//!
//! The checksum is stamped by the page manager on every write and
//! validated on every read from backing storage; a mismatch is a
//! corruption fault, never silently ignored.

pub mod heap_page;
pub mod internal_page;
pub mod leaf_page;

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

/// Fixed page size in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Size of the common page header.
pub const PAGE_HEADER_SIZE: usize = 24;

const OFFSET_PAGE_ID: usize = 0;
const OFFSET_KIND: usize = 4;
const OFFSET_FREE_SPACE: usize = 6;
const OFFSET_TYPE_ID: usize = 8;
const OFFSET_CHECKSUM: usize = 12;

/// Identifier of one page within the backing file. Page 0 is the
/// superblock, which doubles as the "no page" sentinel in link fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageId(pub u32);

impl PageId {
    /// Sentinel for absent links (page 0 is never a data page).
    pub const INVALID: PageId = PageId(0);

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Discriminant stored in the page header.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Super = 1,
    Heap = 2,
    Leaf = 3,
    Internal = 4,
    Overflow = 5,
    Free = 6,
}

impl PageKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(PageKind::Super),
            2 => Some(PageKind::Heap),
            3 => Some(PageKind::Leaf),
            4 => Some(PageKind::Internal),
            5 => Some(PageKind::Overflow),
            6 => Some(PageKind::Free),
            _ => None,
        }
    }
}

/// Reference to one record slot: the value side of index entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId {
    pub page_id: PageId,
    pub slot: u16,
}

impl RecordId {
    pub const ENCODED_SIZE: usize = 6;

    pub fn new(page_id: PageId, slot: u16) -> Self {
        Self { page_id, slot }
    }

    pub fn to_bytes(self) -> [u8; Self::ENCODED_SIZE] {
        let mut bytes = [0u8; Self::ENCODED_SIZE];
        bytes[0..4].copy_from_slice(&self.page_id.0.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.slot.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            page_id: PageId(LittleEndian::read_u32(&bytes[0..4])),
            slot: LittleEndian::read_u16(&bytes[4..6]),
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.page_id, self.slot)
    }
}

pub fn page_id(data: &[u8]) -> PageId {
    PageId(LittleEndian::read_u32(&data[OFFSET_PAGE_ID..OFFSET_PAGE_ID + 4]))
}

pub fn set_page_id(data: &mut [u8], id: PageId) {
    LittleEndian::write_u32(&mut data[OFFSET_PAGE_ID..OFFSET_PAGE_ID + 4], id.0);
}

pub fn page_kind(data: &[u8]) -> Option<PageKind> {
    PageKind::from_u8(data[OFFSET_KIND])
}

pub fn set_page_kind(data: &mut [u8], kind: PageKind) {
    data[OFFSET_KIND] = kind as u8;
}

pub fn free_space_offset(data: &[u8]) -> u16 {
    LittleEndian::read_u16(&data[OFFSET_FREE_SPACE..OFFSET_FREE_SPACE + 2])
}

pub fn set_free_space_offset(data: &mut [u8], offset: u16) {
    LittleEndian::write_u16(&mut data[OFFSET_FREE_SPACE..OFFSET_FREE_SPACE + 2], offset);
}

pub fn type_id(data: &[u8]) -> u32 {
    LittleEndian::read_u32(&data[OFFSET_TYPE_ID..OFFSET_TYPE_ID + 4])
}

pub fn set_type_id(data: &mut [u8], id: u32) {
    LittleEndian::write_u32(&mut data[OFFSET_TYPE_ID..OFFSET_TYPE_ID + 4], id);
}

pub fn stored_checksum(data: &[u8]) -> u32 {
    LittleEndian::read_u32(&data[OFFSET_CHECKSUM..OFFSET_CHECKSUM + 4])
}

/// Checksum of a page image, with the checksum field itself excluded.
pub fn compute_checksum(data: &[u8; PAGE_SIZE]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&data[..OFFSET_CHECKSUM]);
    hasher.update(&data[OFFSET_CHECKSUM + 4..]);
    hasher.finalize()
}

/// Recompute and store the checksum. Called before bytes leave the
/// buffer for backing storage.
pub fn stamp_checksum(data: &mut [u8; PAGE_SIZE]) {
    let checksum = compute_checksum(data);
    LittleEndian::write_u32(&mut data[OFFSET_CHECKSUM..OFFSET_CHECKSUM + 4], checksum);
}

/// Validate the stored checksum against the page contents.
pub fn verify_checksum(data: &[u8; PAGE_SIZE]) -> Result<(), (u32, u32)> {
    let stored = stored_checksum(data);
    let computed = compute_checksum(data);
    if stored == computed {
        Ok(())
    } else {
        Err((stored, computed))
    }
}

/// Initialize the common header of a fresh page.
pub fn init_page(data: &mut [u8; PAGE_SIZE], id: PageId, kind: PageKind) {
    data.fill(0);
    set_page_id(data, id);
    set_page_kind(data, kind);
    set_free_space_offset(data, PAGE_HEADER_SIZE as u16);
}

pub use heap_page::{HeapPage, HeapPageMut};
pub use internal_page::{InternalNode, InternalNodeMut};
pub use leaf_page::{LeafNode, LeafNodeMut};
