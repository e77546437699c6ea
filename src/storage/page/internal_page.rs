//! Internal node layout for the index engine.
//!
//! Beneath the common page header:
//!
//! ```text
//! offset  size  field
//! 24      2     key count (u16)
//! 26      4     leftmost child page id (u32)
//! 30      2     upper (u16): start of the key heap at the page tail
//! 32      ...   slot array, 8 bytes per key
//! ```
//!
//! Each slot is (key offset u16, key length u16, right child u32): the
//! child holds keys greater than or equal to the slot key. An internal
//! node therefore always has exactly one more child than keys, the
//! extra one being the leftmost child in the header.

use byteorder::{ByteOrder, LittleEndian};

use crate::storage::page::{self, PageId, PageKind, PAGE_HEADER_SIZE, PAGE_SIZE};

const OFFSET_KEY_COUNT: usize = PAGE_HEADER_SIZE;
const OFFSET_LEFTMOST: usize = PAGE_HEADER_SIZE + 2;
const OFFSET_UPPER: usize = PAGE_HEADER_SIZE + 6;
pub const INTERNAL_SLOTS_START: usize = PAGE_HEADER_SIZE + 8;
pub const INTERNAL_SLOT_SIZE: usize = 8;

/// Read-only view of an internal page.
pub struct InternalNode<'a> {
    data: &'a [u8; PAGE_SIZE],
}

impl<'a> InternalNode<'a> {
    pub fn new(data: &'a [u8; PAGE_SIZE]) -> Self {
        Self { data }
    }

    pub fn key_count(&self) -> usize {
        LittleEndian::read_u16(&self.data[OFFSET_KEY_COUNT..OFFSET_KEY_COUNT + 2]) as usize
    }

    pub fn key_at(&self, index: usize) -> &'a [u8] {
        debug_assert!(index < self.key_count());
        let base = INTERNAL_SLOTS_START + index * INTERNAL_SLOT_SIZE;
        let offset = LittleEndian::read_u16(&self.data[base..base + 2]) as usize;
        let len = LittleEndian::read_u16(&self.data[base + 2..base + 4]) as usize;
        &self.data[offset..offset + len]
    }

    /// Child `index` for `index` in `0..=key_count`: child 0 is the
    /// leftmost pointer, child i+1 is the right child of key i.
    pub fn child_at(&self, index: usize) -> PageId {
        debug_assert!(index <= self.key_count());
        if index == 0 {
            PageId(LittleEndian::read_u32(
                &self.data[OFFSET_LEFTMOST..OFFSET_LEFTMOST + 4],
            ))
        } else {
            let base = INTERNAL_SLOTS_START + (index - 1) * INTERNAL_SLOT_SIZE;
            PageId(LittleEndian::read_u32(&self.data[base + 4..base + 8]))
        }
    }

    pub fn keys(&self) -> Vec<Vec<u8>> {
        (0..self.key_count()).map(|i| self.key_at(i).to_vec()).collect()
    }

    pub fn children(&self) -> Vec<PageId> {
        (0..=self.key_count()).map(|i| self.child_at(i)).collect()
    }

    /// Position of `child` in the child pointer list.
    pub fn position_of_child(&self, child: PageId) -> Option<usize> {
        (0..=self.key_count()).find(|&i| self.child_at(i) == child)
    }

    /// Layout sanity: slot extents inside the page, every child pointer
    /// valid. One-more-children-than-keys holds by construction of the
    /// layout; a zero child pointer is the detectable corruption.
    pub fn validate(&self) -> Result<(), &'static str> {
        let count = self.key_count();
        let slots_end = INTERNAL_SLOTS_START + count * INTERNAL_SLOT_SIZE;
        if slots_end > PAGE_SIZE {
            return Err("internal slot array exceeds page");
        }
        for i in 0..count {
            let base = INTERNAL_SLOTS_START + i * INTERNAL_SLOT_SIZE;
            let offset = LittleEndian::read_u16(&self.data[base..base + 2]) as usize;
            let len = LittleEndian::read_u16(&self.data[base + 2..base + 4]) as usize;
            if offset < slots_end || offset + len > PAGE_SIZE {
                return Err("internal key bytes out of bounds");
            }
        }
        for i in 0..=count {
            if !self.child_at(i).is_valid() {
                return Err("internal node has an invalid child pointer");
            }
        }
        Ok(())
    }
}

/// Mutable view of an internal page.
pub struct InternalNodeMut<'a> {
    data: &'a mut [u8; PAGE_SIZE],
}

impl<'a> InternalNodeMut<'a> {
    pub fn new(data: &'a mut [u8; PAGE_SIZE]) -> Self {
        Self { data }
    }

    /// Initialize an empty internal node over a fresh page.
    pub fn init(data: &'a mut [u8; PAGE_SIZE], page_id: PageId, type_id: u32) -> Self {
        page::init_page(data, page_id, PageKind::Internal);
        page::set_type_id(data, type_id);
        let mut node = Self { data };
        node.set_upper(PAGE_SIZE);
        node
    }

    pub fn as_read(&self) -> InternalNode<'_> {
        InternalNode::new(self.data)
    }

    /// Rewrite the page from keys and children, where
    /// `children.len() == keys.len() + 1`. Returns false if the node
    /// cannot fit, leaving the page untouched.
    pub fn write_node(&mut self, keys: &[Vec<u8>], children: &[PageId]) -> bool {
        assert_eq!(children.len(), keys.len() + 1);
        let slot_bytes = keys.len() * INTERNAL_SLOT_SIZE;
        let key_bytes: usize = keys.iter().map(|k| k.len()).sum();
        if INTERNAL_SLOTS_START + slot_bytes + key_bytes > PAGE_SIZE {
            return false;
        }

        self.data[INTERNAL_SLOTS_START..].fill(0);
        LittleEndian::write_u32(
            &mut self.data[OFFSET_LEFTMOST..OFFSET_LEFTMOST + 4],
            children[0].0,
        );
        let mut upper = PAGE_SIZE;
        for (i, key) in keys.iter().enumerate() {
            upper -= key.len();
            self.data[upper..upper + key.len()].copy_from_slice(key);
            let base = INTERNAL_SLOTS_START + i * INTERNAL_SLOT_SIZE;
            LittleEndian::write_u16(&mut self.data[base..base + 2], upper as u16);
            LittleEndian::write_u16(&mut self.data[base + 2..base + 4], key.len() as u16);
            LittleEndian::write_u32(&mut self.data[base + 4..base + 8], children[i + 1].0);
        }
        LittleEndian::write_u16(
            &mut self.data[OFFSET_KEY_COUNT..OFFSET_KEY_COUNT + 2],
            keys.len() as u16,
        );
        self.set_upper(upper);
        page::set_free_space_offset(self.data, (INTERNAL_SLOTS_START + slot_bytes) as u16);
        true
    }

    /// Redirect one child pointer in place.
    pub fn set_child_at(&mut self, index: usize, child: PageId) {
        debug_assert!(index <= self.as_read().key_count());
        if index == 0 {
            LittleEndian::write_u32(&mut self.data[OFFSET_LEFTMOST..OFFSET_LEFTMOST + 4], child.0);
        } else {
            let base = INTERNAL_SLOTS_START + (index - 1) * INTERNAL_SLOT_SIZE;
            LittleEndian::write_u32(&mut self.data[base + 4..base + 8], child.0);
        }
    }

    fn set_upper(&mut self, upper: usize) {
        LittleEndian::write_u16(&mut self.data[OFFSET_UPPER..OFFSET_UPPER + 2], upper as u16);
    }
}
