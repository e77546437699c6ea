//! Leaf node layout for the index engine.
//!
//! Beneath the common page header:
//!
//! ```text
//! offset  size  field
//! 24      2     entry count (u16)
//! 26      4     next leaf page id (u32, 0 = none)
//! 30      4     prev leaf page id (u32, 0 = none)
//! 34      2     upper (u16): start of the key heap at the page tail
//! 36      ...   slot array, 10 bytes per entry
//! ```
//!
//! Each slot is (key offset u16, key length u16, record id 6 bytes).
//! Slots are kept in key order; key bytes live in a heap growing down
//! from the page tail. Mutations rebuild the slot array and heap from
//! the logical entry list, which also compacts abandoned key bytes.

use byteorder::{ByteOrder, LittleEndian};

use crate::storage::page::{
    self, PageId, PageKind, RecordId, PAGE_HEADER_SIZE, PAGE_SIZE,
};

const OFFSET_ENTRY_COUNT: usize = PAGE_HEADER_SIZE;
const OFFSET_NEXT: usize = PAGE_HEADER_SIZE + 2;
const OFFSET_PREV: usize = PAGE_HEADER_SIZE + 6;
const OFFSET_UPPER: usize = PAGE_HEADER_SIZE + 10;
pub const LEAF_SLOTS_START: usize = PAGE_HEADER_SIZE + 12;
pub const LEAF_SLOT_SIZE: usize = 10;

/// Read-only view of a leaf page.
pub struct LeafNode<'a> {
    data: &'a [u8; PAGE_SIZE],
}

impl<'a> LeafNode<'a> {
    pub fn new(data: &'a [u8; PAGE_SIZE]) -> Self {
        Self { data }
    }

    pub fn entry_count(&self) -> usize {
        LittleEndian::read_u16(&self.data[OFFSET_ENTRY_COUNT..OFFSET_ENTRY_COUNT + 2]) as usize
    }

    pub fn next_leaf(&self) -> Option<PageId> {
        let id = PageId(LittleEndian::read_u32(&self.data[OFFSET_NEXT..OFFSET_NEXT + 4]));
        id.is_valid().then_some(id)
    }

    pub fn prev_leaf(&self) -> Option<PageId> {
        let id = PageId(LittleEndian::read_u32(&self.data[OFFSET_PREV..OFFSET_PREV + 4]));
        id.is_valid().then_some(id)
    }

    pub fn key_at(&self, index: usize) -> &'a [u8] {
        let (offset, len, _) = self.slot(index);
        &self.data[offset..offset + len]
    }

    pub fn record_id_at(&self, index: usize) -> RecordId {
        let (_, _, rid) = self.slot(index);
        rid
    }

    pub fn entries(&self) -> Vec<(Vec<u8>, RecordId)> {
        (0..self.entry_count())
            .map(|i| (self.key_at(i).to_vec(), self.record_id_at(i)))
            .collect()
    }

    /// Layout sanity: slot extents inside the page, counts plausible.
    /// Key ordering is checked by the index engine, which owns the
    /// comparison rule.
    pub fn validate(&self) -> Result<(), &'static str> {
        let count = self.entry_count();
        let slots_end = LEAF_SLOTS_START + count * LEAF_SLOT_SIZE;
        if slots_end > PAGE_SIZE {
            return Err("leaf slot array exceeds page");
        }
        for i in 0..count {
            let base = LEAF_SLOTS_START + i * LEAF_SLOT_SIZE;
            let offset = LittleEndian::read_u16(&self.data[base..base + 2]) as usize;
            let len = LittleEndian::read_u16(&self.data[base + 2..base + 4]) as usize;
            if offset < slots_end || offset + len > PAGE_SIZE {
                return Err("leaf key bytes out of bounds");
            }
        }
        Ok(())
    }

    fn slot(&self, index: usize) -> (usize, usize, RecordId) {
        debug_assert!(index < self.entry_count());
        let base = LEAF_SLOTS_START + index * LEAF_SLOT_SIZE;
        let offset = LittleEndian::read_u16(&self.data[base..base + 2]) as usize;
        let len = LittleEndian::read_u16(&self.data[base + 2..base + 4]) as usize;
        let rid = RecordId::from_bytes(&self.data[base + 4..base + 10]);
        (offset, len, rid)
    }
}

/// Mutable view of a leaf page.
pub struct LeafNodeMut<'a> {
    data: &'a mut [u8; PAGE_SIZE],
}

impl<'a> LeafNodeMut<'a> {
    pub fn new(data: &'a mut [u8; PAGE_SIZE]) -> Self {
        Self { data }
    }

    /// Initialize an empty leaf over a fresh page.
    pub fn init(data: &'a mut [u8; PAGE_SIZE], page_id: PageId, type_id: u32) -> Self {
        page::init_page(data, page_id, PageKind::Leaf);
        page::set_type_id(data, type_id);
        let mut leaf = Self { data };
        leaf.set_upper(PAGE_SIZE);
        leaf.set_entry_count(0);
        leaf
    }

    pub fn as_read(&self) -> LeafNode<'_> {
        LeafNode::new(self.data)
    }

    pub fn set_next_leaf(&mut self, next: Option<PageId>) {
        let raw = next.map_or(0, |id| id.0);
        LittleEndian::write_u32(&mut self.data[OFFSET_NEXT..OFFSET_NEXT + 4], raw);
    }

    pub fn set_prev_leaf(&mut self, prev: Option<PageId>) {
        let raw = prev.map_or(0, |id| id.0);
        LittleEndian::write_u32(&mut self.data[OFFSET_PREV..OFFSET_PREV + 4], raw);
    }

    /// Replace the record reference of an existing entry in place.
    pub fn set_record_id_at(&mut self, index: usize, rid: RecordId) {
        debug_assert!(index < self.as_read().entry_count());
        let base = LEAF_SLOTS_START + index * LEAF_SLOT_SIZE;
        self.data[base + 4..base + 10].copy_from_slice(&rid.to_bytes());
    }

    /// Rewrite the page from a sorted entry list. Returns false if the
    /// entries cannot fit, leaving the page untouched.
    pub fn write_entries(&mut self, entries: &[(Vec<u8>, RecordId)]) -> bool {
        let slot_bytes = entries.len() * LEAF_SLOT_SIZE;
        let key_bytes: usize = entries.iter().map(|(k, _)| k.len()).sum();
        if LEAF_SLOTS_START + slot_bytes + key_bytes > PAGE_SIZE {
            return false;
        }

        // Clear old slots and heap before rewriting.
        self.data[LEAF_SLOTS_START..].fill(0);
        let mut upper = PAGE_SIZE;
        for (i, (key, rid)) in entries.iter().enumerate() {
            upper -= key.len();
            self.data[upper..upper + key.len()].copy_from_slice(key);
            let base = LEAF_SLOTS_START + i * LEAF_SLOT_SIZE;
            LittleEndian::write_u16(&mut self.data[base..base + 2], upper as u16);
            LittleEndian::write_u16(&mut self.data[base + 2..base + 4], key.len() as u16);
            self.data[base + 4..base + 10].copy_from_slice(&rid.to_bytes());
        }
        self.set_entry_count(entries.len());
        self.set_upper(upper);
        page::set_free_space_offset(self.data, (LEAF_SLOTS_START + slot_bytes) as u16);
        true
    }

    fn set_entry_count(&mut self, count: usize) {
        LittleEndian::write_u16(
            &mut self.data[OFFSET_ENTRY_COUNT..OFFSET_ENTRY_COUNT + 2],
            count as u16,
        );
    }

    fn set_upper(&mut self, upper: usize) {
        LittleEndian::write_u16(&mut self.data[OFFSET_UPPER..OFFSET_UPPER + 2], upper as u16);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rid(n: u32) -> RecordId {
        RecordId::new(PageId(n), n as u16)
    }

    #[test]
    fn test_init_empty() {
        let mut data = [0u8; PAGE_SIZE];
        let leaf = LeafNodeMut::init(&mut data, PageId(5), 1);
        let read = leaf.as_read();
        assert_eq!(read.entry_count(), 0);
        assert_eq!(read.next_leaf(), None);
        assert_eq!(read.prev_leaf(), None);
        assert_eq!(page::page_kind(&data), Some(PageKind::Leaf));
    }

    #[test]
    fn test_write_and_read_entries() {
        let mut data = [0u8; PAGE_SIZE];
        let mut leaf = LeafNodeMut::init(&mut data, PageId(5), 1);

        let entries = vec![
            (vec![1u8, 0], rid(10)),
            (vec![2u8, 0], rid(20)),
            (vec![3u8, 0], rid(30)),
        ];
        assert!(leaf.write_entries(&entries));

        let read = leaf.as_read();
        assert_eq!(read.entry_count(), 3);
        assert_eq!(read.key_at(0), &[1, 0]);
        assert_eq!(read.key_at(2), &[3, 0]);
        assert_eq!(read.record_id_at(1), rid(20));
        assert_eq!(read.entries(), entries);
        read.validate().unwrap();
    }

    #[test]
    fn test_rewrite_replaces_contents() {
        let mut data = [0u8; PAGE_SIZE];
        let mut leaf = LeafNodeMut::init(&mut data, PageId(5), 1);
        leaf.write_entries(&[(vec![9u8; 100], rid(1)), (vec![10u8; 100], rid(2))]);
        leaf.write_entries(&[(vec![7u8, 7], rid(3))]);

        let read = leaf.as_read();
        assert_eq!(read.entry_count(), 1);
        assert_eq!(read.key_at(0), &[7, 7]);
    }

    #[test]
    fn test_chain_pointers() {
        let mut data = [0u8; PAGE_SIZE];
        let mut leaf = LeafNodeMut::init(&mut data, PageId(5), 1);
        leaf.set_next_leaf(Some(PageId(8)));
        leaf.set_prev_leaf(Some(PageId(2)));
        assert_eq!(leaf.as_read().next_leaf(), Some(PageId(8)));
        assert_eq!(leaf.as_read().prev_leaf(), Some(PageId(2)));
        leaf.set_next_leaf(None);
        assert_eq!(leaf.as_read().next_leaf(), None);
    }

    #[test]
    fn test_overfull_rejected() {
        let mut data = [0u8; PAGE_SIZE];
        let mut leaf = LeafNodeMut::init(&mut data, PageId(5), 1);
        let huge = vec![(vec![0u8; PAGE_SIZE], rid(1))];
        assert!(!leaf.write_entries(&huge));
        assert_eq!(leaf.as_read().entry_count(), 0);
    }

    #[test]
    fn test_set_record_id_in_place() {
        let mut data = [0u8; PAGE_SIZE];
        let mut leaf = LeafNodeMut::init(&mut data, PageId(5), 1);
        leaf.write_entries(&[(vec![1u8], rid(1))]);
        leaf.set_record_id_at(0, rid(42));
        assert_eq!(leaf.as_read().record_id_at(0), rid(42));
        assert_eq!(leaf.as_read().key_at(0), &[1]);
    }
}
