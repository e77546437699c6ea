//! Slotted heap page for the row store.
//!
//! Beneath the common page header:
//!
//! ```text
//! offset  size  field
//! 24      2     slot count (u16)
//! 26      4     next heap page id (u32, 0 = none)
//! 30      2     upper (u16): start of the record heap at the page tail
//! 32      ...   slot array, 4 bytes per slot
//! ```
//!
//! Each slot is (record offset u16, record length u16); offset 0 marks
//! a dead slot, whose id is reused by later inserts. Record bytes grow
//! down from the page tail and are not compacted; a page's slack is
//! reclaimed when the page itself is freed.

use byteorder::{ByteOrder, LittleEndian};

use crate::storage::page::{self, PageId, PageKind, PAGE_HEADER_SIZE, PAGE_SIZE};

const OFFSET_SLOT_COUNT: usize = PAGE_HEADER_SIZE;
const OFFSET_NEXT: usize = PAGE_HEADER_SIZE + 2;
const OFFSET_UPPER: usize = PAGE_HEADER_SIZE + 6;
pub const HEAP_SLOTS_START: usize = PAGE_HEADER_SIZE + 8;
pub const HEAP_SLOT_SIZE: usize = 4;

/// Largest record a single heap page can hold.
pub const MAX_RECORD_SIZE: usize = PAGE_SIZE - HEAP_SLOTS_START - HEAP_SLOT_SIZE;

/// Read-only view of a heap page.
pub struct HeapPage<'a> {
    data: &'a [u8; PAGE_SIZE],
}

impl<'a> HeapPage<'a> {
    pub fn new(data: &'a [u8; PAGE_SIZE]) -> Self {
        Self { data }
    }

    pub fn slot_count(&self) -> usize {
        LittleEndian::read_u16(&self.data[OFFSET_SLOT_COUNT..OFFSET_SLOT_COUNT + 2]) as usize
    }

    pub fn next_page(&self) -> Option<PageId> {
        let id = PageId(LittleEndian::read_u32(&self.data[OFFSET_NEXT..OFFSET_NEXT + 4]));
        id.is_valid().then_some(id)
    }

    /// Record bytes at `slot`, or `None` for dead or out-of-range slots.
    pub fn record(&self, slot: u16) -> Option<&'a [u8]> {
        if slot as usize >= self.slot_count() {
            return None;
        }
        let (offset, len) = self.slot(slot as usize);
        if offset == 0 {
            return None;
        }
        Some(&self.data[offset..offset + len])
    }

    /// Live records with their slot numbers, in slot order.
    pub fn records(&self) -> impl Iterator<Item = (u16, &'a [u8])> + '_ {
        let count = self.slot_count();
        let data = self.data;
        (0..count).filter_map(move |i| {
            let base = HEAP_SLOTS_START + i * HEAP_SLOT_SIZE;
            let offset = LittleEndian::read_u16(&data[base..base + 2]) as usize;
            let len = LittleEndian::read_u16(&data[base + 2..base + 4]) as usize;
            (offset != 0).then(|| (i as u16, &data[offset..offset + len]))
        })
    }

    fn upper(&self) -> usize {
        LittleEndian::read_u16(&self.data[OFFSET_UPPER..OFFSET_UPPER + 2]) as usize
    }

    fn slots_end(&self) -> usize {
        HEAP_SLOTS_START + self.slot_count() * HEAP_SLOT_SIZE
    }

    /// Bytes available for a new record (slot included).
    pub fn free_space(&self) -> usize {
        self.upper()
            .saturating_sub(self.slots_end())
            .saturating_sub(HEAP_SLOT_SIZE)
    }

    fn slot(&self, index: usize) -> (usize, usize) {
        let base = HEAP_SLOTS_START + index * HEAP_SLOT_SIZE;
        let offset = LittleEndian::read_u16(&self.data[base..base + 2]) as usize;
        let len = LittleEndian::read_u16(&self.data[base + 2..base + 4]) as usize;
        (offset, len)
    }
}

/// Mutable view of a heap page.
pub struct HeapPageMut<'a> {
    data: &'a mut [u8; PAGE_SIZE],
}

impl<'a> HeapPageMut<'a> {
    pub fn new(data: &'a mut [u8; PAGE_SIZE]) -> Self {
        Self { data }
    }

    /// Initialize an empty heap page over a fresh page.
    pub fn init(data: &'a mut [u8; PAGE_SIZE], page_id: PageId, type_id: u32) -> Self {
        page::init_page(data, page_id, PageKind::Heap);
        page::set_type_id(data, type_id);
        LittleEndian::write_u16(&mut data[OFFSET_UPPER..OFFSET_UPPER + 2], PAGE_SIZE as u16);
        Self { data }
    }

    pub fn as_read(&self) -> HeapPage<'_> {
        HeapPage::new(self.data)
    }

    pub fn set_next_page(&mut self, next: Option<PageId>) {
        let raw = next.map_or(0, |id| id.0);
        LittleEndian::write_u32(&mut self.data[OFFSET_NEXT..OFFSET_NEXT + 4], raw);
    }

    /// Insert a record, reusing a dead slot when one exists. `None`
    /// means the page is out of room.
    pub fn insert(&mut self, record: &[u8]) -> Option<u16> {
        let view = self.as_read();
        let count = view.slot_count();
        let upper = view.upper();
        let slots_end = view.slots_end();

        // A dead slot costs no new slot space.
        let reuse = (0..count).find(|&i| view.slot(i).0 == 0);
        let slot_cost = if reuse.is_some() { 0 } else { HEAP_SLOT_SIZE };
        if upper < slots_end + slot_cost + record.len() {
            return None;
        }

        let new_upper = upper - record.len();
        self.data[new_upper..new_upper + record.len()].copy_from_slice(record);
        LittleEndian::write_u16(&mut self.data[OFFSET_UPPER..OFFSET_UPPER + 2], new_upper as u16);

        let slot = reuse.unwrap_or(count);
        let base = HEAP_SLOTS_START + slot * HEAP_SLOT_SIZE;
        LittleEndian::write_u16(&mut self.data[base..base + 2], new_upper as u16);
        LittleEndian::write_u16(&mut self.data[base + 2..base + 4], record.len() as u16);
        if reuse.is_none() {
            LittleEndian::write_u16(
                &mut self.data[OFFSET_SLOT_COUNT..OFFSET_SLOT_COUNT + 2],
                (count + 1) as u16,
            );
        }
        let new_offset = (HEAP_SLOTS_START + self.as_read().slot_count() * HEAP_SLOT_SIZE) as u16;
        page::set_free_space_offset(self.data, new_offset);
        Some(slot as u16)
    }

    /// Mark a slot dead. Returns false if it was already dead or out of
    /// range.
    pub fn delete(&mut self, slot: u16) -> bool {
        let view = self.as_read();
        if slot as usize >= view.slot_count() || view.slot(slot as usize).0 == 0 {
            return false;
        }
        let base = HEAP_SLOTS_START + slot as usize * HEAP_SLOT_SIZE;
        LittleEndian::write_u16(&mut self.data[base..base + 2], 0);
        LittleEndian::write_u16(&mut self.data[base + 2..base + 4], 0);
        true
    }
}
