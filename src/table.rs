//! Heap row store: encoded rows in a chain of slotted heap pages.
//!
//! Rows are opaque byte strings here; encoding and decoding against the
//! table's row descriptor happens in the database layer. Inserts append
//! to the newest page, growing the chain when it fills. A
//! [`RecordId`] (page, slot) names a row for the life of the row; the
//! index engine stores these as its value references.

use std::collections::VecDeque;

use crate::storage::buffer::BufferPoolManager;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::heap_page::MAX_RECORD_SIZE;
use crate::storage::page::{self, HeapPage, HeapPageMut, PageId, PageKind, RecordId};

pub struct Table {
    buffer_pool: BufferPoolManager,
    first_page: PageId,
    last_page: PageId,
    table_id: u32,
}

impl Table {
    /// Create a table with one empty heap page.
    pub fn create(buffer_pool: BufferPoolManager, table_id: u32) -> StorageResult<Self> {
        let (first_page, mut guard) = buffer_pool.new_page(PageKind::Heap)?;
        HeapPageMut::init(&mut guard, first_page, table_id);
        drop(guard);
        Ok(Self {
            buffer_pool,
            first_page,
            last_page: first_page,
            table_id,
        })
    }

    /// Open a table at a known first page, walking the chain to find
    /// the insertion point.
    pub fn open(
        buffer_pool: BufferPoolManager,
        first_page: PageId,
        table_id: u32,
    ) -> StorageResult<Self> {
        let mut last_page = first_page;
        loop {
            let guard = buffer_pool.fetch_page(last_page)?;
            match HeapPage::new(&guard).next_page() {
                Some(next) => last_page = next,
                None => break,
            }
        }
        Ok(Self {
            buffer_pool,
            first_page,
            last_page,
            table_id,
        })
    }

    pub fn first_page(&self) -> PageId {
        self.first_page
    }

    /// Store a row, growing the page chain if the current tail is full.
    pub fn insert(&mut self, record: &[u8]) -> StorageResult<RecordId> {
        if record.len() > MAX_RECORD_SIZE {
            return Err(StorageError::RecordTooLarge {
                size: record.len(),
            });
        }

        {
            let mut guard = self.buffer_pool.fetch_page_write(self.last_page)?;
            if let Some(slot) = HeapPageMut::new(&mut guard).insert(record) {
                return Ok(RecordId::new(self.last_page, slot));
            }
        }

        let (new_page, mut new_guard) = self.buffer_pool.new_page(PageKind::Heap)?;
        let mut heap = HeapPageMut::init(&mut new_guard, new_page, self.table_id);
        let slot = heap.insert(record).expect("fresh page fits a bounded record");
        drop(new_guard);

        let mut guard = self.buffer_pool.fetch_page_write(self.last_page)?;
        HeapPageMut::new(&mut guard).set_next_page(Some(new_page));
        drop(guard);

        self.last_page = new_page;
        Ok(RecordId::new(new_page, slot))
    }

    /// Fetch a row. Dead slots and dangling references read as `None`.
    pub fn get(&self, rid: RecordId) -> StorageResult<Option<Vec<u8>>> {
        let guard = self.buffer_pool.fetch_page(rid.page_id)?;
        if page::page_kind(&guard[..]) != Some(PageKind::Heap) {
            return Ok(None);
        }
        Ok(HeapPage::new(&guard).record(rid.slot).map(<[u8]>::to_vec))
    }

    /// Remove a row. Returns whether it was present.
    pub fn delete(&mut self, rid: RecordId) -> StorageResult<bool> {
        let mut guard = self.buffer_pool.fetch_page_write(rid.page_id)?;
        if page::page_kind(&guard[..]) != Some(PageKind::Heap) {
            return Ok(false);
        }
        Ok(HeapPageMut::new(&mut guard).delete(rid.slot))
    }

    /// Iterate every live row in page-chain order.
    pub fn scan(&self) -> TableScan {
        TableScan {
            buffer_pool: self.buffer_pool.clone(),
            next_page: Some(self.first_page),
            queue: VecDeque::new(),
            finished: false,
        }
    }
}

/// Lazy iterator over `(record id, row bytes)` pairs.
pub struct TableScan {
    buffer_pool: BufferPoolManager,
    next_page: Option<PageId>,
    queue: VecDeque<(RecordId, Vec<u8>)>,
    finished: bool,
}

impl TableScan {
    fn refill(&mut self) -> StorageResult<bool> {
        let Some(page_id) = self.next_page.take() else {
            return Ok(false);
        };
        let guard = self.buffer_pool.fetch_page(page_id)?;
        let heap = HeapPage::new(&guard);
        self.queue = heap
            .records()
            .map(|(slot, bytes)| (RecordId::new(page_id, slot), bytes.to_vec()))
            .collect();
        self.next_page = heap.next_page();
        Ok(true)
    }
}

impl Iterator for TableScan {
    type Item = StorageResult<(RecordId, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            if let Some(entry) = self.queue.pop_front() {
                return Some(Ok(entry));
            }
            match self.refill() {
                Ok(true) => continue,
                Ok(false) => {
                    self.finished = true;
                    return None;
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::disk::PageManager;
    use tempfile::tempdir;

    fn test_table() -> (Table, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.db");
        let page_manager = PageManager::create(&path).unwrap();
        let pool = BufferPoolManager::with_lru(page_manager, 16);
        (Table::create(pool, 1).unwrap(), dir)
    }

    #[test]
    fn test_insert_get_delete() {
        let (mut table, _dir) = test_table();

        let rid = table.insert(b"hello row").unwrap();
        assert_eq!(table.get(rid).unwrap().unwrap(), b"hello row");

        assert!(table.delete(rid).unwrap());
        assert_eq!(table.get(rid).unwrap(), None);
        assert!(!table.delete(rid).unwrap());
    }

    #[test]
    fn test_chain_growth_and_scan() {
        let (mut table, _dir) = test_table();

        let record = vec![9u8; 700];
        let mut rids = Vec::new();
        for _ in 0..20 {
            rids.push(table.insert(&record).unwrap());
        }
        // 700-byte records at ~5 per page: the chain has grown.
        let pages: std::collections::HashSet<_> = rids.iter().map(|r| r.page_id).collect();
        assert!(pages.len() > 1);

        let scanned: Vec<_> = table.scan().map(|r| r.unwrap()).collect();
        assert_eq!(scanned.len(), 20);
        for (rid, bytes) in &scanned {
            assert!(rids.contains(rid));
            assert_eq!(bytes, &record);
        }
    }

    #[test]
    fn test_scan_skips_deleted() {
        let (mut table, _dir) = test_table();
        let a = table.insert(b"a").unwrap();
        let b = table.insert(b"b").unwrap();
        let c = table.insert(b"c").unwrap();
        table.delete(b).unwrap();

        let scanned: Vec<_> = table.scan().map(|r| r.unwrap()).collect();
        let rids: Vec<_> = scanned.iter().map(|(rid, _)| *rid).collect();
        assert_eq!(rids, vec![a, c]);
    }

    #[test]
    fn test_record_too_large() {
        let (mut table, _dir) = test_table();
        let oversized = vec![0u8; MAX_RECORD_SIZE + 1];
        assert!(matches!(
            table.insert(&oversized),
            Err(StorageError::RecordTooLarge { .. })
        ));
    }

    #[test]
    fn test_open_finds_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.db");
        let page_manager = PageManager::create(&path).unwrap();
        let pool = BufferPoolManager::with_lru(page_manager, 16);

        let mut table = Table::create(pool.clone(), 1).unwrap();
        let record = vec![1u8; 900];
        for _ in 0..10 {
            table.insert(&record).unwrap();
        }
        let first = table.first_page();

        let reopened = Table::open(pool, first, 1).unwrap();
        let scanned: Vec<_> = reopened.scan().map(|r| r.unwrap()).collect();
        assert_eq!(scanned.len(), 10);
    }
}
