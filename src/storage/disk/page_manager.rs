//! File-backed page I/O.
//!
//! One file holds all pages. Page 0 is the superblock: magic, format
//! version, page size, free-list head, a root page slot and the table's
//! type id. Freed pages are linked into the free list and reused by
//! later allocations; the file never shrinks.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use log::warn;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{
    self, PageId, PageKind, PAGE_HEADER_SIZE, PAGE_SIZE,
};

const MAGIC: &[u8; 8] = b"STRATADB";
const FORMAT_VERSION: u16 = 1;

const SB_MAGIC: usize = PAGE_HEADER_SIZE;
const SB_VERSION: usize = SB_MAGIC + 8;
const SB_PAGE_SIZE: usize = SB_VERSION + 2;
const SB_FREE_HEAD: usize = SB_PAGE_SIZE + 4;
const SB_ROOT: usize = SB_FREE_HEAD + 4;
const SB_TYPE_ID: usize = SB_ROOT + 4;

/// In-memory copy of the mutable superblock fields.
#[derive(Debug, Clone, Copy)]
struct Superblock {
    free_list_head: PageId,
    root_page_id: PageId,
    type_id: u32,
}

impl Superblock {
    fn empty() -> Self {
        Self {
            free_list_head: PageId::INVALID,
            root_page_id: PageId::INVALID,
            type_id: 0,
        }
    }
}

pub struct PageManager {
    file: File,
    num_pages: u32,
    superblock: Superblock,
}

impl PageManager {
    /// Create a fresh file with an empty superblock at page 0.
    pub fn create(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        let mut manager = Self {
            file,
            num_pages: 1,
            superblock: Superblock::empty(),
        };
        manager.write_superblock()?;
        Ok(manager)
    }

    /// Open an existing file, validating the superblock.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        let num_pages = (len / PAGE_SIZE as u64) as u32;

        let mut manager = Self {
            file,
            num_pages,
            superblock: Superblock::empty(),
        };
        if num_pages == 0 {
            return Err(StorageError::BadMagic);
        }

        let mut data = [0u8; PAGE_SIZE];
        manager.read_page(PageId(0), &mut data)?;

        if &data[SB_MAGIC..SB_MAGIC + 8] != MAGIC {
            return Err(StorageError::BadMagic);
        }
        let version = LittleEndian::read_u16(&data[SB_VERSION..SB_VERSION + 2]);
        if version != FORMAT_VERSION {
            return Err(StorageError::UnsupportedVersion(version));
        }
        let page_size = LittleEndian::read_u32(&data[SB_PAGE_SIZE..SB_PAGE_SIZE + 4]);
        if page_size != PAGE_SIZE as u32 {
            return Err(StorageError::PageSizeMismatch {
                file: page_size,
                compiled: PAGE_SIZE as u32,
            });
        }

        manager.superblock = Superblock {
            free_list_head: PageId(LittleEndian::read_u32(&data[SB_FREE_HEAD..SB_FREE_HEAD + 4])),
            root_page_id: PageId(LittleEndian::read_u32(&data[SB_ROOT..SB_ROOT + 4])),
            type_id: LittleEndian::read_u32(&data[SB_TYPE_ID..SB_TYPE_ID + 4]),
        };
        Ok(manager)
    }

    /// Read a page from backing storage, validating its checksum. A
    /// mismatch surfaces as a fault and no bytes are returned.
    pub fn read_page(&mut self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> StorageResult<()> {
        if page_id.0 >= self.num_pages {
            return Err(StorageError::PageNotFound(page_id));
        }
        self.file.seek(SeekFrom::Start(Self::offset(page_id)))?;
        self.file.read_exact(buf)?;

        if let Err((stored, computed)) = page::verify_checksum(buf) {
            warn!(
                "checksum mismatch reading page {}: stored {:#010x}, computed {:#010x}",
                page_id, stored, computed
            );
            buf.fill(0);
            return Err(StorageError::ChecksumMismatch {
                page_id,
                stored,
                computed,
            });
        }
        Ok(())
    }

    /// Write a page image, stamping its checksum before the bytes reach
    /// the file. Growth beyond the current extent zero-fills.
    pub fn write_page(&mut self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> StorageResult<()> {
        let mut image = *data;
        page::set_page_id(&mut image, page_id);
        page::stamp_checksum(&mut image);

        let offset = Self::offset(page_id);
        let len = self.file.metadata()?.len();
        if offset >= len {
            self.file.set_len(offset + PAGE_SIZE as u64)?;
        }
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&image)?;
        self.file.sync_all()?;

        if page_id.0 >= self.num_pages {
            self.num_pages = page_id.0 + 1;
        }
        Ok(())
    }

    /// Allocate a page: pop the free list if possible, otherwise extend
    /// the file. The returned page is initialized with the given kind
    /// and already durable.
    pub fn allocate_page(&mut self, kind: PageKind) -> StorageResult<PageId> {
        let page_id = if self.superblock.free_list_head.is_valid() {
            let head = self.superblock.free_list_head;
            let mut data = [0u8; PAGE_SIZE];
            self.read_page(head, &mut data)?;
            let next = PageId(LittleEndian::read_u32(
                &data[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + 4],
            ));
            self.superblock.free_list_head = next;
            self.write_superblock()?;
            head
        } else {
            let id = PageId(self.num_pages);
            self.num_pages += 1;
            id
        };

        let mut data = [0u8; PAGE_SIZE];
        page::init_page(&mut data, page_id, kind);
        self.write_page(page_id, &data)?;
        Ok(page_id)
    }

    /// Release a page to the free list. The slot is reused by later
    /// allocations, never removed from the file.
    pub fn free_page(&mut self, page_id: PageId) -> StorageResult<()> {
        if !page_id.is_valid() {
            return Err(StorageError::ReservedPage);
        }
        if page_id.0 >= self.num_pages {
            return Err(StorageError::PageNotFound(page_id));
        }
        let mut data = [0u8; PAGE_SIZE];
        page::init_page(&mut data, page_id, PageKind::Free);
        LittleEndian::write_u32(
            &mut data[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + 4],
            self.superblock.free_list_head.0,
        );
        self.write_page(page_id, &data)?;
        self.superblock.free_list_head = page_id;
        self.write_superblock()
    }

    pub fn num_pages(&self) -> u32 {
        self.num_pages
    }

    pub fn free_list_head(&self) -> PageId {
        self.superblock.free_list_head
    }

    pub fn root_page_id(&self) -> PageId {
        self.superblock.root_page_id
    }

    pub fn set_root_page_id(&mut self, root: PageId) -> StorageResult<()> {
        self.superblock.root_page_id = root;
        self.write_superblock()
    }

    pub fn type_id(&self) -> u32 {
        self.superblock.type_id
    }

    pub fn set_type_id(&mut self, type_id: u32) -> StorageResult<()> {
        self.superblock.type_id = type_id;
        self.write_superblock()
    }

    fn write_superblock(&mut self) -> StorageResult<()> {
        let mut data = [0u8; PAGE_SIZE];
        page::init_page(&mut data, PageId(0), PageKind::Super);
        data[SB_MAGIC..SB_MAGIC + 8].copy_from_slice(MAGIC);
        LittleEndian::write_u16(&mut data[SB_VERSION..SB_VERSION + 2], FORMAT_VERSION);
        LittleEndian::write_u32(&mut data[SB_PAGE_SIZE..SB_PAGE_SIZE + 4], PAGE_SIZE as u32);
        LittleEndian::write_u32(
            &mut data[SB_FREE_HEAD..SB_FREE_HEAD + 4],
            self.superblock.free_list_head.0,
        );
        LittleEndian::write_u32(&mut data[SB_ROOT..SB_ROOT + 4], self.superblock.root_page_id.0);
        LittleEndian::write_u32(&mut data[SB_TYPE_ID..SB_TYPE_ID + 4], self.superblock.type_id);
        self.write_page(PageId(0), &data)
    }

    fn offset(page_id: PageId) -> u64 {
        page_id.0 as u64 * PAGE_SIZE as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_and_open() -> StorageResult<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let pm = PageManager::create(&path)?;
            assert_eq!(pm.num_pages(), 1);
        }
        {
            let pm = PageManager::open(&path)?;
            assert_eq!(pm.num_pages(), 1);
            assert_eq!(pm.free_list_head(), PageId::INVALID);
        }
        Ok(())
    }

    #[test]
    fn test_open_rejects_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("garbage.db");
        std::fs::write(&path, vec![0xFFu8; PAGE_SIZE]).unwrap();
        assert!(PageManager::open(&path).is_err());
    }

    #[test]
    fn test_write_and_read_roundtrip() -> StorageResult<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let mut pm = PageManager::create(&path)?;

        let id = pm.allocate_page(PageKind::Heap)?;
        let mut data = [0u8; PAGE_SIZE];
        page::init_page(&mut data, id, PageKind::Heap);
        data[100] = 42;
        data[PAGE_SIZE - 1] = 24;
        pm.write_page(id, &data)?;

        let mut read_buf = [0u8; PAGE_SIZE];
        pm.read_page(id, &mut read_buf)?;
        assert_eq!(read_buf[100], 42);
        assert_eq!(read_buf[PAGE_SIZE - 1], 24);
        Ok(())
    }

    #[test]
    fn test_bit_flip_is_a_fault() -> StorageResult<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let mut pm = PageManager::create(&path)?;

        let id = pm.allocate_page(PageKind::Heap)?;
        let mut data = [0u8; PAGE_SIZE];
        page::init_page(&mut data, id, PageKind::Heap);
        data[200] = 7;
        pm.write_page(id, &data)?;
        drop(pm);

        // Flip one bit in the data region on disk.
        let mut raw = std::fs::read(&path).unwrap();
        let offset = id.0 as usize * PAGE_SIZE + 200;
        raw[offset] ^= 0x10;
        std::fs::write(&path, &raw).unwrap();

        let mut pm = PageManager::open(&path)?;
        let mut buf = [0u8; PAGE_SIZE];
        let err = pm.read_page(id, &mut buf).unwrap_err();
        assert!(matches!(err, StorageError::ChecksumMismatch { .. }));
        Ok(())
    }

    #[test]
    fn test_allocate_extends_file() -> StorageResult<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let mut pm = PageManager::create(&path)?;

        let a = pm.allocate_page(PageKind::Leaf)?;
        let b = pm.allocate_page(PageKind::Leaf)?;
        assert_eq!(a, PageId(1));
        assert_eq!(b, PageId(2));
        assert_eq!(pm.num_pages(), 3);

        // Freshly allocated pages read back clean.
        let mut buf = [0u8; PAGE_SIZE];
        pm.read_page(b, &mut buf)?;
        assert_eq!(page::page_kind(&buf), Some(PageKind::Leaf));
        Ok(())
    }

    #[test]
    fn test_free_list_reuse() -> StorageResult<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let mut pm = PageManager::create(&path)?;

        let a = pm.allocate_page(PageKind::Heap)?;
        let b = pm.allocate_page(PageKind::Heap)?;
        pm.free_page(a)?;
        assert_eq!(pm.free_list_head(), a);
        pm.free_page(b)?;
        assert_eq!(pm.free_list_head(), b);

        // LIFO reuse, no file growth.
        let pages_before = pm.num_pages();
        assert_eq!(pm.allocate_page(PageKind::Leaf)?, b);
        assert_eq!(pm.allocate_page(PageKind::Leaf)?, a);
        assert_eq!(pm.num_pages(), pages_before);
        Ok(())
    }

    #[test]
    fn test_free_page_zero_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let mut pm = PageManager::create(&path).unwrap();
        assert!(matches!(
            pm.free_page(PageId(0)),
            Err(StorageError::ReservedPage)
        ));
    }

    #[test]
    fn test_superblock_fields_persist() -> StorageResult<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        {
            let mut pm = PageManager::create(&path)?;
            let root = pm.allocate_page(PageKind::Leaf)?;
            pm.set_root_page_id(root)?;
            pm.set_type_id(9)?;
        }
        {
            let pm = PageManager::open(&path)?;
            assert_eq!(pm.root_page_id(), PageId(1));
            assert_eq!(pm.type_id(), 9);
        }
        Ok(())
    }

    #[test]
    fn test_read_past_end() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let mut pm = PageManager::create(&path).unwrap();
        let mut buf = [0u8; PAGE_SIZE];
        assert!(matches!(
            pm.read_page(PageId(10), &mut buf),
            Err(StorageError::PageNotFound(_))
        ));
    }
}
