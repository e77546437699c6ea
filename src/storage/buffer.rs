//! Buffer pool: pinned in-memory frames over the page file.
//!
//! Frames are owned exclusively by the pool; callers borrow page bytes
//! through [`PageReadGuard`]/[`PageWriteGuard`], which pin on
//! acquisition and unpin in `Drop` on every exit path. A frame with pin
//! count zero is eligible for eviction under the LRU policy; a dirty
//! frame is flushed before its slot is reused. When every frame is
//! pinned, requests fail fast with `PoolExhausted` instead of blocking.

pub mod lru;
pub mod replacer;

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use log::warn;
use parking_lot::{Mutex, RwLock};

use crate::storage::disk::PageManager;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{self, PageId, PageKind, PAGE_SIZE};
use replacer::{FrameId, Replacer};

struct Frame {
    data: Box<[u8; PAGE_SIZE]>,
    page_id: Option<PageId>,
    pin_count: AtomicU32,
    is_dirty: AtomicBool,
}

impl Frame {
    fn new() -> Self {
        Self {
            data: Box::new([0u8; PAGE_SIZE]),
            page_id: None,
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
        }
    }

    fn reset(&mut self) {
        self.page_id = None;
        self.pin_count.store(0, Ordering::SeqCst);
        self.is_dirty.store(false, Ordering::SeqCst);
        self.data.fill(0);
    }
}

#[derive(Clone)]
pub struct BufferPoolManager {
    inner: Arc<BufferPoolInner>,
}

struct BufferPoolInner {
    page_table: DashMap<PageId, FrameId>,
    frames: RwLock<HashMap<FrameId, Frame>>,
    replacer: Mutex<Box<dyn Replacer>>,
    page_manager: Mutex<PageManager>,
    next_frame_id: AtomicU32,
    capacity: usize,
}

impl BufferPoolManager {
    pub fn new(page_manager: PageManager, replacer: Box<dyn Replacer>, capacity: usize) -> Self {
        Self {
            inner: Arc::new(BufferPoolInner {
                page_table: DashMap::new(),
                frames: RwLock::new(HashMap::with_capacity(capacity)),
                replacer: Mutex::new(replacer),
                page_manager: Mutex::new(page_manager),
                next_frame_id: AtomicU32::new(0),
                capacity,
            }),
        }
    }

    /// Pool with the default LRU policy.
    pub fn with_lru(page_manager: PageManager, capacity: usize) -> Self {
        Self::new(page_manager, Box::new(lru::LruReplacer::new(capacity)), capacity)
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Pin a page for reading, loading it from backing storage on a
    /// cache miss (checksum validated by the page manager).
    pub fn fetch_page(&self, page_id: PageId) -> StorageResult<PageReadGuard> {
        loop {
            if let Some(frame_id) = self.try_pin_resident(page_id) {
                let frames = self.inner.frames.read();
                let frame = frames.get(&frame_id).expect("pinned frame exists");
                let data = frame.data.as_ref() as *const [u8; PAGE_SIZE];
                return Ok(PageReadGuard {
                    inner: self.inner.clone(),
                    frame_id,
                    data,
                });
            }
            if self.load_into_pool(page_id)? {
                continue;
            }
        }
    }

    /// Pin a page for writing; the frame is marked dirty up front.
    pub fn fetch_page_write(&self, page_id: PageId) -> StorageResult<PageWriteGuard> {
        loop {
            if let Some(frame_id) = self.try_pin_resident(page_id) {
                let mut frames = self.inner.frames.write();
                let frame = frames.get_mut(&frame_id).expect("pinned frame exists");
                frame.is_dirty.store(true, Ordering::SeqCst);
                let data = frame.data.as_mut() as *mut [u8; PAGE_SIZE];
                drop(frames);
                return Ok(PageWriteGuard {
                    inner: self.inner.clone(),
                    frame_id,
                    data,
                });
            }
            if self.load_into_pool(page_id)? {
                continue;
            }
        }
    }

    /// Allocate a new page of the given kind and pin it for writing.
    pub fn new_page(&self, kind: PageKind) -> StorageResult<(PageId, PageWriteGuard)> {
        let frame_id = self.acquire_frame()?;

        let page_id = {
            let mut page_manager = self.inner.page_manager.lock();
            match page_manager.allocate_page(kind) {
                Ok(id) => id,
                Err(e) => {
                    self.release_frame(frame_id);
                    return Err(e);
                }
            }
        };

        let mut frames = self.inner.frames.write();
        let frame = frames.get_mut(&frame_id).expect("acquired frame exists");
        frame.reset();
        page::init_page(&mut frame.data, page_id, kind);
        frame.page_id = Some(page_id);
        frame.pin_count.store(1, Ordering::SeqCst);
        frame.is_dirty.store(true, Ordering::SeqCst);
        let data = frame.data.as_mut() as *mut [u8; PAGE_SIZE];
        drop(frames);

        self.inner.page_table.insert(page_id, frame_id);
        self.inner.replacer.lock().pin(frame_id);

        Ok((
            page_id,
            PageWriteGuard {
                inner: self.inner.clone(),
                frame_id,
                data,
            },
        ))
    }

    /// Drop a page from the pool and release it to the free list. The
    /// page must not be pinned.
    pub fn free_page(&self, page_id: PageId) -> StorageResult<()> {
        if let Some(frame_id) = self.inner.page_table.get(&page_id).map(|e| *e.value()) {
            let mut frames = self.inner.frames.write();
            if let Some(frame) = frames.get_mut(&frame_id) {
                if frame.page_id == Some(page_id) {
                    if frame.pin_count.load(Ordering::SeqCst) > 0 {
                        return Err(StorageError::PagePinned(page_id));
                    }
                    frame.reset();
                }
            }
            drop(frames);
            self.inner.page_table.remove(&page_id);
            self.inner.replacer.lock().unpin(frame_id);
        }
        self.inner.page_manager.lock().free_page(page_id)
    }

    /// Write a dirty page through to backing storage. On failure the
    /// frame stays dirty so the flush can be retried.
    pub fn flush_page(&self, page_id: PageId) -> StorageResult<()> {
        if let Some(frame_id) = self.inner.page_table.get(&page_id).map(|e| *e.value()) {
            let frames = self.inner.frames.read();
            if let Some(frame) = frames.get(&frame_id) {
                if frame.is_dirty.load(Ordering::SeqCst) {
                    let mut page_manager = self.inner.page_manager.lock();
                    if let Err(e) = page_manager.write_page(page_id, &frame.data) {
                        warn!("flush of page {} failed, frame stays dirty: {}", page_id, e);
                        return Err(e);
                    }
                    frame.is_dirty.store(false, Ordering::SeqCst);
                }
            }
        }
        Ok(())
    }

    /// Flush every dirty frame. Stops at the first I/O failure, leaving
    /// that frame and any not yet visited dirty.
    pub fn flush_all(&self) -> StorageResult<()> {
        let frames = self.inner.frames.read();
        let mut page_manager = self.inner.page_manager.lock();
        for frame in frames.values() {
            if let Some(page_id) = frame.page_id {
                if frame.is_dirty.load(Ordering::SeqCst) {
                    if let Err(e) = page_manager.write_page(page_id, &frame.data) {
                        warn!("flush of page {} failed, frame stays dirty: {}", page_id, e);
                        return Err(e);
                    }
                    frame.is_dirty.store(false, Ordering::SeqCst);
                }
            }
        }
        Ok(())
    }

    /// Run a closure against the page manager (superblock access).
    pub fn with_page_manager<T>(&self, f: impl FnOnce(&mut PageManager) -> T) -> T {
        let mut page_manager = self.inner.page_manager.lock();
        f(&mut page_manager)
    }

    /// Pin `page_id` if it is resident, returning its frame.
    fn try_pin_resident(&self, page_id: PageId) -> Option<FrameId> {
        let frame_id = self.inner.page_table.get(&page_id).map(|e| *e.value())?;
        let frames = self.inner.frames.read();
        let frame = frames.get(&frame_id)?;
        if frame.page_id != Some(page_id) {
            return None;
        }
        frame.pin_count.fetch_add(1, Ordering::SeqCst);
        self.inner.replacer.lock().pin(frame_id);
        Some(frame_id)
    }

    /// Load a page into a free frame. Returns `true` when the page is
    /// resident afterwards (loaded here or by a racing caller).
    fn load_into_pool(&self, page_id: PageId) -> StorageResult<bool> {
        let frame_id = self.acquire_frame()?;

        {
            // Lock order is frames before page_manager everywhere, so a
            // concurrent flush cannot deadlock against a cache miss.
            let mut frames = self.inner.frames.write();
            let mut page_manager = self.inner.page_manager.lock();
            let frame = frames.get_mut(&frame_id).expect("acquired frame exists");
            if let Err(e) = page_manager.read_page(page_id, &mut frame.data) {
                frame.reset();
                drop(frames);
                drop(page_manager);
                self.release_frame(frame_id);
                return Err(e);
            }
            frame.page_id = Some(page_id);
            frame.pin_count.store(0, Ordering::SeqCst);
            frame.is_dirty.store(false, Ordering::SeqCst);
        }

        use dashmap::mapref::entry::Entry;
        match self.inner.page_table.entry(page_id) {
            Entry::Vacant(entry) => {
                entry.insert(frame_id);
                // Resident and unpinned; the caller re-runs the hit path.
                self.inner.replacer.lock().unpin(frame_id);
            }
            Entry::Occupied(_) => {
                // Another caller loaded it first; discard our copy.
                let mut frames = self.inner.frames.write();
                if let Some(frame) = frames.get_mut(&frame_id) {
                    frame.reset();
                }
                drop(frames);
                self.release_frame(frame_id);
            }
        }
        Ok(true)
    }

    /// Find a frame slot: grow the pool up to capacity, else evict the
    /// least recently used unpinned frame, flushing it if dirty.
    fn acquire_frame(&self) -> StorageResult<FrameId> {
        loop {
            {
                let frames = self.inner.frames.read();
                if frames.len() < self.inner.capacity {
                    drop(frames);
                    let mut frames = self.inner.frames.write();
                    if frames.len() < self.inner.capacity {
                        let frame_id = self.inner.next_frame_id.fetch_add(1, Ordering::SeqCst);
                        frames.insert(frame_id, Frame::new());
                        return Ok(frame_id);
                    }
                }
            }

            let victim = {
                let mut replacer = self.inner.replacer.lock();
                replacer.evict().ok_or(StorageError::PoolExhausted {
                    capacity: self.inner.capacity,
                })?
            };

            let (old_page_id, is_dirty, image) = {
                let frames = self.inner.frames.read();
                match frames.get(&victim) {
                    Some(frame) => {
                        if frame.pin_count.load(Ordering::SeqCst) > 0 {
                            // Re-pinned after selection; its unpin will
                            // put it back in the candidate set.
                            continue;
                        }
                        (
                            frame.page_id,
                            frame.is_dirty.load(Ordering::SeqCst),
                            frame.data.clone(),
                        )
                    }
                    None => return Ok(victim),
                }
            };

            if let Some(page_id) = old_page_id {
                if is_dirty {
                    let mut page_manager = self.inner.page_manager.lock();
                    if let Err(e) = page_manager.write_page(page_id, &image) {
                        warn!("eviction flush of page {} failed: {}", page_id, e);
                        self.inner.replacer.lock().unpin(victim);
                        return Err(e);
                    }
                }
                self.inner.page_table.remove(&page_id);
            }

            let mut frames = self.inner.frames.write();
            if let Some(frame) = frames.get_mut(&victim) {
                if frame.pin_count.load(Ordering::SeqCst) > 0 {
                    continue;
                }
                frame.reset();
            }
            return Ok(victim);
        }
    }

    /// Return an unused frame to the evictable set.
    fn release_frame(&self, frame_id: FrameId) {
        self.inner.replacer.lock().unpin(frame_id);
    }
}

pub struct PageReadGuard {
    inner: Arc<BufferPoolInner>,
    frame_id: FrameId,
    data: *const [u8; PAGE_SIZE],
}

impl Deref for PageReadGuard {
    type Target = [u8; PAGE_SIZE];

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.data }
    }
}

impl Drop for PageReadGuard {
    fn drop(&mut self) {
        unpin_frame(&self.inner, self.frame_id);
    }
}

pub struct PageWriteGuard {
    inner: Arc<BufferPoolInner>,
    frame_id: FrameId,
    data: *mut [u8; PAGE_SIZE],
}

impl Deref for PageWriteGuard {
    type Target = [u8; PAGE_SIZE];

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.data }
    }
}

impl DerefMut for PageWriteGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.data }
    }
}

impl std::fmt::Debug for PageWriteGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageWriteGuard")
            .field("frame_id", &self.frame_id)
            .finish()
    }
}

impl Drop for PageWriteGuard {
    fn drop(&mut self) {
        unpin_frame(&self.inner, self.frame_id);
    }
}

fn unpin_frame(inner: &Arc<BufferPoolInner>, frame_id: FrameId) {
    let last_pin = {
        let frames = inner.frames.read();
        match frames.get(&frame_id) {
            Some(frame) => frame.pin_count.fetch_sub(1, Ordering::SeqCst) == 1,
            None => false,
        }
    };
    if last_pin {
        inner.replacer.lock().unpin(frame_id);
    }
}

// The raw pointers target the frame's boxed page image, which stays put
// while the guard's pin prevents eviction.
unsafe impl Send for PageReadGuard {}
unsafe impl Sync for PageReadGuard {}
unsafe impl Send for PageWriteGuard {}
unsafe impl Sync for PageWriteGuard {}
