//! Page-level latches for concurrent tree traversal.
//!
//! The tree never takes a single global lock. Each node page has its
//! own reader/writer latch; traversals acquire latches top-down and a
//! [`LatchCoupling`] releases the ancestors once the child is known
//! safe (latch coupling). Latches are held for the duration of the
//! node access, unlike buffer pins, which only keep the frame resident.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::storage::page::PageId;

/// Requested access level for one node latch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchMode {
    Shared,
    Exclusive,
}

#[derive(Default)]
struct LatchState {
    readers: u32,
    writer: bool,
}

/// A reader/writer latch on one page. Writers wait for all readers to
/// drain; readers wait for the writer to finish.
pub struct PageLatch {
    state: Mutex<LatchState>,
    released: Condvar,
}

impl PageLatch {
    fn new() -> Self {
        Self {
            state: Mutex::new(LatchState::default()),
            released: Condvar::new(),
        }
    }

    pub fn acquire(&self, mode: LatchMode) {
        let mut state = self.state.lock();
        match mode {
            LatchMode::Shared => {
                while state.writer {
                    self.released.wait(&mut state);
                }
                state.readers += 1;
            }
            LatchMode::Exclusive => {
                while state.writer || state.readers > 0 {
                    self.released.wait(&mut state);
                }
                state.writer = true;
            }
        }
    }

    pub fn try_acquire(&self, mode: LatchMode) -> bool {
        let mut state = self.state.lock();
        match mode {
            LatchMode::Shared if !state.writer => {
                state.readers += 1;
                true
            }
            LatchMode::Exclusive if !state.writer && state.readers == 0 => {
                state.writer = true;
                true
            }
            _ => false,
        }
    }

    pub fn release(&self, mode: LatchMode) {
        let mut state = self.state.lock();
        match mode {
            LatchMode::Shared => {
                debug_assert!(state.readers > 0);
                state.readers -= 1;
                if state.readers == 0 {
                    self.released.notify_all();
                }
            }
            LatchMode::Exclusive => {
                debug_assert!(state.writer);
                state.writer = false;
                self.released.notify_all();
            }
        }
    }
}

/// Owns the latch for every page of one tree.
#[derive(Default)]
pub struct LatchManager {
    latches: Mutex<HashMap<PageId, Arc<PageLatch>>>,
}

impl LatchManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latch_for(&self, page_id: PageId) -> Arc<PageLatch> {
        let mut latches = self.latches.lock();
        latches
            .entry(page_id)
            .or_insert_with(|| Arc::new(PageLatch::new()))
            .clone()
    }
}

/// Latches held along one root-to-leaf traversal, in acquisition
/// order. Dropping the coupling releases everything still held.
pub struct LatchCoupling {
    manager: Arc<LatchManager>,
    held: Vec<(PageId, Arc<PageLatch>, LatchMode)>,
}

impl LatchCoupling {
    pub fn new(manager: Arc<LatchManager>) -> Self {
        Self {
            manager,
            held: Vec::new(),
        }
    }

    /// Latch a page and append it to the chain.
    pub fn acquire(&mut self, page_id: PageId, mode: LatchMode) {
        let latch = self.manager.latch_for(page_id);
        latch.acquire(mode);
        self.held.push((page_id, latch, mode));
    }

    /// Release everything above the most recently latched node. Called
    /// when that node is safe: no split or merge can propagate past it.
    pub fn release_ancestors(&mut self) {
        while self.held.len() > 1 {
            let (_, latch, mode) = self.held.remove(0);
            latch.release(mode);
        }
    }

    pub fn release_all(&mut self) {
        for (_, latch, mode) in self.held.drain(..) {
            latch.release(mode);
        }
    }

    pub fn held_count(&self) -> usize {
        self.held.len()
    }
}

impl Drop for LatchCoupling {
    fn drop(&mut self) {
        self.release_all();
    }
}
