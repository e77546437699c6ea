//! Lazy range scans over the leaf chain.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::schema::{ordering, DecodeError, TypeDescriptor};
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::{self, LeafNode, PageId, PageKind, RecordId};

use super::error::{IndexError, IndexResult};
use super::latch::{LatchManager, LatchMode};

/// One end of a scan range: an encoded key, or an encoded prefix of the
/// leading `fields` of a composite (struct) key.
#[derive(Debug, Clone)]
pub struct KeyBound {
    pub bytes: Vec<u8>,
    pub fields: Option<usize>,
    pub inclusive: bool,
}

impl KeyBound {
    pub fn full(bytes: Vec<u8>, inclusive: bool) -> Self {
        Self {
            bytes,
            fields: None,
            inclusive,
        }
    }

    pub fn prefix(bytes: Vec<u8>, fields: usize, inclusive: bool) -> Self {
        Self {
            bytes,
            fields: Some(fields),
            inclusive,
        }
    }
}

/// Order a stored key against a bound under the key descriptor.
pub(crate) fn compare_to_bound(
    key_type: &TypeDescriptor,
    key: &[u8],
    bound: &KeyBound,
) -> Result<Ordering, DecodeError> {
    match bound.fields {
        None => ordering::compare(key_type, key, &bound.bytes),
        Some(n) => ordering::compare_field_prefix(key_type, key, &bound.bytes, n),
    }
}

/// Lazy, ordered iterator over `(key bytes, record id)` pairs.
///
/// The scan walks the leaf chain through next pointers, holding the
/// shared latch on one leaf only while copying its entries out. It is a
/// live view: mutations landing ahead of the cursor are observed,
/// mutations behind it are not. Restart by constructing a new scan.
pub struct RangeScan {
    buffer_pool: BufferPoolManager,
    key_type: TypeDescriptor,
    latches: Arc<LatchManager>,
    next_leaf: Option<PageId>,
    queue: VecDeque<(Vec<u8>, RecordId)>,
    low: Option<KeyBound>,
    high: Option<KeyBound>,
    past_low: bool,
    finished: bool,
}

impl RangeScan {
    pub(crate) fn new(
        buffer_pool: BufferPoolManager,
        key_type: TypeDescriptor,
        latches: Arc<LatchManager>,
        start_leaf: PageId,
        low: Option<KeyBound>,
        high: Option<KeyBound>,
    ) -> Self {
        Self {
            buffer_pool,
            key_type,
            latches,
            next_leaf: Some(start_leaf),
            queue: VecDeque::new(),
            low,
            high,
            past_low: false,
            finished: false,
        }
    }

    /// Pull the next leaf's entries into the queue. `Ok(false)` means
    /// the chain is exhausted.
    fn refill(&mut self) -> IndexResult<bool> {
        let Some(page_id) = self.next_leaf.take() else {
            return Ok(false);
        };
        let latch = self.latches.latch_for(page_id);
        latch.acquire(LatchMode::Shared);
        let result = (|| -> IndexResult<()> {
            let guard = self.buffer_pool.fetch_page(page_id)?;
            if page::page_kind(&guard[..]) != Some(PageKind::Leaf) {
                return Err(IndexError::StructuralInvariantViolation {
                    page_id,
                    detail: "leaf chain points at a non-leaf page",
                });
            }
            let leaf = LeafNode::new(&guard);
            self.queue = leaf.entries().into();
            self.next_leaf = leaf.next_leaf();
            Ok(())
        })();
        latch.release(LatchMode::Shared);
        result?;
        Ok(true)
    }

    fn step(&mut self) -> IndexResult<Option<(Vec<u8>, RecordId)>> {
        loop {
            let Some((key, rid)) = self.queue.pop_front() else {
                if self.refill()? {
                    continue;
                }
                return Ok(None);
            };

            if !self.past_low {
                if let Some(low) = &self.low {
                    let ordering = compare_to_bound(&self.key_type, &key, low)?;
                    let qualifies = match ordering {
                        Ordering::Less => false,
                        Ordering::Equal => low.inclusive,
                        Ordering::Greater => true,
                    };
                    if !qualifies {
                        continue;
                    }
                }
                self.past_low = true;
            }

            if let Some(high) = &self.high {
                let ordering = compare_to_bound(&self.key_type, &key, high)?;
                let within = match ordering {
                    Ordering::Less => true,
                    Ordering::Equal => high.inclusive,
                    Ordering::Greater => false,
                };
                if !within {
                    return Ok(None);
                }
            }
            return Ok(Some((key, rid)));
        }
    }
}

impl Iterator for RangeScan {
    type Item = IndexResult<(Vec<u8>, RecordId)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.step() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}
