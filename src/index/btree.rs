//! B-tree index engine.
//!
//! Nodes are page-aligned: leaves hold sorted (key, record id) entries
//! and chain to their right sibling for range scans; internal nodes
//! hold routing keys with one more child than keys. Keys are opaque
//! encodings ordered by the tree's [`TypeDescriptor`] through
//! [`crate::schema::ordering::compare`], so composite (struct) keys
//! work with no special casing.
//!
//! Mutations descend with exclusive latches, releasing ancestors as
//! soon as the current node is safe (cannot split for inserts, cannot
//! underflow for deletes). Lookups couple shared latches. A node found
//! structurally inconsistent halts all further mutation of the tree.

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::error;

use crate::schema::{codec, ordering, TypeDescriptor, Value};
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::internal_page::{INTERNAL_SLOTS_START, INTERNAL_SLOT_SIZE};
use crate::storage::page::leaf_page::{LEAF_SLOTS_START, LEAF_SLOT_SIZE};
use crate::storage::page::{
    self, InternalNode, InternalNodeMut, LeafNode, LeafNodeMut, PageId, PageKind, RecordId,
    PAGE_SIZE,
};

use super::error::{IndexError, IndexResult};
use super::iterator::{compare_to_bound, KeyBound, RangeScan};
use super::latch::{LatchCoupling, LatchManager, LatchMode};

/// Default tree order: maximum children per internal node.
pub const DEFAULT_ORDER: usize = 6;

const MIN_ORDER: usize = 4;
const MAX_ORDER: usize = 256;

/// Summary counters for one tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub entries: u64,
    pub nodes: u64,
    pub height: u32,
}

fn max_keys(order: usize) -> usize {
    order - 1
}

fn min_keys(order: usize) -> usize {
    order.div_ceil(2) - 1
}

/// Largest key this order can store while keeping a full node within
/// one page. Larger keys are rejected at insert rather than spilled.
pub fn max_key_size(order: usize) -> usize {
    let leaf = (PAGE_SIZE - LEAF_SLOTS_START) / order - LEAF_SLOT_SIZE;
    let internal = (PAGE_SIZE - INTERNAL_SLOTS_START) / order - INTERNAL_SLOT_SIZE;
    leaf.min(internal)
}

impl std::fmt::Debug for BTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BTree")
            .field("root_page_id", &self.root_page_id)
            .field("order", &self.order)
            .field("height", &self.height)
            .field("type_id", &self.type_id)
            .finish()
    }
}

pub struct BTree {
    buffer_pool: BufferPoolManager,
    key_type: TypeDescriptor,
    root_page_id: PageId,
    order: usize,
    height: u32,
    type_id: u32,
    latches: Arc<LatchManager>,
    halted: AtomicBool,
}

impl BTree {
    /// Create an empty tree: a single leaf root. The order is fixed for
    /// the life of the tree.
    pub fn create(
        buffer_pool: BufferPoolManager,
        key_type: TypeDescriptor,
        order: usize,
        type_id: u32,
    ) -> IndexResult<Self> {
        if !(MIN_ORDER..=MAX_ORDER).contains(&order) {
            return Err(IndexError::InvalidOrder {
                got: order,
                min: MIN_ORDER,
                max: MAX_ORDER,
            });
        }
        key_type.validate()?;

        let (root_page_id, mut guard) = buffer_pool.new_page(PageKind::Leaf)?;
        LeafNodeMut::init(&mut guard, root_page_id, type_id);
        drop(guard);

        Ok(Self {
            buffer_pool,
            key_type,
            root_page_id,
            order,
            height: 1,
            type_id,
            latches: Arc::new(LatchManager::new()),
            halted: AtomicBool::new(false),
        })
    }

    /// Open a tree at a known root.
    pub fn open(
        buffer_pool: BufferPoolManager,
        key_type: TypeDescriptor,
        order: usize,
        root_page_id: PageId,
        type_id: u32,
    ) -> IndexResult<Self> {
        if !(MIN_ORDER..=MAX_ORDER).contains(&order) {
            return Err(IndexError::InvalidOrder {
                got: order,
                min: MIN_ORDER,
                max: MAX_ORDER,
            });
        }
        key_type.validate()?;

        let mut tree = Self {
            buffer_pool,
            key_type,
            root_page_id,
            order,
            height: 0,
            type_id,
            latches: Arc::new(LatchManager::new()),
            halted: AtomicBool::new(false),
        };
        tree.height = tree.measure_height()?;
        Ok(tree)
    }

    pub fn root_page_id(&self) -> PageId {
        self.root_page_id
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn key_type(&self) -> &TypeDescriptor {
        &self.key_type
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Insert a key, replacing the record reference if the key is
    /// already present.
    pub fn insert(&mut self, key: &Value, rid: RecordId) -> IndexResult<()> {
        let encoded = self.encode_key(key)?;
        self.insert_encoded(&encoded, rid)
    }

    pub fn insert_encoded(&mut self, key: &[u8], rid: RecordId) -> IndexResult<()> {
        self.ensure_live()?;
        if key.len() > max_key_size(self.order) {
            return Err(IndexError::KeyTooLarge {
                size: key.len(),
                max: max_key_size(self.order),
            });
        }

        let mut coupling = LatchCoupling::new(self.latches.clone());
        let mut path: Vec<PageId> = Vec::new();
        let leaf_id = self.descend_for_insert(key, &mut coupling, &mut path)?;

        // Apply at the leaf.
        let mut entries = {
            let mut guard = self.buffer_pool.fetch_page_write(leaf_id)?;
            let leaf = LeafNode::new(&guard);
            match self.search_leaf(leaf_id, &leaf, key)? {
                Ok(index) => {
                    let mut leaf = LeafNodeMut::new(&mut guard);
                    leaf.set_record_id_at(index, rid);
                    return Ok(());
                }
                Err(position) => {
                    let mut entries = leaf.entries();
                    entries.insert(position, (key.to_vec(), rid));
                    if entries.len() <= max_keys(self.order) {
                        let mut leaf = LeafNodeMut::new(&mut guard);
                        let fits = leaf.write_entries(&entries);
                        debug_assert!(fits, "bounded entries always fit a leaf");
                        return Ok(());
                    }
                    entries
                }
            }
        };

        // The leaf overflows: split and propagate separators upward
        // through the still-latched ancestors.
        let mid = entries.len() / 2;
        let right_entries = entries.split_off(mid);
        let separator = right_entries[0].0.clone();
        let right_id = self.split_leaf(leaf_id, &entries, &right_entries, &mut coupling)?;

        let mut split_child = leaf_id;
        let mut carry = Some((separator, right_id));
        while let Some((sep, right)) = carry.take() {
            match path.pop() {
                Some(parent) => {
                    carry = self.insert_separator(parent, sep, right)?;
                    split_child = parent;
                }
                None => {
                    self.grow_root(split_child, sep, right)?;
                }
            }
        }
        Ok(())
    }

    /// Find the record reference for a key. A miss is a normal outcome,
    /// not a fault.
    pub fn lookup(&self, key: &Value) -> IndexResult<Option<RecordId>> {
        let encoded = codec::encode(&self.key_type, key)?;
        self.lookup_encoded(&encoded)
    }

    pub fn lookup_encoded(&self, key: &[u8]) -> IndexResult<Option<RecordId>> {
        let mut coupling = LatchCoupling::new(self.latches.clone());
        let mut page_id = self.root_page_id;
        loop {
            coupling.acquire(page_id, LatchMode::Shared);
            coupling.release_ancestors();
            let guard = self.buffer_pool.fetch_page(page_id)?;
            match page::page_kind(&guard[..]) {
                Some(PageKind::Leaf) => {
                    let leaf = LeafNode::new(&guard);
                    self.check_layout(page_id, leaf.validate())?;
                    return Ok(match self.search_leaf(page_id, &leaf, key)? {
                        Ok(index) => Some(leaf.record_id_at(index)),
                        Err(_) => None,
                    });
                }
                Some(PageKind::Internal) => {
                    let node = InternalNode::new(&guard);
                    self.check_layout(page_id, node.validate())?;
                    let child = node.child_at(self.route_by_key(page_id, &node, key)?);
                    drop(guard);
                    page_id = child;
                }
                _ => return Err(self.corrupt(page_id, "expected an index node")),
            }
        }
    }

    /// Remove a key. Returns whether it was present.
    pub fn delete(&mut self, key: &Value) -> IndexResult<bool> {
        let encoded = codec::encode(&self.key_type, key)?;
        self.delete_encoded(&encoded)
    }

    pub fn delete_encoded(&mut self, key: &[u8]) -> IndexResult<bool> {
        self.ensure_live()?;

        let mut coupling = LatchCoupling::new(self.latches.clone());
        let mut path: Vec<PageId> = Vec::new();
        let leaf_id = self.descend_for_delete(key, &mut coupling, &mut path)?;

        let underfull = {
            let mut guard = self.buffer_pool.fetch_page_write(leaf_id)?;
            let leaf = LeafNode::new(&guard);
            match self.search_leaf(leaf_id, &leaf, key)? {
                Err(_) => return Ok(false),
                Ok(index) => {
                    let mut entries = leaf.entries();
                    entries.remove(index);
                    let underfull =
                        entries.len() < min_keys(self.order) && leaf_id != self.root_page_id;
                    let mut leaf = LeafNodeMut::new(&mut guard);
                    let fits = leaf.write_entries(&entries);
                    debug_assert!(fits);
                    underfull
                }
            }
        };

        if underfull {
            let mut child = leaf_id;
            while let Some(parent) = path.pop() {
                let merged = self.rebalance_child(parent, child, &mut coupling)?;
                if !merged {
                    break;
                }
                let parent_keys = {
                    let guard = self.buffer_pool.fetch_page(parent)?;
                    InternalNode::new(&guard).key_count()
                };
                if parent == self.root_page_id {
                    if parent_keys == 0 {
                        self.shrink_root(parent)?;
                    }
                    break;
                }
                if parent_keys >= min_keys(self.order) {
                    break;
                }
                child = parent;
            }
        }
        Ok(true)
    }

    /// Lazy ordered scan between two bounds. Bounds may be full keys or
    /// prefixes of a composite key's leading fields.
    pub fn range_scan(
        &self,
        low: Option<KeyBound>,
        high: Option<KeyBound>,
    ) -> IndexResult<RangeScan> {
        let start_leaf = self.find_start_leaf(low.as_ref())?;
        Ok(RangeScan::new(
            self.buffer_pool.clone(),
            self.key_type.clone(),
            self.latches.clone(),
            start_leaf,
            low,
            high,
        ))
    }

    /// Bound from a full key value.
    pub fn bound(&self, key: &Value, inclusive: bool) -> IndexResult<KeyBound> {
        Ok(KeyBound::full(codec::encode(&self.key_type, key)?, inclusive))
    }

    /// Bound from values for the leading fields of a composite key.
    pub fn prefix_bound(&self, values: &[Value], inclusive: bool) -> IndexResult<KeyBound> {
        let fields = match &self.key_type {
            TypeDescriptor::Struct { fields } => fields,
            // Non-composite keys: a one-value prefix is the full key.
            _ => {
                assert_eq!(values.len(), 1);
                return self.bound(&values[0], inclusive);
            }
        };
        assert!(values.len() <= fields.len());
        let mut bytes = Vec::new();
        for (value, field) in values.iter().zip(fields.iter()) {
            codec::encode_into(&field.ty, value, &mut bytes)?;
        }
        Ok(KeyBound::prefix(bytes, values.len(), inclusive))
    }

    /// Walk the whole tree, counting entries and nodes. Diagnostic; not
    /// latched against concurrent mutation.
    pub fn stats(&self) -> IndexResult<IndexStats> {
        let mut stats = IndexStats {
            height: self.height,
            ..Default::default()
        };
        let mut pending = vec![self.root_page_id];
        while let Some(page_id) = pending.pop() {
            let guard = self.buffer_pool.fetch_page(page_id)?;
            stats.nodes += 1;
            match page::page_kind(&guard[..]) {
                Some(PageKind::Leaf) => {
                    stats.entries += LeafNode::new(&guard).entry_count() as u64;
                }
                Some(PageKind::Internal) => {
                    pending.extend(InternalNode::new(&guard).children());
                }
                _ => return Err(self.corrupt(page_id, "expected an index node")),
            }
        }
        Ok(stats)
    }

    /// Verify the full tree: sorted keys, separator bounds, occupancy,
    /// children-vs-keys counts and uniform leaf depth. Returns the
    /// number of entries. Test and recovery support.
    pub fn check_invariants(&self) -> IndexResult<u64> {
        let (entries, depth) = self.check_subtree(self.root_page_id, true, None, None)?;
        if depth != self.height {
            return Err(self.corrupt(self.root_page_id, "tracked height does not match tree"));
        }
        Ok(entries)
    }

    fn check_subtree(
        &self,
        page_id: PageId,
        is_root: bool,
        low: Option<&[u8]>,
        high: Option<&[u8]>,
    ) -> IndexResult<(u64, u32)> {
        let guard = self.buffer_pool.fetch_page(page_id)?;
        match page::page_kind(&guard[..]) {
            Some(PageKind::Leaf) => {
                let leaf = LeafNode::new(&guard);
                self.check_layout(page_id, leaf.validate())?;
                let count = leaf.entry_count();
                if !is_root && count < min_keys(self.order) {
                    return Err(self.corrupt(page_id, "leaf below minimum occupancy"));
                }
                if count > max_keys(self.order) {
                    return Err(self.corrupt(page_id, "leaf above maximum occupancy"));
                }
                for i in 0..count {
                    let key = leaf.key_at(i);
                    if i + 1 < count
                        && self.compare_keys(page_id, key, leaf.key_at(i + 1))?
                            != CmpOrdering::Less
                    {
                        return Err(self.corrupt(page_id, "leaf keys out of order"));
                    }
                    if let Some(low) = low {
                        if self.compare_keys(page_id, key, low)? == CmpOrdering::Less {
                            return Err(self.corrupt(page_id, "leaf key below separator"));
                        }
                    }
                    if let Some(high) = high {
                        if self.compare_keys(page_id, key, high)? != CmpOrdering::Less {
                            return Err(self.corrupt(page_id, "leaf key above separator"));
                        }
                    }
                }
                Ok((count as u64, 1))
            }
            Some(PageKind::Internal) => {
                let node = InternalNode::new(&guard);
                self.check_layout(page_id, node.validate())?;
                let count = node.key_count();
                if count == 0 {
                    return Err(self.corrupt(page_id, "internal node with no keys"));
                }
                if !is_root && count < min_keys(self.order) {
                    return Err(self.corrupt(page_id, "internal node below minimum occupancy"));
                }
                if count > max_keys(self.order) {
                    return Err(self.corrupt(page_id, "internal node above maximum occupancy"));
                }
                let keys = node.keys();
                let children = node.children();
                drop(guard);

                for i in 0..count.saturating_sub(1) {
                    if self.compare_keys(page_id, &keys[i], &keys[i + 1])? != CmpOrdering::Less {
                        return Err(self.corrupt(page_id, "internal keys out of order"));
                    }
                }

                let mut total = 0u64;
                let mut depth = None;
                for (i, child) in children.iter().enumerate() {
                    let child_low = if i == 0 { low } else { Some(keys[i - 1].as_slice()) };
                    let child_high = if i == count { high } else { Some(keys[i].as_slice()) };
                    let (entries, child_depth) =
                        self.check_subtree(*child, false, child_low, child_high)?;
                    total += entries;
                    match depth {
                        None => depth = Some(child_depth),
                        Some(d) if d != child_depth => {
                            return Err(self.corrupt(page_id, "uneven leaf depth"));
                        }
                        _ => {}
                    }
                }
                Ok((total, depth.unwrap_or(0) + 1))
            }
            _ => Err(self.corrupt(page_id, "expected an index node")),
        }
    }

    // Descent helpers ----------------------------------------------------

    fn descend_for_insert(
        &self,
        key: &[u8],
        coupling: &mut LatchCoupling,
        path: &mut Vec<PageId>,
    ) -> IndexResult<PageId> {
        let mut page_id = self.root_page_id;
        loop {
            coupling.acquire(page_id, LatchMode::Exclusive);
            let guard = self.buffer_pool.fetch_page(page_id)?;
            match page::page_kind(&guard[..]) {
                Some(PageKind::Leaf) => {
                    let leaf = LeafNode::new(&guard);
                    self.check_layout(page_id, leaf.validate())?;
                    if leaf.entry_count() < max_keys(self.order) {
                        coupling.release_ancestors();
                        path.clear();
                    }
                    return Ok(page_id);
                }
                Some(PageKind::Internal) => {
                    let node = InternalNode::new(&guard);
                    self.check_layout(page_id, node.validate())?;
                    if node.key_count() < max_keys(self.order) {
                        coupling.release_ancestors();
                        path.clear();
                    }
                    let child = node.child_at(self.route_by_key(page_id, &node, key)?);
                    drop(guard);
                    path.push(page_id);
                    page_id = child;
                }
                _ => return Err(self.corrupt(page_id, "expected an index node")),
            }
        }
    }

    fn descend_for_delete(
        &self,
        key: &[u8],
        coupling: &mut LatchCoupling,
        path: &mut Vec<PageId>,
    ) -> IndexResult<PageId> {
        let mut page_id = self.root_page_id;
        loop {
            coupling.acquire(page_id, LatchMode::Exclusive);
            let guard = self.buffer_pool.fetch_page(page_id)?;
            let is_root = page_id == self.root_page_id;
            match page::page_kind(&guard[..]) {
                Some(PageKind::Leaf) => {
                    let leaf = LeafNode::new(&guard);
                    self.check_layout(page_id, leaf.validate())?;
                    if is_root || leaf.entry_count() > min_keys(self.order) {
                        coupling.release_ancestors();
                        path.clear();
                    }
                    return Ok(page_id);
                }
                Some(PageKind::Internal) => {
                    let node = InternalNode::new(&guard);
                    self.check_layout(page_id, node.validate())?;
                    if is_root || node.key_count() > min_keys(self.order) {
                        coupling.release_ancestors();
                        path.clear();
                    }
                    let child = node.child_at(self.route_by_key(page_id, &node, key)?);
                    drop(guard);
                    path.push(page_id);
                    page_id = child;
                }
                _ => return Err(self.corrupt(page_id, "expected an index node")),
            }
        }
    }

    /// Leftmost leaf that can contain a key satisfying the low bound.
    fn find_start_leaf(&self, low: Option<&KeyBound>) -> IndexResult<PageId> {
        let mut coupling = LatchCoupling::new(self.latches.clone());
        let mut page_id = self.root_page_id;
        loop {
            coupling.acquire(page_id, LatchMode::Shared);
            coupling.release_ancestors();
            let guard = self.buffer_pool.fetch_page(page_id)?;
            match page::page_kind(&guard[..]) {
                Some(PageKind::Leaf) => return Ok(page_id),
                Some(PageKind::Internal) => {
                    let node = InternalNode::new(&guard);
                    self.check_layout(page_id, node.validate())?;
                    let index = match low {
                        None => 0,
                        Some(bound) => self.route_by_bound(page_id, &node, bound)?,
                    };
                    let child = node.child_at(index);
                    drop(guard);
                    page_id = child;
                }
                _ => return Err(self.corrupt(page_id, "expected an index node")),
            }
        }
    }

    // Structural mutation helpers ----------------------------------------

    /// Write the two halves of a splitting leaf and stitch the chain.
    fn split_leaf(
        &mut self,
        left_id: PageId,
        left_entries: &[(Vec<u8>, RecordId)],
        right_entries: &[(Vec<u8>, RecordId)],
        coupling: &mut LatchCoupling,
    ) -> IndexResult<PageId> {
        let (right_id, mut right_guard) = self.buffer_pool.new_page(PageKind::Leaf)?;

        let mut left_guard = self.buffer_pool.fetch_page_write(left_id)?;
        let old_next = LeafNode::new(&left_guard).next_leaf();

        {
            let mut right = LeafNodeMut::init(&mut right_guard, right_id, self.type_id);
            let fits = right.write_entries(right_entries);
            debug_assert!(fits);
            right.set_prev_leaf(Some(left_id));
            right.set_next_leaf(old_next);
        }
        drop(right_guard);

        {
            let mut left = LeafNodeMut::new(&mut left_guard);
            let fits = left.write_entries(left_entries);
            debug_assert!(fits);
            left.set_next_leaf(Some(right_id));
        }
        drop(left_guard);

        if let Some(next_id) = old_next {
            coupling.acquire(next_id, LatchMode::Exclusive);
            let mut guard = self.buffer_pool.fetch_page_write(next_id)?;
            LeafNodeMut::new(&mut guard).set_prev_leaf(Some(right_id));
        }
        Ok(right_id)
    }

    /// Insert a promoted separator into a latched ancestor. Returns the
    /// carry for the next level if this node splits too.
    fn insert_separator(
        &mut self,
        page_id: PageId,
        separator: Vec<u8>,
        right_child: PageId,
    ) -> IndexResult<Option<(Vec<u8>, PageId)>> {
        let mut guard = self.buffer_pool.fetch_page_write(page_id)?;
        let node = InternalNode::new(&guard);
        let position = match self.search_keys(page_id, &node.keys(), &separator)? {
            Ok(i) => i + 1,
            Err(i) => i,
        };
        let mut keys = node.keys();
        let mut children = node.children();
        keys.insert(position, separator);
        children.insert(position + 1, right_child);

        if keys.len() <= max_keys(self.order) {
            let fits = InternalNodeMut::new(&mut guard).write_node(&keys, &children);
            debug_assert!(fits);
            return Ok(None);
        }

        // Split: the median key moves up, not into either half.
        let mid = keys.len() / 2;
        let promoted = keys[mid].clone();
        let right_keys = keys[mid + 1..].to_vec();
        let right_children = children[mid + 1..].to_vec();
        let left_keys = keys[..mid].to_vec();
        let left_children = children[..=mid].to_vec();

        let (right_id, mut right_guard) = self.buffer_pool.new_page(PageKind::Internal)?;
        {
            let mut right = InternalNodeMut::init(&mut right_guard, right_id, self.type_id);
            let fits = right.write_node(&right_keys, &right_children);
            debug_assert!(fits);
        }
        drop(right_guard);

        let fits = InternalNodeMut::new(&mut guard).write_node(&left_keys, &left_children);
        debug_assert!(fits);
        Ok(Some((promoted, right_id)))
    }

    /// The root split: allocate a new root one level up.
    fn grow_root(
        &mut self,
        left: PageId,
        separator: Vec<u8>,
        right: PageId,
    ) -> IndexResult<()> {
        let (root_id, mut guard) = self.buffer_pool.new_page(PageKind::Internal)?;
        let mut node = InternalNodeMut::init(&mut guard, root_id, self.type_id);
        let fits = node.write_node(&[separator], &[left, right]);
        debug_assert!(fits);
        drop(guard);
        self.root_page_id = root_id;
        self.height += 1;
        Ok(())
    }

    /// The root lost its last key: its only child becomes the root.
    fn shrink_root(&mut self, old_root: PageId) -> IndexResult<()> {
        let only_child = {
            let guard = self.buffer_pool.fetch_page(old_root)?;
            InternalNode::new(&guard).child_at(0)
        };
        self.buffer_pool.free_page(old_root)?;
        self.root_page_id = only_child;
        self.height -= 1;
        Ok(())
    }

    /// Fix an underfull child by borrowing from an adjacent sibling
    /// under the same parent, or merging with it. Returns true when a
    /// merge removed a separator from the parent.
    fn rebalance_child(
        &mut self,
        parent_id: PageId,
        child_id: PageId,
        coupling: &mut LatchCoupling,
    ) -> IndexResult<bool> {
        let (child_index, sibling_index, key_count) = {
            let guard = self.buffer_pool.fetch_page(parent_id)?;
            let parent = InternalNode::new(&guard);
            let key_count = parent.key_count();
            if key_count == 0 {
                return Ok(false);
            }
            let child_index = parent
                .position_of_child(child_id)
                .ok_or_else(|| self.corrupt(parent_id, "child missing from parent"))?;
            // Prefer the left sibling; leftmost children borrow right.
            let sibling_index = if child_index > 0 { child_index - 1 } else { 1 };
            (child_index, sibling_index, key_count)
        };
        debug_assert!(sibling_index <= key_count);

        let (left_index, left_id, right_id) = {
            let guard = self.buffer_pool.fetch_page(parent_id)?;
            let parent = InternalNode::new(&guard);
            let sibling_id = parent.child_at(sibling_index);
            if sibling_index < child_index {
                (sibling_index, sibling_id, child_id)
            } else {
                (child_index, child_id, sibling_id)
            }
        };
        let separator_index = left_index;

        // The parent is latched exclusively, so nobody else can reach
        // the sibling; latch it for the duration of the repair.
        let sibling_id = if left_id == child_id { right_id } else { left_id };
        coupling.acquire(sibling_id, LatchMode::Exclusive);

        let kind = {
            let guard = self.buffer_pool.fetch_page(child_id)?;
            page::page_kind(&guard[..])
        };
        match kind {
            Some(PageKind::Leaf) => {
                self.rebalance_leaves(parent_id, left_id, right_id, separator_index, coupling)
            }
            Some(PageKind::Internal) => {
                self.rebalance_internals(parent_id, left_id, right_id, separator_index)
            }
            _ => Err(self.corrupt(child_id, "expected an index node")),
        }
    }

    fn rebalance_leaves(
        &mut self,
        parent_id: PageId,
        left_id: PageId,
        right_id: PageId,
        separator_index: usize,
        coupling: &mut LatchCoupling,
    ) -> IndexResult<bool> {
        let mut left_entries = {
            let guard = self.buffer_pool.fetch_page(left_id)?;
            let leaf = LeafNode::new(&guard);
            self.check_layout(left_id, leaf.validate())?;
            leaf.entries()
        };
        let mut right_entries = {
            let guard = self.buffer_pool.fetch_page(right_id)?;
            let leaf = LeafNode::new(&guard);
            self.check_layout(right_id, leaf.validate())?;
            leaf.entries()
        };

        let minimum = min_keys(self.order);
        let can_borrow_left = left_entries.len() > minimum && right_entries.len() < minimum;
        let can_borrow_right = right_entries.len() > minimum && left_entries.len() < minimum;

        if can_borrow_left || can_borrow_right {
            if can_borrow_left {
                let moved = left_entries.pop().expect("donor is non-empty");
                right_entries.insert(0, moved);
            } else {
                let moved = right_entries.remove(0);
                left_entries.push(moved);
            }
            let new_separator = right_entries[0].0.clone();

            self.rewrite_leaf_entries(left_id, &left_entries)?;
            self.rewrite_leaf_entries(right_id, &right_entries)?;
            self.replace_parent_key(parent_id, separator_index, new_separator)?;
            return Ok(false);
        }

        // Merge right into left and drop the separator.
        left_entries.extend(right_entries);
        let chained_next = {
            let guard = self.buffer_pool.fetch_page(right_id)?;
            LeafNode::new(&guard).next_leaf()
        };
        {
            let mut guard = self.buffer_pool.fetch_page_write(left_id)?;
            let mut leaf = LeafNodeMut::new(&mut guard);
            let fits = leaf.write_entries(&left_entries);
            debug_assert!(fits, "merged leaf stays within capacity");
            leaf.set_next_leaf(chained_next);
        }
        if let Some(next_id) = chained_next {
            coupling.acquire(next_id, LatchMode::Exclusive);
            let mut guard = self.buffer_pool.fetch_page_write(next_id)?;
            LeafNodeMut::new(&mut guard).set_prev_leaf(Some(left_id));
        }
        self.remove_parent_key(parent_id, separator_index)?;
        self.buffer_pool.free_page(right_id)?;
        Ok(true)
    }

    fn rebalance_internals(
        &mut self,
        parent_id: PageId,
        left_id: PageId,
        right_id: PageId,
        separator_index: usize,
    ) -> IndexResult<bool> {
        let separator = {
            let guard = self.buffer_pool.fetch_page(parent_id)?;
            InternalNode::new(&guard).key_at(separator_index).to_vec()
        };
        let (mut left_keys, mut left_children) = {
            let guard = self.buffer_pool.fetch_page(left_id)?;
            let node = InternalNode::new(&guard);
            self.check_layout(left_id, node.validate())?;
            (node.keys(), node.children())
        };
        let (mut right_keys, mut right_children) = {
            let guard = self.buffer_pool.fetch_page(right_id)?;
            let node = InternalNode::new(&guard);
            self.check_layout(right_id, node.validate())?;
            (node.keys(), node.children())
        };

        let minimum = min_keys(self.order);
        if left_keys.len() > minimum && right_keys.len() < minimum {
            // Rotate through the parent from the left.
            right_keys.insert(0, separator);
            right_children.insert(0, left_children.pop().expect("donor has children"));
            let new_separator = left_keys.pop().expect("donor has keys");
            self.rewrite_internal(left_id, &left_keys, &left_children)?;
            self.rewrite_internal(right_id, &right_keys, &right_children)?;
            self.replace_parent_key(parent_id, separator_index, new_separator)?;
            return Ok(false);
        }
        if right_keys.len() > minimum && left_keys.len() < minimum {
            // Rotate through the parent from the right.
            left_keys.push(separator);
            left_children.push(right_children.remove(0));
            let new_separator = right_keys.remove(0);
            self.rewrite_internal(left_id, &left_keys, &left_children)?;
            self.rewrite_internal(right_id, &right_keys, &right_children)?;
            self.replace_parent_key(parent_id, separator_index, new_separator)?;
            return Ok(false);
        }

        // Merge: left + separator + right.
        left_keys.push(separator);
        left_keys.extend(right_keys);
        left_children.extend(right_children);
        self.rewrite_internal(left_id, &left_keys, &left_children)?;
        self.remove_parent_key(parent_id, separator_index)?;
        self.buffer_pool.free_page(right_id)?;
        Ok(true)
    }

    fn rewrite_leaf_entries(
        &mut self,
        page_id: PageId,
        entries: &[(Vec<u8>, RecordId)],
    ) -> IndexResult<()> {
        let mut guard = self.buffer_pool.fetch_page_write(page_id)?;
        let fits = LeafNodeMut::new(&mut guard).write_entries(entries);
        debug_assert!(fits);
        Ok(())
    }

    fn rewrite_internal(
        &mut self,
        page_id: PageId,
        keys: &[Vec<u8>],
        children: &[PageId],
    ) -> IndexResult<()> {
        let mut guard = self.buffer_pool.fetch_page_write(page_id)?;
        let fits = InternalNodeMut::new(&mut guard).write_node(keys, children);
        debug_assert!(fits);
        Ok(())
    }

    fn replace_parent_key(
        &mut self,
        parent_id: PageId,
        index: usize,
        key: Vec<u8>,
    ) -> IndexResult<()> {
        let mut guard = self.buffer_pool.fetch_page_write(parent_id)?;
        let node = InternalNode::new(&guard);
        let mut keys = node.keys();
        let children = node.children();
        keys[index] = key;
        let fits = InternalNodeMut::new(&mut guard).write_node(&keys, &children);
        debug_assert!(fits);
        Ok(())
    }

    fn remove_parent_key(&mut self, parent_id: PageId, index: usize) -> IndexResult<()> {
        let mut guard = self.buffer_pool.fetch_page_write(parent_id)?;
        let node = InternalNode::new(&guard);
        let mut keys = node.keys();
        let mut children = node.children();
        keys.remove(index);
        children.remove(index + 1);
        let fits = InternalNodeMut::new(&mut guard).write_node(&keys, &children);
        debug_assert!(fits);
        Ok(())
    }

    // Key handling -------------------------------------------------------

    fn encode_key(&self, key: &Value) -> IndexResult<Vec<u8>> {
        Ok(codec::encode(&self.key_type, key)?)
    }

    fn compare_keys(&self, page_id: PageId, a: &[u8], b: &[u8]) -> IndexResult<CmpOrdering> {
        ordering::compare(&self.key_type, a, b)
            .map_err(|_| self.corrupt(page_id, "stored key does not decode"))
    }

    /// Binary search over a leaf's keys.
    fn search_leaf(
        &self,
        page_id: PageId,
        leaf: &LeafNode<'_>,
        key: &[u8],
    ) -> IndexResult<Result<usize, usize>> {
        let mut lo = 0;
        let mut hi = leaf.entry_count();
        while lo < hi {
            let mid = (lo + hi) / 2;
            match self.compare_keys(page_id, leaf.key_at(mid), key)? {
                CmpOrdering::Less => lo = mid + 1,
                CmpOrdering::Greater => hi = mid,
                CmpOrdering::Equal => return Ok(Ok(mid)),
            }
        }
        Ok(Err(lo))
    }

    /// Binary search over a sorted key list.
    fn search_keys(
        &self,
        page_id: PageId,
        keys: &[Vec<u8>],
        key: &[u8],
    ) -> IndexResult<Result<usize, usize>> {
        let mut lo = 0;
        let mut hi = keys.len();
        while lo < hi {
            let mid = (lo + hi) / 2;
            match self.compare_keys(page_id, &keys[mid], key)? {
                CmpOrdering::Less => lo = mid + 1,
                CmpOrdering::Greater => hi = mid,
                CmpOrdering::Equal => return Ok(Ok(mid)),
            }
        }
        Ok(Err(lo))
    }

    /// Routing: keys equal to a separator live in its right child, so
    /// descend past every node key less than or equal to the search key.
    fn route_by_key(
        &self,
        page_id: PageId,
        node: &InternalNode<'_>,
        key: &[u8],
    ) -> IndexResult<usize> {
        let mut lo = 0;
        let mut hi = node.key_count();
        while lo < hi {
            let mid = (lo + hi) / 2;
            match self.compare_keys(page_id, node.key_at(mid), key)? {
                CmpOrdering::Less | CmpOrdering::Equal => lo = mid + 1,
                CmpOrdering::Greater => hi = mid,
            }
        }
        Ok(lo)
    }

    /// Routing toward the first key that can satisfy a low bound: the
    /// child left of the first separator past the bound.
    fn route_by_bound(
        &self,
        page_id: PageId,
        node: &InternalNode<'_>,
        bound: &KeyBound,
    ) -> IndexResult<usize> {
        let mut lo = 0;
        let mut hi = node.key_count();
        while lo < hi {
            let mid = (lo + hi) / 2;
            let ordering = compare_to_bound(&self.key_type, node.key_at(mid), bound)
                .map_err(|_| self.corrupt(page_id, "stored key does not decode"))?;
            let qualifies = match ordering {
                CmpOrdering::Less => false,
                CmpOrdering::Equal => bound.inclusive,
                CmpOrdering::Greater => true,
            };
            if qualifies {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        Ok(lo)
    }

    // Fault handling -----------------------------------------------------

    fn ensure_live(&self) -> IndexResult<()> {
        if self.is_halted() {
            return Err(IndexError::Halted);
        }
        Ok(())
    }

    fn check_layout(&self, page_id: PageId, result: Result<(), &'static str>) -> IndexResult<()> {
        result.map_err(|detail| self.corrupt(page_id, detail))
    }

    /// An unrecoverable internal-consistency fault: log it, halt all
    /// further mutation of this index, and surface the error. Never
    /// auto-repaired.
    fn corrupt(&self, page_id: PageId, detail: &'static str) -> IndexError {
        error!(
            "structural invariant violation on page {}: {}; halting index mutation",
            page_id, detail
        );
        self.halted.store(true, Ordering::SeqCst);
        IndexError::StructuralInvariantViolation { page_id, detail }
    }

    fn measure_height(&self) -> IndexResult<u32> {
        let mut height = 1;
        let mut page_id = self.root_page_id;
        loop {
            let guard = self.buffer_pool.fetch_page(page_id)?;
            match page::page_kind(&guard[..]) {
                Some(PageKind::Leaf) => return Ok(height),
                Some(PageKind::Internal) => {
                    let node = InternalNode::new(&guard);
                    self.check_layout(page_id, node.validate())?;
                    let child = node.child_at(0);
                    drop(guard);
                    height += 1;
                    page_id = child;
                }
                _ => return Err(self.corrupt(page_id, "expected an index node")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, IntWidth};
    use crate::storage::disk::PageManager;
    use tempfile::tempdir;

    fn test_pool(capacity: usize) -> (BufferPoolManager, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.db");
        let page_manager = PageManager::create(&path).unwrap();
        (BufferPoolManager::with_lru(page_manager, capacity), dir)
    }

    fn u64_tree(order: usize) -> (BTree, tempfile::TempDir) {
        let (pool, dir) = test_pool(64);
        let tree = BTree::create(pool, TypeDescriptor::uint(IntWidth::W64), order, 1).unwrap();
        (tree, dir)
    }

    fn rid(n: u64) -> RecordId {
        RecordId::new(PageId((n % 1000) as u32 + 1), (n % 100) as u16)
    }

    fn collect(scan: RangeScan) -> Vec<(Vec<u8>, RecordId)> {
        scan.map(|item| item.unwrap()).collect()
    }

    fn decode_u64(tree: &BTree, bytes: &[u8]) -> u64 {
        match codec::decode(tree.key_type(), bytes).unwrap() {
            Value::Uint(v) => v,
            other => panic!("unexpected key {other:?}"),
        }
    }

    #[test]
    fn test_create_empty_tree() {
        let (tree, _dir) = u64_tree(DEFAULT_ORDER);
        assert_eq!(tree.height(), 1);
        assert_eq!(tree.lookup(&Value::Uint(1)).unwrap(), None);
        assert_eq!(tree.check_invariants().unwrap(), 0);
    }

    #[test]
    fn test_invalid_order_rejected() {
        let (pool, _dir) = test_pool(8);
        let err =
            BTree::create(pool, TypeDescriptor::uint(IntWidth::W64), 2, 1).unwrap_err();
        assert!(matches!(err, IndexError::InvalidOrder { .. }));
    }

    #[test]
    fn test_insert_and_lookup_single() {
        let (mut tree, _dir) = u64_tree(DEFAULT_ORDER);
        tree.insert(&Value::Uint(42), rid(42)).unwrap();
        assert_eq!(tree.lookup(&Value::Uint(42)).unwrap(), Some(rid(42)));
        assert_eq!(tree.lookup(&Value::Uint(43)).unwrap(), None);
    }

    #[test]
    fn test_insert_replaces_existing_key() {
        let (mut tree, _dir) = u64_tree(DEFAULT_ORDER);
        tree.insert(&Value::Uint(7), rid(1)).unwrap();
        tree.insert(&Value::Uint(7), rid(2)).unwrap();
        assert_eq!(tree.lookup(&Value::Uint(7)).unwrap(), Some(rid(2)));
        assert_eq!(tree.check_invariants().unwrap(), 1);
    }

    #[test]
    fn test_insert_causes_split() {
        let (mut tree, _dir) = u64_tree(DEFAULT_ORDER);
        // Order 6: a leaf holds 5 keys, the 6th forces a split.
        for i in 0..6u64 {
            tree.insert(&Value::Uint(i), rid(i)).unwrap();
        }
        assert_eq!(tree.height(), 2);
        for i in 0..6u64 {
            assert_eq!(tree.lookup(&Value::Uint(i)).unwrap(), Some(rid(i)));
        }
        assert_eq!(tree.check_invariants().unwrap(), 6);
    }

    #[test]
    fn test_sequential_inserts_keep_invariants() {
        let (mut tree, _dir) = u64_tree(DEFAULT_ORDER);
        for i in 1..=1000u64 {
            tree.insert(&Value::Uint(i), rid(i)).unwrap();
        }
        assert_eq!(tree.check_invariants().unwrap(), 1000);
        for i in 1..=1000u64 {
            assert_eq!(tree.lookup(&Value::Uint(i)).unwrap(), Some(rid(i)));
        }

        // Order 6 means at least ceil(6/2) = 3-way fan-out in steady
        // state, so height stays within one of log_3(1000).
        let expected = (1000f64).log(3.0).ceil() as u32;
        assert!(
            (expected.saturating_sub(1)..=expected + 1).contains(&tree.height()),
            "height {} too far from log_3(1000) = {}",
            tree.height(),
            expected
        );
    }

    #[test]
    fn test_reverse_inserts_keep_invariants() {
        let (mut tree, _dir) = u64_tree(DEFAULT_ORDER);
        for i in (1..=300u64).rev() {
            tree.insert(&Value::Uint(i), rid(i)).unwrap();
        }
        assert_eq!(tree.check_invariants().unwrap(), 300);
    }

    #[test]
    fn test_random_inserts_and_deletes() {
        use rand::prelude::*;

        let (mut tree, _dir) = u64_tree(DEFAULT_ORDER);
        let mut rng = StdRng::seed_from_u64(0xC0FFEE);
        let mut keys: Vec<u64> = (0..500).collect();
        keys.shuffle(&mut rng);

        for &k in &keys {
            tree.insert(&Value::Uint(k), rid(k)).unwrap();
        }
        assert_eq!(tree.check_invariants().unwrap(), 500);

        keys.shuffle(&mut rng);
        for &k in keys.iter().take(250) {
            assert!(tree.delete(&Value::Uint(k)).unwrap());
        }
        assert_eq!(tree.check_invariants().unwrap(), 250);

        for &k in keys.iter().take(250) {
            assert_eq!(tree.lookup(&Value::Uint(k)).unwrap(), None);
        }
        for &k in keys.iter().skip(250) {
            assert_eq!(tree.lookup(&Value::Uint(k)).unwrap(), Some(rid(k)));
        }
    }

    #[test]
    fn test_delete_missing_key() {
        let (mut tree, _dir) = u64_tree(DEFAULT_ORDER);
        tree.insert(&Value::Uint(1), rid(1)).unwrap();
        assert!(!tree.delete(&Value::Uint(2)).unwrap());
        assert!(tree.delete(&Value::Uint(1)).unwrap());
        assert!(!tree.delete(&Value::Uint(1)).unwrap());
        assert_eq!(tree.check_invariants().unwrap(), 0);
    }

    #[test]
    fn test_delete_underflow_triggers_merge_or_borrow() {
        let (mut tree, _dir) = u64_tree(DEFAULT_ORDER);
        for i in 0..12u64 {
            tree.insert(&Value::Uint(i), rid(i)).unwrap();
        }
        let stats_before = tree.stats().unwrap();
        assert!(stats_before.height >= 2);

        // Drain one leaf's range; the tree must stay balanced with no
        // orphaned child pointers.
        for i in 0..6u64 {
            assert!(tree.delete(&Value::Uint(i)).unwrap());
            tree.check_invariants().unwrap();
        }
        assert_eq!(tree.check_invariants().unwrap(), 6);
    }

    #[test]
    fn test_delete_everything_shrinks_root() {
        let (mut tree, _dir) = u64_tree(DEFAULT_ORDER);
        for i in 0..100u64 {
            tree.insert(&Value::Uint(i), rid(i)).unwrap();
        }
        assert!(tree.height() > 1);
        for i in 0..100u64 {
            assert!(tree.delete(&Value::Uint(i)).unwrap());
        }
        assert_eq!(tree.check_invariants().unwrap(), 0);
        assert_eq!(tree.height(), 1);
    }

    #[test]
    fn test_range_scan_full() {
        let (mut tree, _dir) = u64_tree(DEFAULT_ORDER);
        for i in (0..50u64).rev() {
            tree.insert(&Value::Uint(i), rid(i)).unwrap();
        }
        let entries = collect(tree.range_scan(None, None).unwrap());
        assert_eq!(entries.len(), 50);
        let keys: Vec<u64> = entries.iter().map(|(k, _)| decode_u64(&tree, k)).collect();
        let expected: Vec<u64> = (0..50).collect();
        assert_eq!(keys, expected);
    }

    #[test]
    fn test_range_scan_bounds_and_inclusivity() {
        let (mut tree, _dir) = u64_tree(DEFAULT_ORDER);
        for i in 0..100u64 {
            tree.insert(&Value::Uint(i), rid(i)).unwrap();
        }

        let low = tree.bound(&Value::Uint(10), true).unwrap();
        let high = tree.bound(&Value::Uint(20), true).unwrap();
        let keys: Vec<u64> = collect(tree.range_scan(Some(low), Some(high)).unwrap())
            .iter()
            .map(|(k, _)| decode_u64(&tree, k))
            .collect();
        assert_eq!(keys, (10..=20).collect::<Vec<_>>());

        let low = tree.bound(&Value::Uint(10), false).unwrap();
        let high = tree.bound(&Value::Uint(20), false).unwrap();
        let keys: Vec<u64> = collect(tree.range_scan(Some(low), Some(high)).unwrap())
            .iter()
            .map(|(k, _)| decode_u64(&tree, k))
            .collect();
        assert_eq!(keys, (11..=19).collect::<Vec<_>>());
    }

    #[test]
    fn test_range_scan_half_open() {
        let (mut tree, _dir) = u64_tree(DEFAULT_ORDER);
        for i in 0..30u64 {
            tree.insert(&Value::Uint(i), rid(i)).unwrap();
        }
        let low = tree.bound(&Value::Uint(25), true).unwrap();
        let keys: Vec<u64> = collect(tree.range_scan(Some(low), None).unwrap())
            .iter()
            .map(|(k, _)| decode_u64(&tree, k))
            .collect();
        assert_eq!(keys, (25..30).collect::<Vec<_>>());

        let high = tree.bound(&Value::Uint(5), false).unwrap();
        let keys: Vec<u64> = collect(tree.range_scan(None, Some(high)).unwrap())
            .iter()
            .map(|(k, _)| decode_u64(&tree, k))
            .collect();
        assert_eq!(keys, (0..5).collect::<Vec<_>>());
    }

    #[test]
    fn test_range_scan_empty_range() {
        let (mut tree, _dir) = u64_tree(DEFAULT_ORDER);
        for i in 0..10u64 {
            tree.insert(&Value::Uint(i), rid(i)).unwrap();
        }
        let low = tree.bound(&Value::Uint(7), false).unwrap();
        let high = tree.bound(&Value::Uint(8), false).unwrap();
        assert!(collect(tree.range_scan(Some(low), Some(high)).unwrap()).is_empty());
    }

    #[test]
    fn test_composite_key_ordering() {
        let (pool, _dir) = test_pool(32);
        let key_type = TypeDescriptor::Struct {
            fields: vec![
                Field::new("major", TypeDescriptor::uint(IntWidth::W16)),
                Field::new("minor", TypeDescriptor::uint(IntWidth::W32)),
            ],
        };
        let mut tree = BTree::create(pool, key_type, DEFAULT_ORDER, 1).unwrap();

        let key = |major: u64, minor: u64| {
            Value::Struct(vec![Value::Uint(major), Value::Uint(minor)])
        };
        // Insert in an order that only sorts correctly field-by-field.
        let inserted = [(2, 0), (1, 99), (1, 1), (3, 5), (2, 7), (1, 50)];
        for (i, (major, minor)) in inserted.iter().enumerate() {
            tree.insert(&key(*major, *minor), rid(i as u64)).unwrap();
        }
        tree.check_invariants().unwrap();

        let entries = collect(tree.range_scan(None, None).unwrap());
        let decoded: Vec<(u64, u64)> = entries
            .iter()
            .map(|(k, _)| match codec::decode(tree.key_type(), k).unwrap() {
                Value::Struct(fields) => match (&fields[0], &fields[1]) {
                    (Value::Uint(a), Value::Uint(b)) => (*a, *b),
                    _ => panic!("bad field types"),
                },
                _ => panic!("bad key shape"),
            })
            .collect();
        assert_eq!(
            decoded,
            vec![(1, 1), (1, 50), (1, 99), (2, 0), (2, 7), (3, 5)]
        );

        // Prefix bounds select every minor under one major.
        let low = tree.prefix_bound(&[Value::Uint(1)], true).unwrap();
        let high = tree.prefix_bound(&[Value::Uint(1)], true).unwrap();
        let matched = collect(tree.range_scan(Some(low), Some(high)).unwrap());
        assert_eq!(matched.len(), 3);
    }

    #[test]
    fn test_key_too_large() {
        let (pool, _dir) = test_pool(16);
        let mut tree =
            BTree::create(pool, TypeDescriptor::Text, DEFAULT_ORDER, 1).unwrap();
        let oversized = "x".repeat(max_key_size(DEFAULT_ORDER) + 1);
        let err = tree.insert(&Value::text(oversized), rid(1)).unwrap_err();
        assert!(matches!(err, IndexError::KeyTooLarge { .. }));
    }

    #[test]
    fn test_open_preserves_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.db");
        let key_type = TypeDescriptor::uint(IntWidth::W64);

        let root = {
            let page_manager = PageManager::create(&path).unwrap();
            let pool = BufferPoolManager::with_lru(page_manager, 32);
            let mut tree = BTree::create(pool.clone(), key_type.clone(), DEFAULT_ORDER, 1).unwrap();
            for i in 0..200u64 {
                tree.insert(&Value::Uint(i), rid(i)).unwrap();
            }
            pool.flush_all().unwrap();
            tree.root_page_id()
        };

        let page_manager = PageManager::open(&path).unwrap();
        let pool = BufferPoolManager::with_lru(page_manager, 32);
        let tree = BTree::open(pool, key_type, DEFAULT_ORDER, root, 1).unwrap();
        assert!(tree.height() > 1);
        assert_eq!(tree.check_invariants().unwrap(), 200);
        assert_eq!(tree.lookup(&Value::Uint(123)).unwrap(), Some(rid(123)));
    }

    #[test]
    fn test_stats() {
        let (mut tree, _dir) = u64_tree(DEFAULT_ORDER);
        for i in 0..50u64 {
            tree.insert(&Value::Uint(i), rid(i)).unwrap();
        }
        let stats = tree.stats().unwrap();
        assert_eq!(stats.entries, 50);
        assert_eq!(stats.height, tree.height());
        assert!(stats.nodes > 1);
    }

    #[test]
    fn test_small_pool_evicts_under_tree_ops() {
        // A pool far smaller than the tree forces eviction during
        // descent; everything still works because pins are scoped.
        let (pool, _dir) = test_pool(4);
        let mut tree =
            BTree::create(pool, TypeDescriptor::uint(IntWidth::W64), DEFAULT_ORDER, 1).unwrap();
        for i in 0..300u64 {
            tree.insert(&Value::Uint(i), rid(i)).unwrap();
        }
        assert_eq!(tree.check_invariants().unwrap(), 300);
    }

    #[test]
    fn test_shared_tree_lookups_across_threads() {
        use std::sync::Mutex;
        use std::thread;

        let (pool, _dir) = test_pool(64);
        let tree = Arc::new(Mutex::new(
            BTree::create(pool, TypeDescriptor::uint(IntWidth::W64), DEFAULT_ORDER, 1).unwrap(),
        ));

        for i in 0..100u64 {
            tree.lock().unwrap().insert(&Value::Uint(i), rid(i)).unwrap();
        }

        let mut handles = Vec::new();
        for t in 0..4u64 {
            let tree = tree.clone();
            handles.push(thread::spawn(move || {
                for i in 0..100u64 {
                    let guard = tree.lock().unwrap();
                    assert_eq!(guard.lookup(&Value::Uint(i)).unwrap(), Some(rid(i)));
                    drop(guard);
                    let _ = t;
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
