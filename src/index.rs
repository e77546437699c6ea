//! B-tree index engine.
//!
//! Ordered key→record-reference maps over the buffer pool:
//!
//! - **btree**: the tree itself: insert, lookup, delete, range scans,
//!   split/borrow/merge rebalancing, invariant checking
//! - **iterator**: lazy range scans over the leaf chain
//! - **latch**: per-page reader/writer latches and the latch-coupling
//!   traversal discipline
//!
//! Key bytes are opaque to the tree; ordering comes entirely from the
//! key's [`crate::schema::TypeDescriptor`].

pub mod btree;
pub mod error;
pub mod iterator;
pub mod latch;

pub use btree::{max_key_size, BTree, IndexStats, DEFAULT_ORDER};
pub use error::{IndexError, IndexResult};
pub use iterator::{KeyBound, RangeScan};
pub use latch::{LatchCoupling, LatchManager, LatchMode};
