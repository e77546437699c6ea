//! stratadb: a type-directed embedded storage engine.
//!
//! Three layers, leaves first:
//!
//! - [`schema`] compiles declared structured types into deterministic
//!   binary layouts and a byte-level total order;
//! - [`storage`] persists fixed-size checksummed pages behind a buffer
//!   pool with LRU eviction and a pin/unpin guard discipline;
//! - [`index`] keeps an ordered B-tree of typed keys over page-aligned
//!   nodes, with latch-coupled concurrent traversal.
//!
//! [`table`], [`catalog`] and [`database`] tie the layers into an
//! embeddable engine: declared tables with heap row storage, primary
//! and secondary B-tree indexes, and a catalog that survives reopen.
//! There is no query language and no network surface here; a query
//! layer drives this crate through encode/decode/compare and the index
//! operations.

pub mod catalog;
pub mod database;
pub mod index;
pub mod schema;
pub mod storage;
pub mod table;

pub use database::{Database, DatabaseError, DbResult};
