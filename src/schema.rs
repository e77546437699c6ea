//! Type layout compiler.
//!
//! This module turns declared structured types into deterministic binary
//! layouts and a byte-level ordering:
//!
//! - **TypeDescriptor**: compiled description of a value's layout
//!   (primitives, fixed arrays, dynamic sequences, optionals, structs,
//!   tagged unions)
//! - **TypeRegistry**: the declaration surface; resolves named
//!   references and rejects cyclic declarations
//! - **codec**: encode/decode between [`Value`]s and bytes
//! - **ordering**: comparison of two encodings of the same descriptor,
//!   walked directly over the bytes
//!
//! The index engine orders keys with [`ordering::compare`] and never
//! materializes them; the row store encodes whole rows with
//! [`codec::encode`].

pub mod codec;
pub mod descriptor;
pub mod error;
pub mod ordering;
pub mod registry;
pub mod value;

pub use codec::{decode, encode};
pub use descriptor::{Field, IntWidth, TypeDescriptor, Variant};
pub use error::{DecodeError, SchemaError};
pub use ordering::compare;
pub use registry::{RawType, TypeRegistry};
pub use value::Value;
