//! Error types for type declaration and value coding.

use thiserror::Error;

/// Errors raised while declaring or validating a type.
///
/// A `SchemaError` is fatal to the declaration that produced it, never to
/// the running engine.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("type {name:?} directly or transitively contains itself")]
    CyclicType { name: String },

    #[error("reference to undeclared type {name:?}")]
    UnknownType { name: String },

    #[error("type {name:?} is already declared")]
    AlreadyDeclared { name: String },

    #[error("duplicate field name {field:?} in struct")]
    DuplicateField { field: String },

    #[error("duplicate variant name {variant:?} in union")]
    DuplicateVariant { variant: String },

    #[error("union must declare at least one variant")]
    EmptyUnion,

    #[error("union declares {count} variants, more than a u16 discriminant can address")]
    TooManyVariants { count: usize },

    #[error("value does not conform to descriptor: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("integer {value} does not fit a {bits}-bit {signedness} field")]
    ValueOutOfRange {
        value: i128,
        bits: u8,
        signedness: &'static str,
    },

    #[error("fixed array expects {expected} elements, found {found}")]
    ArityMismatch { expected: usize, found: usize },

    #[error("struct expects {expected} field values, found {found}")]
    FieldCountMismatch { expected: usize, found: usize },

    #[error("no variant with discriminant {discriminant} in union")]
    NoSuchVariant { discriminant: u16 },
}

/// Errors raised while decoding bytes against a descriptor.
///
/// Surfaced to the caller, never silently coerced into a value.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed data: {context}")]
    MalformedData { context: &'static str },

    #[error("unknown union discriminant {discriminant}")]
    UnknownVariant { discriminant: u16 },
}

impl DecodeError {
    pub(crate) fn malformed(context: &'static str) -> Self {
        DecodeError::MalformedData { context }
    }
}
