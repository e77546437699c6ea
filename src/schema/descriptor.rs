//! Compiled type descriptors.
//!
//! A [`TypeDescriptor`] is the output of the type layout compiler: a
//! self-contained description of a value's binary layout and ordering
//! rule. Descriptors are acyclic by construction (the tree owns its
//! children), have a total field/variant order fixed at creation time,
//! and are serde-serializable so the catalog can persist them.

use serde::{Deserialize, Serialize};

use super::error::SchemaError;

/// Width of an integer column in bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntWidth {
    W8,
    W16,
    W32,
    W64,
}

impl IntWidth {
    pub fn bytes(self) -> usize {
        match self {
            IntWidth::W8 => 1,
            IntWidth::W16 => 2,
            IntWidth::W32 => 4,
            IntWidth::W64 => 8,
        }
    }

    pub fn bits(self) -> u8 {
        (self.bytes() * 8) as u8
    }
}

/// A named struct field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub ty: TypeDescriptor,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: TypeDescriptor) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// A named union variant with an optional payload type.
///
/// The discriminant of a variant is its position in the declared order;
/// reordering variants is a breaking schema change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub name: String,
    pub payload: Option<TypeDescriptor>,
}

impl Variant {
    pub fn new(name: impl Into<String>, payload: Option<TypeDescriptor>) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

/// Descriptor of one declared type.
///
/// Struct fields encode, and compare, in declaration order. Sequences
/// carry a u32 length prefix; fixed arrays carry none. Optionals carry a
/// one-byte presence flag; unions a u16 discriminant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypeDescriptor {
    Bool,
    Int { width: IntWidth, signed: bool },
    Float32,
    Float64,
    /// Dynamic UTF-8 string, u32 length prefix.
    Text,
    FixedArray {
        element: Box<TypeDescriptor>,
        len: u32,
    },
    Sequence {
        element: Box<TypeDescriptor>,
    },
    Optional {
        inner: Box<TypeDescriptor>,
    },
    Struct {
        fields: Vec<Field>,
    },
    Union {
        variants: Vec<Variant>,
    },
}

impl TypeDescriptor {
    pub fn uint(width: IntWidth) -> Self {
        TypeDescriptor::Int {
            width,
            signed: false,
        }
    }

    pub fn int(width: IntWidth) -> Self {
        TypeDescriptor::Int {
            width,
            signed: true,
        }
    }

    /// A result-style two-variant union: `Ok(ok)` at discriminant 0,
    /// `Err(err)` at discriminant 1.
    pub fn result_of(ok: TypeDescriptor, err: TypeDescriptor) -> Self {
        TypeDescriptor::Union {
            variants: vec![
                Variant::new("Ok", Some(ok)),
                Variant::new("Err", Some(err)),
            ],
        }
    }

    /// Static byte footprint, or `None` when the encoding is
    /// variable-length.
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            TypeDescriptor::Bool => Some(1),
            TypeDescriptor::Int { width, .. } => Some(width.bytes()),
            TypeDescriptor::Float32 => Some(4),
            TypeDescriptor::Float64 => Some(8),
            TypeDescriptor::Text => None,
            TypeDescriptor::FixedArray { element, len } => element
                .fixed_width()
                .map(|w| w.checked_mul(*len as usize).unwrap_or(usize::MAX)),
            TypeDescriptor::Sequence { .. } => None,
            TypeDescriptor::Optional { .. } => None,
            TypeDescriptor::Struct { fields } => {
                let mut total = 0usize;
                for field in fields {
                    total += field.ty.fixed_width()?;
                }
                Some(total)
            }
            TypeDescriptor::Union { .. } => None,
        }
    }

    /// Structural validation: duplicate names, empty unions, oversized
    /// discriminant spaces. Cycles cannot occur in an owned descriptor
    /// tree; the registry rejects them at declaration time instead.
    pub fn validate(&self) -> Result<(), SchemaError> {
        match self {
            TypeDescriptor::Bool
            | TypeDescriptor::Int { .. }
            | TypeDescriptor::Float32
            | TypeDescriptor::Float64
            | TypeDescriptor::Text => Ok(()),
            TypeDescriptor::FixedArray { element, .. } => element.validate(),
            TypeDescriptor::Sequence { element } => element.validate(),
            TypeDescriptor::Optional { inner } => inner.validate(),
            TypeDescriptor::Struct { fields } => {
                for (i, field) in fields.iter().enumerate() {
                    if fields[..i].iter().any(|f| f.name == field.name) {
                        return Err(SchemaError::DuplicateField {
                            field: field.name.clone(),
                        });
                    }
                    field.ty.validate()?;
                }
                Ok(())
            }
            TypeDescriptor::Union { variants } => {
                if variants.is_empty() {
                    return Err(SchemaError::EmptyUnion);
                }
                if variants.len() > u16::MAX as usize + 1 {
                    return Err(SchemaError::TooManyVariants {
                        count: variants.len(),
                    });
                }
                for (i, variant) in variants.iter().enumerate() {
                    if variants[..i].iter().any(|v| v.name == variant.name) {
                        return Err(SchemaError::DuplicateVariant {
                            variant: variant.name.clone(),
                        });
                    }
                    if let Some(payload) = &variant.payload {
                        payload.validate()?;
                    }
                }
                Ok(())
            }
        }
    }

    /// Short name for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            TypeDescriptor::Bool => "bool",
            TypeDescriptor::Int { signed: true, .. } => "signed integer",
            TypeDescriptor::Int { signed: false, .. } => "unsigned integer",
            TypeDescriptor::Float32 => "float32",
            TypeDescriptor::Float64 => "float64",
            TypeDescriptor::Text => "text",
            TypeDescriptor::FixedArray { .. } => "fixed array",
            TypeDescriptor::Sequence { .. } => "sequence",
            TypeDescriptor::Optional { .. } => "optional",
            TypeDescriptor::Struct { .. } => "struct",
            TypeDescriptor::Union { .. } => "union",
        }
    }
}
