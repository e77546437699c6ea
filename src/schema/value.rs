//! Runtime values conforming to a [`TypeDescriptor`].

use super::descriptor::TypeDescriptor;

/// A runtime value. Which descriptor a value conforms to is checked at
/// encode time; the value itself carries no schema.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    /// All signed integer widths.
    Int(i64),
    /// All unsigned integer widths.
    Uint(u64),
    Float32(f32),
    Float64(f64),
    Text(String),
    /// Fixed array elements in order.
    Array(Vec<Value>),
    /// Dynamic sequence elements in order.
    Sequence(Vec<Value>),
    Optional(Option<Box<Value>>),
    /// Field values in the descriptor's declared order.
    Struct(Vec<Value>),
    /// A union variant by discriminant plus its payload, if the variant
    /// declares one.
    Union {
        discriminant: u16,
        payload: Option<Box<Value>>,
    },
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    pub fn some(v: Value) -> Self {
        Value::Optional(Some(Box::new(v)))
    }

    pub fn none() -> Self {
        Value::Optional(None)
    }

    /// Short name for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "signed integer",
            Value::Uint(_) => "unsigned integer",
            Value::Float32(_) => "float32",
            Value::Float64(_) => "float64",
            Value::Text(_) => "text",
            Value::Array(_) => "fixed array",
            Value::Sequence(_) => "sequence",
            Value::Optional(_) => "optional",
            Value::Struct(_) => "struct",
            Value::Union { .. } => "union",
        }
    }

    /// Whether this value structurally conforms to `desc`. Encode
    /// performs the same walk with precise errors; this is the cheap
    /// boolean form.
    pub fn conforms_to(&self, desc: &TypeDescriptor) -> bool {
        match (self, desc) {
            (Value::Bool(_), TypeDescriptor::Bool) => true,
            (Value::Int(_), TypeDescriptor::Int { signed: true, .. }) => true,
            (Value::Uint(_), TypeDescriptor::Int { signed: false, .. }) => true,
            (Value::Float32(_), TypeDescriptor::Float32) => true,
            (Value::Float64(_), TypeDescriptor::Float64) => true,
            (Value::Text(_), TypeDescriptor::Text) => true,
            (Value::Array(items), TypeDescriptor::FixedArray { element, len }) => {
                items.len() == *len as usize && items.iter().all(|i| i.conforms_to(element))
            }
            (Value::Sequence(items), TypeDescriptor::Sequence { element }) => {
                items.iter().all(|i| i.conforms_to(element))
            }
            (Value::Optional(inner), TypeDescriptor::Optional { inner: ty }) => match inner {
                None => true,
                Some(v) => v.conforms_to(ty),
            },
            (Value::Struct(values), TypeDescriptor::Struct { fields }) => {
                values.len() == fields.len()
                    && values
                        .iter()
                        .zip(fields.iter())
                        .all(|(v, f)| v.conforms_to(&f.ty))
            }
            (
                Value::Union {
                    discriminant,
                    payload,
                },
                TypeDescriptor::Union { variants },
            ) => match variants.get(*discriminant as usize) {
                None => false,
                Some(variant) => match (&variant.payload, payload) {
                    (None, None) => true,
                    (Some(ty), Some(v)) => v.conforms_to(ty),
                    _ => false,
                },
            },
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::descriptor::{Field, IntWidth, Variant};

    #[test]
    fn test_conforms_primitives() {
        assert!(Value::Bool(true).conforms_to(&TypeDescriptor::Bool));
        assert!(Value::Uint(7).conforms_to(&TypeDescriptor::uint(IntWidth::W16)));
        assert!(!Value::Int(7).conforms_to(&TypeDescriptor::uint(IntWidth::W16)));
        assert!(Value::text("hi").conforms_to(&TypeDescriptor::Text));
    }

    #[test]
    fn test_conforms_struct_arity() {
        let desc = TypeDescriptor::Struct {
            fields: vec![
                Field::new("a", TypeDescriptor::Bool),
                Field::new("b", TypeDescriptor::Text),
            ],
        };
        assert!(Value::Struct(vec![Value::Bool(false), Value::text("x")]).conforms_to(&desc));
        assert!(!Value::Struct(vec![Value::Bool(false)]).conforms_to(&desc));
    }

    #[test]
    fn test_conforms_union_payload() {
        let desc = TypeDescriptor::Union {
            variants: vec![
                Variant::new("None", None),
                Variant::new("Some", Some(TypeDescriptor::int(IntWidth::W32))),
            ],
        };
        assert!(Value::Union {
            discriminant: 0,
            payload: None
        }
        .conforms_to(&desc));
        assert!(Value::Union {
            discriminant: 1,
            payload: Some(Box::new(Value::Int(-4)))
        }
        .conforms_to(&desc));
        // Payload where none is declared.
        assert!(!Value::Union {
            discriminant: 0,
            payload: Some(Box::new(Value::Int(0)))
        }
        .conforms_to(&desc));
        // Discriminant out of range.
        assert!(!Value::Union {
            discriminant: 2,
            payload: None
        }
        .conforms_to(&desc));
    }
}
