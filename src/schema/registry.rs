//! Named type declarations.
//!
//! The registry is the declaration surface of the type layout compiler:
//! raw declarations may reference previously declared types by name, and
//! are compiled into self-contained [`TypeDescriptor`]s by inlining.
//! Cycles and unknown references are rejected at declaration time.

use std::collections::HashMap;

use super::descriptor::{Field, IntWidth, TypeDescriptor, Variant};
use super::error::SchemaError;

/// A declared type before compilation. Mirrors [`TypeDescriptor`] but
/// may refer to other declarations by name.
#[derive(Debug, Clone, PartialEq)]
pub enum RawType {
    Named(String),
    Bool,
    Int {
        width: IntWidth,
        signed: bool,
    },
    Float32,
    Float64,
    Text,
    FixedArray {
        element: Box<RawType>,
        len: u32,
    },
    Sequence {
        element: Box<RawType>,
    },
    Optional {
        inner: Box<RawType>,
    },
    Struct {
        fields: Vec<(String, RawType)>,
    },
    Union {
        variants: Vec<(String, Option<RawType>)>,
    },
}

/// Registry of compiled type declarations.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: HashMap<String, TypeDescriptor>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile and register a declaration. Name resolution inlines
    /// previously declared types; a declaration that references itself,
    /// directly or through nesting, is a cycle and is rejected.
    pub fn declare(&mut self, name: &str, raw: RawType) -> Result<&TypeDescriptor, SchemaError> {
        if self.types.contains_key(name) {
            return Err(SchemaError::AlreadyDeclared {
                name: name.to_owned(),
            });
        }
        let resolved = self.resolve(&raw, name)?;
        resolved.validate()?;
        Ok(self.types.entry(name.to_owned()).or_insert(resolved))
    }

    pub fn get(&self, name: &str) -> Option<&TypeDescriptor> {
        self.types.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    fn resolve(&self, raw: &RawType, declaring: &str) -> Result<TypeDescriptor, SchemaError> {
        match raw {
            RawType::Named(name) => {
                if name == declaring {
                    // Forward references are unknown names, so any
                    // transitive cycle must pass through the name being
                    // declared.
                    return Err(SchemaError::CyclicType {
                        name: name.clone(),
                    });
                }
                self.types
                    .get(name)
                    .cloned()
                    .ok_or_else(|| SchemaError::UnknownType { name: name.clone() })
            }
            RawType::Bool => Ok(TypeDescriptor::Bool),
            RawType::Int { width, signed } => Ok(TypeDescriptor::Int {
                width: *width,
                signed: *signed,
            }),
            RawType::Float32 => Ok(TypeDescriptor::Float32),
            RawType::Float64 => Ok(TypeDescriptor::Float64),
            RawType::Text => Ok(TypeDescriptor::Text),
            RawType::FixedArray { element, len } => Ok(TypeDescriptor::FixedArray {
                element: Box::new(self.resolve(element, declaring)?),
                len: *len,
            }),
            RawType::Sequence { element } => Ok(TypeDescriptor::Sequence {
                element: Box::new(self.resolve(element, declaring)?),
            }),
            RawType::Optional { inner } => Ok(TypeDescriptor::Optional {
                inner: Box::new(self.resolve(inner, declaring)?),
            }),
            RawType::Struct { fields } => {
                let mut resolved = Vec::with_capacity(fields.len());
                for (field_name, field_ty) in fields {
                    resolved.push(Field::new(
                        field_name.clone(),
                        self.resolve(field_ty, declaring)?,
                    ));
                }
                Ok(TypeDescriptor::Struct { fields: resolved })
            }
            RawType::Union { variants } => {
                let mut resolved = Vec::with_capacity(variants.len());
                for (variant_name, payload) in variants {
                    let payload = match payload {
                        None => None,
                        Some(ty) => Some(self.resolve(ty, declaring)?),
                    };
                    resolved.push(Variant::new(variant_name.clone(), payload));
                }
                Ok(TypeDescriptor::Union { variants: resolved })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::descriptor::IntWidth;

    #[test]
    fn test_declare_and_inline() {
        let mut registry = TypeRegistry::new();
        registry
            .declare(
                "point",
                RawType::Struct {
                    fields: vec![
                        ("x".into(), RawType::Int { width: IntWidth::W32, signed: true }),
                        ("y".into(), RawType::Int { width: IntWidth::W32, signed: true }),
                    ],
                },
            )
            .unwrap();

        let segment = registry
            .declare(
                "segment",
                RawType::Struct {
                    fields: vec![
                        ("from".into(), RawType::Named("point".into())),
                        ("to".into(), RawType::Named("point".into())),
                    ],
                },
            )
            .unwrap();

        // References are inlined, so the compiled descriptor is fixed width.
        assert_eq!(segment.fixed_width(), Some(16));
    }

    #[test]
    fn test_self_reference_is_cyclic() {
        let mut registry = TypeRegistry::new();
        let err = registry
            .declare(
                "node",
                RawType::Struct {
                    fields: vec![
                        ("value".into(), RawType::Int { width: IntWidth::W64, signed: true }),
                        (
                            "next".into(),
                            RawType::Optional {
                                inner: Box::new(RawType::Named("node".into())),
                            },
                        ),
                    ],
                },
            )
            .unwrap_err();
        assert!(matches!(err, SchemaError::CyclicType { .. }));
    }

    #[test]
    fn test_unknown_reference() {
        let mut registry = TypeRegistry::new();
        let err = registry
            .declare("holder", RawType::Named("ghost".into()))
            .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownType { .. }));
    }

    #[test]
    fn test_duplicate_declaration() {
        let mut registry = TypeRegistry::new();
        registry.declare("t", RawType::Bool).unwrap();
        let err = registry.declare("t", RawType::Text).unwrap_err();
        assert!(matches!(err, SchemaError::AlreadyDeclared { .. }));
    }
}
