//! Binary encoding and decoding directed by a [`TypeDescriptor`].
//!
//! All multi-byte quantities are little-endian. Dynamic sequences and
//! text carry a u32 length prefix; fixed arrays carry none. Optionals
//! carry a one-byte presence flag, unions a u16 discriminant in declared
//! variant order. A struct is the concatenation of its field encodings
//! in declared order, which is also its comparison order.

use byteorder::{ByteOrder, LittleEndian};

use super::descriptor::{IntWidth, TypeDescriptor};
use super::error::{DecodeError, SchemaError};
use super::value::Value;

/// Encode `value` against `desc` into a fresh buffer.
pub fn encode(desc: &TypeDescriptor, value: &Value) -> Result<Vec<u8>, SchemaError> {
    let mut out = Vec::with_capacity(desc.fixed_width().unwrap_or(32));
    encode_into(desc, value, &mut out)?;
    Ok(out)
}

/// Encode `value` against `desc`, appending to `out`.
pub fn encode_into(
    desc: &TypeDescriptor,
    value: &Value,
    out: &mut Vec<u8>,
) -> Result<(), SchemaError> {
    match (desc, value) {
        (TypeDescriptor::Bool, Value::Bool(b)) => {
            out.push(u8::from(*b));
            Ok(())
        }
        (TypeDescriptor::Int { width, signed: true }, Value::Int(i)) => {
            encode_signed(*width, *i, out)
        }
        (
            TypeDescriptor::Int {
                width,
                signed: false,
            },
            Value::Uint(u),
        ) => encode_unsigned(*width, *u, out),
        (TypeDescriptor::Float32, Value::Float32(f)) => {
            out.extend_from_slice(&f.to_le_bytes());
            Ok(())
        }
        (TypeDescriptor::Float64, Value::Float64(f)) => {
            out.extend_from_slice(&f.to_le_bytes());
            Ok(())
        }
        (TypeDescriptor::Text, Value::Text(s)) => {
            let bytes = s.as_bytes();
            out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            out.extend_from_slice(bytes);
            Ok(())
        }
        (TypeDescriptor::FixedArray { element, len }, Value::Array(items)) => {
            if items.len() != *len as usize {
                return Err(SchemaError::ArityMismatch {
                    expected: *len as usize,
                    found: items.len(),
                });
            }
            for item in items {
                encode_into(element, item, out)?;
            }
            Ok(())
        }
        (TypeDescriptor::Sequence { element }, Value::Sequence(items)) => {
            out.extend_from_slice(&(items.len() as u32).to_le_bytes());
            for item in items {
                encode_into(element, item, out)?;
            }
            Ok(())
        }
        (TypeDescriptor::Optional { inner }, Value::Optional(opt)) => match opt {
            None => {
                out.push(0);
                Ok(())
            }
            Some(v) => {
                out.push(1);
                encode_into(inner, v, out)
            }
        },
        (TypeDescriptor::Struct { fields }, Value::Struct(values)) => {
            if values.len() != fields.len() {
                return Err(SchemaError::FieldCountMismatch {
                    expected: fields.len(),
                    found: values.len(),
                });
            }
            for (field, v) in fields.iter().zip(values.iter()) {
                encode_into(&field.ty, v, out)?;
            }
            Ok(())
        }
        (
            TypeDescriptor::Union { variants },
            Value::Union {
                discriminant,
                payload,
            },
        ) => {
            let variant = variants.get(*discriminant as usize).ok_or(
                SchemaError::NoSuchVariant {
                    discriminant: *discriminant,
                },
            )?;
            out.extend_from_slice(&discriminant.to_le_bytes());
            match (&variant.payload, payload) {
                (None, None) => Ok(()),
                (Some(ty), Some(v)) => encode_into(ty, v, out),
                (Some(ty), None) => Err(SchemaError::TypeMismatch {
                    expected: ty.kind_name(),
                    found: "no payload",
                }),
                (None, Some(v)) => Err(SchemaError::TypeMismatch {
                    expected: "no payload",
                    found: v.kind_name(),
                }),
            }
        }
        (desc, value) => Err(SchemaError::TypeMismatch {
            expected: desc.kind_name(),
            found: value.kind_name(),
        }),
    }
}

fn encode_signed(width: IntWidth, value: i64, out: &mut Vec<u8>) -> Result<(), SchemaError> {
    let out_of_range = |v: i64| SchemaError::ValueOutOfRange {
        value: v as i128,
        bits: width.bits(),
        signedness: "signed",
    };
    match width {
        IntWidth::W8 => {
            let v = i8::try_from(value).map_err(|_| out_of_range(value))?;
            out.extend_from_slice(&v.to_le_bytes());
        }
        IntWidth::W16 => {
            let v = i16::try_from(value).map_err(|_| out_of_range(value))?;
            out.extend_from_slice(&v.to_le_bytes());
        }
        IntWidth::W32 => {
            let v = i32::try_from(value).map_err(|_| out_of_range(value))?;
            out.extend_from_slice(&v.to_le_bytes());
        }
        IntWidth::W64 => out.extend_from_slice(&value.to_le_bytes()),
    }
    Ok(())
}

fn encode_unsigned(width: IntWidth, value: u64, out: &mut Vec<u8>) -> Result<(), SchemaError> {
    let out_of_range = |v: u64| SchemaError::ValueOutOfRange {
        value: v as i128,
        bits: width.bits(),
        signedness: "unsigned",
    };
    match width {
        IntWidth::W8 => {
            let v = u8::try_from(value).map_err(|_| out_of_range(value))?;
            out.push(v);
        }
        IntWidth::W16 => {
            let v = u16::try_from(value).map_err(|_| out_of_range(value))?;
            out.extend_from_slice(&v.to_le_bytes());
        }
        IntWidth::W32 => {
            let v = u32::try_from(value).map_err(|_| out_of_range(value))?;
            out.extend_from_slice(&v.to_le_bytes());
        }
        IntWidth::W64 => out.extend_from_slice(&value.to_le_bytes()),
    }
    Ok(())
}

/// Decode a complete value. Trailing bytes after the value are rejected
/// as malformed.
pub fn decode(desc: &TypeDescriptor, bytes: &[u8]) -> Result<Value, DecodeError> {
    let (value, used) = decode_prefix(desc, bytes)?;
    if used != bytes.len() {
        return Err(DecodeError::malformed("trailing bytes after value"));
    }
    Ok(value)
}

/// Decode one value from the front of `bytes`, returning it and the
/// number of bytes consumed.
pub fn decode_prefix(desc: &TypeDescriptor, bytes: &[u8]) -> Result<(Value, usize), DecodeError> {
    match desc {
        TypeDescriptor::Bool => match bytes.first().copied() {
            Some(0) => Ok((Value::Bool(false), 1)),
            Some(1) => Ok((Value::Bool(true), 1)),
            Some(_) => Err(DecodeError::malformed("boolean byte is not 0 or 1")),
            None => Err(DecodeError::malformed("truncated boolean")),
        },
        TypeDescriptor::Int { width, signed } => {
            let n = width.bytes();
            let raw = take(bytes, n, "truncated integer")?;
            let value = if *signed {
                Value::Int(read_signed(*width, raw))
            } else {
                Value::Uint(read_unsigned(*width, raw))
            };
            Ok((value, n))
        }
        TypeDescriptor::Float32 => {
            let raw = take(bytes, 4, "truncated float32")?;
            Ok((Value::Float32(f32::from_le_bytes(raw.try_into().unwrap())), 4))
        }
        TypeDescriptor::Float64 => {
            let raw = take(bytes, 8, "truncated float64")?;
            Ok((Value::Float64(f64::from_le_bytes(raw.try_into().unwrap())), 8))
        }
        TypeDescriptor::Text => {
            let raw = take(bytes, 4, "truncated text length")?;
            let len = LittleEndian::read_u32(raw) as usize;
            let body = take(&bytes[4..], len, "truncated text body")?;
            let s = std::str::from_utf8(body)
                .map_err(|_| DecodeError::malformed("text is not valid UTF-8"))?;
            Ok((Value::Text(s.to_owned()), 4 + len))
        }
        TypeDescriptor::FixedArray { element, len } => {
            let mut items = Vec::with_capacity(*len as usize);
            let mut offset = 0;
            for _ in 0..*len {
                let (item, used) = decode_prefix(element, &bytes[offset..])?;
                items.push(item);
                offset += used;
            }
            Ok((Value::Array(items), offset))
        }
        TypeDescriptor::Sequence { element } => {
            let raw = take(bytes, 4, "truncated sequence length")?;
            let len = LittleEndian::read_u32(raw) as usize;
            let mut items = Vec::new();
            let mut offset = 4;
            for _ in 0..len {
                let (item, used) = decode_prefix(element, &bytes[offset..])?;
                items.push(item);
                offset += used;
            }
            Ok((Value::Sequence(items), offset))
        }
        TypeDescriptor::Optional { inner } => match bytes.first().copied() {
            Some(0) => Ok((Value::Optional(None), 1)),
            Some(1) => {
                let (v, used) = decode_prefix(inner, &bytes[1..])?;
                Ok((Value::Optional(Some(Box::new(v))), 1 + used))
            }
            Some(_) => Err(DecodeError::malformed("presence byte is not 0 or 1")),
            None => Err(DecodeError::malformed("truncated optional")),
        },
        TypeDescriptor::Struct { fields } => {
            let mut values = Vec::with_capacity(fields.len());
            let mut offset = 0;
            for field in fields {
                let (v, used) = decode_prefix(&field.ty, &bytes[offset..])?;
                values.push(v);
                offset += used;
            }
            Ok((Value::Struct(values), offset))
        }
        TypeDescriptor::Union { variants } => {
            let raw = take(bytes, 2, "truncated discriminant")?;
            let discriminant = LittleEndian::read_u16(raw);
            let variant = variants
                .get(discriminant as usize)
                .ok_or(DecodeError::UnknownVariant { discriminant })?;
            match &variant.payload {
                None => Ok((
                    Value::Union {
                        discriminant,
                        payload: None,
                    },
                    2,
                )),
                Some(ty) => {
                    let (v, used) = decode_prefix(ty, &bytes[2..])?;
                    Ok((
                        Value::Union {
                            discriminant,
                            payload: Some(Box::new(v)),
                        },
                        2 + used,
                    ))
                }
            }
        }
    }
}

/// Byte extent of one encoded value at the front of `bytes`, without
/// materializing it. Used to step across struct fields on the
/// comparison path.
pub fn skip(desc: &TypeDescriptor, bytes: &[u8]) -> Result<usize, DecodeError> {
    if let Some(width) = desc.fixed_width() {
        if bytes.len() < width {
            return Err(DecodeError::malformed("truncated fixed-width value"));
        }
        return Ok(width);
    }
    match desc {
        TypeDescriptor::Text => {
            let raw = take(bytes, 4, "truncated text length")?;
            let len = LittleEndian::read_u32(raw) as usize;
            take(&bytes[4..], len, "truncated text body")?;
            Ok(4 + len)
        }
        TypeDescriptor::FixedArray { element, len } => {
            let mut offset = 0;
            for _ in 0..*len {
                offset += skip(element, &bytes[offset..])?;
            }
            Ok(offset)
        }
        TypeDescriptor::Sequence { element } => {
            let raw = take(bytes, 4, "truncated sequence length")?;
            let len = LittleEndian::read_u32(raw) as usize;
            let mut offset = 4;
            for _ in 0..len {
                offset += skip(element, &bytes[offset..])?;
            }
            Ok(offset)
        }
        TypeDescriptor::Optional { inner } => match bytes.first().copied() {
            Some(0) => Ok(1),
            Some(1) => Ok(1 + skip(inner, &bytes[1..])?),
            Some(_) => Err(DecodeError::malformed("presence byte is not 0 or 1")),
            None => Err(DecodeError::malformed("truncated optional")),
        },
        TypeDescriptor::Struct { fields } => {
            let mut offset = 0;
            for field in fields {
                offset += skip(&field.ty, &bytes[offset..])?;
            }
            Ok(offset)
        }
        TypeDescriptor::Union { variants } => {
            let raw = take(bytes, 2, "truncated discriminant")?;
            let discriminant = LittleEndian::read_u16(raw);
            let variant = variants
                .get(discriminant as usize)
                .ok_or(DecodeError::UnknownVariant { discriminant })?;
            match &variant.payload {
                None => Ok(2),
                Some(ty) => Ok(2 + skip(ty, &bytes[2..])?),
            }
        }
        // Fixed-width descriptors took the shortcut above.
        _ => unreachable!("fixed-width descriptor fell through"),
    }
}

fn take<'a>(bytes: &'a [u8], n: usize, context: &'static str) -> Result<&'a [u8], DecodeError> {
    bytes.get(..n).ok_or(DecodeError::MalformedData { context })
}

fn read_signed(width: IntWidth, raw: &[u8]) -> i64 {
    match width {
        IntWidth::W8 => i8::from_le_bytes([raw[0]]) as i64,
        IntWidth::W16 => LittleEndian::read_i16(raw) as i64,
        IntWidth::W32 => LittleEndian::read_i32(raw) as i64,
        IntWidth::W64 => LittleEndian::read_i64(raw),
    }
}

fn read_unsigned(width: IntWidth, raw: &[u8]) -> u64 {
    match width {
        IntWidth::W8 => raw[0] as u64,
        IntWidth::W16 => LittleEndian::read_u16(raw) as u64,
        IntWidth::W32 => LittleEndian::read_u32(raw) as u64,
        IntWidth::W64 => LittleEndian::read_u64(raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::descriptor::{Field, Variant};

    fn roundtrip(desc: &TypeDescriptor, value: Value) {
        let encoded = encode(desc, &value).unwrap();
        let decoded = decode(desc, &encoded).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_roundtrip_primitives() {
        roundtrip(&TypeDescriptor::Bool, Value::Bool(true));
        roundtrip(&TypeDescriptor::int(IntWidth::W8), Value::Int(-5));
        roundtrip(&TypeDescriptor::int(IntWidth::W64), Value::Int(i64::MIN));
        roundtrip(&TypeDescriptor::uint(IntWidth::W16), Value::Uint(65535));
        roundtrip(&TypeDescriptor::uint(IntWidth::W64), Value::Uint(u64::MAX));
        roundtrip(&TypeDescriptor::Float32, Value::Float32(1.5));
        roundtrip(&TypeDescriptor::Float64, Value::Float64(-0.25));
        roundtrip(&TypeDescriptor::Text, Value::text("héllo"));
        roundtrip(&TypeDescriptor::Text, Value::text(""));
    }

    #[test]
    fn test_roundtrip_composites() {
        let arr = TypeDescriptor::FixedArray {
            element: Box::new(TypeDescriptor::uint(IntWidth::W8)),
            len: 3,
        };
        roundtrip(
            &arr,
            Value::Array(vec![Value::Uint(1), Value::Uint(2), Value::Uint(3)]),
        );

        let seq = TypeDescriptor::Sequence {
            element: Box::new(TypeDescriptor::Text),
        };
        roundtrip(
            &seq,
            Value::Sequence(vec![Value::text("a"), Value::text("bb")]),
        );
        roundtrip(&seq, Value::Sequence(vec![]));

        let opt = TypeDescriptor::Optional {
            inner: Box::new(TypeDescriptor::int(IntWidth::W32)),
        };
        roundtrip(&opt, Value::none());
        roundtrip(&opt, Value::some(Value::Int(42)));

        let st = TypeDescriptor::Struct {
            fields: vec![
                Field::new("id", TypeDescriptor::uint(IntWidth::W32)),
                Field::new("name", TypeDescriptor::Text),
                Field::new("flag", TypeDescriptor::Optional {
                    inner: Box::new(TypeDescriptor::Bool),
                }),
            ],
        };
        roundtrip(
            &st,
            Value::Struct(vec![
                Value::Uint(9),
                Value::text("row"),
                Value::some(Value::Bool(false)),
            ]),
        );

        let union = TypeDescriptor::Union {
            variants: vec![
                Variant::new("Unit", None),
                Variant::new("Payload", Some(TypeDescriptor::Text)),
            ],
        };
        roundtrip(
            &union,
            Value::Union {
                discriminant: 0,
                payload: None,
            },
        );
        roundtrip(
            &union,
            Value::Union {
                discriminant: 1,
                payload: Some(Box::new(Value::text("inner"))),
            },
        );
    }

    #[test]
    fn test_encoding_layout() {
        // u16 is two LE bytes, no tag or prefix.
        let bytes = encode(&TypeDescriptor::uint(IntWidth::W16), &Value::Uint(0x0201)).unwrap();
        assert_eq!(bytes, vec![0x01, 0x02]);

        // Sequence carries a u32 length prefix; fixed array does not.
        let seq = TypeDescriptor::Sequence {
            element: Box::new(TypeDescriptor::uint(IntWidth::W8)),
        };
        let bytes = encode(&seq, &Value::Sequence(vec![Value::Uint(7)])).unwrap();
        assert_eq!(bytes, vec![1, 0, 0, 0, 7]);

        let arr = TypeDescriptor::FixedArray {
            element: Box::new(TypeDescriptor::uint(IntWidth::W8)),
            len: 2,
        };
        let bytes = encode(&arr, &Value::Array(vec![Value::Uint(7), Value::Uint(8)])).unwrap();
        assert_eq!(bytes, vec![7, 8]);

        // Optional: presence flag then payload.
        let opt = TypeDescriptor::Optional {
            inner: Box::new(TypeDescriptor::uint(IntWidth::W8)),
        };
        assert_eq!(encode(&opt, &Value::none()).unwrap(), vec![0]);
        assert_eq!(encode(&opt, &Value::some(Value::Uint(3))).unwrap(), vec![1, 3]);

        // Union: u16 discriminant then payload.
        let union = TypeDescriptor::result_of(
            TypeDescriptor::uint(IntWidth::W8),
            TypeDescriptor::uint(IntWidth::W8),
        );
        let bytes = encode(
            &union,
            &Value::Union {
                discriminant: 1,
                payload: Some(Box::new(Value::Uint(9))),
            },
        )
        .unwrap();
        assert_eq!(bytes, vec![1, 0, 9]);
    }

    #[test]
    fn test_decode_truncated() {
        let desc = TypeDescriptor::uint(IntWidth::W32);
        let err = decode(&desc, &[1, 2]).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedData { .. }));

        let text_err = decode(&TypeDescriptor::Text, &[5, 0, 0, 0, b'a']).unwrap_err();
        assert!(matches!(text_err, DecodeError::MalformedData { .. }));
    }

    #[test]
    fn test_decode_trailing_bytes_rejected() {
        let desc = TypeDescriptor::uint(IntWidth::W16);
        let err = decode(&desc, &[1, 0, 99]).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedData { .. }));
    }

    #[test]
    fn test_decode_unknown_discriminant() {
        let union = TypeDescriptor::Union {
            variants: vec![Variant::new("Only", None)],
        };
        let err = decode(&union, &[7, 0]).unwrap_err();
        assert_eq!(err, DecodeError::UnknownVariant { discriminant: 7 });
    }

    #[test]
    fn test_decode_bad_presence_and_bool_bytes() {
        let opt = TypeDescriptor::Optional {
            inner: Box::new(TypeDescriptor::Bool),
        };
        assert!(decode(&opt, &[2]).is_err());
        assert!(decode(&TypeDescriptor::Bool, &[9]).is_err());
    }

    #[test]
    fn test_encode_range_checks() {
        let desc = TypeDescriptor::int(IntWidth::W8);
        let err = encode(&desc, &Value::Int(300)).unwrap_err();
        assert!(matches!(err, SchemaError::ValueOutOfRange { .. }));

        let desc = TypeDescriptor::uint(IntWidth::W16);
        let err = encode(&desc, &Value::Uint(1 << 20)).unwrap_err();
        assert!(matches!(err, SchemaError::ValueOutOfRange { .. }));
    }

    #[test]
    fn test_encode_type_mismatch() {
        let err = encode(&TypeDescriptor::Bool, &Value::text("no")).unwrap_err();
        assert!(matches!(err, SchemaError::TypeMismatch { .. }));
    }

    #[test]
    fn test_skip_matches_decode_extent() {
        let st = TypeDescriptor::Struct {
            fields: vec![
                Field::new("a", TypeDescriptor::Text),
                Field::new(
                    "b",
                    TypeDescriptor::Sequence {
                        element: Box::new(TypeDescriptor::uint(IntWidth::W16)),
                    },
                ),
            ],
        };
        let value = Value::Struct(vec![
            Value::text("abc"),
            Value::Sequence(vec![Value::Uint(1), Value::Uint(2)]),
        ]);
        let mut bytes = encode(&st, &value).unwrap();
        let extent = bytes.len();
        bytes.extend_from_slice(&[0xde, 0xad]);
        assert_eq!(skip(&st, &bytes).unwrap(), extent);
    }
}
