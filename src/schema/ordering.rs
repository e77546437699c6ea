//! Byte-level comparison directed by a [`TypeDescriptor`].
//!
//! Comparison never materializes values: both operands are walked in
//! lockstep, field by field, directly over their encodings. This keeps
//! dynamic dispatch off the index-descent path. Rules: struct fields in
//! declared order; arrays and sequences element by element with shorter
//! sequences sorting first; absent optionals before present ones; union
//! discriminant before payload; numeric order for integers; IEEE 754
//! total order for floats; byte-lexicographic order for text.

use std::cmp::Ordering;

use byteorder::{ByteOrder, LittleEndian};

use super::codec::skip;
use super::descriptor::{IntWidth, TypeDescriptor};
use super::error::DecodeError;
use super::value::Value;
use super::{codec, SchemaError};

/// Compare two encoded values of the same descriptor.
pub fn compare(desc: &TypeDescriptor, a: &[u8], b: &[u8]) -> Result<Ordering, DecodeError> {
    compare_prefix(desc, a, b).map(|(ordering, _)| ordering)
}

/// Convenience: encode both values, then compare the encodings.
pub fn compare_values(
    desc: &TypeDescriptor,
    a: &Value,
    b: &Value,
) -> Result<Ordering, SchemaError> {
    let ea = codec::encode(desc, a)?;
    let eb = codec::encode(desc, b)?;
    // Freshly produced encodings always re-walk cleanly.
    Ok(compare(desc, &ea, &eb).expect("encoded values compare"))
}

/// Compare one value at the front of each buffer. The returned usize is
/// the byte extent consumed from both buffers and is meaningful only
/// when the ordering is `Equal` (equal values have identical
/// encodings); on an unequal result callers short-circuit upward.
fn compare_prefix(
    desc: &TypeDescriptor,
    a: &[u8],
    b: &[u8],
) -> Result<(Ordering, usize), DecodeError> {
    match desc {
        TypeDescriptor::Bool => {
            let x = bool_byte(a)?;
            let y = bool_byte(b)?;
            Ok((x.cmp(&y), 1))
        }
        TypeDescriptor::Int { width, signed } => {
            let n = width.bytes();
            let ra = take(a, n, "truncated integer")?;
            let rb = take(b, n, "truncated integer")?;
            let ordering = if *signed {
                read_i64(*width, ra).cmp(&read_i64(*width, rb))
            } else {
                read_u64(*width, ra).cmp(&read_u64(*width, rb))
            };
            Ok((ordering, n))
        }
        TypeDescriptor::Float32 => {
            let ra = take(a, 4, "truncated float32")?;
            let rb = take(b, 4, "truncated float32")?;
            let x = f32::from_le_bytes(ra.try_into().unwrap());
            let y = f32::from_le_bytes(rb.try_into().unwrap());
            Ok((x.total_cmp(&y), 4))
        }
        TypeDescriptor::Float64 => {
            let ra = take(a, 8, "truncated float64")?;
            let rb = take(b, 8, "truncated float64")?;
            let x = f64::from_le_bytes(ra.try_into().unwrap());
            let y = f64::from_le_bytes(rb.try_into().unwrap());
            Ok((x.total_cmp(&y), 8))
        }
        TypeDescriptor::Text => {
            let (sa, na) = length_prefixed(a)?;
            let (sb, _) = length_prefixed(b)?;
            Ok((sa.cmp(sb), na))
        }
        TypeDescriptor::FixedArray { element, len } => {
            let mut offset = 0;
            for _ in 0..*len {
                let (ordering, used) = compare_prefix(element, &a[offset..], &b[offset..])?;
                if ordering != Ordering::Equal {
                    return Ok((ordering, 0));
                }
                offset += used;
            }
            Ok((Ordering::Equal, offset))
        }
        TypeDescriptor::Sequence { element } => {
            let la = LittleEndian::read_u32(take(a, 4, "truncated sequence length")?) as usize;
            let lb = LittleEndian::read_u32(take(b, 4, "truncated sequence length")?) as usize;
            let mut oa = 4;
            let mut ob = 4;
            for _ in 0..la.min(lb) {
                let (ordering, used) = compare_prefix(element, &a[oa..], &b[ob..])?;
                if ordering != Ordering::Equal {
                    return Ok((ordering, 0));
                }
                oa += used;
                ob += used;
            }
            // Common prefix equal: the shorter sequence sorts first.
            Ok((la.cmp(&lb), oa))
        }
        TypeDescriptor::Optional { inner } => {
            let pa = presence_byte(a)?;
            let pb = presence_byte(b)?;
            match (pa, pb) {
                (false, false) => Ok((Ordering::Equal, 1)),
                (false, true) => Ok((Ordering::Less, 0)),
                (true, false) => Ok((Ordering::Greater, 0)),
                (true, true) => {
                    let (ordering, used) = compare_prefix(inner, &a[1..], &b[1..])?;
                    Ok((ordering, 1 + used))
                }
            }
        }
        TypeDescriptor::Struct { fields } => {
            let mut offset = 0;
            for field in fields {
                let (ordering, used) = compare_prefix(&field.ty, &a[offset..], &b[offset..])?;
                if ordering != Ordering::Equal {
                    return Ok((ordering, 0));
                }
                offset += used;
            }
            Ok((Ordering::Equal, offset))
        }
        TypeDescriptor::Union { variants } => {
            let da = LittleEndian::read_u16(take(a, 2, "truncated discriminant")?);
            let db = LittleEndian::read_u16(take(b, 2, "truncated discriminant")?);
            let variant = variants
                .get(da as usize)
                .ok_or(DecodeError::UnknownVariant { discriminant: da })?;
            if variants.get(db as usize).is_none() {
                return Err(DecodeError::UnknownVariant { discriminant: db });
            }
            if da != db {
                return Ok((da.cmp(&db), 0));
            }
            match &variant.payload {
                None => Ok((Ordering::Equal, 2)),
                Some(ty) => {
                    let (ordering, used) = compare_prefix(ty, &a[2..], &b[2..])?;
                    Ok((ordering, 2 + used))
                }
            }
        }
    }
}

/// Compare an encoded full struct key against an encoded prefix of its
/// leading `n_fields` fields. Used for partial-key bounds over
/// composite indexes.
pub fn compare_field_prefix(
    desc: &TypeDescriptor,
    full: &[u8],
    prefix: &[u8],
    n_fields: usize,
) -> Result<Ordering, DecodeError> {
    let fields = match desc {
        TypeDescriptor::Struct { fields } => fields,
        _ => return compare(desc, full, prefix),
    };
    let mut of = 0;
    let mut op = 0;
    for field in fields.iter().take(n_fields) {
        let (ordering, _) = compare_prefix(&field.ty, &full[of..], &prefix[op..])?;
        if ordering != Ordering::Equal {
            return Ok(ordering);
        }
        let used = skip(&field.ty, &full[of..])?;
        of += used;
        op += used;
    }
    Ok(Ordering::Equal)
}

fn take<'a>(bytes: &'a [u8], n: usize, context: &'static str) -> Result<&'a [u8], DecodeError> {
    bytes.get(..n).ok_or(DecodeError::MalformedData { context })
}

fn bool_byte(bytes: &[u8]) -> Result<u8, DecodeError> {
    match bytes.first().copied() {
        Some(b @ (0 | 1)) => Ok(b),
        Some(_) => Err(DecodeError::malformed("boolean byte is not 0 or 1")),
        None => Err(DecodeError::malformed("truncated boolean")),
    }
}

fn presence_byte(bytes: &[u8]) -> Result<bool, DecodeError> {
    match bytes.first().copied() {
        Some(0) => Ok(false),
        Some(1) => Ok(true),
        Some(_) => Err(DecodeError::malformed("presence byte is not 0 or 1")),
        None => Err(DecodeError::malformed("truncated optional")),
    }
}

fn length_prefixed(bytes: &[u8]) -> Result<(&[u8], usize), DecodeError> {
    let len = LittleEndian::read_u32(take(bytes, 4, "truncated text length")?) as usize;
    let body = take(&bytes[4..], len, "truncated text body")?;
    Ok((body, 4 + len))
}

fn read_i64(width: IntWidth, raw: &[u8]) -> i64 {
    match width {
        IntWidth::W8 => i8::from_le_bytes([raw[0]]) as i64,
        IntWidth::W16 => LittleEndian::read_i16(raw) as i64,
        IntWidth::W32 => LittleEndian::read_i32(raw) as i64,
        IntWidth::W64 => LittleEndian::read_i64(raw),
    }
}

fn read_u64(width: IntWidth, raw: &[u8]) -> u64 {
    match width {
        IntWidth::W8 => raw[0] as u64,
        IntWidth::W16 => LittleEndian::read_u16(raw) as u64,
        IntWidth::W32 => LittleEndian::read_u32(raw) as u64,
        IntWidth::W64 => LittleEndian::read_u64(raw),
    }
}
