//! Type-driven binary layout for values.
//!
//! No type tags are written; the descriptor travels out of band (once per
//! stream). All integers are little-endian.
//!
//! ```text
//! value    := 0x00                      missing
//!           | 0x01 body                 present
//! body     := fixed-width LE scalar     Boolean, ints, floats
//!           | len:u32 bytes             String (UTF-8), Binary
//!           | count:u32 body*           Array: elements are always present
//!           | value*                    Struct: one value per field, declared order
//! ```
//!
//! Array elements carry no presence byte, which is what keeps dense numeric
//! arrays at their raw width. Struct fields and top-level values do.
//!
//! Decoding never reads past the end of the input: every read goes through
//! [`ByteReader`], which fails with `BufferUnderrun` instead.

use crate::error::{Result, TvfError};
use crate::types::{PrimitiveKind, TypeDescriptor};
use crate::value::{Payload, Scalar, Value};

const MISSING: u8 = 0;
const PRESENT: u8 = 1;

/// Longest array of empty-struct elements accepted by `encode` and `decode`.
/// Such elements occupy no bytes, so their count is not bounded by the input.
pub const MAX_ZERO_WIDTH_ELEMENTS: usize = 1 << 16;

/// Bounds-checked little-endian cursor over a borrowed buffer.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(TvfError::BufferUnderrun {
                offset: self.pos,
                needed: n,
                available: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }
}

/// Encode one value, presence byte included.
pub fn encode(value: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(encoded_len(value));
    encode_into(value, &mut out)?;
    Ok(out)
}

/// Encode `value` after checking it was built for `ty`.
pub fn encode_as(ty: &TypeDescriptor, value: &Value) -> Result<Vec<u8>> {
    if value.descriptor() != ty {
        return Err(TvfError::mismatch("$", ty, value.descriptor()));
    }
    encode(value)
}

/// Append the encoding of `value` to `out`.
pub fn encode_into(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    match value.payload() {
        None => {
            out.push(MISSING);
            Ok(())
        }
        Some(payload) => {
            out.push(PRESENT);
            encode_body(payload, out)
        }
    }
}

fn encode_body(payload: &Payload, out: &mut Vec<u8>) -> Result<()> {
    match payload {
        Payload::Scalar(s) => encode_scalar(s, out),
        Payload::Elements(items) => {
            if items.len() > MAX_ZERO_WIDTH_ELEMENTS
                && items.first().is_some_and(|v| min_body_len(v.descriptor()) == 0)
            {
                return Err(TvfError::codec(
                    out.len(),
                    format!(
                        "{} empty-struct elements exceed the limit of {MAX_ZERO_WIDTH_ELEMENTS}",
                        items.len()
                    ),
                ));
            }
            write_len(items.len(), out)?;
            for item in items.iter() {
                // Array elements are present by construction.
                if let Some(p) = item.payload() {
                    encode_body(p, out)?;
                }
            }
            Ok(())
        }
        Payload::Fields(values) => {
            for v in values.iter() {
                encode_into(v, out)?;
            }
            Ok(())
        }
    }
}

fn write_len(len: usize, out: &mut Vec<u8>) -> Result<()> {
    let len = u32::try_from(len)
        .map_err(|_| TvfError::codec(out.len(), format!("length {len} exceeds u32::MAX")))?;
    out.extend_from_slice(&len.to_le_bytes());
    Ok(())
}

fn encode_scalar(s: &Scalar, out: &mut Vec<u8>) -> Result<()> {
    match s {
        Scalar::Boolean(v) => out.push(*v as u8),
        Scalar::Int8(v) => out.extend_from_slice(&v.to_le_bytes()),
        Scalar::Int16(v) => out.extend_from_slice(&v.to_le_bytes()),
        Scalar::Int32(v) => out.extend_from_slice(&v.to_le_bytes()),
        Scalar::Int64(v) => out.extend_from_slice(&v.to_le_bytes()),
        Scalar::UInt8(v) => out.push(*v),
        Scalar::UInt16(v) => out.extend_from_slice(&v.to_le_bytes()),
        Scalar::UInt32(v) => out.extend_from_slice(&v.to_le_bytes()),
        Scalar::UInt64(v) => out.extend_from_slice(&v.to_le_bytes()),
        Scalar::Float32(v) => out.extend_from_slice(&v.to_le_bytes()),
        Scalar::Float64(v) => out.extend_from_slice(&v.to_le_bytes()),
        Scalar::String(v) => {
            write_len(v.len(), out)?;
            out.extend_from_slice(v.as_bytes());
        }
        Scalar::Binary(v) => {
            write_len(v.len(), out)?;
            out.extend_from_slice(v);
        }
    }
    Ok(())
}

/// Exact number of bytes [`encode`] produces for `value`.
pub fn encoded_len(value: &Value) -> usize {
    1 + value.payload().map_or(0, body_len)
}

fn body_len(payload: &Payload) -> usize {
    match payload {
        Payload::Scalar(s) => match s {
            Scalar::String(v) => 4 + v.len(),
            Scalar::Binary(v) => 4 + v.len(),
            other => other.kind().width().unwrap_or(0),
        },
        Payload::Elements(items) => {
            4 + items
                .iter()
                .map(|i| i.payload().map_or(0, body_len))
                .sum::<usize>()
        }
        Payload::Fields(values) => values.iter().map(encoded_len).sum(),
    }
}

/// Decode exactly one value from `bytes`; trailing bytes are an error.
pub fn decode(ty: &TypeDescriptor, bytes: &[u8]) -> Result<Value> {
    let mut decoder = ValueDecoder::new(ty, bytes);
    let value = decoder.decode_next()?;
    decoder.finish()?;
    Ok(value)
}

/// Sequential decoder for back-to-back values of one descriptor, as found in
/// a stream block.
pub struct ValueDecoder<'a> {
    ty: &'a TypeDescriptor,
    input: ByteReader<'a>,
}

impl<'a> ValueDecoder<'a> {
    pub fn new(ty: &'a TypeDescriptor, bytes: &'a [u8]) -> Self {
        Self {
            ty,
            input: ByteReader::new(bytes),
        }
    }

    pub fn position(&self) -> usize {
        self.input.position()
    }

    pub fn is_exhausted(&self) -> bool {
        self.input.is_empty()
    }

    pub fn decode_next(&mut self) -> Result<Value> {
        decode_value(self.ty, &mut self.input)
    }

    /// Fail unless every input byte was consumed.
    pub fn finish(&self) -> Result<()> {
        if self.input.is_empty() {
            Ok(())
        } else {
            Err(TvfError::codec(
                self.input.position(),
                format!("{} trailing bytes after last value", self.input.remaining()),
            ))
        }
    }
}

fn decode_value(ty: &TypeDescriptor, r: &mut ByteReader<'_>) -> Result<Value> {
    let at = r.position();
    match r.read_u8()? {
        MISSING => Ok(Value::missing(ty)),
        PRESENT => decode_body(ty, r),
        other => Err(TvfError::codec(at, format!("invalid presence byte {other:#04x}"))),
    }
}

fn decode_body(ty: &TypeDescriptor, r: &mut ByteReader<'_>) -> Result<Value> {
    let payload = match ty {
        TypeDescriptor::Primitive(kind) => Payload::Scalar(decode_scalar(*kind, r)?),
        TypeDescriptor::Array(elem) => {
            let count_at = r.position();
            let count = r.read_u32()? as usize;
            // Each element occupies at least one byte unless it is an empty struct.
            let min_each = min_body_len(elem);
            if min_each == 0 && count > MAX_ZERO_WIDTH_ELEMENTS {
                return Err(TvfError::codec(
                    count_at,
                    format!("{count} empty-struct elements exceed the limit of {MAX_ZERO_WIDTH_ELEMENTS}"),
                ));
            }
            if count.saturating_mul(min_each) > r.remaining() {
                return Err(TvfError::BufferUnderrun {
                    offset: r.position(),
                    needed: count.saturating_mul(min_each),
                    available: r.remaining(),
                });
            }
            let mut items = Vec::with_capacity(count.min(r.remaining().max(1)));
            for _ in 0..count {
                items.push(decode_body(elem, r)?);
            }
            Payload::Elements(items.into())
        }
        TypeDescriptor::Struct(st) => {
            let mut values = Vec::with_capacity(st.len());
            for field in st.fields() {
                values.push(decode_value(field.descriptor(), r)?);
            }
            Payload::Fields(values.into())
        }
    };
    Ok(Value::from_parts(ty.clone(), Some(payload)))
}

/// Fewest bytes a present body of `ty` can occupy.
fn min_body_len(ty: &TypeDescriptor) -> usize {
    match ty {
        TypeDescriptor::Primitive(kind) => kind.width().unwrap_or(4),
        TypeDescriptor::Array(_) => 4,
        TypeDescriptor::Struct(st) => st.len(),
    }
}

fn decode_scalar(kind: PrimitiveKind, r: &mut ByteReader<'_>) -> Result<Scalar> {
    Ok(match kind {
        PrimitiveKind::Boolean => {
            let at = r.position();
            match r.read_u8()? {
                0 => Scalar::Boolean(false),
                1 => Scalar::Boolean(true),
                other => {
                    return Err(TvfError::codec(at, format!("invalid boolean byte {other:#04x}")))
                }
            }
        }
        PrimitiveKind::Int8 => Scalar::Int8(i8::from_le_bytes(r.read_array()?)),
        PrimitiveKind::Int16 => Scalar::Int16(i16::from_le_bytes(r.read_array()?)),
        PrimitiveKind::Int32 => Scalar::Int32(i32::from_le_bytes(r.read_array()?)),
        PrimitiveKind::Int64 => Scalar::Int64(i64::from_le_bytes(r.read_array()?)),
        PrimitiveKind::UInt8 => Scalar::UInt8(r.read_u8()?),
        PrimitiveKind::UInt16 => Scalar::UInt16(u16::from_le_bytes(r.read_array()?)),
        PrimitiveKind::UInt32 => Scalar::UInt32(r.read_u32()?),
        PrimitiveKind::UInt64 => Scalar::UInt64(r.read_u64()?),
        PrimitiveKind::Float32 => Scalar::Float32(f32::from_le_bytes(r.read_array()?)),
        PrimitiveKind::Float64 => Scalar::Float64(f64::from_le_bytes(r.read_array()?)),
        PrimitiveKind::String => {
            let len = r.read_u32()? as usize;
            let at = r.position();
            let bytes = r.take(len)?;
            let s = std::str::from_utf8(bytes)
                .map_err(|e| TvfError::codec(at, format!("invalid UTF-8 in string: {e}")))?;
            Scalar::String(s.to_string())
        }
        PrimitiveKind::Binary => {
            let len = r.read_u32()? as usize;
            Scalar::Binary(r.take(len)?.to_vec())
        }
    })
}
