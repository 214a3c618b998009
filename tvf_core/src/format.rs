//! On-disk layout of a TVF stream. Little-endian throughout.
//!
//! ```text
//! [HEADER: magic "TVF1" | version:u32]                         8 bytes
//! [DESCRIPTOR: tag byte + children, recursive]                 variable
//! [BLOCK 0] [BLOCK 1] ... [BLOCK N-1]
//!     each: [algorithm:u8 | compressed_len:u32 | raw_len:u32 | payload]
//! [INDEX: (offset:u64 | element_count:u32) x N]                12 bytes each
//! [FOOTER: index_offset:u64 | index_len:u32 | version:u32 | magic]  20 bytes
//! ```
//!
//! The footer is written last and read first. A stream without a valid
//! footer was never finalized and is rejected.

use crate::codec::ByteReader;
use crate::compression::Algorithm;
use crate::error::{Result, TvfError};
use crate::types::{Field, PrimitiveKind, TypeDescriptor, MAX_NESTING};

/// Magic bytes at the start of the header and the end of the footer.
pub const MAGIC: &[u8; 4] = b"TVF1";

/// Version written by this crate.
pub const FORMAT_VERSION: u32 = 1;

/// Oldest and newest versions this crate can read.
pub const MIN_SUPPORTED_VERSION: u32 = 1;
pub const MAX_SUPPORTED_VERSION: u32 = 1;

/// magic[4] + version:u32
pub const HEADER_SIZE: u64 = 8;

/// index_offset:u64 + index_len:u32 + version:u32 + magic[4]
pub const FOOTER_SIZE: u64 = 20;

/// algorithm:u8 + compressed_len:u32 + raw_len:u32
pub const BLOCK_HEADER_SIZE: u64 = 9;

/// offset:u64 + element_count:u32
pub const INDEX_ENTRY_SIZE: u64 = 12;

// ── Descriptor tags ─────────────────────────────────────────────────────────

pub const TAG_BOOLEAN: u8 = 0x01;
pub const TAG_INT8: u8 = 0x02;
pub const TAG_INT16: u8 = 0x03;
pub const TAG_INT32: u8 = 0x04;
pub const TAG_INT64: u8 = 0x05;
pub const TAG_UINT8: u8 = 0x06;
pub const TAG_UINT16: u8 = 0x07;
pub const TAG_UINT32: u8 = 0x08;
pub const TAG_UINT64: u8 = 0x09;
pub const TAG_FLOAT32: u8 = 0x0A;
pub const TAG_FLOAT64: u8 = 0x0B;
pub const TAG_STRING: u8 = 0x0C;
pub const TAG_BINARY: u8 = 0x0D;
pub const TAG_ARRAY: u8 = 0x10;
pub const TAG_STRUCT: u8 = 0x11;

/// Fail with `UnsupportedVersion` unless `version` is readable.
pub fn check_version(version: u32) -> Result<()> {
    if (MIN_SUPPORTED_VERSION..=MAX_SUPPORTED_VERSION).contains(&version) {
        Ok(())
    } else {
        Err(TvfError::UnsupportedVersion {
            found: version,
            min: MIN_SUPPORTED_VERSION,
            max: MAX_SUPPORTED_VERSION,
        })
    }
}

// ── Header ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHeader {
    pub version: u32,
}

impl StreamHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE as usize] {
        let mut buf = [0u8; HEADER_SIZE as usize];
        buf[..4].copy_from_slice(MAGIC);
        buf[4..8].copy_from_slice(&self.version.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; HEADER_SIZE as usize]) -> Result<Self> {
        if &buf[..4] != MAGIC {
            return Err(TvfError::codec(0, "invalid TVF magic bytes, not a TVF stream"));
        }
        let mut r = ByteReader::new(&buf[4..]);
        Ok(Self {
            version: r.read_u32()?,
        })
    }
}

// ── Footer ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    /// Absolute offset of the first index entry.
    pub index_offset: u64,
    /// Index size in bytes (a multiple of `INDEX_ENTRY_SIZE`).
    pub index_len: u32,
    pub version: u32,
}

impl Footer {
    pub fn to_bytes(&self) -> [u8; FOOTER_SIZE as usize] {
        let mut buf = [0u8; FOOTER_SIZE as usize];
        buf[0..8].copy_from_slice(&self.index_offset.to_le_bytes());
        buf[8..12].copy_from_slice(&self.index_len.to_le_bytes());
        buf[12..16].copy_from_slice(&self.version.to_le_bytes());
        buf[16..20].copy_from_slice(MAGIC);
        buf
    }

    /// Parse a footer. A missing trailing magic means the writer never
    /// finalized the stream.
    pub fn from_bytes(buf: &[u8; FOOTER_SIZE as usize]) -> Result<Self> {
        if &buf[16..20] != MAGIC {
            return Err(TvfError::Unfinalized(
                "footer magic not found at end of stream".into(),
            ));
        }
        let mut r = ByteReader::new(&buf[..16]);
        Ok(Self {
            index_offset: r.read_u64()?,
            index_len: r.read_u32()?,
            version: r.read_u32()?,
        })
    }

    pub fn entry_count(&self) -> usize {
        (self.index_len as u64 / INDEX_ENTRY_SIZE) as usize
    }
}

// ── Block header ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub algorithm: Algorithm,
    pub compressed_len: u32,
    pub raw_len: u32,
}

impl BlockHeader {
    pub fn to_bytes(&self) -> [u8; BLOCK_HEADER_SIZE as usize] {
        let mut buf = [0u8; BLOCK_HEADER_SIZE as usize];
        buf[0] = self.algorithm.tag();
        buf[1..5].copy_from_slice(&self.compressed_len.to_le_bytes());
        buf[5..9].copy_from_slice(&self.raw_len.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; BLOCK_HEADER_SIZE as usize]) -> Result<Self> {
        let mut r = ByteReader::new(&buf[1..]);
        Ok(Self {
            algorithm: Algorithm::from_tag(buf[0])?,
            compressed_len: r.read_u32()?,
            raw_len: r.read_u32()?,
        })
    }
}

// ── Index entry ────────────────────────────────────────────────────────────

/// Locates one block and says how many values it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexEntry {
    /// Absolute offset of the block header.
    pub offset: u64,
    pub element_count: u32,
}

impl IndexEntry {
    pub fn to_bytes(&self) -> [u8; INDEX_ENTRY_SIZE as usize] {
        let mut buf = [0u8; INDEX_ENTRY_SIZE as usize];
        buf[0..8].copy_from_slice(&self.offset.to_le_bytes());
        buf[8..12].copy_from_slice(&self.element_count.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; INDEX_ENTRY_SIZE as usize]) -> Result<Self> {
        let mut r = ByteReader::new(buf);
        Ok(Self {
            offset: r.read_u64()?,
            element_count: r.read_u32()?,
        })
    }
}

// ── Descriptor encoding ────────────────────────────────────────────────────

fn primitive_tag(kind: PrimitiveKind) -> u8 {
    match kind {
        PrimitiveKind::Boolean => TAG_BOOLEAN,
        PrimitiveKind::Int8 => TAG_INT8,
        PrimitiveKind::Int16 => TAG_INT16,
        PrimitiveKind::Int32 => TAG_INT32,
        PrimitiveKind::Int64 => TAG_INT64,
        PrimitiveKind::UInt8 => TAG_UINT8,
        PrimitiveKind::UInt16 => TAG_UINT16,
        PrimitiveKind::UInt32 => TAG_UINT32,
        PrimitiveKind::UInt64 => TAG_UINT64,
        PrimitiveKind::Float32 => TAG_FLOAT32,
        PrimitiveKind::Float64 => TAG_FLOAT64,
        PrimitiveKind::String => TAG_STRING,
        PrimitiveKind::Binary => TAG_BINARY,
    }
}

fn primitive_from_tag(tag: u8) -> Option<PrimitiveKind> {
    PrimitiveKind::ALL
        .into_iter()
        .find(|k| primitive_tag(*k) == tag)
}

/// Self-describing encoding of a descriptor.
pub fn encode_descriptor(ty: &TypeDescriptor) -> Vec<u8> {
    let mut out = Vec::new();
    write_descriptor(ty, &mut out);
    out
}

/// Append the encoding of `ty` to `out`. Field counts and name lengths fit in
/// u32 because `TypeDescriptor::struct_of` refuses anything larger.
pub fn write_descriptor(ty: &TypeDescriptor, out: &mut Vec<u8>) {
    match ty {
        TypeDescriptor::Primitive(kind) => out.push(primitive_tag(*kind)),
        TypeDescriptor::Array(elem) => {
            out.push(TAG_ARRAY);
            write_descriptor(elem, out);
        }
        TypeDescriptor::Struct(st) => {
            out.push(TAG_STRUCT);
            out.extend_from_slice(&(st.len() as u32).to_le_bytes());
            for field in st.fields() {
                out.extend_from_slice(&(field.name().len() as u32).to_le_bytes());
                out.extend_from_slice(field.name().as_bytes());
                write_descriptor(field.descriptor(), out);
            }
        }
    }
}

/// Read one descriptor from `r`.
pub fn read_descriptor(r: &mut ByteReader<'_>) -> Result<TypeDescriptor> {
    read_descriptor_at(r, 1)
}

/// Decode a descriptor that must occupy all of `bytes`.
pub fn decode_descriptor(bytes: &[u8]) -> Result<TypeDescriptor> {
    let mut r = ByteReader::new(bytes);
    let ty = read_descriptor(&mut r)?;
    if !r.is_empty() {
        return Err(TvfError::codec(
            r.position(),
            format!("{} trailing bytes after descriptor", r.remaining()),
        ));
    }
    Ok(ty)
}

fn read_descriptor_at(r: &mut ByteReader<'_>, depth: usize) -> Result<TypeDescriptor> {
    let at = r.position();
    if depth > MAX_NESTING {
        return Err(TvfError::codec(at, format!("descriptor nesting deeper than {MAX_NESTING}")));
    }
    match r.read_u8()? {
        TAG_ARRAY => Ok(TypeDescriptor::array_of(read_descriptor_at(r, depth + 1)?)),
        TAG_STRUCT => {
            let count = r.read_u32()? as usize;
            // every field needs at least a name length and a tag
            if count.saturating_mul(5) > r.remaining() {
                return Err(TvfError::BufferUnderrun {
                    offset: r.position(),
                    needed: count.saturating_mul(5),
                    available: r.remaining(),
                });
            }
            let mut fields = Vec::with_capacity(count);
            for _ in 0..count {
                let len = r.read_u32()? as usize;
                let name_at = r.position();
                let name = std::str::from_utf8(r.take(len)?).map_err(|e| {
                    TvfError::codec(name_at, format!("invalid UTF-8 in field name: {e}"))
                })?;
                if fields.iter().any(|f: &Field| f.name() == name) {
                    return Err(TvfError::codec(name_at, format!("duplicate field `{name}`")));
                }
                let ty = read_descriptor_at(r, depth + 1)?;
                fields.push(Field::new(name, ty));
            }
            TypeDescriptor::from_fields(fields)
        }
        tag => primitive_from_tag(tag)
            .map(TypeDescriptor::Primitive)
            .ok_or_else(|| TvfError::codec(at, format!("unknown descriptor tag {tag:#04x}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_bytes() {
        let h = StreamHeader { version: 1 };
        let bytes = h.to_bytes();
        assert_eq!(&bytes, b"TVF1\x01\x00\x00\x00");
        assert_eq!(StreamHeader::from_bytes(&bytes).unwrap(), h);

        let mut bad = bytes;
        bad[0] = b'X';
        assert!(matches!(
            StreamHeader::from_bytes(&bad),
            Err(TvfError::Codec { .. })
        ));
    }

    #[test]
    fn test_footer_bytes() {
        let f = Footer {
            index_offset: 0x0102_0304_0506_0708,
            index_len: 36,
            version: 1,
        };
        let bytes = f.to_bytes();
        assert_eq!(&bytes[16..], MAGIC);
        assert_eq!(bytes[0], 0x08);
        let back = Footer::from_bytes(&bytes).unwrap();
        assert_eq!(back, f);
        assert_eq!(back.entry_count(), 3);

        let mut torn = bytes;
        torn[19] = 0;
        assert!(matches!(
            Footer::from_bytes(&torn),
            Err(TvfError::Unfinalized(_))
        ));
    }

    #[test]
    fn test_block_header_and_index_entry() {
        let bh = BlockHeader {
            algorithm: Algorithm::Deflate,
            compressed_len: 10,
            raw_len: 40,
        };
        let bytes = bh.to_bytes();
        assert_eq!(bytes[0], 2);
        assert_eq!(BlockHeader::from_bytes(&bytes).unwrap(), bh);

        let mut unknown = bytes;
        unknown[0] = 0x7f;
        assert!(matches!(
            BlockHeader::from_bytes(&unknown),
            Err(TvfError::UnknownAlgorithm(0x7f))
        ));

        let e = IndexEntry {
            offset: 99,
            element_count: 7,
        };
        assert_eq!(IndexEntry::from_bytes(&e.to_bytes()).unwrap(), e);
    }

    #[test]
    fn test_version_gate() {
        check_version(FORMAT_VERSION).unwrap();
        match check_version(2) {
            Err(TvfError::UnsupportedVersion { found, min, max }) => {
                assert_eq!((found, min, max), (2, 1, 1));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(check_version(0).is_err());
    }

    #[test]
    fn test_descriptor_layout() {
        let ty = TypeDescriptor::struct_of([
            ("a", TypeDescriptor::INT32),
            ("b", TypeDescriptor::array_of(TypeDescriptor::FLOAT64)),
        ])
        .unwrap();
        let bytes = encode_descriptor(&ty);
        let expected = [
            TAG_STRUCT, 2, 0, 0, 0, //
            1, 0, 0, 0, b'a', TAG_INT32, //
            1, 0, 0, 0, b'b', TAG_ARRAY, TAG_FLOAT64,
        ];
        assert_eq!(bytes, expected);
        assert_eq!(decode_descriptor(&bytes).unwrap(), ty);
    }

    #[test]
    fn test_descriptor_rejects_garbage() {
        assert!(matches!(
            decode_descriptor(&[0x55]),
            Err(TvfError::Codec { offset: 0, .. })
        ));
        assert!(matches!(
            decode_descriptor(&[TAG_ARRAY]),
            Err(TvfError::BufferUnderrun { .. })
        ));
        assert!(matches!(
            decode_descriptor(&[TAG_INT32, TAG_INT32]),
            Err(TvfError::Codec { offset: 1, .. })
        ));
        let dup = [
            TAG_STRUCT, 2, 0, 0, 0, //
            1, 0, 0, 0, b'a', TAG_INT32, //
            1, 0, 0, 0, b'a', TAG_INT64,
        ];
        assert!(matches!(
            decode_descriptor(&dup),
            Err(TvfError::Codec { offset: 15, .. })
        ));
        let huge_count = [TAG_STRUCT, 0xff, 0xff, 0xff, 0xff];
        assert!(matches!(
            decode_descriptor(&huge_count),
            Err(TvfError::BufferUnderrun { .. })
        ));
    }

    #[test]
    fn test_descriptor_depth_limit() {
        let mut deep = vec![TAG_ARRAY; MAX_NESTING];
        deep.push(TAG_INT8);
        assert!(matches!(
            decode_descriptor(&deep),
            Err(TvfError::Codec { .. })
        ));
        let ok: Vec<u8> = std::iter::repeat(TAG_ARRAY)
            .take(MAX_NESTING - 1)
            .chain([TAG_INT8])
            .collect();
        assert_eq!(decode_descriptor(&ok).unwrap().depth(), MAX_NESTING);
    }
}
