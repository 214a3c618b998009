//! Typed values, their binary encoding, and TVF block-compressed streams.
//!
//! A [`TypeDescriptor`] describes a shape; a [`Value`] holds data (or an
//! explicit missing marker) of that shape. [`codec`] turns values into a
//! compact tag-free byte layout and back. [`StreamWriter`] batches encoded
//! values into independently compressed blocks behind a trailing index, and
//! [`StreamReader`] reads any block without touching the others.
//!
//! Compressors live in the `tvf_codecs` crate and plug in through the
//! [`Codec`] trait.

pub mod codec;
pub mod compression;
pub mod error;
pub mod format;
mod parse;
pub mod reader;
pub mod types;
pub mod value;
pub mod writer;

pub use codec::{decode, encode, ByteReader, ValueDecoder};
pub use compression::{Algorithm, Codec, CodecRegistry, EncodedBlock};
pub use error::{Result, TvfError};
pub use format::{FORMAT_VERSION, MAGIC};
pub use reader::{BlockStats, ReadAll, StreamReader, StreamStats};
pub use types::{Field, PrimitiveKind, StructType, TypeDescriptor, MAX_NESTING};
pub use value::{Elements, Scalar, Value};
pub use writer::{StreamSummary, StreamWriter, WriterOptions};
