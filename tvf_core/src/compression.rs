use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TvfError};

/// On-disk algorithm tag, one byte at the start of every block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// Stored verbatim.
    None,
    /// LZ4 block format: throughput over ratio.
    Lz4,
    /// Raw deflate: ratio over throughput.
    Deflate,
    /// Zstandard, tunable level.
    Zstd,
}

impl Algorithm {
    pub const ALL: [Algorithm; 4] = [
        Algorithm::None,
        Algorithm::Lz4,
        Algorithm::Deflate,
        Algorithm::Zstd,
    ];

    pub fn tag(self) -> u8 {
        match self {
            Algorithm::None => 0,
            Algorithm::Lz4 => 1,
            Algorithm::Deflate => 2,
            Algorithm::Zstd => 3,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|a| a.tag() == tag)
            .ok_or(TvfError::UnknownAlgorithm(tag))
    }

    pub fn name(self) -> &'static str {
        match self {
            Algorithm::None => "none",
            Algorithm::Lz4 => "lz4",
            Algorithm::Deflate => "deflate",
            Algorithm::Zstd => "zstd",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Block compression abstraction.
///
/// Each `Codec` implementation:
/// - Is identified by the [`Algorithm`] tag written in front of every block.
/// - Must compress/decompress individual blocks independently; no cross-block
///   state (dictionaries, windows) is permitted. This is the invariant that
///   makes `read_block(i)` possible without touching blocks `0..i`.
/// - Is stateless, so one instance may be shared across threads.
pub trait Codec: Send + Sync {
    fn algorithm(&self) -> Algorithm;

    /// Human-readable codec name for CLI display.
    fn name(&self) -> &'static str {
        self.algorithm().name()
    }

    /// Compress a single independent block.
    fn compress_block(&self, raw: &[u8]) -> Result<Vec<u8>>;

    /// Decompress a single independent block.
    ///
    /// `raw_len` is the uncompressed length recorded at compression time;
    /// codecs that need a preallocated output (raw LZ4 blocks) size it from
    /// this, the rest use it as an upper bound. Invalid input must surface as
    /// [`TvfError::CorruptBlock`].
    fn decompress_block(&self, compressed: &[u8], raw_len: usize) -> Result<Vec<u8>>;
}

/// A compressed block plus the lengths needed to undo it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBlock {
    algorithm: Algorithm,
    raw_len: u32,
    payload: Vec<u8>,
}

impl EncodedBlock {
    pub fn new(algorithm: Algorithm, raw_len: u32, payload: Vec<u8>) -> Result<Self> {
        u32::try_from(payload.len()).map_err(|_| {
            TvfError::CorruptBlock(format!(
                "compressed length {} exceeds u32::MAX",
                payload.len()
            ))
        })?;
        Ok(Self {
            algorithm,
            raw_len,
            payload,
        })
    }

    /// Uncompressed block, tagged [`Algorithm::None`].
    pub fn stored(raw: &[u8]) -> Result<Self> {
        let raw_len = checked_len(raw.len())?;
        Self::new(Algorithm::None, raw_len, raw.to_vec())
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn raw_len(&self) -> u32 {
        self.raw_len
    }

    pub fn compressed_len(&self) -> u32 {
        self.payload.len() as u32
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

fn checked_len(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        TvfError::CorruptBlock(format!("raw block length {len} exceeds u32::MAX"))
    })
}

/// Compress a whole block with `codec`.
pub fn compress(raw: &[u8], codec: &dyn Codec) -> Result<EncodedBlock> {
    let raw_len = checked_len(raw.len())?;
    let payload = codec.compress_block(raw)?;
    EncodedBlock::new(codec.algorithm(), raw_len, payload)
}

/// Decompress `block` with `codec`, checking the recorded raw length.
pub fn decompress(block: &EncodedBlock, codec: &dyn Codec) -> Result<Vec<u8>> {
    if codec.algorithm() != block.algorithm {
        return Err(TvfError::CorruptBlock(format!(
            "block is tagged {} but codec is {}",
            block.algorithm,
            codec.algorithm()
        )));
    }
    let raw = match block.algorithm {
        Algorithm::None => block.payload.clone(),
        _ => codec.decompress_block(&block.payload, block.raw_len as usize)?,
    };
    if raw.len() != block.raw_len as usize {
        return Err(TvfError::CorruptBlock(format!(
            "decompressed to {} bytes but block records {}",
            raw.len(),
            block.raw_len
        )));
    }
    Ok(raw)
}

/// Set of codecs a reader can decode with, keyed by algorithm tag.
#[derive(Clone, Default)]
pub struct CodecRegistry {
    codecs: HashMap<Algorithm, Arc<dyn Codec>>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the codec for its algorithm.
    pub fn register(&mut self, codec: Arc<dyn Codec>) -> &mut Self {
        self.codecs.insert(codec.algorithm(), codec);
        self
    }

    pub fn with(mut self, codec: Arc<dyn Codec>) -> Self {
        self.register(codec);
        self
    }

    pub fn get(&self, algorithm: Algorithm) -> Result<Arc<dyn Codec>> {
        self.codecs
            .get(&algorithm)
            .cloned()
            .ok_or(TvfError::UnknownAlgorithm(algorithm.tag()))
    }

    pub fn algorithms(&self) -> impl Iterator<Item = Algorithm> + '_ {
        self.codecs.keys().copied()
    }

    /// Decompress with whichever codec matches the block's tag. Stored blocks
    /// need no registered codec.
    pub fn decompress(&self, block: &EncodedBlock) -> Result<Vec<u8>> {
        if block.algorithm == Algorithm::None {
            return decompress(block, &Stored);
        }
        let codec = self.get(block.algorithm)?;
        decompress(block, codec.as_ref())
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.codecs.keys().map(|a| a.name()).collect();
        names.sort_unstable();
        f.debug_struct("CodecRegistry").field("codecs", &names).finish()
    }
}

struct Stored;

impl Codec for Stored {
    fn algorithm(&self) -> Algorithm {
        Algorithm::None
    }

    fn compress_block(&self, raw: &[u8]) -> Result<Vec<u8>> {
        Ok(raw.to_vec())
    }

    fn decompress_block(&self, compressed: &[u8], _raw_len: usize) -> Result<Vec<u8>> {
        Ok(compressed.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Run-length codec: enough to exercise the adapter without a real compressor.
    struct Rle;

    impl Codec for Rle {
        fn algorithm(&self) -> Algorithm {
            Algorithm::Lz4
        }

        fn compress_block(&self, raw: &[u8]) -> Result<Vec<u8>> {
            let mut out: Vec<u8> = Vec::new();
            for &b in raw {
                match out.len() {
                    n if n >= 2 && out[n - 1] == b && out[n - 2] < 255 => out[n - 2] += 1,
                    _ => out.extend_from_slice(&[1, b]),
                }
            }
            Ok(out)
        }

        fn decompress_block(&self, compressed: &[u8], raw_len: usize) -> Result<Vec<u8>> {
            if compressed.len() % 2 != 0 {
                return Err(TvfError::CorruptBlock("odd rle length".into()));
            }
            let mut out = Vec::with_capacity(raw_len);
            for pair in compressed.chunks(2) {
                out.extend(std::iter::repeat(pair[1]).take(pair[0] as usize));
            }
            Ok(out)
        }
    }

    #[test]
    fn test_tags_round_trip() {
        for a in Algorithm::ALL {
            assert_eq!(Algorithm::from_tag(a.tag()).unwrap(), a);
        }
        assert!(matches!(
            Algorithm::from_tag(9),
            Err(TvfError::UnknownAlgorithm(9))
        ));
    }

    #[test]
    fn test_compress_records_lengths() {
        let raw = vec![7u8; 1000];
        let block = compress(&raw, &Rle).unwrap();
        assert_eq!(block.algorithm(), Algorithm::Lz4);
        assert_eq!(block.raw_len(), 1000);
        assert!(block.compressed_len() < 20);
        assert_eq!(decompress(&block, &Rle).unwrap(), raw);
    }

    #[test]
    fn test_length_disagreement_is_corrupt() {
        let block = compress(b"aaabbb", &Rle).unwrap();
        let lying = EncodedBlock::new(Algorithm::Lz4, 7, block.payload().to_vec()).unwrap();
        assert!(matches!(
            decompress(&lying, &Rle),
            Err(TvfError::CorruptBlock(_))
        ));
    }

    #[test]
    fn test_wrong_codec_is_corrupt() {
        let block = EncodedBlock::stored(b"abc").unwrap();
        assert!(matches!(
            decompress(&block, &Rle),
            Err(TvfError::CorruptBlock(_))
        ));
    }

    #[test]
    fn test_registry_resolves_by_tag() {
        let registry = CodecRegistry::new().with(Arc::new(Rle));
        let block = compress(b"zzzzzz", &Rle).unwrap();
        assert_eq!(registry.decompress(&block).unwrap(), b"zzzzzz");

        let stored = EncodedBlock::stored(b"plain").unwrap();
        assert_eq!(registry.decompress(&stored).unwrap(), b"plain");

        let zstd = EncodedBlock::new(Algorithm::Zstd, 1, vec![0]).unwrap();
        assert!(matches!(
            registry.decompress(&zstd),
            Err(TvfError::UnknownAlgorithm(3))
        ));
    }
}
