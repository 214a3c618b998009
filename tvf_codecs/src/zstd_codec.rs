use tvf_core::{Algorithm, Codec, Result, TvfError};

/// Zstandard block codec.
///
/// Each block is compressed independently with `zstd` at the configured level
/// (default: 3), so any block can be decompressed without touching adjacent
/// blocks.
///
/// Best for: cold data where ratio matters more than decode speed.
#[derive(Debug, Clone, Copy)]
pub struct ZstdCodec {
    /// Compression level (1 = fast / larger, 22 = slow / smallest).
    pub level: i32,
}

impl Default for ZstdCodec {
    fn default() -> Self {
        Self { level: 3 }
    }
}

impl ZstdCodec {
    pub fn new(level: i32) -> Self {
        Self { level }
    }
}

impl Codec for ZstdCodec {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Zstd
    }

    fn compress_block(&self, raw: &[u8]) -> Result<Vec<u8>> {
        Ok(zstd::bulk::compress(raw, self.level)?)
    }

    fn decompress_block(&self, compressed: &[u8], raw_len: usize) -> Result<Vec<u8>> {
        // raw_len caps the output buffer; a frame claiming more is corrupt
        zstd::bulk::decompress(compressed, raw_len)
            .map_err(|e| TvfError::CorruptBlock(format!("zstd decompress error: {e}")))
    }
}
