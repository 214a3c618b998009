use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use tvf_core::{Algorithm, Codec, Result, TvfError};

/// Raw deflate block codec (no zlib or gzip wrapper).
///
/// Slower than LZ4 but noticeably smaller output. The decoder is bounded by
/// the recorded `raw_len`, so a corrupt stream cannot inflate without limit.
///
/// Best for: archival streams, transfer over slow links.
#[derive(Debug, Clone, Copy)]
pub struct DeflateCodec {
    /// 0 = store, 1 = fastest, 9 = smallest.
    pub level: u32,
}

impl Default for DeflateCodec {
    fn default() -> Self {
        Self { level: 6 }
    }
}

impl DeflateCodec {
    /// Levels above 9 are clamped to 9.
    pub fn new(level: u32) -> Self {
        Self {
            level: level.min(9),
        }
    }
}

impl Codec for DeflateCodec {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Deflate
    }

    fn compress_block(&self, raw: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = DeflateEncoder::new(
            Vec::with_capacity(raw.len() / 2),
            Compression::new(self.level.min(9)),
        );
        encoder.write_all(raw)?;
        Ok(encoder.finish()?)
    }

    fn decompress_block(&self, compressed: &[u8], raw_len: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(raw_len);
        // one byte of slack so oversized output shows up as a length mismatch
        DeflateDecoder::new(compressed)
            .take(raw_len as u64 + 1)
            .read_to_end(&mut out)
            .map_err(|e| TvfError::CorruptBlock(format!("deflate decompress error: {e}")))?;
        Ok(out)
    }
}
