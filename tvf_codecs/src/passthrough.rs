use tvf_core::{Algorithm, Codec, Result};

/// No-op codec: stores blocks verbatim, tagged [`Algorithm::None`].
///
/// Useful for verifying the format independently of any compressor, and for
/// values that are already compressed.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughCodec;

impl Codec for PassThroughCodec {
    fn algorithm(&self) -> Algorithm {
        Algorithm::None
    }

    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn compress_block(&self, raw: &[u8]) -> Result<Vec<u8>> {
        Ok(raw.to_vec())
    }

    fn decompress_block(&self, compressed: &[u8], _raw_len: usize) -> Result<Vec<u8>> {
        Ok(compressed.to_vec())
    }
}
