//! Block compressors for TVF streams.
//!
//! Every codec compresses one block at a time with no state carried between
//! blocks. Readers find the right codec for each block through the
//! [`CodecRegistry`] returned by [`registry`].

mod deflate_codec;
mod lz4_codec;
mod passthrough;
mod zstd_codec;

pub use deflate_codec::DeflateCodec;
pub use lz4_codec::Lz4Codec;
pub use passthrough::PassThroughCodec;
pub use zstd_codec::ZstdCodec;

use std::sync::Arc;

use tvf_core::{compression, Algorithm, Codec, CodecRegistry, EncodedBlock, Result};

/// The codec for `algorithm`, at its default level.
pub fn codec_for(algorithm: Algorithm) -> Arc<dyn Codec> {
    match algorithm {
        Algorithm::None => Arc::new(PassThroughCodec),
        Algorithm::Lz4 => Arc::new(Lz4Codec),
        Algorithm::Deflate => Arc::new(DeflateCodec::default()),
        Algorithm::Zstd => Arc::new(ZstdCodec::default()),
    }
}

/// Resolve a codec from its on-disk algorithm tag.
pub fn codec_by_tag(tag: u8) -> Result<Arc<dyn Codec>> {
    Ok(codec_for(Algorithm::from_tag(tag)?))
}

/// Registry holding every bundled codec. Decompression does not depend on
/// the level, so the defaults decode any block these codecs produce.
pub fn registry() -> Arc<CodecRegistry> {
    let mut registry = CodecRegistry::new();
    for algorithm in Algorithm::ALL {
        registry.register(codec_for(algorithm));
    }
    Arc::new(registry)
}

/// Compress a whole block with the default codec for `algorithm`.
pub fn compress(raw: &[u8], algorithm: Algorithm) -> Result<EncodedBlock> {
    compression::compress(raw, codec_for(algorithm).as_ref())
}

/// Decompress a block produced by any bundled codec.
pub fn decompress(block: &EncodedBlock) -> Result<Vec<u8>> {
    compression::decompress(block, codec_for(block.algorithm()).as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tvf_core::TvfError;

    fn sample() -> Vec<u8> {
        let mut raw = b"id,name,score\n".to_vec();
        for i in 0..2_000u32 {
            raw.extend_from_slice(format!("{i},user{},{}\n", i % 50, i * 7 % 101).as_bytes());
        }
        raw
    }

    #[test]
    fn test_every_algorithm_round_trips() {
        let raw = sample();
        for algorithm in Algorithm::ALL {
            let block = compress(&raw, algorithm).unwrap();
            assert_eq!(block.algorithm(), algorithm);
            assert_eq!(block.raw_len() as usize, raw.len());
            if algorithm != Algorithm::None {
                assert!(block.compressed_len() < block.raw_len(), "{algorithm}");
            }
            assert_eq!(decompress(&block).unwrap(), raw, "{algorithm}");
            assert_eq!(registry().decompress(&block).unwrap(), raw, "{algorithm}");
        }
    }

    #[test]
    fn test_tiny_block_grows_but_round_trips() {
        for algorithm in Algorithm::ALL {
            let block = compress(b"x", algorithm).unwrap();
            assert!(block.compressed_len() >= 1);
            assert_eq!(decompress(&block).unwrap(), b"x", "{algorithm}");
        }
    }

    #[test]
    fn test_wrong_raw_len_is_corrupt() {
        let raw = sample();
        for algorithm in [Algorithm::Lz4, Algorithm::Deflate, Algorithm::Zstd] {
            let block = compress(&raw, algorithm).unwrap();
            let lying =
                EncodedBlock::new(algorithm, block.raw_len() - 1, block.into_payload()).unwrap();
            assert!(
                matches!(decompress(&lying), Err(TvfError::CorruptBlock(_))),
                "{algorithm}"
            );
        }
    }

    #[test]
    fn test_codec_by_tag() {
        assert_eq!(codec_by_tag(2).unwrap().algorithm(), Algorithm::Deflate);
        assert_eq!(codec_by_tag(0).unwrap().name(), "passthrough");
        assert!(matches!(codec_by_tag(200), Err(TvfError::UnknownAlgorithm(200))));
    }

    #[test]
    fn test_registry_covers_all_tags() {
        let registry = registry();
        let mut tags: Vec<u8> = registry.algorithms().map(Algorithm::tag).collect();
        tags.sort_unstable();
        assert_eq!(tags, vec![0, 1, 2, 3]);
    }
}
