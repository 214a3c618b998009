use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use log::{debug, warn};
use serde::Serialize;

use crate::codec;
use crate::compression::{self, Algorithm, Codec, EncodedBlock};
use crate::error::{Result, TvfError};
use crate::format::{
    self, BlockHeader, Footer, IndexEntry, StreamHeader, BLOCK_HEADER_SIZE, FORMAT_VERSION,
    HEADER_SIZE, INDEX_ENTRY_SIZE,
};
use crate::types::{TypeDescriptor, MAX_NESTING};
use crate::value::Value;

/// Default element threshold per block.
pub const DEFAULT_MAX_BLOCK_ELEMENTS: u32 = 4096;

/// Default raw-byte threshold per block (64 KiB).
pub const DEFAULT_MAX_BLOCK_BYTES: u32 = 64 * 1024;

/// Block batching policy. A block is flushed as soon as either threshold is
/// reached, so a single oversized value still gets a block of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterOptions {
    pub max_block_elements: u32,
    pub max_block_bytes: u32,
    /// Write a block uncompressed when the codec fails to shrink it.
    pub store_incompressible: bool,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            max_block_elements: DEFAULT_MAX_BLOCK_ELEMENTS,
            max_block_bytes: DEFAULT_MAX_BLOCK_BYTES,
            store_incompressible: true,
        }
    }
}

impl WriterOptions {
    pub fn max_block_elements(mut self, n: u32) -> Self {
        self.max_block_elements = n;
        self
    }

    pub fn max_block_bytes(mut self, n: u32) -> Self {
        self.max_block_bytes = n;
        self
    }

    pub fn store_incompressible(mut self, yes: bool) -> Self {
        self.store_incompressible = yes;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_block_elements == 0 {
            return Err(TvfError::InvalidOptions(
                "max_block_elements must be at least 1".into(),
            ));
        }
        if self.max_block_bytes == 0 {
            return Err(TvfError::InvalidOptions(
                "max_block_bytes must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Running totals for a stream being written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamSummary {
    pub blocks: usize,
    pub elements: u64,
    /// Encoded bytes before compression.
    pub raw_bytes: u64,
    /// Block payload bytes as written (block headers excluded).
    pub compressed_bytes: u64,
    /// Blocks that fell back to the stored algorithm.
    pub stored_blocks: usize,
    /// Bytes written to the sink so far.
    pub total_bytes: u64,
}

/// Streaming writer for TVF streams.
///
/// # Write contract
/// Call [`append`](Self::append) for each value, in order. Every value must
/// conform to the stream descriptor. Values are encoded into a pending buffer
/// that is compressed and written as one independent block whenever
/// `max_block_elements` values or `max_block_bytes` encoded bytes have
/// accumulated. [`finish`](Self::finish) flushes the partial block, then
/// appends the index and the footer.
///
/// A writer that hit an I/O or compression error is poisoned: every later
/// call fails with [`TvfError::WriterPoisoned`] and the stream is left
/// without a footer, so readers reject it.
///
/// # Format layout written
/// ```text
/// [HEADER: 8 bytes] [DESCRIPTOR]
/// [BLOCK 0] [BLOCK 1] ... [BLOCK N-1]
/// [INDEX: 12 bytes x N]
/// [FOOTER: 20 bytes]
/// ```
/// The header never needs rewriting, so any `Write` sink works.
pub struct StreamWriter<W: Write> {
    sink: W,
    descriptor: TypeDescriptor,
    codec: Arc<dyn Codec>,
    options: WriterOptions,
    /// Encoded values not yet flushed into a block.
    pending: Vec<u8>,
    pending_count: u32,
    /// In-memory index, appended on `finish()`.
    entries: Vec<IndexEntry>,
    /// Current write position (mirrors the bytes handed to `sink`).
    offset: u64,
    summary: StreamSummary,
    poisoned: bool,
}

impl StreamWriter<BufWriter<File>> {
    /// Create (or truncate) a stream file at `path`.
    pub fn create_path(
        path: impl AsRef<Path>,
        descriptor: TypeDescriptor,
        codec: Arc<dyn Codec>,
        options: WriterOptions,
    ) -> Result<Self> {
        let file = File::create(path)?;
        Self::create(BufWriter::new(file), descriptor, codec, options)
    }
}

impl<W: Write> StreamWriter<W> {
    /// Start a stream: validates `options`, then writes the header and the
    /// descriptor. Descriptors nested deeper than [`MAX_NESTING`] are refused.
    pub fn create(
        mut sink: W,
        descriptor: TypeDescriptor,
        codec: Arc<dyn Codec>,
        options: WriterOptions,
    ) -> Result<Self> {
        options.validate()?;
        if descriptor.depth() > MAX_NESTING {
            return Err(TvfError::InvalidOptions(format!(
                "descriptor nesting {} exceeds the limit of {MAX_NESTING}",
                descriptor.depth()
            )));
        }

        let header = StreamHeader {
            version: FORMAT_VERSION,
        };
        let descriptor_bytes = format::encode_descriptor(&descriptor);
        sink.write_all(&header.to_bytes())?;
        sink.write_all(&descriptor_bytes)?;
        let offset = HEADER_SIZE + descriptor_bytes.len() as u64;

        debug!(
            "tvf writer: created stream for {descriptor} (codec {}, {} elements / {} bytes per block)",
            codec.name(),
            options.max_block_elements,
            options.max_block_bytes
        );

        Ok(Self {
            sink,
            descriptor,
            codec,
            options,
            pending: Vec::with_capacity(options.max_block_bytes.min(1 << 20) as usize),
            pending_count: 0,
            entries: Vec::new(),
            offset,
            summary: StreamSummary {
                total_bytes: offset,
                ..StreamSummary::default()
            },
            poisoned: false,
        })
    }

    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.descriptor
    }

    pub fn options(&self) -> &WriterOptions {
        &self.options
    }

    /// Totals for the blocks flushed so far.
    pub fn summary(&self) -> &StreamSummary {
        &self.summary
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Buffer one value, flushing a block if a threshold is reached.
    ///
    /// A value that does not conform to the stream descriptor is rejected
    /// with `TypeMismatch` and leaves the writer usable.
    pub fn append(&mut self, value: &Value) -> Result<()> {
        if self.poisoned {
            return Err(TvfError::WriterPoisoned);
        }
        if value.descriptor() != &self.descriptor {
            return Err(TvfError::mismatch(
                "$",
                &self.descriptor,
                value.descriptor(),
            ));
        }
        self.descriptor.validate(value)?;

        let mark = self.pending.len();
        if let Err(e) = codec::encode_into(value, &mut self.pending) {
            self.pending.truncate(mark);
            return Err(e);
        }
        self.pending_count += 1;

        if self.pending_count >= self.options.max_block_elements
            || self.pending.len() >= self.options.max_block_bytes as usize
        {
            self.flush_block()?;
        }
        Ok(())
    }

    /// Append every value of `values`, stopping at the first error.
    pub fn append_all<'v, I>(&mut self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = &'v Value>,
    {
        for value in values {
            self.append(value)?;
        }
        Ok(())
    }

    fn flush_block(&mut self) -> Result<()> {
        if self.pending_count == 0 {
            return Ok(());
        }
        let result = self.write_pending();
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    /// Compress the pending buffer as a single block and write it out.
    fn write_pending(&mut self) -> Result<()> {
        let mut block = compression::compress(&self.pending, self.codec.as_ref())?;
        if self.options.store_incompressible
            && block.algorithm() != Algorithm::None
            && block.compressed_len() >= block.raw_len()
        {
            warn!(
                "tvf writer: block {} did not shrink under {} ({} -> {} bytes), storing raw",
                self.entries.len(),
                self.codec.name(),
                block.raw_len(),
                block.compressed_len()
            );
            block = EncodedBlock::stored(&self.pending)?;
            self.summary.stored_blocks += 1;
        }

        let header = BlockHeader {
            algorithm: block.algorithm(),
            compressed_len: block.compressed_len(),
            raw_len: block.raw_len(),
        };
        self.sink.write_all(&header.to_bytes())?;
        self.sink.write_all(block.payload())?;

        self.entries.push(IndexEntry {
            offset: self.offset,
            element_count: self.pending_count,
        });
        let written = BLOCK_HEADER_SIZE + block.compressed_len() as u64;
        self.offset += written;

        self.summary.blocks += 1;
        self.summary.elements += self.pending_count as u64;
        self.summary.raw_bytes += block.raw_len() as u64;
        self.summary.compressed_bytes += block.compressed_len() as u64;
        self.summary.total_bytes = self.offset;

        debug!(
            "tvf writer: flushed block {} ({} elements, {} -> {} bytes, {})",
            self.entries.len() - 1,
            self.pending_count,
            block.raw_len(),
            block.compressed_len(),
            block.algorithm()
        );

        self.pending.clear();
        self.pending_count = 0;
        Ok(())
    }

    /// Flush the trailing partial block, write the index and footer, and
    /// hand back the sink with the final totals.
    pub fn finish(mut self) -> Result<(W, StreamSummary)> {
        if self.poisoned {
            return Err(TvfError::WriterPoisoned);
        }
        self.flush_block()?;

        let index_len = u32::try_from(self.entries.len() as u64 * INDEX_ENTRY_SIZE)
            .map_err(|_| {
                TvfError::InvalidOptions(format!(
                    "{} blocks overflow the u32 index length; raise the block thresholds",
                    self.entries.len()
                ))
            })?;

        // ── Index ───────────────────────────────────────────────────────────
        let index_offset = self.offset;
        for entry in &self.entries {
            self.sink.write_all(&entry.to_bytes())?;
        }
        self.offset += index_len as u64;

        // ── Footer, written last so a torn stream has none ──────────────────
        let footer = Footer {
            index_offset,
            index_len,
            version: FORMAT_VERSION,
        };
        self.sink.write_all(&footer.to_bytes())?;
        self.sink.flush()?;
        self.offset += format::FOOTER_SIZE;
        self.summary.total_bytes = self.offset;

        debug!(
            "tvf writer: finalized {} blocks, {} elements, {} bytes",
            self.summary.blocks, self.summary.elements, self.summary.total_bytes
        );

        Ok((self.sink, self.summary))
    }
}
