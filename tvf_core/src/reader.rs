use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, SeekFrom};
use std::iter::FusedIterator;
use std::path::Path;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;
use serde::Serialize;

use crate::codec::{ByteReader, ValueDecoder};
use crate::compression::{Algorithm, CodecRegistry, EncodedBlock};
use crate::error::{Result, TvfError};
use crate::format::{
    self, BlockHeader, Footer, IndexEntry, StreamHeader, BLOCK_HEADER_SIZE, FOOTER_SIZE,
    HEADER_SIZE, INDEX_ENTRY_SIZE,
};
use crate::types::TypeDescriptor;
use crate::value::Value;

/// First descriptor read attempt; doubled until the descriptor fits.
const DESCRIPTOR_PROBE: u64 = 256;

/// Random-access reader for TVF streams.
///
/// # Open sequence
/// 1. Read the 20-byte footer at the end (magic check; no footer means the
///    stream was never finalized).
/// 2. Check the format version, before anything else is trusted.
/// 3. Read the header and the descriptor that follows it.
/// 4. Load the index into RAM and validate it against the block region.
///
/// # Access pattern
/// [`read_block`](Self::read_block) seeks straight to one block and decodes
/// only that block. The index is immutable after open and the source sits
/// behind a mutex held only for the seek and read, so one reader can serve
/// `read_block` from many threads at once.
pub struct StreamReader<R> {
    source: Mutex<R>,
    registry: Arc<CodecRegistry>,
    version: u32,
    descriptor: TypeDescriptor,
    fingerprint: u64,
    entries: Vec<IndexEntry>,
    /// `starts[i]` = elements before block `i`; one extra slot for the total.
    starts: Vec<u64>,
    /// First byte after the descriptor.
    data_offset: u64,
    index_offset: u64,
    stream_len: u64,
}

impl StreamReader<BufReader<File>> {
    pub fn open_path(path: impl AsRef<Path>, registry: Arc<CodecRegistry>) -> Result<Self> {
        let file = File::open(path)?;
        Self::open(BufReader::new(file), registry)
    }
}

impl StreamReader<Cursor<Vec<u8>>> {
    /// Open a stream held in memory.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>, registry: Arc<CodecRegistry>) -> Result<Self> {
        Self::open(Cursor::new(bytes.into()), registry)
    }
}

impl<R: Read + Seek> StreamReader<R> {
    pub fn open(mut source: R, registry: Arc<CodecRegistry>) -> Result<Self> {
        let stream_len = source.seek(SeekFrom::End(0))?;
        if stream_len < HEADER_SIZE + 1 + FOOTER_SIZE {
            return Err(TvfError::Unfinalized(format!(
                "stream is only {stream_len} bytes, too short for header and footer"
            )));
        }

        // ── Footer ──────────────────────────────────────────────────────────
        let footer_at = stream_len - FOOTER_SIZE;
        let mut footer_buf = [0u8; FOOTER_SIZE as usize];
        read_at(&mut source, footer_at, &mut footer_buf)?;
        let footer = Footer::from_bytes(&footer_buf)?;
        format::check_version(footer.version)?;

        if footer.index_len as u64 % INDEX_ENTRY_SIZE != 0
            || footer.index_offset.checked_add(footer.index_len as u64) != Some(footer_at)
        {
            return Err(TvfError::codec(
                footer_at as usize,
                format!(
                    "footer index span {}+{} does not end at the footer ({footer_at})",
                    footer.index_offset, footer.index_len
                ),
            ));
        }

        // ── Header ──────────────────────────────────────────────────────────
        let mut header_buf = [0u8; HEADER_SIZE as usize];
        read_at(&mut source, 0, &mut header_buf)?;
        let header = StreamHeader::from_bytes(&header_buf)?;
        format::check_version(header.version)?;
        if header.version != footer.version {
            return Err(TvfError::codec(
                4,
                format!(
                    "header version {} disagrees with footer version {}",
                    header.version, footer.version
                ),
            ));
        }

        // ── Descriptor ──────────────────────────────────────────────────────
        if footer.index_offset < HEADER_SIZE + 1 {
            return Err(TvfError::codec(
                footer_at as usize,
                format!("index offset {} overlaps the header", footer.index_offset),
            ));
        }
        let (descriptor, descriptor_len) =
            read_descriptor(&mut source, footer.index_offset - HEADER_SIZE)?;
        let data_offset = HEADER_SIZE + descriptor_len;

        // ── Index ───────────────────────────────────────────────────────────
        let mut index_buf = vec![0u8; footer.index_len as usize];
        read_at(&mut source, footer.index_offset, &mut index_buf)?;
        let entries = index_buf
            .chunks_exact(INDEX_ENTRY_SIZE as usize)
            .map(|chunk| {
                let mut buf = [0u8; INDEX_ENTRY_SIZE as usize];
                buf.copy_from_slice(chunk);
                IndexEntry::from_bytes(&buf)
            })
            .collect::<Result<Vec<_>>>()?;
        validate_index(&entries, data_offset, footer.index_offset)?;

        let mut starts = Vec::with_capacity(entries.len() + 1);
        let mut total = 0u64;
        starts.push(0);
        for entry in &entries {
            total += entry.element_count as u64;
            starts.push(total);
        }

        debug!(
            "tvf reader: opened v{} stream of {descriptor}: {} blocks, {total} elements, index at {}",
            footer.version,
            entries.len(),
            footer.index_offset
        );

        Ok(Self {
            source: Mutex::new(source),
            registry,
            version: footer.version,
            fingerprint: descriptor.fingerprint(),
            descriptor,
            entries,
            starts,
            data_offset,
            index_offset: footer.index_offset,
            stream_len,
        })
    }

    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.descriptor
    }

    /// xxh3-64 of the stored descriptor encoding.
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    /// Fail with `TypeMismatch` unless the stream was written with exactly
    /// `expected`, field names and order included.
    pub fn expect_descriptor(&self, expected: &TypeDescriptor) -> Result<()> {
        if expected.fingerprint() == self.fingerprint && expected == &self.descriptor {
            Ok(())
        } else {
            Err(TvfError::mismatch("$", expected, &self.descriptor))
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    #[inline]
    pub fn block_count(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn element_count(&self) -> u64 {
        self.starts[self.entries.len()]
    }

    pub fn index(&self) -> &[IndexEntry] {
        &self.entries
    }

    fn entry(&self, block: usize) -> Result<IndexEntry> {
        self.entries
            .get(block)
            .copied()
            .ok_or(TvfError::BlockOutOfRange {
                index: block,
                count: self.entries.len(),
            })
    }

    /// End of block `i`'s byte range: the next block, or the index.
    fn block_end(&self, block: usize) -> u64 {
        self.entries
            .get(block + 1)
            .map_or(self.index_offset, |e| e.offset)
    }

    /// Read block `i` in its compressed form without decoding it.
    pub fn read_encoded_block(&self, block: usize) -> Result<EncodedBlock> {
        let entry = self.entry(block)?;
        let end = self.block_end(block);

        let mut source = self.source.lock();
        let header = read_block_header(&mut *source, entry.offset)?;
        let payload_end = entry.offset + BLOCK_HEADER_SIZE + header.compressed_len as u64;
        if payload_end != end {
            return Err(TvfError::CorruptBlock(format!(
                "block {block}: header says {} payload bytes but the block spans {}",
                header.compressed_len,
                end - entry.offset - BLOCK_HEADER_SIZE
            )));
        }
        let mut payload = vec![0u8; header.compressed_len as usize];
        source.read_exact(&mut payload)?;
        drop(source);

        EncodedBlock::new(header.algorithm, header.raw_len, payload)
    }

    /// Decompress and decode block `i`.
    ///
    /// Only the bytes of block `i` are read; all other blocks are untouched.
    pub fn read_block(&self, block: usize) -> Result<Vec<Value>> {
        let entry = self.entry(block)?;
        let encoded = self.read_encoded_block(block)?;
        let raw = self.registry.decompress(&encoded)?;

        // every top-level value carries at least its presence byte
        let count = entry.element_count as usize;
        if count > raw.len() {
            return Err(TvfError::CorruptBlock(format!(
                "block {block}: index claims {count} elements in {} raw bytes",
                raw.len()
            )));
        }
        let mut decoder = ValueDecoder::new(&self.descriptor, &raw);
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(decoder.decode_next()?);
        }
        decoder.finish()?;
        Ok(values)
    }

    /// Map a stream-wide element number to `(block, position in block)`.
    pub fn locate(&self, element: u64) -> Result<(usize, usize)> {
        if element >= self.element_count() {
            return Err(TvfError::ElementOutOfRange {
                index: element,
                count: self.element_count(),
            });
        }
        // last block whose start <= element
        let block = self.starts.partition_point(|&s| s <= element) - 1;
        Ok((block, (element - self.starts[block]) as usize))
    }

    /// Decode the single block holding element `n` and return that element.
    pub fn read_element(&self, element: u64) -> Result<Value> {
        let (block, slot) = self.locate(element)?;
        let mut values = self.read_block(block)?;
        if slot >= values.len() {
            return Err(TvfError::CorruptBlock(format!(
                "block {block} decoded {} values, expected more than {slot}",
                values.len()
            )));
        }
        Ok(values.swap_remove(slot))
    }

    /// Per-block sizes, gathered from block headers alone.
    pub fn stats(&self) -> Result<StreamStats> {
        let mut blocks = Vec::with_capacity(self.entries.len());
        {
            let mut source = self.source.lock();
            for (i, entry) in self.entries.iter().enumerate() {
                let header = read_block_header(&mut *source, entry.offset)?;
                blocks.push(BlockStats {
                    index: i,
                    offset: entry.offset,
                    elements: entry.element_count,
                    algorithm: header.algorithm,
                    raw_len: header.raw_len,
                    compressed_len: header.compressed_len,
                });
            }
        }
        Ok(StreamStats {
            version: self.version,
            descriptor: self.descriptor.to_string(),
            fingerprint: format!("{:016x}", self.fingerprint),
            elements: self.element_count(),
            raw_bytes: blocks.iter().map(|b| b.raw_len as u64).sum(),
            compressed_bytes: blocks.iter().map(|b| b.compressed_len as u64).sum(),
            descriptor_bytes: self.data_offset - HEADER_SIZE,
            stream_bytes: self.stream_len,
            blocks,
        })
    }

    /// Consume the reader, yielding every value of every block in order.
    ///
    /// The sequence cannot be restarted; reopen the stream to read it again.
    pub fn read_all(self) -> ReadAll<R> {
        ReadAll {
            reader: self,
            next_block: 0,
            current: Vec::new().into_iter(),
            failed: false,
        }
    }

    pub fn into_inner(self) -> R {
        self.source.into_inner()
    }
}

fn read_at<R: Read + Seek>(source: &mut R, offset: u64, buf: &mut [u8]) -> Result<()> {
    source.seek(SeekFrom::Start(offset))?;
    source.read_exact(buf)?;
    Ok(())
}

fn read_block_header<R: Read + Seek>(source: &mut R, offset: u64) -> Result<BlockHeader> {
    let mut buf = [0u8; BLOCK_HEADER_SIZE as usize];
    read_at(source, offset, &mut buf)?;
    BlockHeader::from_bytes(&buf)
}

/// Decode the descriptor at `HEADER_SIZE`, reading at most `limit` bytes.
/// Returns the descriptor and its encoded length.
fn read_descriptor<R: Read + Seek>(source: &mut R, limit: u64) -> Result<(TypeDescriptor, u64)> {
    let mut probe = DESCRIPTOR_PROBE.min(limit);
    loop {
        let mut buf = vec![0u8; probe as usize];
        read_at(source, HEADER_SIZE, &mut buf)?;
        let mut r = ByteReader::new(&buf);
        match format::read_descriptor(&mut r) {
            Ok(descriptor) => return Ok((descriptor, r.position() as u64)),
            Err(TvfError::BufferUnderrun { .. }) if probe < limit => {
                probe = (probe * 2).min(limit);
            }
            Err(TvfError::BufferUnderrun { .. }) => {
                return Err(TvfError::codec(
                    HEADER_SIZE as usize,
                    "descriptor runs into the block index",
                ));
            }
            Err(e) => return Err(e),
        }
    }
}

fn validate_index(entries: &[IndexEntry], data_offset: u64, index_offset: u64) -> Result<()> {
    let first = entries.first().map_or(index_offset, |e| e.offset);
    if first != data_offset {
        return Err(TvfError::codec(
            data_offset as usize,
            format!("block region starts at {first} but the descriptor ends at {data_offset}"),
        ));
    }
    let mut floor = data_offset;
    for (i, entry) in entries.iter().enumerate() {
        if entry.offset < floor || entry.offset > index_offset.saturating_sub(BLOCK_HEADER_SIZE) {
            return Err(TvfError::codec(
                (index_offset + i as u64 * INDEX_ENTRY_SIZE) as usize,
                format!(
                    "index entry {i} points at offset {} outside the block region {floor}..{index_offset}",
                    entry.offset
                ),
            ));
        }
        if entry.element_count == 0 {
            return Err(TvfError::codec(
                (index_offset + i as u64 * INDEX_ENTRY_SIZE + 8) as usize,
                format!("index entry {i} holds zero elements"),
            ));
        }
        floor = entry.offset + BLOCK_HEADER_SIZE;
    }
    Ok(())
}

/// Iterator returned by [`StreamReader::read_all`]. Decodes one block at a
/// time and stops after the first error.
pub struct ReadAll<R> {
    reader: StreamReader<R>,
    next_block: usize,
    current: std::vec::IntoIter<Value>,
    failed: bool,
}

impl<R: Read + Seek> Iterator for ReadAll<R> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(value) = self.current.next() {
                return Some(Ok(value));
            }
            if self.failed || self.next_block >= self.reader.block_count() {
                return None;
            }
            let block = self.next_block;
            self.next_block += 1;
            match self.reader.read_block(block) {
                Ok(values) => self.current = values.into_iter(),
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.failed {
            return (self.current.len(), Some(self.current.len()));
        }
        let rest = self.reader.element_count() - self.reader.starts[self.next_block];
        let total = self.current.len() + rest as usize;
        (0, Some(total + 1))
    }
}

impl<R: Read + Seek> FusedIterator for ReadAll<R> {}

/// Size information for one block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockStats {
    pub index: usize,
    pub offset: u64,
    pub elements: u32,
    pub algorithm: Algorithm,
    pub raw_len: u32,
    pub compressed_len: u32,
}

/// Whole-stream size summary, suitable for JSON output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamStats {
    pub version: u32,
    pub descriptor: String,
    pub fingerprint: String,
    pub elements: u64,
    pub raw_bytes: u64,
    pub compressed_bytes: u64,
    pub descriptor_bytes: u64,
    pub stream_bytes: u64,
    pub blocks: Vec<BlockStats>,
}

impl StreamStats {
    /// Raw / compressed over all blocks; 1.0 for an empty stream.
    pub fn ratio(&self) -> f64 {
        if self.compressed_bytes == 0 {
            return 1.0;
        }
        self.raw_bytes as f64 / self.compressed_bytes as f64
    }
}
