use thiserror::Error;

/// Convenience alias for `Result<T, TvfError>`.
pub type Result<T, E = TvfError> = std::result::Result<T, E>;

/// Every failure the engine can report.
///
/// None of these are retried internally. `TypeMismatch`, `NoSuchField` and
/// `DuplicateField` are caller bugs; the codec, block and frame variants mean
/// the bytes on hand are corrupt, truncated, or from an incompatible writer.
#[derive(Error, Debug)]
pub enum TvfError {
    /// A value's shape disagrees with the descriptor it is checked against.
    #[error("type mismatch at {path}: expected {expected}, found {found}")]
    TypeMismatch {
        path: String,
        expected: String,
        found: String,
    },

    #[error("no such field `{name}` in {descriptor}")]
    NoSuchField { name: String, descriptor: String },

    #[error("duplicate field `{0}` in struct descriptor")]
    DuplicateField(String),

    /// Decoding needed more bytes than the buffer holds.
    #[error("buffer underrun at offset {offset}: needed {needed} bytes, {available} available")]
    BufferUnderrun {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// Malformed encoded bytes (bad presence byte, bad UTF-8, trailing data, ...).
    #[error("codec error at offset {offset}: {reason}")]
    Codec { offset: usize, reason: String },

    #[error("corrupt block: {0}")]
    CorruptBlock(String),

    #[error("unknown compression algorithm tag {0}")]
    UnknownAlgorithm(u8),

    #[error("unsupported format version {found} (supported {min}..={max})")]
    UnsupportedVersion { found: u32, min: u32, max: u32 },

    /// The stream has no valid footer, so it was never finalized.
    #[error("stream is not finalized: {0}")]
    Unfinalized(String),

    #[error("type parse error at position {position}: {message}")]
    TypeParse { position: usize, message: String },

    #[error("block index {index} out of range (total {count})")]
    BlockOutOfRange { index: usize, count: usize },

    #[error("element index {index} out of range (total {count})")]
    ElementOutOfRange { index: u64, count: u64 },

    #[error("invalid writer options: {0}")]
    InvalidOptions(String),

    #[error("writer is poisoned by an earlier failure and cannot continue")]
    WriterPoisoned,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TvfError {
    pub(crate) fn mismatch(
        path: impl Into<String>,
        expected: impl ToString,
        found: impl ToString,
    ) -> Self {
        TvfError::TypeMismatch {
            path: path.into(),
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }

    pub(crate) fn codec(offset: usize, reason: impl Into<String>) -> Self {
        TvfError::Codec {
            offset,
            reason: reason.into(),
        }
    }
}
