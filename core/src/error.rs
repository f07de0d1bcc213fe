//! The single error sum type surfaced by every fallible operation in this crate.
//!
//! Worker tasks attach a format error to the chunk they were decoding; the error
//! only becomes visible to the caller when `read`/`seek` would have consumed that
//! chunk (see `reader.rs`). CRC errors are the one exception that can be *disabled*
//! (see `ReaderConfig::check_crc`) without otherwise aborting decoding.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid magic bytes in stream preamble")]
    InvalidMagic,

    #[error("unsupported format version {0}")]
    UnsupportedVersion(u32),

    #[error("unexpected end of input while reading bit stream")]
    UnexpectedEof,

    #[error("Huffman code lengths do not form a valid canonical tree: {0}")]
    InvalidHuffmanTree(&'static str),

    #[error("invalid DEFLATE block type 3 (reserved)")]
    InvalidBlockType,

    #[error("stored block LEN does not match one's complement ~LEN")]
    InvalidStoredLength,

    #[error("decoded an out-of-range Huffman symbol")]
    InvalidSymbol,

    #[error("back-reference distance {distance} exceeds available history {available}")]
    DistanceTooLarge { distance: u32, available: u32 },

    #[error("CRC32 mismatch: expected {expected:#010x}, computed {computed:#010x}")]
    CrcMismatch { expected: u32, computed: u32 },

    #[error("uncompressed size mismatch: footer says {expected}, decoded {actual}")]
    UncompressedSizeMismatch { expected: u64, actual: u64 },

    #[error("index file is malformed: {0}")]
    IndexMalformed(&'static str),

    #[error("index does not match the archive it is applied to: {0}")]
    IndexArchiveMismatch(&'static str),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("write callback refused further bytes (pipe closed)")]
    PipeClosed,

    #[error("operation was cancelled")]
    Cancelled,

    #[error("bzip2 stream structurally invalid: {0}")]
    InvalidBzip2Stream(&'static str),

    #[error("window offset {offset} already published with a different window")]
    WindowConflict { offset: u64 },

    #[error("a decode worker panicked: {0}")]
    WorkerPanicked(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::UnexpectedEof
        } else {
            Error::Io(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
