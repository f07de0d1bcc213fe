//! `seekzip`: a parallel, seekable, indexable decompressor for gzip/BGZF and
//! bzip2.
//!
//! Ordinary gzip and bzip2 decoders are inherently sequential: each block
//! depends on state carried forward from the one before it. This crate
//! parallelizes decoding anyway by locating probable block boundaries ahead
//! of time (the block finder), decoding speculatively from each one before
//! its true preceding state is known (marker mode), and patching up the
//! handful of bytes that guess got wrong once the real state arrives. The
//! result is a reader that looks like an ordinary seekable byte stream from
//! the outside, backed by a thread pool doing the actual decompression.
//!
//! # Architecture
//!
//! 1. **Block finder** (`blockfinder`) scans the compressed stream for
//!    candidate block/member boundaries without fully decoding it.
//! 2. **Fetcher** (`fetcher`) turns those boundaries into a chunk-keyed
//!    cache, dispatching decode tasks to a rayon thread pool and sharing
//!    in-flight work between concurrent requests for the same chunk.
//! 3. **Window map** (`window`) carries the 32 KiB of decoded history each
//!    chunk needs from its predecessor, published once and read many times.
//! 4. **Reader** (`reader`) is the public, single-threaded-caller `read`/
//!    `seek` surface tying the above together, plus index import/export
//!    (`index`) so a later run can skip block-finding entirely.
//!
//! # Quick start
//!
//! ```no_run
//! use seekzip::{open_mmap, ParallelReader, ReaderConfig, StreamFormat};
//! use std::io::Read;
//!
//! let file = open_mmap("archive.gz").unwrap();
//! let mut reader = ParallelReader::new(file, StreamFormat::Gzip, ReaderConfig::default()).unwrap();
//! let mut data = Vec::new();
//! reader.read_to_end(&mut data).unwrap();
//! ```

pub mod bitreader;
pub mod blockfinder;
pub mod bzip2;
pub mod chunk;
pub mod config;
pub mod coverage;
pub mod deflate;
pub mod error;
pub mod fetcher;
pub mod filereader;
pub mod format;
pub mod huffman;
pub mod index;
pub mod reader;
pub mod window;

pub use config::ReaderConfig;
pub use coverage::AtomicBitVector;
pub use error::{Error, Result};
pub use fetcher::{Fetcher, StatsSnapshot, StreamFormat};
pub use filereader::{open_mmap, FileHandleReader, FileReader, SinglePassReader, SliceReader};
pub use index::Index;
pub use reader::ParallelReader;
