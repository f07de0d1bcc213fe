//! Block finders (spec.md §4.E): locate candidate block-start bit offsets
//! inside a compressed stream without first decoding it sequentially, which
//! is what lets the fetcher dispatch chunk-decode tasks in parallel instead
//! of walking blocks one at a time from the start of the archive.

pub mod bzip2;
pub mod deflate;

pub use bzip2::{Bzip2BlockFinder, MarkerType as Bzip2MarkerType};
pub use deflate::{find_dynamic_huffman_candidates, find_stored_block_candidates, Candidate};
