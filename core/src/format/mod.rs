//! Container-format framing (spec.md §6): gzip/BGZF member headers and
//! footers, and the bzip2 stream preamble. Block-level decoding itself lives
//! in `crate::deflate` and `crate::bzip2`.

pub mod bzip2_stream;
pub mod gzip;
