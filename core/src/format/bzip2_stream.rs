//! bzip2 stream preamble parsing (spec.md §4.D: `"BZh"` plus an ASCII digit
//! `'1'..'9'` giving the decompressed block size in 100 KiB units). Feeds
//! `max_block_bytes` into `crate::bzip2::decode_block`.

use crate::bitreader::BitReader;
use crate::error::{Error, Result};

const MAGIC: [u8; 3] = *b"BZh";

/// A parsed bzip2 stream header.
#[derive(Debug, Clone, Copy)]
pub struct StreamHeader {
    /// Block size in 100 KiB units (1..=9), i.e. the maximum number of bytes
    /// a single block's BWT buffer may hold before RLE1 expansion.
    pub level: u8,
    pub max_block_bytes: usize,
}

pub fn parse_stream_header(bits: &mut BitReader) -> Result<StreamHeader> {
    let b0 = bits.read_u8()?;
    let b1 = bits.read_u8()?;
    let b2 = bits.read_u8()?;
    if [b0, b1, b2] != MAGIC {
        return Err(Error::InvalidMagic);
    }
    let level_digit = bits.read_u8()?;
    if !(b'1'..=b'9').contains(&level_digit) {
        return Err(Error::InvalidBzip2Stream("block size digit out of range '1'..='9'"));
    }
    let level = level_digit - b'0';
    Ok(StreamHeader {
        level,
        max_block_bytes: level as usize * 100_000,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitreader::BitOrder;
    use std::sync::Arc;

    #[test]
    fn parses_level_9_header() {
        let data: Arc<[u8]> = Arc::from(*b"BZh9");
        let mut bits = BitReader::from_slice(data, BitOrder::Msb);
        let header = parse_stream_header(&mut bits).unwrap();
        assert_eq!(header.level, 9);
        assert_eq!(header.max_block_bytes, 900_000);
    }

    #[test]
    fn rejects_bad_magic() {
        let data: Arc<[u8]> = Arc::from(*b"BZx9");
        let mut bits = BitReader::from_slice(data, BitOrder::Msb);
        assert!(matches!(parse_stream_header(&mut bits), Err(Error::InvalidMagic)));
    }

    #[test]
    fn rejects_level_digit_out_of_range() {
        let data: Arc<[u8]> = Arc::from(*b"BZh0");
        let mut bits = BitReader::from_slice(data, BitOrder::Msb);
        assert!(matches!(parse_stream_header(&mut bits), Err(Error::InvalidBzip2Stream(_))));
    }
}
