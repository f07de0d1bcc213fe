//! RFC 1952 gzip member header/footer parsing, plus BGZF's `FEXTRA` "BC"
//! subfield recognition (spec.md §6, SPEC_FULL.md's "BGZF virtual file
//! offsets" supplement). A gzip archive may hold multiple back-to-back
//! members; each is parsed independently and the DEFLATE stream inside
//! decoded by `crate::deflate`.

use crate::bitreader::BitReader;
use crate::error::{Error, Result};

const MAGIC0: u8 = 0x1f;
const MAGIC1: u8 = 0x8b;
const CM_DEFLATE: u8 = 8;

const FLG_FTEXT: u8 = 1 << 0;
const FLG_FHCRC: u8 = 1 << 1;
const FLG_FEXTRA: u8 = 1 << 2;
const FLG_FNAME: u8 = 1 << 3;
const FLG_FCOMMENT: u8 = 1 << 4;

/// A parsed gzip member header (spec.md §6: RFC 1952).
#[derive(Debug, Clone)]
pub struct MemberHeader {
    pub mtime: u32,
    pub xfl: u8,
    pub os: u8,
    pub is_text: bool,
    pub name: Option<Vec<u8>>,
    pub comment: Option<Vec<u8>>,
    /// BGZF's `FEXTRA` "BC" subfield payload: total compressed block size
    /// minus one, letting the block finder skip straight to the next block
    /// boundary instead of scanning for it (SPEC_FULL.md BGZF supplement).
    pub bgzf_block_size: Option<u16>,
    /// Byte offset, from the start of the member, at which the DEFLATE
    /// stream begins.
    pub header_len_bytes: u64,
}

/// Parses one gzip member header starting at the bit reader's current
/// (byte-aligned) position. The DEFLATE stream follows immediately.
pub fn parse_member_header(bits: &mut BitReader) -> Result<MemberHeader> {
    let start = bits.tell();
    debug_assert_eq!(start % 8, 0, "gzip member headers are always byte-aligned");

    let magic0 = bits.read_u8()?;
    let magic1 = bits.read_u8()?;
    if magic0 != MAGIC0 || magic1 != MAGIC1 {
        return Err(Error::InvalidMagic);
    }
    let cm = bits.read_u8()?;
    if cm != CM_DEFLATE {
        return Err(Error::UnsupportedVersion(cm as u32));
    }
    let flags = bits.read_u8()?;
    let mtime = bits.read_u32_le()?;
    let xfl = bits.read_u8()?;
    let os = bits.read_u8()?;

    let mut bgzf_block_size = None;
    if flags & FLG_FEXTRA != 0 {
        let xlen = bits.read_u16_le()?;
        let mut remaining = xlen as i32;
        while remaining >= 4 {
            let si1 = bits.read_u8()?;
            let si2 = bits.read_u8()?;
            let slen = bits.read_u16_le()?;
            remaining -= 4;
            if si1 == b'B' && si2 == b'C' && slen == 2 {
                bgzf_block_size = Some(bits.read_u16_le()?);
                remaining -= 2;
            } else {
                for _ in 0..slen {
                    bits.read_u8()?;
                }
                remaining -= slen as i32;
            }
        }
    }

    let name = if flags & FLG_FNAME != 0 {
        Some(read_cstring(bits)?)
    } else {
        None
    };
    let comment = if flags & FLG_FCOMMENT != 0 {
        Some(read_cstring(bits)?)
    } else {
        None
    };
    if flags & FLG_FHCRC != 0 {
        bits.read_u16_le()?;
    }

    let header_len_bytes = (bits.tell() - start) / 8;
    Ok(MemberHeader {
        mtime,
        xfl,
        os,
        is_text: flags & FLG_FTEXT != 0,
        name,
        comment,
        bgzf_block_size,
        header_len_bytes,
    })
}

fn read_cstring(bits: &mut BitReader) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        let b = bits.read_u8()?;
        if b == 0 {
            break;
        }
        out.push(b);
    }
    Ok(out)
}

/// A gzip member footer: CRC32 of the uncompressed data and its size modulo
/// 2^32 (spec.md §4.F step 6, §7 `UncompressedSizeMismatch`).
#[derive(Debug, Clone, Copy)]
pub struct MemberFooter {
    pub crc32: u32,
    pub isize_mod_2_32: u32,
}

pub fn parse_member_footer(bits: &mut BitReader) -> Result<MemberFooter> {
    bits.align_to_byte();
    let crc32 = bits.read_u32_le()?;
    let isize_mod_2_32 = bits.read_u32_le()?;
    Ok(MemberFooter { crc32, isize_mod_2_32 })
}

/// Validates a decoded member's trailing CRC32/ISIZE against the footer
/// (spec.md §7: `CrcMismatch`/`UncompressedSizeMismatch`).
pub fn validate_footer(footer: &MemberFooter, decoded: &[u8]) -> Result<()> {
    let computed_crc = crc32fast::hash(decoded);
    if computed_crc != footer.crc32 {
        return Err(Error::CrcMismatch {
            expected: footer.crc32,
            computed: computed_crc,
        });
    }
    let actual_len = (decoded.len() as u64) & 0xFFFF_FFFF;
    if actual_len != footer.isize_mod_2_32 as u64 {
        return Err(Error::UncompressedSizeMismatch {
            expected: footer.isize_mod_2_32 as u64,
            actual: actual_len,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitreader::BitOrder;
    use std::sync::Arc;

    fn minimal_header_bytes() -> Vec<u8> {
        vec![0x1f, 0x8b, 0x08, 0x00, 0, 0, 0, 0, 0x00, 0xff]
    }

    #[test]
    fn parses_minimal_header_with_no_optional_fields() {
        let data: Arc<[u8]> = Arc::from(minimal_header_bytes());
        let mut bits = BitReader::from_slice(data, BitOrder::Lsb);
        let header = parse_member_header(&mut bits).unwrap();
        assert_eq!(header.header_len_bytes, 10);
        assert!(header.name.is_none());
        assert!(header.bgzf_block_size.is_none());
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = minimal_header_bytes();
        bytes[0] = 0x00;
        let data: Arc<[u8]> = Arc::from(bytes);
        let mut bits = BitReader::from_slice(data, BitOrder::Lsb);
        assert!(matches!(parse_member_header(&mut bits), Err(Error::InvalidMagic)));
    }

    #[test]
    fn parses_fname_and_bgzf_extra_subfield() {
        let mut bytes = vec![0x1f, 0x8b, 0x08, FLG_FEXTRA | FLG_FNAME, 0, 0, 0, 0, 0x00, 0xff];
        // FEXTRA: xlen=6, one BC subfield with a 2-byte payload.
        bytes.extend_from_slice(&6u16.to_le_bytes());
        bytes.push(b'B');
        bytes.push(b'C');
        bytes.extend_from_slice(&2u16.to_le_bytes());
        bytes.extend_from_slice(&0xABCDu16.to_le_bytes());
        bytes.extend_from_slice(b"name.txt\0");

        let data: Arc<[u8]> = Arc::from(bytes);
        let mut bits = BitReader::from_slice(data, BitOrder::Lsb);
        let header = parse_member_header(&mut bits).unwrap();
        assert_eq!(header.bgzf_block_size, Some(0xABCD));
        assert_eq!(header.name.as_deref(), Some(&b"name.txt"[..]));
    }

    #[test]
    fn footer_validates_matching_crc_and_size() {
        let data = b"hello world";
        let crc = crc32fast::hash(data);
        let mut bytes = crc.to_le_bytes().to_vec();
        bytes.extend_from_slice(&(data.len() as u32).to_le_bytes());
        let raw: Arc<[u8]> = Arc::from(bytes);
        let mut bits = BitReader::from_slice(raw, BitOrder::Lsb);
        let footer = parse_member_footer(&mut bits).unwrap();
        assert!(validate_footer(&footer, data).is_ok());
    }

    #[test]
    fn footer_rejects_crc_mismatch() {
        let data = b"hello world";
        let mut bytes = 0xDEAD_BEEFu32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&(data.len() as u32).to_le_bytes());
        let raw: Arc<[u8]> = Arc::from(bytes);
        let mut bits = BitReader::from_slice(raw, BitOrder::Lsb);
        let footer = parse_member_footer(&mut bits).unwrap();
        assert!(matches!(validate_footer(&footer, data), Err(Error::CrcMismatch { .. })));
    }
}
