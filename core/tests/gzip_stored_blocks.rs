//! End-to-end tests against hand-built, minimal gzip streams made of stored
//! (uncompressed) DEFLATE blocks (spec.md §8: round-trip, stream
//! concatenation, and seek-coherence invariants), avoiding any dependency on
//! an external encoder.

use seekzip::{ParallelReader, ReaderConfig, SliceReader, StreamFormat};
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

/// Builds one gzip member (header + stored-block DEFLATE payload + footer)
/// encoding `data` verbatim.
fn build_stored_gzip_member(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    // Minimal 10-byte header: no FNAME/FEXTRA/FCOMMENT/FHCRC.
    out.extend_from_slice(&[0x1f, 0x8b, 0x08, 0x00, 0, 0, 0, 0, 0x00, 0xff]);

    const MAX_STORED: usize = 65_535;
    if data.is_empty() {
        out.push(0x01); // BFINAL=1, BTYPE=00, byte-aligned
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&(!0u16).to_le_bytes());
    } else {
        let mut offset = 0;
        while offset < data.len() {
            let chunk_len = (data.len() - offset).min(MAX_STORED);
            let is_final = offset + chunk_len == data.len();
            out.push(if is_final { 0x01 } else { 0x00 });
            out.extend_from_slice(&(chunk_len as u16).to_le_bytes());
            out.extend_from_slice(&(!(chunk_len as u16)).to_le_bytes());
            out.extend_from_slice(&data[offset..offset + chunk_len]);
            offset += chunk_len;
        }
    }

    let crc = crc32fast::hash(data);
    out.extend_from_slice(&crc.to_le_bytes());
    out.extend_from_slice(&((data.len() as u32).to_le_bytes()));
    out
}

fn reader_over(bytes: Vec<u8>) -> ParallelReader {
    let file = Arc::new(SliceReader::new(Arc::new(bytes)));
    ParallelReader::new(file, StreamFormat::Gzip, ReaderConfig::default()).unwrap()
}

#[test]
fn round_trips_a_single_member_across_multiple_stored_blocks() {
    let data: Vec<u8> = (0..200_000u32).map(|v| (v % 251) as u8).collect();
    let member = build_stored_gzip_member(&data);

    let mut reader = reader_over(member);
    let mut out = Vec::new();
    reader.read_to_end(&mut out).unwrap();
    assert_eq!(out, data);
}

#[test]
fn concatenated_members_decode_in_order() {
    let first: Vec<u8> = b"hello, ".to_vec();
    let second: Vec<u8> = b"world!".to_vec();
    let mut stream = build_stored_gzip_member(&first);
    stream.extend(build_stored_gzip_member(&second));

    let mut reader = reader_over(stream);
    let mut out = Vec::new();
    reader.read_to_end(&mut out).unwrap();
    assert_eq!(out, b"hello, world!");
}

#[test]
fn seek_then_read_matches_the_corresponding_slice() {
    let data: Vec<u8> = (0..500_000u32).map(|v| (v % 256) as u8).collect();
    let member = build_stored_gzip_member(&data);

    let mut reader = reader_over(member);
    let target = 123_456u64;
    reader.seek(SeekFrom::Start(target)).unwrap();
    let mut buf = [0u8; 1024];
    reader.read_exact(&mut buf).unwrap();
    assert_eq!(&buf[..], &data[target as usize..target as usize + 1024]);
}

#[test]
fn crc_mismatch_is_reported_when_checking_is_enabled() {
    let data = b"some payload bytes".to_vec();
    let mut member = build_stored_gzip_member(&data);
    let footer_start = member.len() - 8;
    member[footer_start] ^= 0xff; // corrupt the stored CRC32

    let file = Arc::new(SliceReader::new(Arc::new(member)));
    let mut reader = ParallelReader::new(file, StreamFormat::Gzip, ReaderConfig::default()).unwrap();
    let mut out = Vec::new();
    let err = reader.read_to_end(&mut out).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
}

#[test]
fn crc_checking_can_be_disabled() {
    let data = b"some payload bytes".to_vec();
    let mut member = build_stored_gzip_member(&data);
    let footer_start = member.len() - 8;
    member[footer_start] ^= 0xff;

    let file = Arc::new(SliceReader::new(Arc::new(member)));
    let config = ReaderConfig {
        check_crc: false,
        ..ReaderConfig::default()
    };
    let mut reader = ParallelReader::new(file, StreamFormat::Gzip, config).unwrap();
    let mut out = Vec::new();
    reader.read_to_end(&mut out).unwrap();
    assert_eq!(out, data);
}
