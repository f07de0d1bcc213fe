//! The DEFLATE block decoder (spec.md §4.C, RFC 1951).
//!
//! Decodes one block at a time into a `DecodedChunk`. When the 32 KiB window
//! preceding the chunk is not yet known, back-references that reach before
//! the chunk's own start are emitted as *marker* values instead of bytes
//! (spec.md's "marker mode"); `chunk::DecodedChunk::resolve_with_window` later
//! substitutes real bytes once the window becomes available.

pub mod tables;

use crate::bitreader::{BitOrder, BitReader};
use crate::chunk::{DecodedChunk, MARKER_BASE};
use crate::error::{Error, Result};
use crate::huffman::HuffmanTable;
use tables::{
    DISTANCE_TABLE, HCLEN_BASE, HDIST_BASE, HLIT_BASE, LENGTH_TABLE, PRECODE_ORDER, WINDOW_SIZE,
};

/// Outcome of decoding a single DEFLATE block.
pub struct BlockResult {
    /// Whether `BFINAL` was set (the stream ends after this block).
    pub is_final: bool,
}

/// Decodes one DEFLATE block starting at the bit reader's current position.
///
/// `window`, when `Some`, is the 32 KiB of real bytes preceding the chunk
/// currently being decoded; back-references into it resolve to real bytes.
/// When `None`, out-of-chunk back-references are recorded as markers.
pub fn decode_block(
    bits: &mut BitReader,
    chunk: &mut DecodedChunk,
    window: Option<&[u8]>,
) -> Result<BlockResult> {
    debug_assert_eq!(bits.order(), BitOrder::Lsb);

    let is_final = bits.read(1)? == 1;
    let block_type = bits.read(2)?;

    match block_type {
        0b00 => decode_stored_block(bits, chunk)?,
        0b01 => decode_huffman_block(bits, chunk, window, &fixed_tables())?,
        0b10 => {
            let tables = read_dynamic_tables(bits)?;
            decode_huffman_block(bits, chunk, window, &tables)?;
        }
        _ => return Err(Error::InvalidBlockType),
    }

    Ok(BlockResult { is_final })
}

fn decode_stored_block(bits: &mut BitReader, chunk: &mut DecodedChunk) -> Result<()> {
    bits.align_to_byte();
    let len = bits.read_u16_le()?;
    let nlen = bits.read_u16_le()?;
    if len != !nlen {
        return Err(Error::InvalidStoredLength);
    }
    for _ in 0..len {
        chunk.push_byte(bits.read_u8()?);
    }
    Ok(())
}

struct BlockTables {
    literal: HuffmanTable,
    distance: HuffmanTable,
}

fn fixed_tables() -> BlockTables {
    BlockTables {
        literal: HuffmanTable::from_code_lengths(&tables::fixed_literal_lengths(), 15)
            .expect("fixed literal table is always a valid canonical code"),
        distance: HuffmanTable::from_code_lengths(&tables::fixed_distance_lengths(), 15)
            .expect("fixed distance table is always a valid canonical code"),
    }
}

pub(crate) fn read_dynamic_tables(bits: &mut BitReader) -> Result<BlockTables> {
    let hlit = bits.read(5)? as usize + HLIT_BASE;
    let hdist = bits.read(5)? as usize + HDIST_BASE;
    let hclen = bits.read(4)? as usize + HCLEN_BASE;

    let mut precode_lengths = [0u8; 19];
    for &slot in PRECODE_ORDER.iter().take(hclen) {
        precode_lengths[slot] = bits.read(3)? as u8;
    }
    let precode = HuffmanTable::from_code_lengths(&precode_lengths, 15)
        .map_err(|_| Error::InvalidHuffmanTree("precode tree is not optimal"))?;

    let total = hlit + hdist;
    let mut lengths = Vec::with_capacity(total);
    while lengths.len() < total {
        let symbol = precode.decode(bits)?;
        match symbol {
            0..=15 => lengths.push(symbol as u8),
            16 => {
                if lengths.is_empty() {
                    return Err(Error::InvalidHuffmanTree(
                        "repeat-previous code (16) may not begin a length sequence",
                    ));
                }
                let repeat = bits.read(2)? + 3;
                let prev = *lengths.last().unwrap();
                for _ in 0..repeat {
                    lengths.push(prev);
                }
            }
            17 => {
                let repeat = bits.read(3)? + 3;
                for _ in 0..repeat {
                    lengths.push(0);
                }
            }
            18 => {
                let repeat = bits.read(7)? + 11;
                for _ in 0..repeat {
                    lengths.push(0);
                }
            }
            _ => return Err(Error::InvalidSymbol),
        }
    }
    if lengths.len() != total {
        return Err(Error::InvalidHuffmanTree(
            "decoded code length run overshoots HLIT + HDIST",
        ));
    }

    let literal = HuffmanTable::from_code_lengths(&lengths[..hlit], 15)
        .map_err(|_| Error::InvalidHuffmanTree("literal/length tree is not optimal"))?;
    let distance = HuffmanTable::from_code_lengths(&lengths[hlit..], 15)
        .map_err(|_| Error::InvalidHuffmanTree("distance tree is not optimal"))?;

    Ok(BlockTables { literal, distance })
}

fn decode_huffman_block(
    bits: &mut BitReader,
    chunk: &mut DecodedChunk,
    window: Option<&[u8]>,
    tables: &BlockTables,
) -> Result<()> {
    loop {
        let symbol = tables.literal.decode(bits)?;
        match symbol {
            0..=255 => chunk.push_byte(symbol as u8),
            256 => break,
            257..=285 => {
                let (base, extra) = LENGTH_TABLE[symbol as usize - 257];
                let length = base as u32 + bits.read(extra as u32)? as u32;

                let dist_symbol = tables.distance.decode(bits)?;
                if dist_symbol as usize >= DISTANCE_TABLE.len() {
                    return Err(Error::InvalidSymbol);
                }
                let (dbase, dextra) = DISTANCE_TABLE[dist_symbol as usize];
                let distance = dbase + bits.read(dextra as u32)? as u32;

                copy_back(chunk, window, distance, length)?;
            }
            _ => return Err(Error::InvalidSymbol),
        }
    }
    Ok(())
}

/// Emits `length` bytes copied from `distance` bytes before the current
/// output position, handling `length > distance` (overlapping runs) and
/// back-references that predate the chunk's own start (marker mode).
fn copy_back(
    chunk: &mut DecodedChunk,
    window: Option<&[u8]>,
    distance: u32,
    length: u32,
) -> Result<()> {
    let distance = distance as i64;
    for _ in 0..length {
        let produced = chunk.total_len() as i64;
        let src_pos = produced - distance;
        if src_pos >= 0 {
            let v = chunk.value_at(src_pos as usize);
            chunk.push_value(v);
        } else {
            let before = (-src_pos) as usize; // 1-based distance before chunk start
            match window {
                Some(w) => {
                    if before > w.len() {
                        return Err(Error::DistanceTooLarge {
                            distance: distance as u32,
                            available: w.len() as u32,
                        });
                    }
                    chunk.push_byte(w[w.len() - before]);
                }
                None => {
                    if before > WINDOW_SIZE {
                        return Err(Error::DistanceTooLarge {
                            distance: distance as u32,
                            available: WINDOW_SIZE as u32,
                        });
                    }
                    let marker = MARKER_BASE + (WINDOW_SIZE - before) as u16;
                    chunk.push_marker(marker);
                }
            }
        }
    }
    Ok(())
}
