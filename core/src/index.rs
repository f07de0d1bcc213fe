//! Index file format (spec.md §4.H), grounded on `IndexFileFormat.{hpp,cpp}`'s
//! `GZIDX` layout. Binary, little-endian. Three shapes are recognized on
//! import (the canonical shape this crate writes, an older implicit-window
//! layout, and BGZF's flat offset-pair table); only the canonical shape is
//! ever written (spec.md §4.H: "the writer emits the current canonical
//! shape").

use crate::error::{Error, Result};

pub const WINDOW_SIZE_BYTES: u32 = 32 * 1024;

const MAGIC: &[u8; 5] = b"GZIDX";
const FORMAT_VERSION: u8 = 1;

/// One checkpoint: a known-good place to resume decoding from (spec.md §4.H).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub compressed_offset_bits: u64,
    pub uncompressed_offset_bytes: u64,
    /// The 32 KiB of decoded history immediately preceding this checkpoint;
    /// `None` at a stream boundary, where no history is needed.
    pub window: Option<Vec<u8>>,
}

/// A full index: enough checkpoints to seek into a compressed stream without
/// rescanning it from the start (spec.md §4.H/§4.I).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    pub compressed_size_bytes: u64,
    pub uncompressed_size_bytes: u64,
    pub checkpoint_spacing_bytes: u32,
    pub checkpoints: Vec<Checkpoint>,
}

impl Index {
    /// Validates internal consistency (spec.md §4.H import checks): offsets
    /// monotonically non-decreasing, windows the expected size, sizes agree
    /// with the archive when one is known.
    pub fn validate(&self, known_archive_size: Option<u64>) -> Result<()> {
        if let Some(size) = known_archive_size {
            if self.compressed_size_bytes != 0 && self.compressed_size_bytes != size {
                return Err(Error::IndexArchiveMismatch("compressed size does not match the archive"));
            }
        }
        let mut last_compressed = 0u64;
        let mut last_uncompressed = 0u64;
        for (i, checkpoint) in self.checkpoints.iter().enumerate() {
            if i > 0 {
                if checkpoint.compressed_offset_bits < last_compressed
                    || checkpoint.uncompressed_offset_bytes < last_uncompressed
                {
                    return Err(Error::IndexMalformed("checkpoint offsets are not monotonically non-decreasing"));
                }
            }
            last_compressed = checkpoint.compressed_offset_bits;
            last_uncompressed = checkpoint.uncompressed_offset_bytes;
            if let Some(window) = &checkpoint.window {
                if window.len() != WINDOW_SIZE_BYTES as usize {
                    return Err(Error::IndexMalformed("checkpoint window is not exactly 32 KiB"));
                }
            }
        }
        Ok(())
    }

    /// Serializes the canonical shape (format version 1).
    pub fn export_canonical(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        out.push(FORMAT_VERSION);
        out.push(0); // reserved flags

        out.extend_from_slice(&self.compressed_size_bytes.to_le_bytes());
        out.extend_from_slice(&self.uncompressed_size_bytes.to_le_bytes());
        out.extend_from_slice(&self.checkpoint_spacing_bytes.to_le_bytes());
        out.extend_from_slice(&WINDOW_SIZE_BYTES.to_le_bytes());
        out.extend_from_slice(&(self.checkpoints.len() as u32).to_le_bytes());

        for checkpoint in &self.checkpoints {
            let bits = checkpoint.compressed_offset_bits % 8;
            let rounded_up_bytes = checkpoint.compressed_offset_bits / 8 + if bits == 0 { 0 } else { 1 };
            out.extend_from_slice(&rounded_up_bytes.to_le_bytes());
            out.extend_from_slice(&checkpoint.uncompressed_offset_bytes.to_le_bytes());
            out.push(if bits == 0 { 0 } else { (8 - bits) as u8 });
            out.push(if checkpoint.window.is_some() { 1 } else { 0 });
        }

        for checkpoint in &self.checkpoints {
            if let Some(window) = &checkpoint.window {
                write_padded_window(&mut out, window);
            }
        }

        out
    }

    /// Imports an index, recognizing the canonical shape, the pre-version-1
    /// implicit-window-presence shape, and BGZF's flat offset-pair table
    /// (spec.md §4.H: "two legacy shapes must be readable if present").
    pub fn import(data: &[u8]) -> Result<Self> {
        if data.len() >= MAGIC.len() && &data[..MAGIC.len()] == MAGIC {
            import_gzidx(data)
        } else {
            import_bgzf(data)
        }
    }
}

fn write_padded_window(out: &mut Vec<u8>, window: &[u8]) {
    let size = WINDOW_SIZE_BYTES as usize;
    if window.len() == size {
        out.extend_from_slice(window);
    } else if window.len() > size {
        out.extend_from_slice(&window[window.len() - size..]);
    } else {
        out.resize(out.len() + (size - window.len()), 0);
        out.extend_from_slice(window);
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(Error::IndexMalformed("index file truncated"));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
}

fn import_gzidx(data: &[u8]) -> Result<Index> {
    let mut r = Reader::new(data);
    r.take(MAGIC.len())?;
    let format_version = r.u8()?;
    if format_version > 1 {
        return Err(Error::UnsupportedVersion(format_version as u32));
    }
    let _reserved = r.u8()?;

    let compressed_size_bytes = r.u64()?;
    let uncompressed_size_bytes = r.u64()?;
    let checkpoint_spacing_bytes = r.u32()?;
    let window_size_bytes = r.u32()?;
    if window_size_bytes != WINDOW_SIZE_BYTES {
        return Err(Error::IndexMalformed("only a 32 KiB window size is supported"));
    }
    let checkpoint_count = r.u32()? as usize;

    struct Raw {
        compressed_offset_bytes: u64,
        uncompressed_offset_bytes: u64,
        bits: u8,
        has_window: bool,
    }
    let mut raws = Vec::with_capacity(checkpoint_count);
    for i in 0..checkpoint_count {
        let compressed_offset_bytes = r.u64()?;
        if compressed_offset_bytes > compressed_size_bytes {
            return Err(Error::IndexMalformed("checkpoint compressed offset is after the file end"));
        }
        let uncompressed_offset_bytes = r.u64()?;
        if uncompressed_offset_bytes > uncompressed_size_bytes {
            return Err(Error::IndexMalformed("checkpoint uncompressed offset is after the file end"));
        }
        let bits = r.u8()?;
        if bits >= 8 {
            return Err(Error::IndexMalformed("denormal compressed-offset bit remainder"));
        }
        let has_window = if format_version == 0 {
            i != 0
        } else {
            r.u8()? != 0
        };
        raws.push(Raw {
            compressed_offset_bytes,
            uncompressed_offset_bytes,
            bits,
            has_window,
        });
    }

    let mut checkpoints = Vec::with_capacity(raws.len());
    for raw in &raws {
        let window = if raw.has_window {
            Some(r.take(WINDOW_SIZE_BYTES as usize)?.to_vec())
        } else {
            None
        };
        let mut compressed_offset_bits = raw.compressed_offset_bytes * 8;
        if raw.bits > 0 {
            if compressed_offset_bits == 0 {
                return Err(Error::IndexMalformed("denormal bit remainder yields a negative offset"));
            }
            compressed_offset_bits -= raw.bits as u64;
        }
        checkpoints.push(Checkpoint {
            compressed_offset_bits,
            uncompressed_offset_bytes: raw.uncompressed_offset_bytes,
            window,
        });
    }

    let index = Index {
        compressed_size_bytes,
        uncompressed_size_bytes,
        checkpoint_spacing_bytes,
        checkpoints,
    };
    index.validate(None)?;
    Ok(index)
}

/// BGZF's flat `.gzi` shape (spec.md §4.H "simple fixed-size table"): a
/// `u64` entry count followed by that many `(compressed_offset, uncompressed_offset)`
/// byte-granular pairs. There is no per-entry window (BGZF blocks are
/// independently decodable, so none is needed) and no archive-size field;
/// callers fill those in from the archive they're importing into.
fn import_bgzf(data: &[u8]) -> Result<Index> {
    let mut r = Reader::new(data);
    let mut entry_count = r.u64()?;
    if entry_count == u64::MAX {
        entry_count = 0;
    }
    let expected_size = (2 * entry_count + 1) * 8;
    if !data.is_empty() && data.len() as u64 != expected_size {
        return Err(Error::IndexMalformed("BGZF index size does not match its entry count"));
    }

    let mut checkpoints = Vec::with_capacity(entry_count as usize + 1);
    // BGZF streams always start with a block at bit offset 0; the reference
    // importer derives this via a live block-finder pass over the archive,
    // which we don't have at import time, so we seed it directly.
    checkpoints.push(Checkpoint {
        compressed_offset_bits: 0,
        uncompressed_offset_bytes: 0,
        window: None,
    });
    for _ in 1..entry_count {
        let compressed_offset_bytes = r.u64()?;
        let uncompressed_offset_bytes = r.u64()?;
        checkpoints.push(Checkpoint {
            compressed_offset_bits: compressed_offset_bytes * 8,
            uncompressed_offset_bytes,
            window: None,
        });
    }

    let index = Index {
        compressed_size_bytes: 0,
        uncompressed_size_bytes: 0,
        checkpoint_spacing_bytes: WINDOW_SIZE_BYTES,
        checkpoints,
    };
    index.validate(None)?;
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_index() -> Index {
        Index {
            compressed_size_bytes: 1000,
            uncompressed_size_bytes: 5000,
            checkpoint_spacing_bytes: WINDOW_SIZE_BYTES,
            checkpoints: vec![
                Checkpoint {
                    compressed_offset_bits: 0,
                    uncompressed_offset_bytes: 0,
                    window: None,
                },
                Checkpoint {
                    compressed_offset_bits: 4096,
                    uncompressed_offset_bytes: 40000,
                    window: Some(vec![7u8; WINDOW_SIZE_BYTES as usize]),
                },
            ],
        }
    }

    #[test]
    fn canonical_round_trip() {
        let index = sample_index();
        let bytes = index.export_canonical();
        let imported = Index::import(&bytes).unwrap();
        assert_eq!(imported, index);
    }

    #[test]
    fn rejects_truncated_magic() {
        let err = Index::import(b"GZ").unwrap_err();
        assert!(matches!(err, Error::IndexMalformed(_)));
    }

    #[test]
    fn rejects_non_32kib_window_size() {
        let mut bytes = sample_index().export_canonical();
        // windowSizeInBytes field starts right after magic(5)+version(1)+reserved(1)+
        // compressedSize(8)+uncompressedSize(8)+spacing(4) = offset 27.
        bytes[27..31].copy_from_slice(&(1024u32).to_le_bytes());
        let err = Index::import(&bytes).unwrap_err();
        assert!(matches!(err, Error::IndexMalformed(_)));
    }

    #[test]
    fn bgzf_flat_table_imports_with_synthetic_first_checkpoint() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&2u64.to_le_bytes()); // entry count
        bytes.extend_from_slice(&0u64.to_le_bytes()); // entry 0 unused by our importer
        bytes.extend_from_slice(&0u64.to_le_bytes());
        bytes.extend_from_slice(&500u64.to_le_bytes()); // entry 1: compressed offset
        bytes.extend_from_slice(&6000u64.to_le_bytes()); // entry 1: uncompressed offset
        let index = Index::import(&bytes).unwrap();
        assert_eq!(index.checkpoints.len(), 2);
        assert_eq!(index.checkpoints[0].compressed_offset_bits, 0);
        assert_eq!(index.checkpoints[1].compressed_offset_bits, 500 * 8);
        assert_eq!(index.checkpoints[1].uncompressed_offset_bytes, 6000);
    }

    #[test]
    fn version_zero_implies_window_on_every_checkpoint_but_the_first() {
        // Hand-build a version-0 canonical-shaped file.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.push(0); // format version 0
        bytes.push(0); // reserved
        bytes.extend_from_slice(&100u64.to_le_bytes());
        bytes.extend_from_slice(&1000u64.to_le_bytes());
        bytes.extend_from_slice(&(WINDOW_SIZE_BYTES).to_le_bytes());
        bytes.extend_from_slice(&WINDOW_SIZE_BYTES.to_le_bytes());
        bytes.extend_from_slice(&2u32.to_le_bytes()); // checkpoint count
        // checkpoint 0: no data-flag byte in version 0.
        bytes.extend_from_slice(&0u64.to_le_bytes());
        bytes.extend_from_slice(&0u64.to_le_bytes());
        bytes.push(0); // bits
        // checkpoint 1
        bytes.extend_from_slice(&50u64.to_le_bytes());
        bytes.extend_from_slice(&500u64.to_le_bytes());
        bytes.push(0); // bits
        // window for checkpoint 1 (implicitly present, since i != 0)
        bytes.extend_from_slice(&vec![3u8; WINDOW_SIZE_BYTES as usize]);

        let index = Index::import(&bytes).unwrap();
        assert!(index.checkpoints[0].window.is_none());
        assert!(index.checkpoints[1].window.is_some());
    }
}
