//! A decoded chunk: the unit of parallel work (spec.md §3 "Decoded chunk",
//! §9 "Polymorphic chunk storage"). Internally stored as a small vector of
//! segments, each either resolved `Bytes` or still-unresolved `Markers`
//! (16-bit values `>= 256` meaning "byte at index `s - 256` of the preceding
//! window"), so fully-resolved regions never pay for 16-bit-widened storage.

use crate::deflate::tables::WINDOW_SIZE;
use crate::error::{Error, Result};

pub const MARKER_BASE: u16 = 256;

/// A gzip member footer parsed mid-chunk whose CRC/ISIZE check had to wait
/// for this chunk's markers to resolve (spec.md §4.F step 6, §4.G). The
/// reader validates these once the chunk's bytes are fully known.
#[derive(Debug, Clone, Copy)]
pub struct PendingGzipFooter {
    /// Byte offset, within this chunk's own output, where the member begins.
    pub member_start: usize,
    /// Byte offset, within this chunk's own output, just past the member.
    pub member_end: usize,
    pub crc32: u32,
    pub isize_mod_2_32: u32,
}

#[derive(Debug, Clone)]
pub enum Segment {
    Bytes(Vec<u8>),
    Markers(Vec<u16>),
}

impl Segment {
    fn len(&self) -> usize {
        match self {
            Segment::Bytes(b) => b.len(),
            Segment::Markers(m) => m.len(),
        }
    }
}

/// A chunk of decoded output, produced by decoding a contiguous compressed
/// region (spec.md §3). May begin with a run of marker segments if decoding
/// started before the preceding 32 KiB window was known.
#[derive(Debug, Clone)]
pub struct DecodedChunk {
    pub encoded_offset_bits: u64,
    pub encoded_size_bits: u64,
    pub decoded_offset_bytes: u64,
    pub crc32: Option<u32>,
    /// True once the chunk ended exactly on a gzip/bzip2 stream boundary
    /// (footer consumed); used by the reader to decide whether to validate
    /// a trailer CRC/ISIZE.
    pub ends_stream: bool,
    /// Gzip member footers seen while this chunk still had unresolved
    /// markers; validated by the reader after marker resolution.
    pub pending_gzip_footers: Vec<PendingGzipFooter>,
    segments: Vec<Segment>,
}

impl DecodedChunk {
    pub fn new(encoded_offset_bits: u64, decoded_offset_bytes: u64) -> Self {
        Self {
            encoded_offset_bits,
            encoded_size_bits: 0,
            decoded_offset_bytes,
            crc32: None,
            ends_stream: false,
            pending_gzip_footers: Vec::new(),
            segments: Vec::new(),
        }
    }

    pub fn decoded_size_bytes(&self) -> u64 {
        self.segments.iter().map(|s| s.len() as u64).sum()
    }

    pub fn has_markers(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::Markers(_)))
    }

    /// Drains the footers deferred while this chunk still had markers, for
    /// the reader to validate now that `all_bytes` will succeed.
    pub fn take_pending_gzip_footers(&mut self) -> Vec<PendingGzipFooter> {
        std::mem::take(&mut self.pending_gzip_footers)
    }

    pub fn push_byte(&mut self, b: u8) {
        match self.segments.last_mut() {
            Some(Segment::Bytes(v)) => v.push(b),
            _ => self.segments.push(Segment::Bytes(vec![b])),
        }
    }

    /// Bulk variant of `push_byte`, used by decoders (bzip2's block decoder)
    /// that produce a whole run of resolved bytes at once.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        match self.segments.last_mut() {
            Some(Segment::Bytes(v)) => v.extend_from_slice(bytes),
            _ => self.segments.push(Segment::Bytes(bytes.to_vec())),
        }
    }

    pub fn push_marker(&mut self, m: u16) {
        debug_assert!(m >= MARKER_BASE);
        match self.segments.last_mut() {
            Some(Segment::Markers(v)) => v.push(m),
            _ => self.segments.push(Segment::Markers(vec![m])),
        }
    }

    /// Appends either a real byte or a marker, as produced by the DEFLATE
    /// decoder's unified output path (spec.md §4.C marker mode).
    pub fn push_value(&mut self, v: u16) {
        if v < MARKER_BASE {
            self.push_byte(v as u8);
        } else {
            self.push_marker(v);
        }
    }

    /// Random access to the raw (possibly unresolved) value at a position,
    /// needed while decoding to resolve back-references within the chunk
    /// itself (a copy *from* a marker position must copy the marker, not a
    /// byte, since it still means "the same unknown window byte").
    pub fn value_at(&self, mut index: usize) -> u16 {
        for seg in &self.segments {
            let len = seg.len();
            if index < len {
                return match seg {
                    Segment::Bytes(v) => v[index] as u16,
                    Segment::Markers(v) => v[index],
                };
            }
            index -= len;
        }
        panic!("value_at index out of range");
    }

    pub fn total_len(&self) -> usize {
        self.segments.iter().map(Segment::len).sum()
    }

    /// Replaces every marker with `window[marker - MARKER_BASE]`, merging
    /// newly-resolved bytes into adjacent `Bytes` segments where possible.
    pub fn resolve_with_window(&mut self, window: &[u8]) -> Result<()> {
        let mut resolved = Vec::with_capacity(self.segments.len());
        for seg in self.segments.drain(..) {
            match seg {
                Segment::Bytes(v) => resolved.push(Segment::Bytes(v)),
                Segment::Markers(markers) => {
                    let mut bytes = Vec::with_capacity(markers.len());
                    for m in markers {
                        let idx = (m - MARKER_BASE) as usize;
                        let byte = *window
                            .get(idx)
                            .ok_or(Error::InvalidHuffmanTree("marker index outside window"))?;
                        bytes.push(byte);
                    }
                    resolved.push(Segment::Bytes(bytes));
                }
            }
        }
        // Merge adjacent Bytes segments produced by collapsing markers.
        let mut merged: Vec<Segment> = Vec::with_capacity(resolved.len());
        for seg in resolved {
            match (merged.last_mut(), seg) {
                (Some(Segment::Bytes(prev)), Segment::Bytes(next)) => prev.extend(next),
                (_, seg) => merged.push(seg),
            }
        }
        self.segments = merged;
        Ok(())
    }

    /// Concatenates all segments into a single byte vector. Errors if any
    /// marker remains unresolved.
    pub fn all_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.total_len());
        for seg in &self.segments {
            match seg {
                Segment::Bytes(v) => out.extend_from_slice(v),
                Segment::Markers(_) => {
                    return Err(Error::InvalidHuffmanTree("chunk still has unresolved markers"))
                }
            }
        }
        Ok(out)
    }

    /// The last `WINDOW_SIZE` resolved bytes of the stream ending at this
    /// chunk, stitching in the tail of `previous_window` when this chunk's
    /// own output is shorter than a full window (spec.md §3 "Window").
    pub fn trailing_window(&self, previous_window: &[u8]) -> Result<Vec<u8>> {
        let bytes = self.all_bytes()?;
        if bytes.len() >= WINDOW_SIZE {
            return Ok(bytes[bytes.len() - WINDOW_SIZE..].to_vec());
        }
        let need_from_prev = WINDOW_SIZE - bytes.len();
        let prev_tail = if previous_window.len() >= need_from_prev {
            &previous_window[previous_window.len() - need_from_prev..]
        } else {
            previous_window
        };
        let mut window = Vec::with_capacity(prev_tail.len() + bytes.len());
        window.extend_from_slice(prev_tail);
        window.extend_from_slice(&bytes);
        Ok(window)
    }
}
