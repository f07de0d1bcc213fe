//! Top-level parallel reader (spec.md §4.I): a single-threaded-caller
//! `read`/`seek`/`tell`/`size` surface over the fetcher, window map, and
//! index, grounded on the teacher's `impl Read for Bz2Decoder`
//! (`decoder.rs`), generalized with random-access seeking and index
//! import/export.
//!
//! Chunk decoding itself runs on the rayon pool inside `Fetcher`, but the
//! bookkeeping that turns "uncompressed byte offset" into "which chunk, and
//! where in it" is the reader's job: nothing upstream tracks a chunk's
//! decoded size before it has actually been decoded, so the reader walks
//! chunks forward exactly once each, caching the running totals as it goes
//! (spec.md §4.I steps 1-2). This is also where a chunk produced in marker
//! mode gets its markers substituted and its trailing window published
//! onward, and where a gzip member footer whose CRC check was deferred
//! because of unresolved markers finally gets validated (spec.md §4.G).

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use crate::chunk::DecodedChunk;
use crate::config::ReaderConfig;
use crate::error::{Error, Result};
use crate::fetcher::{Fetcher, StreamFormat};
use crate::filereader::FileReader;
use crate::format::gzip;
use crate::index::{Checkpoint, Index};

pub struct ParallelReader {
    fetcher: Fetcher,
    config: ReaderConfig,
    check_crc: bool,
    /// `uncompressed_offsets[i]` is the decoded byte offset at which
    /// `fetcher.chunk_starts()[i]` begins. Has exactly one more entry than
    /// chunks resolved so far; the last entry is the open frontier (the
    /// decoded size of everything resolved up to, but not including, the
    /// next unresolved chunk).
    uncompressed_offsets: Vec<u64>,
    /// Known once the last chunk has been resolved and decoding reached the
    /// true end of the archive.
    total_size: Option<u64>,
    cursor: u64,
}

impl ParallelReader {
    pub fn new(file: Arc<dyn FileReader>, format: StreamFormat, config: ReaderConfig) -> Result<Self> {
        let check_crc = config.check_crc;
        let fetcher = Fetcher::new(file, format, config.clone())?;
        Ok(Self {
            fetcher,
            config,
            check_crc,
            uncompressed_offsets: vec![0],
            total_size: None,
            cursor: 0,
        })
    }

    /// Rebuilds a reader against a previously exported index, reproducing
    /// identical chunk boundaries and seeding the window map with every
    /// checkpoint's window so no chunk need ever decode in marker mode
    /// (spec.md §8 "index transparency").
    pub fn from_index(
        file: Arc<dyn FileReader>,
        format: StreamFormat,
        config: ReaderConfig,
        index: &Index,
    ) -> Result<Self> {
        index.validate(file.size())?;
        let check_crc = config.check_crc;
        let chunk_starts: Vec<u64> = index.checkpoints.iter().map(|c| c.compressed_offset_bits).collect();
        let fetcher = Fetcher::with_chunk_starts(file, format, config.clone(), chunk_starts);

        let mut uncompressed_offsets: Vec<u64> =
            index.checkpoints.iter().map(|c| c.uncompressed_offset_bytes).collect();
        let total_size = if index.uncompressed_size_bytes > 0 {
            Some(index.uncompressed_size_bytes)
        } else {
            None
        };
        uncompressed_offsets.push(total_size.unwrap_or(*uncompressed_offsets.last().unwrap_or(&0)));

        for checkpoint in &index.checkpoints {
            let window = checkpoint.window.as_ref().map(|w| Arc::<[u8]>::from(w.clone()));
            fetcher.window_map().insert(checkpoint.compressed_offset_bits, window)?;
        }

        Ok(Self {
            fetcher,
            config,
            check_crc,
            uncompressed_offsets,
            total_size,
            cursor: 0,
        })
    }

    pub fn set_check_crc(&mut self, enabled: bool) {
        self.check_crc = enabled;
    }

    pub fn check_crc(&self) -> bool {
        self.check_crc
    }

    pub fn tell(&self) -> u64 {
        self.cursor
    }

    /// Decode/cache diagnostics, for the CLI's `--verbose` mode (spec.md's
    /// ambient "Logging/diagnostics" concern).
    pub fn stats(&self) -> crate::fetcher::StatsSnapshot {
        self.fetcher.stats()
    }

    /// Fraction of the compressed archive visited by the block finder and
    /// decoder so far, for `--analyze` output (SPEC_FULL.md's coverage
    /// bitmap supplement).
    pub fn coverage_fraction(&self) -> f64 {
        self.fetcher.coverage_fraction()
    }

    /// Total decoded size, known once the archive has been walked to its
    /// end at least once (by a prior full read, or an imported index that
    /// recorded it).
    pub fn size(&self) -> Option<u64> {
        self.total_size
    }

    /// Reads up to `buf.len()` bytes starting at the current cursor,
    /// returning the number actually read (0 at end of stream; spec.md
    /// §4.I step 3).
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut filled = 0;
        while filled < buf.len() {
            let (chunk_idx, in_chunk_offset, chunk) = match self.locate(self.cursor)? {
                Some(found) => found,
                None => break,
            };
            let bytes = chunk
                .all_bytes()
                .expect("locate() only returns chunks with markers already resolved");
            let available = &bytes[in_chunk_offset as usize..];
            let take = available.len().min(buf.len() - filled);
            buf[filled..filled + take].copy_from_slice(&available[..take]);
            filled += take;
            self.cursor += take as u64;

            if take == available.len() {
                if let Some(&boundary) = self.fetcher.chunk_starts().get(chunk_idx + 1) {
                    self.fetcher.evict_before(boundary);
                }
            }
        }
        Ok(filled)
    }

    /// Repositions the cursor in uncompressed coordinates. Seeking forward
    /// past what has been decoded so far is allowed (`read` will decode
    /// forward to catch up); `SeekFrom::End` requires the total size to
    /// already be known.
    pub fn seek(&mut self, offset: i64, whence: SeekFrom) -> Result<u64> {
        let base: i64 = match whence {
            SeekFrom::Start(_) => 0,
            SeekFrom::Current(_) => self.cursor as i64,
            SeekFrom::End(_) => self
                .total_size
                .ok_or_else(|| Error::Io("seeking from the end requires a known stream size".into()))?
                as i64,
        };
        let new_cursor = base
            .checked_add(offset)
            .ok_or_else(|| Error::Io("seek overflowed".into()))?;
        if new_cursor < 0 {
            return Err(Error::Io("seek before the start of the stream".into()));
        }
        self.cursor = new_cursor as u64;
        Ok(self.cursor)
    }

    /// Exports an index covering everything decoded so far, forcing the
    /// archive to be walked to its end first if it hasn't been already
    /// (spec.md §4.H export).
    pub fn export_index(&mut self) -> Result<Index> {
        while self.total_size.is_none() {
            if !self.extend_frontier()? {
                break;
            }
        }
        let starts = self.fetcher.chunk_starts().to_vec();
        let window_map = self.fetcher.window_map();
        let mut checkpoints = Vec::with_capacity(starts.len());
        for (i, &start) in starts.iter().enumerate() {
            let window = window_map.get(start).flatten().map(|w| w.to_vec());
            checkpoints.push(Checkpoint {
                compressed_offset_bits: start,
                uncompressed_offset_bytes: self.uncompressed_offsets[i],
                window,
            });
        }
        Ok(Index {
            compressed_size_bytes: self.fetcher.archive_size_bits().map(|b| b / 8).unwrap_or(0),
            uncompressed_size_bytes: self.total_size.unwrap_or(0),
            checkpoint_spacing_bytes: self.config.checkpoint_spacing_bytes as u32,
            checkpoints,
        })
    }

    /// Finds the chunk containing uncompressed offset `target`, decoding
    /// forward as needed; returns `(chunk_index, in_chunk_offset, chunk)`
    /// with markers already resolved, or `None` at end of stream.
    fn locate(&mut self, target: u64) -> Result<Option<(usize, u64, Arc<DecodedChunk>)>> {
        loop {
            if let Some(total) = self.total_size {
                if target >= total {
                    return Ok(None);
                }
            }
            if let Some(idx) = find_containing(&self.uncompressed_offsets, target) {
                let chunk_start_bit = self.fetcher.chunk_starts()[idx];
                let raw = self.fetcher.get(chunk_start_bit)?;
                let chunk = self.resolve(idx, raw)?;
                let in_chunk = target - self.uncompressed_offsets[idx];
                return Ok(Some((idx, in_chunk, chunk)));
            }
            if !self.extend_frontier()? {
                return Ok(None);
            }
        }
    }

    /// Decodes (if needed) the next not-yet-resolved chunk and records its
    /// decoded length, extending how far `uncompressed_offsets` reaches.
    /// Returns `false` once the archive's end has been recorded.
    fn extend_frontier(&mut self) -> Result<bool> {
        if self.total_size.is_some() {
            return Ok(false);
        }
        let idx = self.uncompressed_offsets.len() - 1;
        let starts_len = self.fetcher.chunk_starts().len();
        if idx >= starts_len {
            self.total_size = Some(*self.uncompressed_offsets.last().expect("always has one entry"));
            return Ok(false);
        }
        let chunk_start_bit = self.fetcher.chunk_starts()[idx];
        let is_last_known_start = idx + 1 == starts_len;

        let raw = self.fetcher.get(chunk_start_bit)?;
        let chunk = self.resolve(idx, raw)?;
        let decoded_len = chunk.all_bytes()?.len() as u64;
        let new_offset = self.uncompressed_offsets[idx] + decoded_len;
        self.uncompressed_offsets.push(new_offset);

        let reached_true_eof = self
            .fetcher
            .archive_size_bits()
            .map(|total_bits| chunk.encoded_offset_bits + chunk.encoded_size_bits >= total_bits)
            .unwrap_or(false);
        if is_last_known_start && reached_true_eof {
            self.total_size = Some(new_offset);
        }
        Ok(true)
    }

    /// Substitutes real bytes for any markers still in `chunk` (using the
    /// window already published at its own start offset, which is
    /// guaranteed available since the reader only ever resolves chunks in
    /// ascending order), validates any gzip footer whose CRC check was
    /// deferred, and republishes this chunk's own trailing window for the
    /// next chunk's key — the step `decode_one_chunk` skips when markers are
    /// still present (spec.md §4.G, §4.I step 4).
    ///
    /// The resolved chunk is written back into the fetcher's cache (spec.md
    /// §4.G: "resolved chunks downgrade from 16-bit marker storage to 8-bit
    /// byte storage in-place where possible"), so a later `seek` back to
    /// this chunk's range never re-resolves markers or re-validates its CRC.
    fn resolve(&self, idx: usize, chunk: Arc<DecodedChunk>) -> Result<Arc<DecodedChunk>> {
        if !chunk.has_markers() && chunk.pending_gzip_footers.is_empty() {
            return Ok(chunk);
        }

        let mut resolved = (*chunk).clone();
        let start_bit = self.fetcher.chunk_starts()[idx];

        if resolved.has_markers() {
            let window = self
                .fetcher
                .window_map()
                .get(start_bit)
                .flatten()
                .ok_or_else(|| Error::Io("chunk's preceding window is not yet known".into()))?;
            resolved.resolve_with_window(&window)?;
        }

        let pending = resolved.take_pending_gzip_footers();
        if self.check_crc {
            for footer in pending {
                let bytes = resolved.all_bytes()?;
                let parsed = gzip::MemberFooter {
                    crc32: footer.crc32,
                    isize_mod_2_32: footer.isize_mod_2_32,
                };
                gzip::validate_footer(&parsed, &bytes[footer.member_start..footer.member_end])?;
            }
        }

        if let Some(&next_key) = self.fetcher.chunk_starts().get(idx + 1) {
            let prev_window = self
                .fetcher
                .window_map()
                .get(start_bit)
                .flatten()
                .map(|w| w.to_vec())
                .unwrap_or_default();
            let next_window = if resolved.ends_stream {
                None
            } else {
                Some(Arc::<[u8]>::from(resolved.trailing_window(&prev_window)?))
            };
            self.fetcher.window_map().insert(next_key, next_window)?;
        }

        let resolved = Arc::new(resolved);
        self.fetcher.replace(start_bit, resolved.clone());
        Ok(resolved)
    }
}

/// Finds `i` such that `offsets[i] <= target < offsets[i + 1]`, or `None`
/// if `target` lies at or past the open frontier (`offsets`'s last entry).
fn find_containing(offsets: &[u64], target: u64) -> Option<usize> {
    for i in 0..offsets.len().saturating_sub(1) {
        if offsets[i] <= target && target < offsets[i + 1] {
            return Some(i);
        }
    }
    None
}

impl Read for ParallelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        ParallelReader::read(self, buf).map_err(io_err)
    }
}

impl Seek for ParallelReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let (offset, whence) = match pos {
            SeekFrom::Start(n) => (n as i64, SeekFrom::Start(0)),
            other @ SeekFrom::Current(n) => (n, other),
            other @ SeekFrom::End(n) => (n, other),
        };
        ParallelReader::seek(self, offset, whence).map_err(io_err)
    }
}

fn io_err(e: Error) -> io::Error {
    match e {
        Error::Io(msg) => io::Error::new(io::ErrorKind::Other, msg),
        Error::UnexpectedEof => io::Error::new(io::ErrorKind::UnexpectedEof, e.to_string()),
        other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_containing_locates_the_right_chunk() {
        let offsets = vec![0, 100, 250, 400];
        assert_eq!(find_containing(&offsets, 0), Some(0));
        assert_eq!(find_containing(&offsets, 99), Some(0));
        assert_eq!(find_containing(&offsets, 100), Some(1));
        assert_eq!(find_containing(&offsets, 399), Some(2));
        assert_eq!(find_containing(&offsets, 400), None);
    }

    #[test]
    fn find_containing_on_single_entry_is_always_the_open_frontier() {
        assert_eq!(find_containing(&[0], 0), None);
    }
}
