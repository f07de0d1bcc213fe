//! The compressed-stream contract (spec.md §3/§6): an ordered byte sequence
//! supplied by an external reader, with `read`, optional `pread`, `seek`, `size`,
//! and `clone` (for concurrent workers). Grounded on the teacher's use of
//! `memmap2::Mmap` wrapped in `Arc<dyn AsRef<[u8]> + Send + Sync>`
//! (`parallel_bzip2/src/decoder.rs`), generalized here into a trait so that both
//! in-memory/mmap sources and plain `File` handles can serve as the core's input.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};

/// A positional, clonable view over compressed bytes.
///
/// The core requires either `pread` or a reader that is cheaply `clone`-able,
/// since each worker thread seeks and reads independently (spec.md §5: "The
/// BitReader is never shared; each worker owns its own").
pub trait FileReader: Send + Sync {
    /// Reads `buf.len()` bytes starting at `offset`, short on EOF.
    fn pread(&self, buf: &mut [u8], offset: u64) -> Result<usize>;

    /// Total size in bytes, when known up front (e.g. not a live pipe).
    fn size(&self) -> Option<u64>;

    /// A cheap, independent handle sharing the same underlying bytes.
    fn clone_reader(&self) -> Arc<dyn FileReader>;
}

/// An in-memory (or memory-mapped) byte source. The common case: the teacher's
/// `Bz2Decoder::open` maps the whole file and wraps it in `Arc<dyn AsRef<[u8]>>`.
pub struct SliceReader<T> {
    data: Arc<T>,
}

impl<T> SliceReader<T>
where
    T: AsRef<[u8]> + Send + Sync + 'static,
{
    pub fn new(data: Arc<T>) -> Self {
        Self { data }
    }
}

impl<T> FileReader for SliceReader<T>
where
    T: AsRef<[u8]> + Send + Sync + 'static,
{
    fn pread(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let bytes = self.data.as_ref().as_ref();
        let offset = offset as usize;
        if offset >= bytes.len() {
            return Ok(0);
        }
        let n = buf.len().min(bytes.len() - offset);
        buf[..n].copy_from_slice(&bytes[offset..offset + n]);
        Ok(n)
    }

    fn size(&self) -> Option<u64> {
        Some(self.data.as_ref().as_ref().len() as u64)
    }

    fn clone_reader(&self) -> Arc<dyn FileReader> {
        Arc::new(SliceReader {
            data: self.data.clone(),
        })
    }
}

/// Opens a file with `memmap2`, exactly as the teacher's `Bz2Decoder::open` does.
pub fn open_mmap(path: impl AsRef<std::path::Path>) -> Result<Arc<dyn FileReader>> {
    let file = File::open(path)?;
    let mmap = unsafe { memmap2::MmapOptions::new().map(&file).map_err(std::io::Error::from)? };
    Ok(Arc::new(SliceReader::new(Arc::new(mmap))))
}

/// A plain (non-mmap, non-clonable) `File`-backed reader using positional reads.
/// `File` implements `pread` natively via `FileExt` on unix; we fall back to a
/// mutex-guarded `seek`+`read` pair so the contract holds on every platform.
pub struct FileHandleReader {
    file: Mutex<File>,
    size: Option<u64>,
}

impl FileHandleReader {
    pub fn new(file: File) -> Result<Self> {
        let size = file.metadata().ok().map(|m| m.len());
        Ok(Self {
            file: Mutex::new(file),
            size,
        })
    }
}

impl FileReader for FileHandleReader {
    fn pread(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            let file = self.file.lock().unwrap();
            let mut total = 0;
            loop {
                match file.read_at(&mut buf[total..], offset + total as u64) {
                    Ok(0) => return Ok(total),
                    Ok(n) => {
                        total += n;
                        if total == buf.len() {
                            return Ok(total);
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e.into()),
                }
            }
        }
        #[cfg(not(unix))]
        {
            let mut file = self.file.lock().unwrap();
            file.seek(SeekFrom::Start(offset))?;
            let mut total = 0;
            while total < buf.len() {
                match file.read(&mut buf[total..])? {
                    0 => break,
                    n => total += n,
                }
            }
            Ok(total)
        }
    }

    fn size(&self) -> Option<u64> {
        self.size
    }

    fn clone_reader(&self) -> Arc<dyn FileReader> {
        let file = self.file.lock().unwrap();
        let cloned = file.try_clone().expect("failed to duplicate file handle");
        Arc::new(FileHandleReader {
            file: Mutex::new(cloned),
            size: self.size,
        })
    }
}

/// Default chunk size for buffering a non-seekable source, per spec.md §6.
const SINGLE_PASS_CHUNK: usize = 4 * 1024 * 1024;

/// Adapts a sequential, non-seekable `Read` source into the `FileReader`
/// contract by retaining every byte ever read in fixed-size chunks (spec.md §3:
/// "a non-seekable reader is adapted by a single-pass wrapper that retains all
/// bytes ever read in chunked memory").
pub struct SinglePassReader<R> {
    inner: Mutex<SinglePassState<R>>,
}

struct SinglePassState<R> {
    source: R,
    chunks: Vec<Vec<u8>>,
    total_read: u64,
    eof: bool,
}

impl<R: Read + Send> SinglePassReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            inner: Mutex::new(SinglePassState {
                source,
                chunks: Vec::new(),
                total_read: 0,
                eof: false,
            }),
        }
    }

    /// Reads forward from `source` until at least `up_to` bytes have been
    /// buffered, or EOF. Returns the buffered length afterward.
    fn ensure_buffered(state: &mut SinglePassState<R>, up_to: u64) -> Result<u64> {
        while !state.eof && state.total_read < up_to {
            let mut chunk = vec![0u8; SINGLE_PASS_CHUNK];
            let mut filled = 0;
            while filled < chunk.len() {
                match state.source.read(&mut chunk[filled..])? {
                    0 => break,
                    n => filled += n,
                }
            }
            if filled == 0 {
                state.eof = true;
                break;
            }
            chunk.truncate(filled);
            state.total_read += filled as u64;
            state.chunks.push(chunk);
        }
        Ok(state.total_read)
    }
}

impl<R: Read + Send + Sync> FileReader for SinglePassReader<R> {
    fn pread(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let mut state = self.inner.lock().unwrap();
        let needed_end = offset + buf.len() as u64;
        let buffered = Self::ensure_buffered(&mut state, needed_end)?;

        if offset > buffered {
            return Err(Error::Io(
                "seek beyond buffered range of a single-pass reader".to_string(),
            ));
        }

        let mut pos = 0u64;
        let mut out_pos = 0usize;
        for chunk in &state.chunks {
            let chunk_start = pos;
            let chunk_end = pos + chunk.len() as u64;
            if chunk_end > offset && out_pos < buf.len() {
                let local_start = (offset.max(chunk_start) - chunk_start) as usize;
                let avail = chunk.len() - local_start;
                let want = (buf.len() - out_pos).min(avail);
                buf[out_pos..out_pos + want].copy_from_slice(&chunk[local_start..local_start + want]);
                out_pos += want;
            }
            pos = chunk_end;
            if out_pos >= buf.len() {
                break;
            }
        }
        Ok(out_pos)
    }

    fn size(&self) -> Option<u64> {
        let state = self.inner.lock().unwrap();
        if state.eof {
            Some(state.total_read)
        } else {
            None
        }
    }

    fn clone_reader(&self) -> Arc<dyn FileReader> {
        panic!("SinglePassReader cannot be cloned; wrap it once behind an Arc instead")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_reader_pread_reads_in_bounds() {
        let data = Arc::new(vec![1u8, 2, 3, 4, 5]);
        let reader = SliceReader::new(data);
        let mut buf = [0u8; 3];
        assert_eq!(reader.pread(&mut buf, 1).unwrap(), 3);
        assert_eq!(buf, [2, 3, 4]);
    }

    #[test]
    fn slice_reader_pread_short_read_at_eof() {
        let data = Arc::new(vec![1u8, 2, 3]);
        let reader = SliceReader::new(data);
        let mut buf = [0u8; 10];
        assert_eq!(reader.pread(&mut buf, 1).unwrap(), 2);
        assert_eq!(&buf[..2], &[2, 3]);
    }

    #[test]
    fn single_pass_reader_buffers_and_reads_back() {
        let data: Vec<u8> = (0..20u8).collect();
        let reader = SinglePassReader::new(&data[..]);
        let mut buf = [0u8; 5];
        assert_eq!(reader.pread(&mut buf, 0).unwrap(), 5);
        assert_eq!(buf, [0, 1, 2, 3, 4]);
        assert_eq!(reader.pread(&mut buf, 10).unwrap(), 5);
        assert_eq!(buf, [10, 11, 12, 13, 14]);
        // Re-reading an earlier, already-buffered range must still work.
        assert_eq!(reader.pread(&mut buf, 2).unwrap(), 5);
        assert_eq!(buf, [2, 3, 4, 5, 6]);
    }

    #[test]
    fn single_pass_reader_errors_past_eof() {
        let data: Vec<u8> = vec![1, 2, 3];
        let reader = SinglePassReader::new(&data[..]);
        let mut buf = [0u8; 1];
        assert!(reader.pread(&mut buf, 100).is_err());
    }
}
