//! Reader tuning knobs (spec.md's ambient "Configuration" concern), grounded
//! on the teacher's `tune_threads`/`rayon::ThreadPoolBuilder` usage.

/// Tuning knobs for a `ParallelReader` (spec.md §4.F/I, §5).
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Target compressed size of a dispatched chunk, in bytes (spec.md §4.F:
    /// "a chunk's nominal uncompressed size is a configuration parameter").
    pub chunk_size_bytes: u64,
    /// Thread-pool size; `None` lets rayon default to the number of logical
    /// cores, mirroring the teacher's auto-tuning default.
    pub thread_count: Option<usize>,
    /// Total bytes of decoded chunk output the cache may retain before
    /// evicting entries behind the read cursor (spec.md §4.F eviction).
    pub memory_budget_bytes: u64,
    /// Whether to validate CRC32 (bzip2 per-block, gzip footer) while
    /// decoding (spec.md §7: disabling this demotes `CrcMismatch` to a
    /// non-aborting condition).
    pub check_crc: bool,
    /// Minimum spacing, in compressed bytes, between index checkpoints when
    /// exporting (spec.md §4.H: "spacings >= window size").
    pub checkpoint_spacing_bytes: u64,
    /// How many chunks beyond the one just requested to eagerly schedule
    /// (spec.md §4.F prefetch policy); `None` defaults to the thread count.
    pub prefetch_depth: Option<usize>,
}

/// DEFLATE/bzip2 history windows are always exactly 32 KiB.
pub const WINDOW_SIZE: u64 = 32 * 1024;

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            chunk_size_bytes: 4 * 1024 * 1024,
            thread_count: None,
            memory_budget_bytes: 512 * 1024 * 1024,
            check_crc: true,
            checkpoint_spacing_bytes: 4 * 1024 * 1024,
            prefetch_depth: None,
        }
    }
}

impl ReaderConfig {
    /// The thread-pool size this config resolves to, defaulting to the
    /// number of available logical cores (mirrors the teacher's tuner).
    pub fn resolved_thread_count(&self) -> usize {
        self.thread_count
            .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1))
    }

    /// The prefetch depth this config resolves to, defaulting to the
    /// resolved thread count (spec.md §4.F: "roughly the thread-pool size").
    pub fn resolved_prefetch_depth(&self) -> usize {
        self.prefetch_depth.unwrap_or_else(|| self.resolved_thread_count())
    }
}
