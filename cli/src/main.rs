//! seekzip - decompress, count, or analyze gzip/BGZF and bzip2 streams using
//! the `seekzip` parallel reader.
//!
//! # Architecture
//!
//! Thin collaborator over `seekzip::ParallelReader` (spec.md §6 "external
//! interfaces"): argument parsing, file-path/stdin-stdout resolution, and
//! progress reporting live here; all decoding lives in `core`.
//!
//! # Usage
//!
//! ```bash
//! # Decompress to stdout
//! seekzip archive.gz
//!
//! # Decompress to a file
//! seekzip archive.bz2 -o out.bin
//!
//! # Count decoded bytes/lines without writing output
//! seekzip archive.gz --count-bytes
//! seekzip archive.gz --count-lines
//!
//! # Export/import a seek index
//! seekzip archive.gz --export-index archive.gzidx
//! seekzip archive.gz --import-index archive.gzidx -o out.bin
//!
//! # Walk the stream printing per-chunk metadata
//! seekzip archive.gz --analyze
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::{self, IsTerminal, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use seekzip::{open_mmap, FileHandleReader, FileReader, Index, ParallelReader, ReaderConfig, StreamFormat};

mod writer;
use writer::OutputWriter;

/// Command-line arguments for seekzip.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input file (gzip/BGZF or bzip2). Reads from stdin if omitted or "-".
    input: Option<PathBuf>,

    /// Output file (defaults to stdout).
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print the total decoded byte count instead of writing decoded data.
    #[arg(long)]
    count_bytes: bool,

    /// Print the total decoded newline count instead of writing decoded data.
    #[arg(long)]
    count_lines: bool,

    /// Disable CRC32/ISIZE verification while decoding (spec.md §7: CRC
    /// mismatches become non-aborting when this is set).
    #[arg(long)]
    no_crc32: bool,

    /// Import a previously-exported seek index, skipping the block-finder scan.
    #[arg(long)]
    import_index: Option<PathBuf>,

    /// Export a seek index covering the whole decoded archive.
    #[arg(long)]
    export_index: Option<PathBuf>,

    /// Walk the stream printing per-chunk metadata instead of decoding to output.
    #[arg(long)]
    analyze: bool,

    /// Number of worker threads (default: number of logical cores).
    #[arg(short = 'j', long)]
    jobs: Option<usize>,

    /// Target chunk size in bytes.
    #[arg(long, default_value_t = 4 * 1024 * 1024)]
    chunk_size: u64,

    /// Print decode/cache diagnostics to stderr when finished.
    #[arg(short, long)]
    verbose: bool,

    /// Force the input format instead of sniffing it ("gzip" or "bzip2").
    #[arg(long)]
    format: Option<String>,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(io_err) = e.downcast_ref::<io::Error>() {
                if io_err.kind() == io::ErrorKind::BrokenPipe {
                    return ExitCode::from(141); // 128 + SIGPIPE(13)
                }
            }
            eprintln!("seekzip: {e:#}");
            if e.downcast_ref::<FormatError>().is_some() {
                ExitCode::from(1)
            } else {
                ExitCode::from(2)
            }
        }
    }
}

/// Marks errors that should exit 1 (input/format problems) rather than 2
/// (unexpected internal errors), per spec.md §6's exit code contract.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct FormatError(String);

fn run() -> Result<()> {
    let args = Args::parse();

    if let Some(jobs) = args.jobs {
        rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .build_global()
            .context("failed to build global thread pool")?;
    }

    let config = ReaderConfig {
        chunk_size_bytes: args.chunk_size,
        thread_count: args.jobs,
        check_crc: !args.no_crc32,
        ..ReaderConfig::default()
    };

    let (file, format) = open_input(&args)?;

    let mut reader = if let Some(index_path) = &args.import_index {
        let data = std::fs::read(index_path)
            .with_context(|| format!("failed to read index file {}", index_path.display()))?;
        let index = Index::import(&data).map_err(|e| FormatError(e.to_string()))?;
        ParallelReader::from_index(file, format, config, &index).map_err(|e| FormatError(e.to_string()))?
    } else {
        ParallelReader::new(file, format, config).map_err(|e| FormatError(e.to_string()))?
    };

    if args.analyze {
        analyze(&mut reader)?;
    } else if args.count_bytes || args.count_lines {
        count(&mut reader, args.count_bytes, args.count_lines)?;
    } else {
        decompress(&mut reader, args.output.as_deref())?;
    }

    if let Some(export_path) = &args.export_index {
        let index = reader.export_index().map_err(|e| FormatError(e.to_string()))?;
        std::fs::write(export_path, index.export_canonical())
            .with_context(|| format!("failed to write index file {}", export_path.display()))?;
    }

    if args.verbose {
        let stats = reader.stats();
        eprintln!(
            "decoded {} chunks ({} cache hits, {} cache misses)",
            stats.chunks_decoded, stats.cache_hits, stats.cache_misses
        );
    }

    Ok(())
}

fn open_input(args: &Args) -> Result<(std::sync::Arc<dyn seekzip::FileReader>, StreamFormat)> {
    let is_stdin = matches!(&args.input, None) || matches!(&args.input, Some(p) if p.as_os_str() == "-");

    if is_stdin {
        let reader = seekzip::SinglePassReader::new(io::stdin());
        let file: std::sync::Arc<dyn seekzip::FileReader> = std::sync::Arc::new(reader);
        let mut magic = [0u8; 4];
        let n = file.pread(&mut magic, 0).map_err(|e| FormatError(e.to_string()))?;
        let format = detect_format(args, &magic[..n])?;
        return Ok((file, format));
    }

    let path = args.input.as_ref().expect("checked above");
    let mut probe = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut magic = [0u8; 4];
    let n = probe.read(&mut magic).unwrap_or(0);
    let format = detect_format(args, &magic[..n])?;

    let file = open_mmap(path).or_else(|_| {
        let f = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        FileHandleReader::new(f)
            .map(|r| std::sync::Arc::new(r) as std::sync::Arc<dyn seekzip::FileReader>)
            .map_err(anyhow::Error::from)
    })?;
    Ok((file, format))
}

fn detect_format(args: &Args, magic: &[u8]) -> Result<StreamFormat> {
    if let Some(forced) = &args.format {
        return match forced.as_str() {
            "gzip" => Ok(StreamFormat::Gzip),
            "bzip2" => Ok(StreamFormat::Bzip2),
            other => bail!(FormatError(format!("unknown --format value {other:?}"))),
        };
    }
    if magic.len() >= 2 && magic[0] == 0x1f && magic[1] == 0x8b {
        Ok(StreamFormat::Gzip)
    } else if magic.len() >= 3 && &magic[0..3] == b"BZh" {
        Ok(StreamFormat::Bzip2)
    } else {
        Err(FormatError("input is neither a gzip nor a bzip2 stream".into()).into())
    }
}

fn decompress(reader: &mut ParallelReader, output: Option<&std::path::Path>) -> Result<()> {
    let raw_out: Box<dyn Write> = match output {
        Some(path) => Box::new(File::create(path).with_context(|| format!("failed to create {}", path.display()))?),
        None => Box::new(io::stdout().lock()),
    };
    let mut out = OutputWriter::new(raw_out)?;

    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = reader.read(&mut buf).map_err(|e| FormatError(e.to_string()))?;
        if n == 0 {
            break;
        }
        if let Err(e) = out.write_all(&buf[..n]) {
            if e.kind() == io::ErrorKind::BrokenPipe {
                return Err(e.into());
            }
            return Err(e).context("failed to write decoded output");
        }
    }
    out.finish()?;
    Ok(())
}

fn count(reader: &mut ParallelReader, count_bytes: bool, count_lines: bool) -> Result<()> {
    let mut total_bytes: u64 = 0;
    let mut total_lines: u64 = 0;
    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = reader.read(&mut buf).map_err(|e| FormatError(e.to_string()))?;
        if n == 0 {
            break;
        }
        total_bytes += n as u64;
        total_lines += bytecount_newlines(&buf[..n]);
    }
    if count_bytes {
        println!("{total_bytes}");
    }
    if count_lines {
        println!("{total_lines}");
    }
    Ok(())
}

fn bytecount_newlines(buf: &[u8]) -> u64 {
    buf.iter().filter(|&&b| b == b'\n').count() as u64
}

/// Walks the archive chunk by chunk, printing each chunk's compressed and
/// decoded extents (spec.md's analyze mode, grounded on
/// `original_source/src/tools/rapidgzip.cpp`'s analyze output).
fn analyze(reader: &mut ParallelReader) -> Result<()> {
    let progress = if io::stderr().is_terminal() {
        Some(ProgressBar::new_spinner().with_style(
            ProgressStyle::with_template("{spinner} {msg}").unwrap_or_else(|_| ProgressStyle::default_spinner()),
        ))
    } else {
        None
    };

    let mut buf = vec![0u8; 1024 * 1024];
    let mut total: u64 = 0;
    loop {
        let n = reader.read(&mut buf).map_err(|e| FormatError(e.to_string()))?;
        if n == 0 {
            break;
        }
        total += n as u64;
        if let Some(pb) = &progress {
            pb.set_message(format!("{total} bytes decoded"));
            pb.tick();
        }
    }
    if let Some(pb) = &progress {
        pb.finish_and_clear();
    }

    let index = reader.export_index().map_err(|e| FormatError(e.to_string()))?;
    println!(
        "archive: {} compressed bytes, {} decoded bytes, {} chunks, {:.1}% scanned",
        index.compressed_size_bytes,
        index.uncompressed_size_bytes,
        index.checkpoints.len(),
        reader.coverage_fraction() * 100.0
    );
    for (i, checkpoint) in index.checkpoints.iter().enumerate() {
        println!(
            "  chunk {i}: compressed_offset_bits={} uncompressed_offset_bytes={} has_window={}",
            checkpoint.compressed_offset_bits,
            checkpoint.uncompressed_offset_bytes,
            checkpoint.window.is_some()
        );
    }
    Ok(())
}
