//! Minimal end-to-end decode example: `simple_decode <input> [output]`.
//! Sniffs the gzip/bzip2 magic and streams decoded bytes to `output`, or
//! stdout when omitted.

use seekzip::{open_mmap, ParallelReader, ReaderConfig, StreamFormat};
use std::env;
use std::error::Error;
use std::fs::File;
use std::io::{Read, Write};

fn main() -> Result<(), Box<dyn Error>> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <input.gz|input.bz2> [output]", args[0]);
        return Ok(());
    }

    let input_path = &args[1];
    let file = open_mmap(input_path)?;

    let mut magic = [0u8; 3];
    File::open(input_path)?.read_exact(&mut magic).ok();
    let format = if magic[0] == 0x1f && magic[1] == 0x8b {
        StreamFormat::Gzip
    } else if &magic == b"BZh" {
        StreamFormat::Bzip2
    } else {
        return Err("input is neither a gzip nor a bzip2 stream".into());
    };

    let mut reader = ParallelReader::new(file, format, ReaderConfig::default())?;

    let mut out: Box<dyn Write> = if args.len() > 2 {
        Box::new(File::create(&args[2])?)
    } else {
        Box::new(std::io::stdout())
    };

    let mut buffer = [0u8; 8192];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        out.write_all(&buffer[..n])?;
    }

    Ok(())
}
