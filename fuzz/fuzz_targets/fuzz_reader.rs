#![no_main]

use libfuzzer_sys::fuzz_target;
use seekzip::{ParallelReader, ReaderConfig, SliceReader, StreamFormat};
use std::sync::Arc;

fuzz_target!(|data: &[u8]| {
    if data.is_empty() || data.len() > 2_000_000 {
        return;
    }

    let format = if data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b {
        StreamFormat::Gzip
    } else if data.len() >= 3 && &data[0..3] == b"BZh" {
        StreamFormat::Bzip2
    } else {
        return;
    };

    let file = Arc::new(SliceReader::new(Arc::new(data.to_vec())));
    let config = ReaderConfig {
        chunk_size_bytes: 4096,
        ..ReaderConfig::default()
    };

    let Ok(mut reader) = ParallelReader::new(file, format, config) else {
        return;
    };

    let mut buf = [0u8; 4096];
    const MAX_OUTPUT: usize = 50_000_000;
    let mut total = 0usize;
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                total += n;
                if total > MAX_OUTPUT {
                    break;
                }
            }
            Err(_) => break, // expected for malformed input
        }
    }
});
