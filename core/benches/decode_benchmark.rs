use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use seekzip::{ParallelReader, ReaderConfig, SliceReader, StreamFormat};
use std::io::Read;
use std::sync::Arc;

/// Builds one gzip member (header + stored-block DEFLATE payload + footer)
/// encoding `data` verbatim, so the benchmark needs no external encoder.
fn build_stored_gzip_member(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&[0x1f, 0x8b, 0x08, 0x00, 0, 0, 0, 0, 0x00, 0xff]);
    const MAX_STORED: usize = 65_535;
    let mut offset = 0;
    loop {
        let chunk_len = (data.len() - offset).min(MAX_STORED);
        let is_final = offset + chunk_len == data.len();
        out.push(if is_final { 0x01 } else { 0x00 });
        out.extend_from_slice(&(chunk_len as u16).to_le_bytes());
        out.extend_from_slice(&(!(chunk_len as u16)).to_le_bytes());
        out.extend_from_slice(&data[offset..offset + chunk_len]);
        offset += chunk_len;
        if is_final {
            break;
        }
    }
    out.extend_from_slice(&crc32fast::hash(data).to_le_bytes());
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out
}

fn bench_decode(c: &mut Criterion) {
    let data: Vec<u8> = (0..10_000_000u32).map(|v| (v % 251) as u8).collect();
    let member = build_stored_gzip_member(&data);

    let mut group = c.benchmark_group("gzip_decode");
    group.throughput(Throughput::Bytes(member.len() as u64));

    group.bench_function("seekzip_single_threaded", |b| {
        b.iter(|| {
            let file = Arc::new(SliceReader::new(Arc::new(member.clone())));
            let config = ReaderConfig {
                thread_count: Some(1),
                ..ReaderConfig::default()
            };
            let mut reader = ParallelReader::new(file, StreamFormat::Gzip, config).unwrap();
            let mut buffer = [0u8; 8192];
            while reader.read(&mut buffer).unwrap() > 0 {}
        })
    });

    group.bench_function("seekzip_default_threads", |b| {
        b.iter(|| {
            let file = Arc::new(SliceReader::new(Arc::new(member.clone())));
            let mut reader = ParallelReader::new(file, StreamFormat::Gzip, ReaderConfig::default()).unwrap();
            let mut buffer = [0u8; 8192];
            while reader.read(&mut buffer).unwrap() > 0 {}
        })
    });

    group.finish();
}

criterion_group!(benches, bench_decode);
criterion_main!(benches);
