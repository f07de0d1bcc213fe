#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use seekzip::bitreader::{BitOrder, BitReader};
use seekzip::chunk::DecodedChunk;
use seekzip::{bzip2, deflate};
use std::sync::Arc;

#[derive(Arbitrary, Debug)]
struct FuzzInput {
    data: Vec<u8>,
    start_bit: u32,
    as_bzip2: bool,
}

fuzz_target!(|input: FuzzInput| {
    if input.data.is_empty() || input.data.len() > 1_000_000 {
        return;
    }

    let arc: Arc<[u8]> = Arc::from(input.data.as_slice());
    let max_bits = (input.data.len() as u64) * 8;
    let start_bit = (input.start_bit as u64) % (max_bits + 1);

    let mut chunk = DecodedChunk::new(start_bit, 0);

    if input.as_bzip2 {
        let mut bits = BitReader::from_slice(arc, BitOrder::Msb);
        bits.seek(start_bit);
        // Should either decode, error cleanly, or report unresolved markers
        // (bzip2 never emits markers, but the API is shared); never panic.
        let _ = bzip2::decode_block(&mut bits, &mut chunk, 900_000 * 9, true);
    } else {
        let mut bits = BitReader::from_slice(arc, BitOrder::Lsb);
        bits.seek(start_bit);
        let _ = deflate::decode_block(&mut bits, &mut chunk, None);
    }
});
