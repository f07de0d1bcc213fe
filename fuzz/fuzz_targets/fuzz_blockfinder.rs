#![no_main]

use libfuzzer_sys::fuzz_target;
use seekzip::blockfinder::{Bzip2BlockFinder, find_dynamic_huffman_candidates, find_stored_block_candidates};
use std::sync::Arc;

fuzz_target!(|data: &[u8]| {
    if data.is_empty() || data.len() > 1_000_000 {
        return;
    }

    let arc: Arc<[u8]> = Arc::from(data);
    let max_bits = (data.len() as u64) * 8;

    for candidate in find_dynamic_huffman_candidates(&arc, 0, max_bits) {
        assert!(candidate.bit_offset <= max_bits, "candidate past end of input");
    }
    for candidate in find_stored_block_candidates(&arc, 0, max_bits) {
        assert!(candidate.bit_offset <= max_bits, "candidate past end of input");
    }

    let finder = Bzip2BlockFinder::new();
    let mut last = 0u64;
    for (bit_pos, _marker) in finder.scan(data, 0) {
        assert!(bit_pos <= max_bits, "bzip2 marker past end of input");
        assert!(bit_pos >= last, "bzip2 markers out of order");
        last = bit_pos;
    }
});
