#![no_main]

//! Fuzz target: decoding arbitrary bytes under any layout.
//!
//! Invariants verified:
//!   1. `check_buffer` either rejects the bytes or `unpack_tensor` decodes
//!      them without panicking.
//!   2. Decoded values always lie inside the item width's range.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use packnn_quantization::{unpack_tensor, CompressionType, PackedLayout, PackingFormat};

#[derive(Arbitrary, Debug)]
struct Input {
    bits_hint: u8,
    container_hint: u8,
    compression_hint: u8,
    filters_hint: u8,
    per_filter_hint: u8,
    packed: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let bits = u32::from(input.bits_hint % 8) + 1;
    let container = [8, 16, 32][usize::from(input.container_hint % 3)];
    let compression = [
        CompressionType::Dense,
        CompressionType::FilterwiseDense,
        CompressionType::NoRunLengths,
        CompressionType::WordRunLengths,
    ][usize::from(input.compression_hint % 4)];
    let format = PackingFormat::new(bits, container, compression);

    let filters = usize::from(input.filters_hint % 8) + 1;
    let num_weights = filters * usize::from(input.per_filter_hint % 64);
    let Ok(layout) = PackedLayout::new(num_weights, filters, &format) else {
        return;
    };
    if layout.check_buffer(&input.packed).is_err() {
        return;
    }

    let mut out = vec![0i8; num_weights];
    unpack_tensor(&input.packed, &layout, &mut out).unwrap();
    let (lo, hi) = format.value_range();
    assert!(out.iter().all(|&w| (lo..=hi).contains(&i32::from(w))));
});
