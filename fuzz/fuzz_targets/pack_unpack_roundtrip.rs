#![no_main]

//! Fuzz target: packing then unpacking restores the weights.
//!
//! Invariants verified:
//!   1. Every software-decodable format round-trips exactly.
//!   2. The layout's required size equals the packed length.
//!   3. Values outside the item width are rejected, never truncated.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use packnn_common::PackingError;
use packnn_quantization::{
    pack_weights, unpack_tensor, CompressionType, PackedLayout, PackingFormat,
};

#[derive(Arbitrary, Debug)]
struct Input {
    bits_hint: u8,
    container_hint: u8,
    compression_hint: u8,
    filters_hint: u8,
    weights: Vec<i8>,
}

const COMPRESSIONS: [CompressionType; 4] = [
    CompressionType::Dense,
    CompressionType::FilterwiseDense,
    CompressionType::NoRunLengths,
    CompressionType::WordRunLengths,
];

fuzz_target!(|input: Input| {
    let bits = u32::from(input.bits_hint % 8) + 1;
    let container = [8, 16, 32][usize::from(input.container_hint % 3)];
    let compression = COMPRESSIONS[usize::from(input.compression_hint % 4)];
    let format = PackingFormat::new(bits, container, compression);

    let filters = usize::from(input.filters_hint % 8) + 1;
    let len = (input.weights.len().min(512) / filters) * filters;
    let weights = &input.weights[..len];

    let (lo, hi) = format.value_range();
    let in_range = weights.iter().all(|&w| (lo..=hi).contains(&i32::from(w)));

    match pack_weights(weights, filters, &format) {
        Ok(packed) => {
            assert!(in_range, "out-of-range weights packed without error");
            let layout = PackedLayout::new(len, filters, &format).unwrap();
            assert_eq!(layout.required_bytes(&packed).unwrap(), packed.len());
            let mut out = vec![0i8; len];
            unpack_tensor(&packed, &layout, &mut out).unwrap();
            assert_eq!(out, weights, "{format}");
        }
        Err(PackingError::ValueOutOfRange { .. }) => assert!(!in_range),
        Err(e) => panic!("unexpected packing error for {format}: {e}"),
    }
});
