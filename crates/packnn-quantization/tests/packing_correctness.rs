//! Byte-level checks of the packed weight wire format.
//!
//! Every expectation here is written out by hand from the layout rules:
//! little-endian containers, first item in the LSB, LSB-first bitmaps, and
//! run-length tables as u16 LE non-zero counts.

use packnn_quantization::*;

// ── Sample tensor ──────────────────────────────────────────────────────

const SAMPLE: [i8; 8] = [5, -3, 0, 2, 0, -1, 7, 0];

/// The sample tensor packs to one bitmap byte followed by three nibble pairs.
#[test]
fn sample_tensor_bytes() {
    let fmt = PackingFormat::new(4, 8, CompressionType::NoRunLengths);
    let packed = pack_weights(&SAMPLE, 1, &fmt).unwrap();

    assert_eq!(packed[0], 0b0110_1011, "bit i set iff value i is non-zero");
    // [5, -3] [2, -1] [7, pad]
    assert_eq!(&packed[1..], &[0xD5, 0xF2, 0x07]);
    assert_eq!(fmt.items_per_container(), 2);
}

/// Unpacking the sample restores the zeros at their original positions.
#[test]
fn sample_tensor_round_trip() {
    let fmt = PackingFormat::new(4, 8, CompressionType::NoRunLengths);
    let tensor = PackedTensor::pack(&SAMPLE, 1, &fmt).unwrap();
    assert_eq!(tensor.unpack().unwrap(), SAMPLE.to_vec());
    assert_eq!(tensor.packed_bytes(), 4);
    assert_eq!(tensor.compression_ratio(), 2.0);
}

// ── Container widths ───────────────────────────────────────────────────

/// Three 5-bit items per u16, with the top bit of each container unused.
#[test]
fn five_bit_items_in_u16_containers() {
    let weights = [1i8, -1, 15, -16];
    let fmt = PackingFormat::new(5, 16, CompressionType::Dense);
    let packed = pack_weights(&weights, 1, &fmt).unwrap();

    let first = 1u16 | (0b11111 << 5) | (0b01111 << 10);
    let second = 0b10000u16;
    let mut expected = first.to_le_bytes().to_vec();
    expected.extend_from_slice(&second.to_le_bytes());
    assert_eq!(packed, expected);
}

/// Five 6-bit items per u32, two residual bits per container.
#[test]
fn six_bit_items_in_u32_containers() {
    let weights = [-32i8, 31, 0, -1, 1, 2];
    let fmt = PackingFormat::new(6, 32, CompressionType::Dense);
    let packed = pack_weights(&weights, 1, &fmt).unwrap();
    assert_eq!(packed.len(), 8);

    let word = u32::from_le_bytes([packed[0], packed[1], packed[2], packed[3]]);
    assert_eq!(word & 0x3F, 0b100000);
    assert_eq!((word >> 6) & 0x3F, 0b011111);
    assert_eq!((word >> 18) & 0x3F, 0b111111);
    assert_eq!(word >> 30, 0, "residual bits stay zero");
    assert_eq!(&packed[4..], &[2, 0, 0, 0]);
}

/// Full-width 8-bit items are stored as raw two's-complement bytes.
#[test]
fn eight_bit_items_are_raw_bytes() {
    let weights = [-128i8, 127, -1, 0];
    let fmt = PackingFormat::new(8, 8, CompressionType::Dense);
    assert_eq!(pack_weights(&weights, 2, &fmt).unwrap(), vec![0x80, 0x7F, 0xFF, 0x00]);
}

// ── Run boundaries ─────────────────────────────────────────────────────

/// Decode run 1 twice: once by continuing after `end_run` on run 0, once
/// from a buffer that starts at run 1's first container.
fn continued_and_fresh<C: Container>(
    packed: &[u8],
    fmt: &PackingFormat,
    per_run: usize,
) -> (Vec<i8>, Vec<i8>) {
    let width = Dynamic(fmt.bits_per_item);
    let both = PackedLayout::new(2 * per_run, 2, fmt).unwrap();
    let single = PackedLayout::new(per_run, 1, fmt).unwrap();

    let mut cursor = PackedWeightUnpacker::<C, Dynamic, NeverSparse>::open(packed, &both, width);
    let mut run0 = vec![0i8; per_run];
    let mut continued = vec![0i8; per_run];
    cursor.unpack_weights(&mut run0);
    cursor.end_run();
    cursor.unpack_weights(&mut continued);

    let run1_bytes = &packed[fmt.stream_bytes(per_run)..];
    let mut fresh = vec![0i8; per_run];
    PackedWeightUnpacker::<C, Dynamic, NeverSparse>::open(run1_bytes, &single, width)
        .unpack_weights(&mut fresh);
    (continued, fresh)
}

#[test]
fn boundary_reset_matches_fresh_buffer() {
    let weights: Vec<i8> = vec![1, -2, 3, -4, 5, 7, -8, 6, -5, 4];
    for (bits, container) in [(4, 8), (5, 16), (6, 32), (3, 8), (7, 16)] {
        let fmt = PackingFormat::new(bits, container, CompressionType::FilterwiseDense);
        let (lo, hi) = fmt.value_range();
        let clipped: Vec<i8> =
            weights.iter().map(|&w| i32::from(w).clamp(lo, hi) as i8).collect();
        let packed = pack_weights(&clipped, 2, &fmt).unwrap();

        let (continued, fresh) = match container {
            8 => continued_and_fresh::<u8>(&packed, &fmt, 5),
            16 => continued_and_fresh::<u16>(&packed, &fmt, 5),
            _ => continued_and_fresh::<u32>(&packed, &fmt, 5),
        };
        assert_eq!(continued, fresh, "{bits}-bit in {container}-bit containers");
        assert_eq!(&continued[..], &clipped[5..]);
    }
}

/// Per-run bitmaps restart on a byte boundary at every run.
#[test]
fn word_run_lengths_bitmaps_are_per_run() {
    // 5 weights per run: each run's bitmap occupies one byte.
    let weights = [0i8, 1, 0, 0, 2, 3, 0, 0, 0, 0];
    let fmt = PackingFormat::new(4, 8, CompressionType::WordRunLengths);
    let packed = pack_weights(&weights, 2, &fmt).unwrap();
    assert_eq!(&packed[..4], &[2, 0, 1, 0]);
    assert_eq!(&packed[4..6], &[0b10010, 0b00001]);
    // run 0: [1, 2], run 1: [3, pad]
    assert_eq!(&packed[6..], &[0x21, 0x03]);

    let layout = PackedLayout::new(10, 2, &fmt).unwrap();
    assert_eq!(layout.run_length(&packed, 0), Some(2));
    assert_eq!(layout.run_length(&packed, 1), Some(1));
    let mut out = [0i8; 10];
    unpack_tensor(&packed, &layout, &mut out).unwrap();
    assert_eq!(out, weights);
}

/// Without realignment, one shared bitmap and one value stream span all runs.
#[test]
fn no_run_lengths_is_continuous_across_runs() {
    let weights = [1i8, 0, 2, 3, 0, 4];
    let fmt = PackingFormat::new(4, 8, CompressionType::NoRunLengths);
    let packed = pack_weights(&weights, 2, &fmt).unwrap();
    assert_eq!(packed, vec![0b101101, 0x21, 0x43]);
}

// ── One filter per kernel ──────────────────────────────────────────────

#[test]
fn one_filter_per_kernel_sparse() {
    let weights = [0i8, 0, 0, -7, 1, 0, 0, 0, 0];
    let ofpk = OneFilterPerKernel::new(9, 3, true).unwrap();
    let packed = ofpk.pack(&weights).unwrap();
    assert_eq!(&packed[..6], &[0, 0, 2, 0, 0, 0]);
    assert_eq!(&packed[6..9], &[0b000, 0b011, 0b000]);
    assert_eq!(&packed[9..], &[0xF9, 0x01]);

    let mut out = [0i8; 9];
    ofpk.unpack(&packed, &mut out).unwrap();
    assert_eq!(out, weights);
}
