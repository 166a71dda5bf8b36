//! Whole-tensor unpacking
//!
//! Used by the unpack-to-scratch eval variants, by Prepare-time weight sums,
//! and as the decoder side of round-trip tests.

use packnn_common::PackingError;

use crate::container::{Container, Dynamic, Fixed, ItemWidth};
use crate::cursor::{PackedWeightUnpacker, WeightStream};
use crate::layout::PackedLayout;
use crate::sparsity::{AlwaysSparse, NeverSparse, SparsityMap};

/// Decode every weight of `packed` into `out`, honouring run boundaries.
pub fn unpack_tensor(
    packed: &[u8],
    layout: &PackedLayout,
    out: &mut [i8],
) -> Result<(), PackingError> {
    if out.len() != layout.num_weights {
        return Err(PackingError::BufferTooSmall {
            needed: layout.num_weights,
            available: out.len(),
        });
    }
    layout.check_buffer(packed)?;

    let bits = layout.format.bits_per_item;
    match (layout.format.container_bits, bits) {
        (8, 4) => unpack_sparsity::<u8, _>(packed, layout, Fixed::<4>, out),
        (16, 5) => unpack_sparsity::<u16, _>(packed, layout, Fixed::<5>, out),
        (32, 6) => unpack_sparsity::<u32, _>(packed, layout, Fixed::<6>, out),
        (8, 8) => unpack_sparsity::<u8, _>(packed, layout, Fixed::<8>, out),
        (8, _) => unpack_sparsity::<u8, _>(packed, layout, Dynamic(bits), out),
        (16, _) => unpack_sparsity::<u16, _>(packed, layout, Dynamic(bits), out),
        _ => unpack_sparsity::<u32, _>(packed, layout, Dynamic(bits), out),
    }
    Ok(())
}

fn unpack_sparsity<C: Container, W: ItemWidth>(
    packed: &[u8],
    layout: &PackedLayout,
    width: W,
    out: &mut [i8],
) {
    if layout.format.is_sparse() {
        unpack_runs::<C, W, AlwaysSparse>(packed, layout, width, out);
    } else {
        unpack_runs::<C, W, NeverSparse>(packed, layout, width, out);
    }
}

fn unpack_runs<'a, C: Container, W: ItemWidth, S: SparsityMap<'a>>(
    packed: &'a [u8],
    layout: &PackedLayout,
    width: W,
    out: &mut [i8],
) {
    let per_filter = layout.weights_per_filter();
    if per_filter == 0 {
        return;
    }
    let mut cursor = PackedWeightUnpacker::<C, W, S>::open(packed, layout, width);
    for run in out.chunks_exact_mut(per_filter) {
        cursor.unpack_weights(run);
        cursor.end_run();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{CompressionType, PackingFormat};

    #[test]
    fn unpacks_sample_tensor() {
        let fmt = PackingFormat::new(4, 8, CompressionType::NoRunLengths);
        let layout = PackedLayout::new(8, 1, &fmt).unwrap();
        let packed = [0b0110_1011u8, 0xD5, 0xF2, 0x07];
        let mut out = [0i8; 8];
        unpack_tensor(&packed, &layout, &mut out).unwrap();
        assert_eq!(out, [5, -3, 0, 2, 0, -1, 7, 0]);
    }

    #[test]
    fn generic_width_path() {
        // 3-bit items, two per byte: [1, -1] [-4, 3]
        let fmt = PackingFormat::new(3, 8, CompressionType::Dense);
        let layout = PackedLayout::new(4, 1, &fmt).unwrap();
        let packed = [0b111_001u8, 0b011_100];
        let mut out = [0i8; 4];
        unpack_tensor(&packed, &layout, &mut out).unwrap();
        assert_eq!(out, [1, -1, -4, 3]);
    }

    #[test]
    fn rejects_wrong_output_length() {
        let fmt = PackingFormat::new(8, 8, CompressionType::Dense);
        let layout = PackedLayout::new(4, 1, &fmt).unwrap();
        let mut out = [0i8; 3];
        assert!(unpack_tensor(&[1, 2, 3, 4], &layout, &mut out).is_err());
    }

    #[test]
    fn rejects_truncated_buffer() {
        let fmt = PackingFormat::new(8, 8, CompressionType::Dense);
        let layout = PackedLayout::new(4, 1, &fmt).unwrap();
        let mut out = [0i8; 4];
        let err = unpack_tensor(&[1, 2, 3], &layout, &mut out).unwrap_err();
        assert_eq!(err, PackingError::BufferTooSmall { needed: 4, available: 3 });
    }
}
