//! Combined streaming cursor over a packed weight tensor
//!
//! For every logical weight position the sparsity map is asked first. A
//! structural zero yields 0 without touching the bit stream; otherwise the
//! next item is decoded. Both cursors therefore advance with the logical
//! position, never with each other.

use crate::container::{Container, ItemWidth};
use crate::layout::PackedLayout;
use crate::sparsity::SparsityMap;
use crate::unpacker::WeightUnpacker;

/// Sequential source of weights consumed by the kernel templates.
pub trait WeightStream {
    /// Next weight in storage order.
    fn next_weight(&mut self) -> i32;

    /// Mark the end of a packing run.
    fn end_run(&mut self);
}

/// Streaming decode state for one Eval: bit-stream unpacker plus sparsity map.
#[derive(Debug, Clone)]
pub struct PackedWeightUnpacker<'a, C: Container, W: ItemWidth, S> {
    unpacker: WeightUnpacker<'a, C, W>,
    sparsity: S,
    filterwise: bool,
}

impl<'a, C: Container, W: ItemWidth, S: SparsityMap<'a>> PackedWeightUnpacker<'a, C, W, S> {
    /// Open a cursor at the start of `packed`, laid out as `layout`.
    ///
    /// `packed` must already have passed [`PackedLayout::check_buffer`].
    pub fn open(packed: &'a [u8], layout: &PackedLayout, width: W) -> Self {
        debug_assert_eq!(width.bits(), layout.format.bits_per_item);
        debug_assert_eq!(C::BITS, layout.format.container_bits);
        let bitmap = layout
            .bitmap_offset
            .map(|at| &packed[at..at + layout.bitmap_bytes]);
        Self {
            unpacker: WeightUnpacker::new(&packed[layout.values_offset..], width),
            sparsity: S::open(bitmap),
            filterwise: layout.format.is_filterwise(),
        }
    }

    /// Cursor over a headerless value stream with an optional bitmap, as used
    /// by the one-filter-per-kernel layout.
    pub fn from_parts(
        values: &'a [u8],
        bitmap: Option<&'a [u8]>,
        width: W,
        filterwise: bool,
    ) -> Self {
        Self { unpacker: WeightUnpacker::new(values, width), sparsity: S::open(bitmap), filterwise }
    }

    /// Consume one position of the sparsity map; true for a structural zero.
    #[inline(always)]
    pub fn skipped_zero(&mut self) -> bool {
        S::SPARSE && self.sparsity.next_is_zero()
    }

    /// Decode the next stored item without consulting the sparsity map.
    #[inline(always)]
    pub fn unpack(&mut self) -> i32 {
        self.unpacker.unpack()
    }

    /// Fill `out` with the next `out.len()` logical weights.
    pub fn unpack_weights(&mut self, out: &mut [i8]) {
        for slot in out.iter_mut() {
            *slot = self.next_weight() as i8;
        }
    }

    pub fn skip_to_next_container(&mut self) {
        self.unpacker.skip_to_next_container();
    }

    pub fn skip_to_next_bitmap(&mut self) {
        self.sparsity.skip_to_next_bitmap();
    }

    /// Bytes of the value region consumed so far.
    pub fn value_bytes_consumed(&self) -> usize {
        self.unpacker.bytes_consumed()
    }
}

impl<'a, C: Container, W: ItemWidth, S: SparsityMap<'a>> WeightStream
    for PackedWeightUnpacker<'a, C, W, S>
{
    #[inline(always)]
    fn next_weight(&mut self) -> i32 {
        if self.skipped_zero() {
            0
        } else {
            self.unpack()
        }
    }

    #[inline]
    fn end_run(&mut self) {
        if self.filterwise {
            self.unpacker.skip_to_next_container();
            self.sparsity.skip_to_next_bitmap();
        }
    }
}

/// Plain int8 weights, for unpacked tensors and scratch-unpacked copies.
#[derive(Debug, Clone)]
pub struct DenseWeights<'a> {
    weights: &'a [i8],
    next: usize,
}

impl<'a> DenseWeights<'a> {
    pub fn new(weights: &'a [i8]) -> Self {
        Self { weights, next: 0 }
    }
}

impl WeightStream for DenseWeights<'_> {
    #[inline(always)]
    fn next_weight(&mut self) -> i32 {
        let w = self.weights[self.next];
        self.next += 1;
        i32::from(w)
    }

    #[inline(always)]
    fn end_run(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Fixed;
    use crate::format::{CompressionType, PackingFormat};
    use crate::sparsity::{AlwaysSparse, NeverSparse};

    #[test]
    fn sparse_cursor_reinserts_zeros() {
        let fmt = PackingFormat::new(4, 8, CompressionType::NoRunLengths);
        let layout = PackedLayout::new(8, 1, &fmt).unwrap();
        let packed = [0b0110_1011u8, 0xD5, 0xF2, 0x07];
        let mut cursor =
            PackedWeightUnpacker::<u8, Fixed<4>, AlwaysSparse>::open(&packed, &layout, Fixed);
        let mut out = [0i8; 8];
        cursor.unpack_weights(&mut out);
        assert_eq!(out, [5, -3, 0, 2, 0, -1, 7, 0]);
        assert_eq!(cursor.value_bytes_consumed(), 3);
    }

    #[test]
    fn end_run_realigns_filterwise_only() {
        // Two runs of 3 nibbles: [1, 2, 3] and [4, 5, 6].
        let filterwise = [0x21, 0x03, 0x54, 0x06];
        let fmt = PackingFormat::new(4, 8, CompressionType::FilterwiseDense);
        let layout = PackedLayout::new(6, 2, &fmt).unwrap();
        let mut cursor =
            PackedWeightUnpacker::<u8, Fixed<4>, NeverSparse>::open(&filterwise, &layout, Fixed);
        let mut got = Vec::new();
        for _ in 0..2 {
            for _ in 0..3 {
                got.push(cursor.next_weight());
            }
            cursor.end_run();
        }
        assert_eq!(got, vec![1, 2, 3, 4, 5, 6]);

        let continuous = [0x21, 0x43, 0x65];
        let fmt = PackingFormat::new(4, 8, CompressionType::Dense);
        let layout = PackedLayout::new(6, 2, &fmt).unwrap();
        let mut cursor =
            PackedWeightUnpacker::<u8, Fixed<4>, NeverSparse>::open(&continuous, &layout, Fixed);
        let mut got = Vec::new();
        for _ in 0..2 {
            for _ in 0..3 {
                got.push(cursor.next_weight());
            }
            cursor.end_run();
        }
        assert_eq!(got, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn dense_weights_stream() {
        let w = [-1i8, 2, -3];
        let mut s = DenseWeights::new(&w);
        s.end_run();
        assert_eq!((s.next_weight(), s.next_weight(), s.next_weight()), (-1, 2, -3));
    }
}
