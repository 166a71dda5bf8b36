//! One-filter-per-kernel conv weight layout
//!
//! Some accelerator conv engines can only consume one filter per kernel
//! launch, so the tensor is stored as `num_filters` independent 8-bit
//! filters:
//!
//! ```text
//! N0 .. Nn   u16 LE non-zero counts (sparse only)
//! B0 .. Bn   per-filter sparsity bitmaps (sparse only)
//! W0 .. Wn   8-bit items in 8-bit containers
//! ```
//!
//! It is kept as its own format rather than folded into
//! [`CompressionType::WordRunLengths`](crate::CompressionType::WordRunLengths),
//! even though the bytes coincide for 8-bit items.

use packnn_common::PackingError;

use crate::container::Fixed;
use crate::cursor::PackedWeightUnpacker;
use crate::format::{CompressionType, PackingFormat};
use crate::layout::PackedLayout;
use crate::packer::pack_weights;
use crate::sparsity::SometimesSparse;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OneFilterPerKernel {
    layout: PackedLayout,
}

impl OneFilterPerKernel {
    pub fn new(num_weights: usize, num_filters: usize, sparse: bool) -> Result<Self, PackingError> {
        let compression =
            if sparse { CompressionType::WordRunLengths } else { CompressionType::FilterwiseDense };
        let format = PackingFormat::new(8, 8, compression);
        Ok(Self { layout: PackedLayout::new(num_weights, num_filters, &format)? })
    }

    pub fn is_sparse(&self) -> bool {
        self.layout.format.is_sparse()
    }

    pub fn num_filters(&self) -> usize {
        self.layout.num_filters
    }

    pub fn layout(&self) -> &PackedLayout {
        &self.layout
    }

    pub fn pack(&self, weights: &[i8]) -> Result<Vec<u8>, PackingError> {
        if weights.len() != self.layout.num_weights {
            return Err(PackingError::FilterCountMismatch {
                num_weights: weights.len(),
                num_filters: self.layout.num_filters,
            });
        }
        pack_weights(weights, self.layout.num_filters, &self.layout.format)
    }

    /// Decode every filter into `out`, restarting container and bitmap
    /// alignment at each filter.
    pub fn unpack(&self, packed: &[u8], out: &mut [i8]) -> Result<(), PackingError> {
        if out.len() != self.layout.num_weights {
            return Err(PackingError::BufferTooSmall {
                needed: self.layout.num_weights,
                available: out.len(),
            });
        }
        self.layout.check_buffer(packed)?;
        let per_filter = self.layout.weights_per_filter();
        if per_filter == 0 {
            return Ok(());
        }

        let bitmap = self
            .layout
            .bitmap_offset
            .map(|at| &packed[at..at + self.layout.bitmap_bytes]);
        let values = &packed[self.layout.values_offset..];
        let mut cursor = PackedWeightUnpacker::<u8, Fixed<8>, SometimesSparse>::from_parts(
            values, bitmap, Fixed, false,
        );
        for filter in out.chunks_exact_mut(per_filter) {
            cursor.unpack_weights(filter);
            cursor.skip_to_next_container();
            cursor.skip_to_next_bitmap();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_layout_bytes() {
        let weights = [3i8, 0, -2, 0, 0, 0, 0, 9, 0, 1];
        let ofpk = OneFilterPerKernel::new(10, 2, true).unwrap();
        let packed = ofpk.pack(&weights).unwrap();
        assert_eq!(packed, vec![2, 0, 2, 0, 0b00101, 0b10100, 3, 0xFE, 9, 1]);

        let mut out = [0i8; 10];
        ofpk.unpack(&packed, &mut out).unwrap();
        assert_eq!(out, weights);
    }

    #[test]
    fn dense_layout_is_raw_bytes() {
        let weights = [-1i8, 2, -3, 4];
        let ofpk = OneFilterPerKernel::new(4, 2, false).unwrap();
        let packed = ofpk.pack(&weights).unwrap();
        assert_eq!(packed, vec![0xFF, 2, 0xFD, 4]);
        let mut out = [0i8; 4];
        ofpk.unpack(&packed, &mut out).unwrap();
        assert_eq!(out, weights);
    }

    #[test]
    fn rejects_wrong_sizes() {
        let ofpk = OneFilterPerKernel::new(4, 2, true).unwrap();
        assert!(ofpk.pack(&[1, 2, 3]).is_err());
        assert!(OneFilterPerKernel::new(5, 2, true).is_err());
    }
}
