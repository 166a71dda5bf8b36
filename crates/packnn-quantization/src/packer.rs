//! Host-side packer
//!
//! Produces the byte layout described in [`crate::layout`] from a plain int8
//! weight tensor. This is the encoder the streaming decoder inverts; it runs
//! at model-preparation time, never during inference.

use packnn_common::PackingError;

use crate::format::PackingFormat;
use crate::layout::PackedLayout;

/// Accumulates items into little-endian containers, first item in the LSB.
struct BitPacker<'o> {
    out: &'o mut Vec<u8>,
    container_bits: u32,
    bits: u32,
    word: u32,
    filled: u32,
}

impl<'o> BitPacker<'o> {
    fn new(out: &'o mut Vec<u8>, format: &PackingFormat) -> Self {
        Self {
            out,
            container_bits: format.container_bits,
            bits: format.bits_per_item,
            word: 0,
            filled: 0,
        }
    }

    fn push(&mut self, value: i8) {
        if self.filled + self.bits > self.container_bits {
            self.flush();
        }
        let mask = (1u32 << self.bits) - 1;
        self.word |= (i32::from(value) as u32 & mask) << self.filled;
        self.filled += self.bits;
    }

    /// Emit the partially filled container, if any. The next item starts a
    /// fresh container.
    fn flush(&mut self) {
        if self.filled == 0 {
            return;
        }
        let bytes = self.word.to_le_bytes();
        self.out.extend_from_slice(&bytes[..(self.container_bits / 8) as usize]);
        self.word = 0;
        self.filled = 0;
    }
}

/// Number of exact zeros in `weights`.
pub fn count_zeros(weights: &[i8]) -> usize {
    weights.iter().filter(|&&w| w == 0).count()
}

/// Pack `weights`, split into `num_filters` equal runs, as `format`.
pub fn pack_weights(
    weights: &[i8],
    num_filters: usize,
    format: &PackingFormat,
) -> Result<Vec<u8>, PackingError> {
    let layout = PackedLayout::new(weights.len(), num_filters, format)?;
    check_value_range(weights, format)?;

    let mut out = vec![0u8; layout.values_offset];
    let per_filter = layout.weights_per_filter();
    let runs = || weights.chunks(per_filter.max(1));

    if let Some(at) = layout.run_lengths_offset {
        for (filter, run) in runs().enumerate() {
            let stored = run.len() - count_zeros(run);
            let count = u16::try_from(stored)
                .map_err(|_| PackingError::RunLengthOverflow { filter, stored })?;
            out[at + 2 * filter..at + 2 * filter + 2].copy_from_slice(&count.to_le_bytes());
        }
    }

    if let Some(at) = layout.bitmap_offset {
        let bitmap = &mut out[at..at + layout.bitmap_bytes];
        if format.is_filterwise() {
            for (filter, run) in runs().enumerate() {
                let start = filter * layout.bitmap_bytes_per_run;
                write_bitmap(run, &mut bitmap[start..start + layout.bitmap_bytes_per_run]);
            }
        } else {
            write_bitmap(weights, bitmap);
        }
    }

    let sparse = format.is_sparse();
    let mut packer = BitPacker::new(&mut out, format);
    for run in runs() {
        for &w in run {
            if sparse && w == 0 {
                continue;
            }
            packer.push(w);
        }
        if format.is_filterwise() {
            packer.flush();
        }
    }
    packer.flush();

    tracing::trace!(
        format = %format,
        num_weights = weights.len(),
        num_filters,
        packed_bytes = out.len(),
        "packed weight tensor"
    );
    Ok(out)
}

/// Pack into a caller-provided buffer, returning the bytes written.
pub fn pack_weights_into(
    weights: &[i8],
    num_filters: usize,
    format: &PackingFormat,
    out: &mut [u8],
) -> Result<usize, PackingError> {
    let packed = pack_weights(weights, num_filters, format)?;
    if packed.len() > out.len() {
        return Err(PackingError::Overflow { packed_bytes: packed.len(), capacity: out.len() });
    }
    out[..packed.len()].copy_from_slice(&packed);
    Ok(packed.len())
}

/// Pack, refusing any result larger than the unpacked int8 tensor it
/// replaces.
pub fn pack_weights_within_capacity(
    weights: &[i8],
    num_filters: usize,
    format: &PackingFormat,
) -> Result<Vec<u8>, PackingError> {
    let packed = pack_weights(weights, num_filters, format)?;
    if packed.len() > weights.len() {
        return Err(PackingError::Overflow { packed_bytes: packed.len(), capacity: weights.len() });
    }
    Ok(packed)
}

fn check_value_range(weights: &[i8], format: &PackingFormat) -> Result<(), PackingError> {
    let (lo, hi) = format.value_range();
    match weights.iter().position(|&w| !(lo..=hi).contains(&i32::from(w))) {
        Some(index) => Err(PackingError::ValueOutOfRange {
            index,
            value: i32::from(weights[index]),
            bits_per_item: format.bits_per_item,
        }),
        None => Ok(()),
    }
}

fn write_bitmap(weights: &[i8], bitmap: &mut [u8]) {
    for (i, &w) in weights.iter().enumerate() {
        if w != 0 {
            bitmap[i / 8] |= 1 << (i % 8);
        }
    }
}
