//! Byte layout of a packed weight buffer
//!
//! ```text
//! [run-length table]  WORD_RUN_LENGTHS only, one u16 LE non-zero count per run
//! [sparsity bitmap]   sparse formats only, LSB-first
//! [padding]           up to the next container boundary
//! [packed values]     little-endian containers, first item in the LSB
//! ```

use packnn_common::PackingError;

use crate::format::{sparsity_map_size, word_align, CompressionType, PackingFormat};

/// Region offsets of a packed weight tensor split into `num_filters` runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedLayout {
    pub format: PackingFormat,
    pub num_weights: usize,
    pub num_filters: usize,
    pub run_lengths_offset: Option<usize>,
    pub bitmap_offset: Option<usize>,
    /// Bitmap bytes per run for per-run bitmaps, or the whole shared map.
    pub bitmap_bytes_per_run: usize,
    pub bitmap_bytes: usize,
    pub values_offset: usize,
}

impl PackedLayout {
    pub fn new(
        num_weights: usize,
        num_filters: usize,
        format: &PackingFormat,
    ) -> Result<Self, PackingError> {
        format.validate()?;
        if num_filters == 0 || num_weights % num_filters != 0 {
            return Err(PackingError::FilterCountMismatch { num_weights, num_filters });
        }
        let per_filter = num_weights / num_filters;

        let mut offset = 0;
        let run_lengths_offset = format.compression.has_run_lengths().then(|| {
            let at = offset;
            offset += 2 * num_filters;
            at
        });

        let (bitmap_bytes_per_run, bitmap_bytes) = match format.compression {
            CompressionType::WordRunLengths => {
                let per_run = sparsity_map_size(per_filter);
                (per_run, per_run * num_filters)
            }
            CompressionType::NoRunLengths => {
                let shared = sparsity_map_size(num_weights);
                (shared, shared)
            }
            _ => (0, 0),
        };
        let bitmap_offset = format.is_sparse().then(|| {
            let at = offset;
            offset += bitmap_bytes;
            at
        });

        Ok(Self {
            format: *format,
            num_weights,
            num_filters,
            run_lengths_offset,
            bitmap_offset,
            bitmap_bytes_per_run,
            bitmap_bytes,
            values_offset: word_align(offset, format.container_bits),
        })
    }

    pub fn weights_per_filter(&self) -> usize {
        self.num_weights / self.num_filters
    }

    /// Bytes of the value region given the number of stored values per run.
    pub fn value_region_bytes(&self, stored_per_run: &[usize]) -> usize {
        if self.format.is_filterwise() {
            stored_per_run.iter().map(|&n| self.format.stream_bytes(n)).sum()
        } else {
            self.format.stream_bytes(stored_per_run.iter().sum())
        }
    }

    /// Packed size when every weight is stored (no zeros skipped).
    pub fn dense_bytes(&self) -> usize {
        let per_filter = self.weights_per_filter();
        let values = if self.format.is_filterwise() {
            self.format.stream_bytes(per_filter) * self.num_filters
        } else {
            self.format.stream_bytes(self.num_weights)
        };
        self.values_offset + values
    }

    /// Total packed size of `packed`, reading the bitmap to count stored
    /// values. Fails when `packed` is too short to hold its own headers or
    /// the values they announce.
    pub fn required_bytes(&self, packed: &[u8]) -> Result<usize, PackingError> {
        let Some(bitmap_offset) = self.bitmap_offset else {
            return Ok(self.dense_bytes());
        };
        let bitmap_end = bitmap_offset + self.bitmap_bytes;
        if packed.len() < bitmap_end {
            return Err(PackingError::BufferTooSmall {
                needed: bitmap_end,
                available: packed.len(),
            });
        }
        let bitmap = &packed[bitmap_offset..bitmap_end];
        let per_filter = self.weights_per_filter();

        let stored: Vec<usize> = if per_filter == 0 {
            Vec::new()
        } else if self.format.is_filterwise() {
            bitmap
                .chunks_exact(self.bitmap_bytes_per_run)
                .map(|run| count_set_bits(run, per_filter))
                .collect()
        } else {
            vec![count_set_bits(bitmap, self.num_weights)]
        };
        Ok(self.values_offset + self.value_region_bytes(&stored))
    }

    /// Check that `packed` holds everything this layout will read.
    pub fn check_buffer(&self, packed: &[u8]) -> Result<(), PackingError> {
        let needed = self.required_bytes(packed)?;
        if packed.len() < needed {
            return Err(PackingError::BufferTooSmall { needed, available: packed.len() });
        }
        Ok(())
    }

    /// Non-zero count recorded for run `filter` in the run-length table.
    pub fn run_length(&self, packed: &[u8], filter: usize) -> Option<u16> {
        let at = self.run_lengths_offset? + 2 * filter;
        let bytes = packed.get(at..at + 2)?;
        Some(u16::from_le_bytes([bytes[0], bytes[1]]))
    }
}

/// Set bits among the first `positions` bits of an LSB-first bitmap.
fn count_set_bits(bitmap: &[u8], positions: usize) -> usize {
    let full = positions / 8;
    let mut count: usize = bitmap[..full].iter().map(|b| b.count_ones() as usize).sum();
    let rest = positions % 8;
    if rest != 0 {
        count += (bitmap[full] & ((1u8 << rest) - 1)).count_ones() as usize;
    }
    count
}
