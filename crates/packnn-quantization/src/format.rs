//! Packing format descriptor
//!
//! A [`PackingFormat`] is built once at model-preparation time from static
//! model metadata and is never mutated during inference.

use packnn_common::PackingError;
pub use packnn_common::UnpackingHint;

/// How a weight tensor's values are laid out in the packed buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionType {
    /// Every value, one continuous container stream.
    Dense,
    /// Sparse: one shared bitmap, then a continuous stream of non-zero values.
    NoRunLengths,
    /// Sparse: u16 non-zero counts per run, per-run bitmaps, then per-run
    /// value streams that each start on a fresh container.
    WordRunLengths,
    /// Accelerator-only channel-interleaved dense encoding.
    ChannelwiseDense,
    /// Accelerator-only Golomb-Rice encoding.
    GrEncoding,
    /// Every value, each run starting on a fresh container.
    FilterwiseDense,
}

impl CompressionType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Dense => "DENSE",
            Self::NoRunLengths => "NO_RUN_LENGTHS",
            Self::WordRunLengths => "WORD_RUN_LENGTHS",
            Self::ChannelwiseDense => "CHANNELWISE_DENSE",
            Self::GrEncoding => "GR_ENCODING",
            Self::FilterwiseDense => "FILTERWISE_DENSE",
        }
    }

    /// Whether a sparsity bitmap precedes the values.
    pub fn is_sparse(&self) -> bool {
        matches!(self, Self::NoRunLengths | Self::WordRunLengths)
    }

    /// Whether every run is realigned to a fresh container and bitmap byte.
    pub fn is_filterwise(&self) -> bool {
        matches!(self, Self::WordRunLengths | Self::FilterwiseDense)
    }

    pub fn has_run_lengths(&self) -> bool {
        matches!(self, Self::WordRunLengths)
    }

    /// Whether the software packer and decoder handle this encoding.
    pub fn is_software_decodable(&self) -> bool {
        !matches!(self, Self::ChannelwiseDense | Self::GrEncoding)
    }
}

impl std::fmt::Display for CompressionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Packed-weight format descriptor attached to a weight tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PackingFormat {
    /// Bits per packed item, 1 to 8.
    pub bits_per_item: u32,
    /// Storage word width: 8, 16 or 32.
    pub container_bits: u32,
    pub compression: CompressionType,
    pub unpacking_hint: UnpackingHint,
}

impl PackingFormat {
    pub fn new(bits_per_item: u32, container_bits: u32, compression: CompressionType) -> Self {
        Self { bits_per_item, container_bits, compression, unpacking_hint: UnpackingHint::NoHint }
    }

    pub fn with_hint(mut self, unpacking_hint: UnpackingHint) -> Self {
        self.unpacking_hint = unpacking_hint;
        self
    }

    /// Check that the descriptor is one the software path can pack and decode.
    pub fn validate(&self) -> Result<(), PackingError> {
        let container_ok = matches!(self.container_bits, 8 | 16 | 32);
        if !container_ok || self.bits_per_item == 0 || self.bits_per_item > 8 {
            return Err(PackingError::InvalidBitWidth {
                bits_per_item: self.bits_per_item,
                container_bits: self.container_bits,
            });
        }
        if !self.compression.is_software_decodable() {
            return Err(PackingError::UnsupportedFormat {
                format: self.compression.name().to_string(),
            });
        }
        Ok(())
    }

    /// Items that fit whole in one container. Residual bits are padding.
    pub fn items_per_container(&self) -> usize {
        (self.container_bits / self.bits_per_item) as usize
    }

    pub fn container_bytes(&self) -> usize {
        (self.container_bits / 8) as usize
    }

    pub fn is_sparse(&self) -> bool {
        self.compression.is_sparse()
    }

    pub fn is_filterwise(&self) -> bool {
        self.compression.is_filterwise()
    }

    /// Inclusive range of values representable in `bits_per_item` signed bits.
    pub fn value_range(&self) -> (i32, i32) {
        let half = 1i32 << (self.bits_per_item - 1);
        (-half, half - 1)
    }

    /// Bytes taken by `items` values packed as one continuous stream.
    pub fn stream_bytes(&self, items: usize) -> usize {
        items.div_ceil(self.items_per_container()) * self.container_bytes()
    }
}

impl std::fmt::Display for PackingFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}-bit in {}-bit containers ({})",
            self.compression, self.bits_per_item, self.container_bits, self.unpacking_hint
        )
    }
}

/// Bytes in a sparsity bitmap covering `number_of_elts` positions.
pub fn sparsity_map_size(number_of_elts: usize) -> usize {
    number_of_elts.div_ceil(8)
}

/// Round `offset` (relative to a container-aligned base) up to the next
/// container boundary.
pub fn word_align(offset: usize, container_bits: u32) -> usize {
    let bytes_per_word = (container_bits / 8).max(1) as usize;
    offset.next_multiple_of(bytes_per_word)
}

/// Zero fraction above which sparse encoding beats dense for this width.
///
/// The bitmap costs one bit per position, and each skipped zero saves
/// `bits_per_item` bits.
pub fn sparse_break_even(bits_per_item: u32) -> f64 {
    1.0 / f64::from(bits_per_item.max(1))
}
