//! Packed sub-8-bit weight formats for packnn
//!
//! This crate provides the weight side of the packed kernels:
//! - the packing format descriptor and byte layout of a packed tensor
//! - a streaming decoder (bit-stream unpacker plus sparsity map) generic over
//!   container type, item width and sparsity policy
//! - whole-tensor unpacking and the host-side packer that it inverts
//! - the one-filter-per-kernel conv layout
//! - fixed-point requantization and quantization-parameter helpers

use packnn_common::PackingError;

pub mod container;
pub mod cursor;
pub mod format;
pub mod layout;
pub mod one_filter_per_kernel;
pub mod packer;
pub mod requantize;
pub mod sparsity;
pub mod unpack;
pub mod unpacker;

pub use container::{Container, Dynamic, Fixed, ItemWidth};
pub use cursor::{DenseWeights, PackedWeightUnpacker, WeightStream};
pub use format::{
    sparse_break_even, sparsity_map_size, word_align, CompressionType, PackingFormat,
    UnpackingHint,
};
pub use layout::PackedLayout;
pub use one_filter_per_kernel::OneFilterPerKernel;
pub use packer::{count_zeros, pack_weights, pack_weights_into, pack_weights_within_capacity};
pub use requantize::{
    calculate_activation_range, per_channel_multipliers, quantize_multiplier, rescale,
    rescale_legacy, ActivationRange, FusedActivation, QuantizedMultiplier,
};
pub use sparsity::{AlwaysSparse, NeverSparse, SometimesSparse, SparsityMap};
pub use unpack::unpack_tensor;
pub use unpacker::WeightUnpacker;

/// An owned packed weight tensor together with its layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedTensor {
    /// Packed bytes: headers, padding and values
    pub data: Vec<u8>,
    /// Region offsets and format of `data`
    pub layout: PackedLayout,
}

impl PackedTensor {
    /// Pack `weights` split into `num_filters` runs.
    pub fn pack(
        weights: &[i8],
        num_filters: usize,
        format: &PackingFormat,
    ) -> Result<Self, PackingError> {
        let data = pack_weights(weights, num_filters, format)?;
        let layout = PackedLayout::new(weights.len(), num_filters, format)?;
        Ok(Self { data, layout })
    }

    /// Wrap bytes produced elsewhere, checking they cover the layout.
    pub fn from_bytes(data: Vec<u8>, layout: PackedLayout) -> Result<Self, PackingError> {
        layout.check_buffer(&data)?;
        Ok(Self { data, layout })
    }

    pub fn format(&self) -> &PackingFormat {
        &self.layout.format
    }

    pub fn packed_bytes(&self) -> usize {
        self.data.len()
    }

    /// Unpacked int8 size over packed size.
    pub fn compression_ratio(&self) -> f32 {
        if self.data.is_empty() {
            return 1.0;
        }
        self.layout.num_weights as f32 / self.data.len() as f32
    }

    /// Decode back to plain int8 weights.
    pub fn unpack(&self) -> Result<Vec<i8>, PackingError> {
        let mut out = vec![0i8; self.layout.num_weights];
        unpack_tensor(&self.data, &self.layout, &mut out)?;
        Ok(out)
    }
}
