//! Kernel templates shared by the dense, streaming and unpacked variants
//!
//! Each template is generic over a [`WeightStream`](packnn_quantization::WeightStream)
//! factory. The factory is called once per independent weight pass (per
//! batch row for fully-connected, per output pixel for the convolutions), and
//! `end_run` is signalled at every packing-run boundary.

pub mod conv;
pub mod depthwise_conv;
pub mod fully_connected;
pub mod reference;

pub use conv::{conv, ConvArgs};
pub use depthwise_conv::{depthwise_conv, DepthwiseConvArgs};
pub use fully_connected::{fully_connected, FullyConnectedArgs};

use packnn_quantization::{ActivationRange, QuantizedMultiplier};

use crate::padding::PaddingValues;

/// NHWC geometry of one conv or depthwise-conv invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConvGeometry {
    pub batches: usize,
    pub input_height: usize,
    pub input_width: usize,
    pub input_depth: usize,
    pub filter_height: usize,
    pub filter_width: usize,
    pub output_height: usize,
    pub output_width: usize,
    pub output_depth: usize,
    pub stride_width: usize,
    pub stride_height: usize,
    pub dilation_width: usize,
    pub dilation_height: usize,
    pub padding: PaddingValues,
}

impl ConvGeometry {
    pub fn input_size(&self) -> usize {
        self.batches * self.input_height * self.input_width * self.input_depth
    }

    pub fn output_size(&self) -> usize {
        self.batches * self.output_height * self.output_width * self.output_depth
    }

    /// Top-left input position read by output `(out_x, out_y)`.
    #[inline(always)]
    pub(crate) fn origin(&self, out_x: usize, out_y: usize) -> (isize, isize) {
        (
            (out_x * self.stride_width) as isize - self.padding.width as isize,
            (out_y * self.stride_height) as isize - self.padding.height as isize,
        )
    }

    /// Input position read by filter tap `(fx, fy)` from `origin`.
    #[inline(always)]
    pub(crate) fn tap(&self, origin: (isize, isize), fx: usize, fy: usize) -> (isize, isize) {
        (
            origin.0 + (fx * self.dilation_width) as isize,
            origin.1 + (fy * self.dilation_height) as isize,
        )
    }
}

/// Rescale, offset and clamp one accumulator into the int8 output range.
#[inline(always)]
pub(crate) fn requantize(
    acc: i32,
    multiplier: QuantizedMultiplier,
    output_offset: i32,
    activation: ActivationRange,
) -> i8 {
    activation.clamp(multiplier.apply(acc) + output_offset) as i8
}
