//! Packed-weight int8 kernels for microcontroller-class inference
//!
//! Fully-connected, conv and depthwise-conv operators whose weights may be
//! stored as sub-8-bit, optionally sparse, packed tensors. Prepare picks
//! one of three eval variants per operator:
//!
//! - dense int8, when the filter carries no packing descriptor
//! - streaming decode, weights unpacked inside the accumulation loop
//! - unpack-to-scratch, the whole tensor decoded once per Eval
//!
//! All variants produce bit-identical outputs.

pub mod context;
pub mod cpu;
pub mod ops;
pub mod padding;
pub mod status;
pub mod tolerance;

pub use context::{KernelContext, ScratchArena, ScratchIndex};
pub use ops::{
    Conv, ConvParams, ConvWeightLayout, DepthwiseConv, DepthwiseConvParams, EvalVariant,
    FullyConnected, FullyConnectedParams, OpTensors, PackedOperator, WidthPath,
};
pub use padding::{Padding, PaddingValues};
pub use status::KernelStatus;
pub use tolerance::{check_within_lsb_tolerance, LsbToleranceReport};
