//! Error types for the packnn workspace
//!
//! Everything that can go wrong is decided at pack time or at Prepare time.
//! The streaming decode path (unpacker, sparsity decoder, rescale) has no
//! error variants because it has no error paths.

use thiserror::Error;

use crate::config::KernelConfigError;

/// Main error type for packnn operations
#[derive(Error, Debug)]
pub enum PackNnError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Packing error: {0}")]
    Packing(#[from] PackingError),
    #[error("Kernel error: {0}")]
    Kernel(#[from] KernelError),
}

/// Errors raised by the host-side packer and by packing-descriptor validation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PackingError {
    #[error("Unsupported packing format: {format}")]
    UnsupportedFormat { format: String },
    #[error("Invalid bit width: {bits_per_item} bits per item in {container_bits}-bit containers")]
    InvalidBitWidth { bits_per_item: u32, container_bits: u32 },
    #[error("Packing overflow: {packed_bytes} packed bytes exceed the {capacity} bytes reserved")]
    Overflow { packed_bytes: usize, capacity: usize },
    #[error("Value {value} at index {index} does not fit in {bits_per_item} signed bits")]
    ValueOutOfRange { index: usize, value: i32, bits_per_item: u32 },
    #[error("{num_weights} weights cannot be split into {num_filters} equal filters")]
    FilterCountMismatch { num_weights: usize, num_filters: usize },
    #[error("Packed buffer too small: need {needed} bytes, got {available}")]
    BufferTooSmall { needed: usize, available: usize },
    #[error("Run-length overflow: filter {filter} has {stored} non-zero weights, over u16::MAX")]
    RunLengthOverflow { filter: usize, stored: usize },
}

/// Errors raised by operator Init/Prepare/Eval
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    #[error("Type {type_name} not supported by packed kernels")]
    UnsupportedType { type_name: String },
    #[error("Shape mismatch: {reason}")]
    ShapeMismatch { reason: String },
    #[error("Invalid kernel parameters: {reason}")]
    InvalidParams { reason: String },
    #[error("Scratch buffer {index} unavailable")]
    ScratchUnavailable { index: usize },
    #[error("Scratch arena exhausted: requested {requested} bytes, {available} available")]
    ScratchExhausted { requested: usize, available: usize },
    #[error("Kernel execution failed: {reason}")]
    ExecutionFailed { reason: String },
}

impl From<KernelConfigError> for PackNnError {
    fn from(err: KernelConfigError) -> Self {
        PackNnError::Config(err.to_string())
    }
}

/// Result type alias for packnn operations
pub type Result<T> = std::result::Result<T, PackNnError>;
