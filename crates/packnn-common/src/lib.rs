//! Common types and utilities for the packnn packed-weight kernels
//!
//! This crate holds what the quantization and kernel crates share: the error
//! taxonomy, kernel configuration, the tensor views the graph runtime hands
//! to operators, and a rate-limited warning helper.

pub mod config;
pub mod error;
pub mod tensor;
pub mod warn_once;

pub use config::{KernelConfig, KernelConfigError, UnpackingHint};
pub use error::*;
pub use tensor::*;
pub use warn_once::warn_once_fn;
