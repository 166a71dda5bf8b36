//! Tensor views handed to the kernels by the graph runtime
//!
//! The runtime owns all tensor storage. Kernels only see borrowed byte slices
//! plus a shape and quantization metadata, and never allocate or free tensor
//! memory themselves.

use crate::{KernelError, PackNnError, Result};

/// Maximum tensor rank the runtime hands out.
pub const MAX_DIMS: usize = 6;

/// Element type tag of a runtime tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TensorType {
    Int8,
    UInt8,
    Int16,
    Int32,
    Float32,
}

impl TensorType {
    /// Human-readable type name used in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Int8 => "INT8",
            Self::UInt8 => "UINT8",
            Self::Int16 => "INT16",
            Self::Int32 => "INT32",
            Self::Float32 => "FLOAT32",
        }
    }

    pub fn size_bytes(&self) -> usize {
        match self {
            Self::Int8 | Self::UInt8 => 1,
            Self::Int16 => 2,
            Self::Int32 | Self::Float32 => 4,
        }
    }
}

impl std::fmt::Display for TensorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordered dimension sizes, stored inline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeShape {
    dims: [usize; MAX_DIMS],
    len: usize,
}

impl RuntimeShape {
    pub fn new(dims: &[usize]) -> Result<Self> {
        if dims.len() > MAX_DIMS {
            return Err(PackNnError::Validation(format!(
                "tensor rank {} exceeds the supported maximum of {MAX_DIMS}",
                dims.len()
            )));
        }
        let mut inline = [0; MAX_DIMS];
        inline[..dims.len()].copy_from_slice(dims);
        Ok(Self { dims: inline, len: dims.len() })
    }

    pub fn dims_count(&self) -> usize {
        self.len
    }

    /// Size of dimension `i`. Panics when `i` is out of range.
    pub fn dim(&self, i: usize) -> usize {
        assert!(i < self.len, "dimension {i} out of range for rank {}", self.len);
        self.dims[i]
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.dims[..self.len]
    }

    pub fn flat_size(&self) -> usize {
        self.as_slice().iter().product()
    }

    /// Product of every dimension except `skip`.
    pub fn flat_size_skip_dim(&self, skip: usize) -> usize {
        self.as_slice()
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != skip)
            .map(|(_, d)| *d)
            .product()
    }
}

/// Affine quantization metadata: `real = scale * (code - zero_point)`.
///
/// `scales` holds one entry for per-tensor quantization, or one per slice of
/// `quantized_dimension` for per-channel quantization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantizationParams<'a> {
    pub scales: &'a [f32],
    pub zero_point: i32,
    pub quantized_dimension: usize,
}

impl<'a> QuantizationParams<'a> {
    pub fn per_tensor(scale: &'a [f32], zero_point: i32) -> Self {
        Self { scales: scale, zero_point, quantized_dimension: 0 }
    }

    pub fn is_per_channel(&self) -> bool {
        self.scales.len() > 1
    }
}

/// Read-only tensor view.
#[derive(Debug, Clone, Copy)]
pub struct TensorView<'a> {
    pub dtype: TensorType,
    pub shape: RuntimeShape,
    pub quantization: Option<QuantizationParams<'a>>,
    pub data: &'a [u8],
}

impl<'a> TensorView<'a> {
    pub fn new(dtype: TensorType, shape: RuntimeShape, data: &'a [u8]) -> Self {
        Self { dtype, shape, quantization: None, data }
    }

    pub fn from_i8(dims: &[usize], data: &'a [i8]) -> Result<Self> {
        Ok(Self::new(TensorType::Int8, RuntimeShape::new(dims)?, bytemuck::cast_slice(data)))
    }

    pub fn from_i32(dims: &[usize], data: &'a [i32]) -> Result<Self> {
        Ok(Self::new(TensorType::Int32, RuntimeShape::new(dims)?, bytemuck::cast_slice(data)))
    }

    pub fn with_quantization(mut self, quantization: QuantizationParams<'a>) -> Self {
        self.quantization = Some(quantization);
        self
    }

    pub fn zero_point(&self) -> i32 {
        self.quantization.map_or(0, |q| q.zero_point)
    }

    pub fn as_i8(&self) -> Result<&'a [i8]> {
        self.expect_type(TensorType::Int8)?;
        Ok(bytemuck::cast_slice(self.data))
    }

    pub fn as_i32(&self) -> Result<&'a [i32]> {
        self.expect_type(TensorType::Int32)?;
        bytemuck::try_cast_slice(self.data).map_err(|e| {
            KernelError::InvalidParams { reason: format!("int32 tensor data: {e}") }.into()
        })
    }

    fn expect_type(&self, dtype: TensorType) -> Result<()> {
        if self.dtype != dtype {
            return Err(KernelError::UnsupportedType { type_name: self.dtype.name().into() }.into());
        }
        Ok(())
    }
}

/// Writable tensor view, used for operator outputs.
#[derive(Debug)]
pub struct TensorViewMut<'a> {
    pub dtype: TensorType,
    pub shape: RuntimeShape,
    pub quantization: Option<QuantizationParams<'a>>,
    pub data: &'a mut [u8],
}

impl<'a> TensorViewMut<'a> {
    pub fn from_i8(dims: &[usize], data: &'a mut [i8]) -> Result<Self> {
        Ok(Self {
            dtype: TensorType::Int8,
            shape: RuntimeShape::new(dims)?,
            quantization: None,
            data: bytemuck::cast_slice_mut(data),
        })
    }

    pub fn with_quantization(mut self, quantization: QuantizationParams<'a>) -> Self {
        self.quantization = Some(quantization);
        self
    }

    pub fn zero_point(&self) -> i32 {
        self.quantization.map_or(0, |q| q.zero_point)
    }

    /// Read-only view of the same tensor, e.g. for Prepare.
    pub fn as_view(&self) -> TensorView<'_> {
        TensorView {
            dtype: self.dtype,
            shape: self.shape,
            quantization: self.quantization,
            data: self.data,
        }
    }

    pub fn as_i8_mut(&mut self) -> Result<&mut [i8]> {
        if self.dtype != TensorType::Int8 {
            return Err(KernelError::UnsupportedType { type_name: self.dtype.name().into() }.into());
        }
        Ok(bytemuck::cast_slice_mut(self.data))
    }
}
