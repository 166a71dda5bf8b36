//! Packed operators: fully-connected, conv and depthwise conv
//!
//! Each operator follows the graph runtime's lifecycle. `init` stores the
//! builtin parameters, `prepare` validates tensors, folds every constant
//! term and picks an [`EvalVariant`], and `eval` runs the selected kernel.

pub mod conv;
pub mod depthwise_conv;
mod dispatch;
pub mod fully_connected;
mod weights;

pub use conv::{Conv, ConvParams, ConvWeightLayout};
pub use depthwise_conv::{DepthwiseConv, DepthwiseConvParams};
pub use dispatch::WidthPath;
pub use fully_connected::{FullyConnected, FullyConnectedParams};
pub use weights::EvalVariant;

use packnn_common::{
    KernelError, QuantizationParams, Result, RuntimeShape, TensorType, TensorView, TensorViewMut,
};
use packnn_quantization::{
    calculate_activation_range, per_channel_multipliers, ActivationRange, FusedActivation,
    PackingFormat, QuantizedMultiplier,
};

use crate::context::KernelContext;
use crate::cpu::ConvGeometry;
use crate::padding::{
    compute_output_size, compute_padding, fits_without_padding, Padding, PaddingValues,
};
use crate::status::KernelStatus;
use weights::WeightPath;

/// Tensors wired to an operator at Prepare.
#[derive(Debug, Clone, Copy)]
pub struct OpTensors<'t> {
    pub input: TensorView<'t>,
    /// Int8 weights, or packed bytes when `packing` is set.
    pub filter: TensorView<'t>,
    pub bias: Option<TensorView<'t>>,
    pub output: TensorView<'t>,
    /// Packing descriptor attached to the filter tensor.
    pub packing: Option<PackingFormat>,
}

/// Lifecycle entry points the graph runtime drives.
pub trait PackedOperator {
    const NAME: &'static str;

    /// Validate tensors, fold constants, reserve scratch and select the
    /// eval variant.
    fn prepare(&mut self, ctx: &mut dyn KernelContext, tensors: &OpTensors<'_>) -> Result<()>;

    /// Compute the output. Only valid after a successful `prepare`.
    fn eval(
        &self,
        ctx: &mut dyn KernelContext,
        input: &TensorView<'_>,
        filter: &TensorView<'_>,
        output: &mut TensorViewMut<'_>,
    ) -> Result<()>;

    /// Variant selected by the last successful `prepare`.
    fn variant(&self) -> Option<EvalVariant>;

    fn prepare_status(
        &mut self,
        ctx: &mut dyn KernelContext,
        tensors: &OpTensors<'_>,
    ) -> KernelStatus {
        KernelStatus::from_result(Self::NAME, self.prepare(ctx, tensors))
    }

    fn eval_status(
        &self,
        ctx: &mut dyn KernelContext,
        input: &TensorView<'_>,
        filter: &TensorView<'_>,
        output: &mut TensorViewMut<'_>,
    ) -> KernelStatus {
        KernelStatus::from_result(Self::NAME, self.eval(ctx, input, filter, output))
    }
}

// ---------------------------------------------------------------------------
// Prepare helpers
// ---------------------------------------------------------------------------

impl OpTensors<'_> {
    /// Int8 input and output, int32 bias. The filter is checked with its
    /// weight path.
    fn check_types(&self) -> Result<()> {
        expect_type(&self.input, TensorType::Int8, "input")?;
        expect_type(&self.output, TensorType::Int8, "output")?;
        if let Some(bias) = &self.bias {
            expect_type(bias, TensorType::Int32, "bias")?;
        }
        Ok(())
    }

    /// Bias values, or zeros when the operator has none.
    fn bias_or_zeros(&self, channels: usize) -> Result<Vec<i32>> {
        let Some(bias) = &self.bias else {
            return Ok(vec![0; channels]);
        };
        let values = bias.as_i32()?;
        if values.len() != channels {
            return Err(shape_mismatch(format!(
                "bias has {} values for {channels} output channels",
                values.len()
            )));
        }
        Ok(values.to_vec())
    }
}

fn expect_type(view: &TensorView<'_>, dtype: TensorType, role: &str) -> Result<()> {
    if view.dtype != dtype {
        return Err(KernelError::UnsupportedType {
            type_name: format!("{} {role}", view.dtype.name()),
        }
        .into());
    }
    Ok(())
}

fn quantization<'q>(view: &TensorView<'q>, role: &str) -> Result<QuantizationParams<'q>> {
    match view.quantization {
        Some(q) if !q.scales.is_empty() => Ok(q),
        _ => Err(invalid_params(format!("{role} tensor has no quantization parameters"))),
    }
}

/// Quantization of input, filter and output, resolved into what Eval needs.
struct Requantization {
    input_offset: i32,
    filter_zero_point: i32,
    output_offset: i32,
    /// One per output channel.
    multipliers: Vec<QuantizedMultiplier>,
    activation: ActivationRange,
}

impl Requantization {
    fn resolve(
        tensors: &OpTensors<'_>,
        channels: usize,
        activation: FusedActivation,
    ) -> Result<Self> {
        let input = quantization(&tensors.input, "input")?;
        let filter = quantization(&tensors.filter, "filter")?;
        let output = quantization(&tensors.output, "output")?;

        let filter_scales: Vec<f32> = match filter.scales.len() {
            1 => vec![filter.scales[0]; channels],
            n if n == channels => filter.scales.to_vec(),
            n => {
                return Err(invalid_params(format!(
                    "filter has {n} scales for {channels} output channels"
                )))
            }
        };
        if output.scales[0] <= 0.0 || input.scales[0] <= 0.0 {
            return Err(invalid_params("input and output scales must be positive".into()));
        }

        Ok(Self {
            input_offset: -input.zero_point,
            filter_zero_point: filter.zero_point,
            output_offset: output.zero_point,
            multipliers: per_channel_multipliers(input.scales[0], &filter_scales, output.scales[0]),
            activation: calculate_activation_range(activation, output.scales[0], output.zero_point),
        })
    }
}

/// Spatial options shared by conv and depthwise conv. Pairs are
/// `(width, height)`.
struct Spatial {
    padding: Padding,
    stride: (usize, usize),
    dilation: (usize, usize),
}

/// NHWC geometry from the input and output shapes. `filter` is
/// `(width, height)`.
fn conv_geometry(
    spatial: &Spatial,
    input: &RuntimeShape,
    filter: (usize, usize),
    output: &RuntimeShape,
    output_depth: usize,
) -> Result<ConvGeometry> {
    if input.dims_count() != 4 || output.dims_count() != 4 {
        return Err(shape_mismatch("input and output must be NHWC".into()));
    }
    let (stride_width, stride_height) = spatial.stride;
    let (dilation_width, dilation_height) = spatial.dilation;
    if stride_width == 0 || stride_height == 0 || dilation_width == 0 || dilation_height == 0 {
        return Err(invalid_params("strides and dilations must be at least 1".into()));
    }
    let (filter_width, filter_height) = filter;
    if filter_width == 0 || filter_height == 0 {
        return Err(shape_mismatch("filter has an empty spatial dimension".into()));
    }

    let (batches, input_height, input_width) = (input.dim(0), input.dim(1), input.dim(2));
    let output_height = compute_output_size(
        spatial.padding,
        input_height,
        filter_height,
        stride_height,
        dilation_height,
    );
    let output_width = compute_output_size(
        spatial.padding,
        input_width,
        filter_width,
        stride_width,
        dilation_width,
    );
    let expected = [batches, output_height, output_width, output_depth];
    if output.as_slice() != expected {
        return Err(shape_mismatch(format!(
            "output is {:?}, expected {expected:?}",
            output.as_slice()
        )));
    }

    Ok(ConvGeometry {
        batches,
        input_height,
        input_width,
        input_depth: input.dim(3),
        filter_height,
        filter_width,
        output_height,
        output_width,
        output_depth,
        stride_width,
        stride_height,
        dilation_width,
        dilation_height,
        padding: PaddingValues {
            width: compute_padding(
                stride_width,
                dilation_width,
                input_width,
                filter_width,
                output_width,
            ),
            height: compute_padding(
                stride_height,
                dilation_height,
                input_height,
                filter_height,
                output_height,
            ),
        },
    })
}

/// Whether the unchecked [`WithoutPadding`](crate::padding::WithoutPadding)
/// kernels are valid for `g`.
fn fits_unpadded(g: &ConvGeometry) -> bool {
    fits_without_padding(
        g.padding,
        (g.stride_width, g.stride_height),
        (g.dilation_width, g.dilation_height),
        (g.input_width, g.input_height),
        (g.filter_width, g.filter_height),
        (g.output_width, g.output_height),
    )
}

fn shape_mismatch(reason: String) -> packnn_common::PackNnError {
    weights::shape_error(reason)
}

fn invalid_params(reason: String) -> packnn_common::PackNnError {
    KernelError::InvalidParams { reason }.into()
}

fn not_prepared(op: &str) -> packnn_common::PackNnError {
    KernelError::ExecutionFailed { reason: format!("{op}: eval called before prepare") }.into()
}

/// Eval-time size check; the runtime hands Eval the tensors Prepare saw.
fn expect_len(op: &str, role: &str, actual: usize, expected: usize) -> Result<()> {
    if actual != expected {
        return Err(shape_mismatch(format!(
            "{op}: {role} has {actual} elements, prepared for {expected}"
        )));
    }
    Ok(())
}

fn log_selection(op: &'static str, path: &WeightPath, padding: &'static str) {
    let (container_bits, bits_per_item, sparse) = path
        .format()
        .map_or((0, 8, false), |f| (f.container_bits, f.bits_per_item, f.is_sparse()));
    tracing::debug!(
        op,
        variant = %path.variant(),
        container_bits,
        bits_per_item,
        sparse,
        padding,
        "selected eval variant"
    );
}
