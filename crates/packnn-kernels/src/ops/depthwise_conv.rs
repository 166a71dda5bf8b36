//! Packed depthwise-convolution operator

use std::marker::PhantomData;

use packnn_common::{KernelConfig, KernelError, Result, TensorView, TensorViewMut};
use packnn_quantization::{
    ActivationRange, Container, DenseWeights, FusedActivation, ItemWidth, PackedLayout,
    PackedWeightUnpacker, QuantizedMultiplier,
};

use super::dispatch::{PackedVisitor, Sparsity};
use super::weights::{plain_weights, plan_weights, unpack_into_scratch, WeightPath, WeightRequest};
use super::{
    conv_geometry, expect_len, fits_unpadded, invalid_params, log_selection, not_prepared,
    shape_mismatch, EvalVariant, OpTensors, PackedOperator, Requantization, Spatial,
};
use crate::context::{KernelContext, ScratchIndex};
use crate::cpu::{depthwise_conv, ConvGeometry, DepthwiseConvArgs};
use crate::padding::{Padding, PaddingPolicy, WithPadding, WithoutPadding};

/// Builtin options of a depthwise-conv node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthwiseConvParams {
    pub padding: Padding,
    pub stride_width: usize,
    pub stride_height: usize,
    pub dilation_width_factor: usize,
    pub dilation_height_factor: usize,
    pub depth_multiplier: usize,
    pub activation: FusedActivation,
}

impl Default for DepthwiseConvParams {
    fn default() -> Self {
        Self {
            padding: Padding::Same,
            stride_width: 1,
            stride_height: 1,
            dilation_width_factor: 1,
            dilation_height_factor: 1,
            depth_multiplier: 1,
            activation: FusedActivation::None,
        }
    }
}

#[derive(Debug, Clone)]
struct OpData {
    weights: WeightPath,
    /// Per-pixel `i32` accumulators. Shares the unpacked-weights region
    /// when there is one.
    acc_scratch: ScratchIndex,
    geometry: ConvGeometry,
    depth_multiplier: usize,
    without_padding: bool,
    input_offset: i32,
    output_offset: i32,
    activation: ActivationRange,
    multipliers: Vec<QuantizedMultiplier>,
    channel_factor: Vec<i32>,
}

impl OpData {
    fn args(&self) -> DepthwiseConvArgs<'_> {
        DepthwiseConvArgs {
            geometry: self.geometry,
            depth_multiplier: self.depth_multiplier,
            input_offset: self.input_offset,
            output_offset: self.output_offset,
            activation: self.activation,
            multipliers: &self.multipliers,
            channel_factor: &self.channel_factor,
        }
    }

    fn acc_bytes(&self) -> usize {
        self.geometry.output_depth * std::mem::size_of::<i32>()
    }
}

/// NHWC int8 depthwise convolution. The filter is `[1, fh, fw, out_c]`, one
/// packing run per filter tap.
#[derive(Debug, Clone)]
pub struct DepthwiseConv {
    params: DepthwiseConvParams,
    config: KernelConfig,
    data: Option<OpData>,
}

impl DepthwiseConv {
    pub fn init(params: DepthwiseConvParams, config: KernelConfig) -> Self {
        Self { params, config, data: None }
    }

    pub fn params(&self) -> &DepthwiseConvParams {
        &self.params
    }

    pub fn without_padding(&self) -> Option<bool> {
        self.data.as_ref().map(|d| d.without_padding)
    }

    fn run<P: PaddingPolicy>(
        &self,
        data: &OpData,
        ctx: &mut dyn KernelContext,
        input: &[i8],
        filter: &TensorView<'_>,
        output: &mut [i8],
    ) -> Result<()> {
        let args = data.args();
        match &data.weights {
            WeightPath::Dense => {
                let w = filter.as_i8()?;
                expect_len(Self::NAME, "filter", w.len(), filter_len(&data.geometry))?;
                let acc = accumulators(ctx.scratch_buffer(data.acc_scratch)?, data.acc_bytes())?;
                depthwise_conv::<P, _>(&args, input, || DenseWeights::new(w), acc, output);
            }
            WeightPath::Streaming { layout, width } => {
                layout.check_buffer(filter.data)?;
                let acc = accumulators(ctx.scratch_buffer(data.acc_scratch)?, data.acc_bytes())?;
                let visitor = Streaming::<P> {
                    args: &args,
                    input,
                    packed: filter.data,
                    layout,
                    acc,
                    output,
                    padding: PhantomData,
                };
                width.dispatch(layout.format.is_sparse(), visitor);
            }
            WeightPath::Unpacked { .. } | WeightPath::OneFilterPerKernel { .. } => {
                let (prefix, w) = unpack_into_scratch(ctx, filter.data, &data.weights)?;
                let acc = accumulators(prefix, data.acc_bytes())?;
                depthwise_conv::<P, _>(&args, input, || DenseWeights::new(w), acc, output);
            }
        }
        Ok(())
    }
}

fn filter_len(g: &ConvGeometry) -> usize {
    g.filter_height * g.filter_width * g.output_depth
}

fn accumulators(region: &mut [u8], bytes: usize) -> Result<&mut [i32]> {
    let region = region.get_mut(..bytes).ok_or_else(|| KernelError::ExecutionFailed {
        reason: format!("accumulator scratch smaller than {bytes} bytes"),
    })?;
    bytemuck::try_cast_slice_mut(region).map_err(|e| {
        KernelError::ExecutionFailed { reason: format!("accumulator scratch: {e}") }.into()
    })
}

impl PackedOperator for DepthwiseConv {
    const NAME: &'static str = "DEPTHWISE_CONV_2D";

    fn prepare(&mut self, ctx: &mut dyn KernelContext, t: &OpTensors<'_>) -> Result<()> {
        self.data = None;
        t.check_types()?;

        let filter_shape = t.filter.shape;
        if filter_shape.dims_count() != 4 || filter_shape.dim(0) != 1 {
            return Err(shape_mismatch("filter must be [1, fh, fw, out_c]".into()));
        }
        let depth_multiplier = self.params.depth_multiplier;
        if depth_multiplier == 0 {
            return Err(invalid_params("depth multiplier must be at least 1".into()));
        }
        let output_depth = filter_shape.dim(3);
        let spatial = Spatial {
            padding: self.params.padding,
            stride: (self.params.stride_width, self.params.stride_height),
            dilation: (self.params.dilation_width_factor, self.params.dilation_height_factor),
        };
        let geometry = conv_geometry(
            &spatial,
            &t.input.shape,
            (filter_shape.dim(2), filter_shape.dim(1)),
            &t.output.shape,
            output_depth,
        )?;
        if output_depth == 0 || geometry.input_depth * depth_multiplier != output_depth {
            return Err(shape_mismatch(format!(
                "output depth {output_depth} is not input depth {} x multiplier {depth_multiplier}",
                geometry.input_depth
            )));
        }

        let quant = Requantization::resolve(t, output_depth, self.params.activation)?;
        if quant.filter_zero_point != 0 {
            return Err(invalid_params(format!(
                "depthwise filter zero point must be 0, got {}",
                quant.filter_zero_point
            )));
        }

        let taps = geometry.filter_height * geometry.filter_width;
        let acc_bytes = output_depth * std::mem::size_of::<i32>();
        let request = WeightRequest {
            op: Self::NAME,
            filter: &t.filter,
            packing: t.packing.as_ref(),
            num_filters: taps,
            scratch_prefix: acc_bytes,
        };
        let weights = plan_weights(ctx, &self.config, &request)?;
        let acc_scratch = match weights.scratch() {
            Some(shared) => shared,
            None => ctx.request_scratch_buffer(acc_bytes)?,
        };

        let without_padding = fits_unpadded(&geometry);
        let mut channel_factor = t.bias_or_zeros(output_depth)?;
        if without_padding && quant.input_offset != 0 {
            let plain = plain_weights(&t.filter, &weights)?;
            for tap in plain.chunks_exact(output_depth) {
                for (factor, &w) in channel_factor.iter_mut().zip(tap) {
                    *factor += quant.input_offset * i32::from(w);
                }
            }
        }

        let padding = if without_padding { WithoutPadding::NAME } else { WithPadding::NAME };
        log_selection(Self::NAME, &weights, padding);
        self.data = Some(OpData {
            weights,
            acc_scratch,
            geometry,
            depth_multiplier,
            without_padding,
            input_offset: quant.input_offset,
            output_offset: quant.output_offset,
            activation: quant.activation,
            multipliers: quant.multipliers,
            channel_factor,
        });
        Ok(())
    }

    fn eval(
        &self,
        ctx: &mut dyn KernelContext,
        input: &TensorView<'_>,
        filter: &TensorView<'_>,
        output: &mut TensorViewMut<'_>,
    ) -> Result<()> {
        let data = self.data.as_ref().ok_or_else(|| not_prepared(Self::NAME))?;
        let input = input.as_i8()?;
        let output = output.as_i8_mut()?;
        expect_len(Self::NAME, "input", input.len(), data.geometry.input_size())?;
        expect_len(Self::NAME, "output", output.len(), data.geometry.output_size())?;

        if data.without_padding {
            self.run::<WithoutPadding>(data, ctx, input, filter, output)
        } else {
            self.run::<WithPadding>(data, ctx, input, filter, output)
        }
    }

    fn variant(&self) -> Option<EvalVariant> {
        self.data.as_ref().map(|d| d.weights.variant())
    }
}

struct Streaming<'r, 'p, P> {
    args: &'r DepthwiseConvArgs<'r>,
    input: &'r [i8],
    packed: &'p [u8],
    layout: &'r PackedLayout,
    acc: &'r mut [i32],
    output: &'r mut [i8],
    padding: PhantomData<P>,
}

impl<'p, P: PaddingPolicy> PackedVisitor for Streaming<'_, 'p, P> {
    type Output = ();

    fn visit<C: Container, W: ItemWidth, Z: Sparsity>(self) -> Self::Output {
        let Self { args, input, packed, layout, acc, output, .. } = self;
        let width = W::for_bits(layout.format.bits_per_item);
        let open = || PackedWeightUnpacker::<C, W, Z::Map<'p>>::open(packed, layout, width);
        depthwise_conv::<P, _>(args, input, open, acc, output);
    }
}
