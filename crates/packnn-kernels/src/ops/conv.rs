//! Packed 2-D convolution operator

use std::marker::PhantomData;

use packnn_common::{KernelConfig, Result, TensorView, TensorViewMut};
use packnn_quantization::{
    ActivationRange, Container, DenseWeights, FusedActivation, ItemWidth, PackedLayout,
    PackedWeightUnpacker, QuantizedMultiplier,
};

use super::dispatch::{PackedVisitor, Sparsity};
use super::weights::{
    plain_weights, plan_one_filter_per_kernel, plan_weights, unpack_into_scratch, WeightPath,
    WeightRequest,
};
use super::{
    conv_geometry, expect_len, fits_unpadded, invalid_params, log_selection, not_prepared,
    shape_mismatch, EvalVariant, OpTensors, PackedOperator, Requantization, Spatial,
};
use crate::context::KernelContext;
use crate::cpu::{conv, ConvArgs, ConvGeometry};
use crate::padding::{Padding, PaddingPolicy, WithPadding, WithoutPadding};

/// How the conv filter tensor is stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConvWeightLayout {
    /// `[out_c, fh, fw, in_c]` int8, or packed per the filter's descriptor.
    #[default]
    FilterMajor,
    /// One 8-bit filter per kernel launch, optionally with per-filter
    /// run lengths and bitmaps. Carries no packing descriptor.
    OneFilterPerKernel { sparse: bool },
}

/// Builtin options of a conv node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvParams {
    pub padding: Padding,
    pub stride_width: usize,
    pub stride_height: usize,
    pub dilation_width_factor: usize,
    pub dilation_height_factor: usize,
    pub activation: FusedActivation,
    pub weight_layout: ConvWeightLayout,
}

impl Default for ConvParams {
    fn default() -> Self {
        Self {
            padding: Padding::Same,
            stride_width: 1,
            stride_height: 1,
            dilation_width_factor: 1,
            dilation_height_factor: 1,
            activation: FusedActivation::None,
            weight_layout: ConvWeightLayout::FilterMajor,
        }
    }
}

#[derive(Debug, Clone)]
struct OpData {
    weights: WeightPath,
    geometry: ConvGeometry,
    without_padding: bool,
    input_offset: i32,
    output_offset: i32,
    activation: ActivationRange,
    multipliers: Vec<QuantizedMultiplier>,
    channel_factor: Vec<i32>,
}

impl OpData {
    fn args(&self) -> ConvArgs<'_> {
        ConvArgs {
            geometry: self.geometry,
            input_offset: self.input_offset,
            output_offset: self.output_offset,
            activation: self.activation,
            multipliers: &self.multipliers,
            channel_factor: &self.channel_factor,
        }
    }
}

/// NHWC int8 convolution with per-channel requantization. Each output
/// channel's filter is one packing run.
#[derive(Debug, Clone)]
pub struct Conv {
    params: ConvParams,
    config: KernelConfig,
    data: Option<OpData>,
}

impl Conv {
    pub fn init(params: ConvParams, config: KernelConfig) -> Self {
        Self { params, config, data: None }
    }

    pub fn params(&self) -> &ConvParams {
        &self.params
    }

    /// Whether Prepare proved every tap in range and chose the unchecked kernel.
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
                conv::<P, _>(&args, input, || DenseWeights::new(w), output);
            }
            WeightPath::Streaming { layout, width } => {
                layout.check_buffer(filter.data)?;
                let visitor = Streaming::<P> {
                    args: &args,
                    input,
                    packed: filter.data,
                    layout,
                    output,
                    padding: PhantomData,
                };
                width.dispatch(layout.format.is_sparse(), visitor);
            }
            WeightPath::Unpacked { .. } | WeightPath::OneFilterPerKernel { .. } => {
                let (_, w) = unpack_into_scratch(ctx, filter.data, &data.weights)?;
                conv::<P, _>(&args, input, || DenseWeights::new(w), output);
            }
        }
        Ok(())
    }
}

fn filter_len(g: &ConvGeometry) -> usize {
    g.output_depth * g.filter_height * g.filter_width * g.input_depth
}

impl PackedOperator for Conv {
    const NAME: &'static str = "CONV_2D";

    fn prepare(&mut self, ctx: &mut dyn KernelContext, t: &OpTensors<'_>) -> Result<()> {
        self.data = None;
        t.check_types()?;

        let filter_shape = t.filter.shape;
        if filter_shape.dims_count() != 4 {
            return Err(shape_mismatch("filter must be [out_c, fh, fw, in_c]".into()));
        }
        let output_depth = filter_shape.dim(0);
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
        if filter_shape.dim(3) != geometry.input_depth || geometry.input_depth == 0 {
            return Err(shape_mismatch(format!(
                "filter depth {} does not match input depth {}",
                filter_shape.dim(3),
                geometry.input_depth
            )));
        }
        if output_depth == 0 {
            return Err(shape_mismatch("filter has no output channels".into()));
        }

        let quant = Requantization::resolve(t, output_depth, self.params.activation)?;
        if quant.filter_zero_point != 0 {
            return Err(invalid_params(format!(
                "conv filter zero point must be 0, got {}",
                quant.filter_zero_point
            )));
        }

        let request = WeightRequest {
            op: Self::NAME,
            filter: &t.filter,
            packing: t.packing.as_ref(),
            num_filters: output_depth,
            scratch_prefix: 0,
        };
        let weights = match self.params.weight_layout {
            ConvWeightLayout::FilterMajor => plan_weights(ctx, &self.config, &request)?,
            ConvWeightLayout::OneFilterPerKernel { .. } if t.packing.is_some() => {
                return Err(invalid_params(
                    "one-filter-per-kernel weights take no packing descriptor".into(),
                ));
            }
            ConvWeightLayout::OneFilterPerKernel { sparse } => {
                plan_one_filter_per_kernel(ctx, &self.config, &request, sparse)?
            }
        };

        let without_padding = fits_unpadded(&geometry);
        let mut channel_factor = t.bias_or_zeros(output_depth)?;
        if without_padding && quant.input_offset != 0 {
            let plain = plain_weights(&t.filter, &weights)?;
            let per_filter = filter_len(&geometry) / output_depth;
            for (factor, filter) in channel_factor.iter_mut().zip(plain.chunks_exact(per_filter)) {
                let sum: i32 = filter.iter().map(|&w| i32::from(w)).sum();
                *factor += quant.input_offset * sum;
            }
        }

        let padding = if without_padding { WithoutPadding::NAME } else { WithPadding::NAME };
        log_selection(Self::NAME, &weights, padding);
        self.data = Some(OpData {
            weights,
            geometry,
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
    args: &'r ConvArgs<'r>,
    input: &'r [i8],
    packed: &'p [u8],
    layout: &'r PackedLayout,
    output: &'r mut [i8],
    padding: PhantomData<P>,
}

impl<'p, P: PaddingPolicy> PackedVisitor for Streaming<'_, 'p, P> {
    type Output = ();

    fn visit<C: Container, W: ItemWidth, Z: Sparsity>(self) -> Self::Output {
        let Self { args, input, packed, layout, output, .. } = self;
        let width = W::for_bits(layout.format.bits_per_item);
        let open = || PackedWeightUnpacker::<C, W, Z::Map<'p>>::open(packed, layout, width);
        conv::<P, _>(args, input, open, output);
    }
}
