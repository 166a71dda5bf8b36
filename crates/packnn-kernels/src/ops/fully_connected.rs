//! Packed fully-connected operator

use packnn_common::{KernelConfig, Result, TensorView, TensorViewMut};
use packnn_quantization::{
    ActivationRange, Container, DenseWeights, FusedActivation, ItemWidth, PackedLayout,
    PackedWeightUnpacker, QuantizedMultiplier,
};

use super::dispatch::{PackedVisitor, Sparsity};
use super::weights::{plain_weights, plan_weights, unpack_into_scratch, WeightPath, WeightRequest};
use super::{
    expect_len, invalid_params, log_selection, not_prepared, shape_mismatch, EvalVariant,
    OpTensors, PackedOperator, Requantization,
};
use crate::context::KernelContext;
use crate::cpu::{fully_connected, FullyConnectedArgs};

/// Builtin options of a fully-connected node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FullyConnectedParams {
    pub activation: FusedActivation,
}

#[derive(Debug, Clone)]
struct OpData {
    weights: WeightPath,
    batches: usize,
    accum_depth: usize,
    output_depth: usize,
    weights_offset: i32,
    output_offset: i32,
    multiplier: QuantizedMultiplier,
    activation: ActivationRange,
    sum_of_weights_factor: Vec<i32>,
}

impl OpData {
    fn args(&self) -> FullyConnectedArgs<'_> {
        FullyConnectedArgs {
            batches: self.batches,
            accum_depth: self.accum_depth,
            output_depth: self.output_depth,
            weights_offset: self.weights_offset,
            output_offset: self.output_offset,
            multiplier: self.multiplier,
            activation: self.activation,
            sum_of_weights_factor: &self.sum_of_weights_factor,
        }
    }
}

/// `output[b, c] = Σ_d w[c, d] * x[b, d] + bias[c]`, requantized to int8.
///
/// The filter is `[output_depth, accum_depth]`, one packing run per output
/// channel. The input is treated as `[batches, accum_depth]` whatever its
/// rank.
#[derive(Debug, Clone)]
pub struct FullyConnected {
    params: FullyConnectedParams,
    config: KernelConfig,
    data: Option<OpData>,
}

impl FullyConnected {
    pub fn init(params: FullyConnectedParams, config: KernelConfig) -> Self {
        Self { params, config, data: None }
    }

    pub fn params(&self) -> &FullyConnectedParams {
        &self.params
    }
}

impl PackedOperator for FullyConnected {
    const NAME: &'static str = "FULLY_CONNECTED";

    fn prepare(&mut self, ctx: &mut dyn KernelContext, t: &OpTensors<'_>) -> Result<()> {
        self.data = None;
        t.check_types()?;

        let filter_shape = t.filter.shape;
        if filter_shape.dims_count() != 2 {
            return Err(shape_mismatch(format!(
                "filter must be [output_depth, accum_depth], got rank {}",
                filter_shape.dims_count()
            )));
        }
        let (output_depth, accum_depth) = (filter_shape.dim(0), filter_shape.dim(1));
        if output_depth == 0 || accum_depth == 0 {
            return Err(shape_mismatch("filter has an empty dimension".into()));
        }
        let input_size = t.input.shape.flat_size();
        if input_size % accum_depth != 0 {
            return Err(shape_mismatch(format!(
                "input of {input_size} elements is not a multiple of accum_depth {accum_depth}"
            )));
        }
        let batches = input_size / accum_depth;
        if t.output.shape.flat_size() != batches * output_depth {
            return Err(shape_mismatch(format!(
                "output holds {} elements, expected {batches} x {output_depth}",
                t.output.shape.flat_size()
            )));
        }

        if t.filter.quantization.is_some_and(|q| q.scales.len() > 1) {
            return Err(invalid_params("fully-connected takes a per-tensor filter scale".into()));
        }
        let quant = Requantization::resolve(t, output_depth, self.params.activation)?;

        let request = WeightRequest {
            op: Self::NAME,
            filter: &t.filter,
            packing: t.packing.as_ref(),
            num_filters: output_depth,
            scratch_prefix: 0,
        };
        let weights = plan_weights(ctx, &self.config, &request)?;

        let bias = t.bias_or_zeros(output_depth)?;
        let plain = plain_weights(&t.filter, &weights)?;
        let weights_offset = -quant.filter_zero_point;
        let sum_of_weights_factor =
            fold_sum_of_weights(&plain, accum_depth, &bias, quant.input_offset, weights_offset)?;

        log_selection(Self::NAME, &weights, "none");
        self.data = Some(OpData {
            weights,
            batches,
            accum_depth,
            output_depth,
            weights_offset,
            output_offset: quant.output_offset,
            multiplier: quant.multipliers[0],
            activation: quant.activation,
            sum_of_weights_factor,
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
        expect_len(Self::NAME, "input", input.len(), data.batches * data.accum_depth)?;
        expect_len(Self::NAME, "output", output.len(), data.batches * data.output_depth)?;
        let args = data.args();

        match &data.weights {
            WeightPath::Dense => {
                let w = filter.as_i8()?;
                expect_len(Self::NAME, "filter", w.len(), data.output_depth * data.accum_depth)?;
                fully_connected(&args, input, || DenseWeights::new(w), output);
            }
            WeightPath::Streaming { layout, width } => {
                layout.check_buffer(filter.data)?;
                let visitor = Streaming { args: &args, input, packed: filter.data, layout, output };
                width.dispatch(layout.format.is_sparse(), visitor);
            }
            WeightPath::Unpacked { .. } | WeightPath::OneFilterPerKernel { .. } => {
                let (_, w) = unpack_into_scratch(ctx, filter.data, &data.weights)?;
                fully_connected(&args, input, || DenseWeights::new(w), output);
            }
        }
        Ok(())
    }

    fn variant(&self) -> Option<EvalVariant> {
        self.data.as_ref().map(|d| d.weights.variant())
    }
}

/// Per-output constant `bias + input_offset * sum(w) + depth * input_offset * weights_offset`.
/// Fails when a term leaves the i32 accumulator range.
fn fold_sum_of_weights(
    plain: &[i8],
    accum_depth: usize,
    bias: &[i32],
    input_offset: i32,
    weights_offset: i32,
) -> Result<Vec<i32>> {
    let depth = i64::try_from(accum_depth).unwrap_or(i64::MAX);
    let depth_term = depth.saturating_mul(i64::from(input_offset) * i64::from(weights_offset));
    plain
        .chunks_exact(accum_depth)
        .zip(bias)
        .enumerate()
        .map(|(channel, (row, &b))| {
            let sum: i64 = row.iter().map(|&w| i64::from(w)).sum();
            let folded = i64::from(b) + i64::from(input_offset) * sum + depth_term;
            i32::try_from(folded).map_err(|_| {
                invalid_params(format!(
                    "sum-of-weights factor {folded} for output channel {channel} overflows i32"
                ))
            })
        })
        .collect()
}

struct Streaming<'r, 'p> {
    args: &'r FullyConnectedArgs<'r>,
    input: &'r [i8],
    packed: &'p [u8],
    layout: &'r PackedLayout,
    output: &'r mut [i8],
}

impl<'p> PackedVisitor for Streaming<'_, 'p> {
    type Output = ();

    fn visit<C: Container, W: ItemWidth, Z: Sparsity>(self) -> Self::Output {
        let Self { args, input, packed, layout, output } = self;
        let width = W::for_bits(layout.format.bits_per_item);
        let open = || PackedWeightUnpacker::<C, W, Z::Map<'p>>::open(packed, layout, width);
        fully_connected(args, input, open, output);
    }
}
