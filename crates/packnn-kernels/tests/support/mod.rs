//! Shared fixtures for the operator tests: quantized cases, filter storage
//! variants, and a helper that drives Prepare then Eval.

#![allow(dead_code)]

use packnn_common::{
    QuantizationParams, Result, RuntimeShape, TensorType, TensorView, TensorViewMut,
};
use packnn_kernels::cpu::reference::ReferenceQuant;
use packnn_kernels::{OpTensors, PackedOperator, ScratchArena};
use packnn_quantization::{
    calculate_activation_range, pack_weights, per_channel_multipliers, ActivationRange,
    CompressionType, FusedActivation, PackingFormat, QuantizedMultiplier, UnpackingHint,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Once;

pub const ARENA_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct QuantSetup {
    pub input_scale: f32,
    pub input_zero_point: i32,
    pub filter_scales: Vec<f32>,
    pub filter_zero_point: i32,
    pub output_scale: f32,
    pub output_zero_point: i32,
    pub activation: FusedActivation,
}

impl QuantSetup {
    /// Scales of 1.0 everywhere, so the rescale is the identity.
    pub fn unit() -> Self {
        Self {
            input_scale: 1.0,
            input_zero_point: 0,
            filter_scales: vec![1.0],
            filter_zero_point: 0,
            output_scale: 1.0,
            output_zero_point: 0,
            activation: FusedActivation::None,
        }
    }

    /// Realistic scales with non-zero input and output offsets.
    pub fn typical(filter_scales: Vec<f32>) -> Self {
        Self {
            input_scale: 0.05,
            input_zero_point: -7,
            filter_scales,
            filter_zero_point: 0,
            output_scale: 0.4,
            output_zero_point: 5,
            activation: FusedActivation::None,
        }
    }

    pub fn multipliers(&self, channels: usize) -> Vec<QuantizedMultiplier> {
        let scales = if self.filter_scales.len() == 1 {
            vec![self.filter_scales[0]; channels]
        } else {
            self.filter_scales.clone()
        };
        per_channel_multipliers(self.input_scale, &scales, self.output_scale)
    }

    pub fn activation_range(&self) -> ActivationRange {
        calculate_activation_range(self.activation, self.output_scale, self.output_zero_point)
    }

    pub fn reference<'a>(&self, multipliers: &'a [QuantizedMultiplier]) -> ReferenceQuant<'a> {
        ReferenceQuant {
            input_offset: -self.input_zero_point,
            filter_offset: -self.filter_zero_point,
            output_offset: self.output_zero_point,
            multipliers,
            activation: self.activation_range(),
        }
    }
}

/// One quantized operator invocation with plain int8 weights.
#[derive(Debug, Clone)]
pub struct OpCase {
    pub input_dims: Vec<usize>,
    pub input: Vec<i8>,
    pub filter_dims: Vec<usize>,
    pub weights: Vec<i8>,
    pub bias: Option<Vec<i32>>,
    pub output_dims: Vec<usize>,
    pub quant: QuantSetup,
}

impl OpCase {
    pub fn output_len(&self) -> usize {
        self.output_dims.iter().product()
    }
}

/// Filter bytes as the runtime would hand them over, plus their descriptor.
#[derive(Debug, Clone)]
pub struct StoredFilter {
    pub bytes: Vec<u8>,
    pub packing: Option<PackingFormat>,
}

impl StoredFilter {
    pub fn dense(weights: &[i8]) -> Self {
        Self { bytes: weights.iter().map(|&w| w as u8).collect(), packing: None }
    }

    pub fn packed(weights: &[i8], num_filters: usize, format: PackingFormat) -> Self {
        let bytes = pack_weights(weights, num_filters, &format).unwrap();
        Self { bytes, packing: Some(format) }
    }
}

/// Packed formats covering every container width, both specialised and
/// generic decoders, and all four software compressions.
pub fn formats() -> Vec<PackingFormat> {
    vec![
        PackingFormat::new(4, 8, CompressionType::Dense),
        PackingFormat::new(5, 16, CompressionType::FilterwiseDense),
        PackingFormat::new(6, 32, CompressionType::WordRunLengths),
        PackingFormat::new(8, 8, CompressionType::NoRunLengths),
        PackingFormat::new(4, 8, CompressionType::WordRunLengths),
        PackingFormat::new(3, 8, CompressionType::Dense),
        PackingFormat::new(7, 16, CompressionType::NoRunLengths),
        PackingFormat::new(2, 32, CompressionType::FilterwiseDense),
    ]
}

/// `format` with each explicit hint, i.e. streaming and unpack-to-scratch.
pub fn hinted(format: PackingFormat) -> [PackingFormat; 2] {
    [format.with_hint(UnpackingHint::MinMemory), format.with_hint(UnpackingHint::MaxSpeed)]
}

pub fn rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Values in `lo..=hi`, about `zero_fraction` of them zero.
pub fn random_values(
    rng: &mut StdRng,
    len: usize,
    (lo, hi): (i32, i32),
    zero_fraction: f64,
) -> Vec<i8> {
    (0..len)
        .map(|_| if rng.gen_bool(zero_fraction) { 0 } else { rng.gen_range(lo..=hi) as i8 })
        .collect()
}

pub fn random_bias(rng: &mut StdRng, len: usize) -> Vec<i32> {
    (0..len).map(|_| rng.gen_range(-2000..=2000)).collect()
}

/// Route kernel logs to the test writer. Set `RUST_LOG=packnn_kernels=debug`
/// to see which eval variant each Prepare selects.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
    });
}

/// Prepare and Eval `op` once against `case` with the filter stored as
/// `stored`.
pub fn run<O: PackedOperator>(
    op: &mut O,
    case: &OpCase,
    stored: &StoredFilter,
    arena: &mut ScratchArena,
) -> Result<Vec<i8>> {
    run_with_eval_filter(op, case, stored, &stored.bytes, arena)
}

/// Like [`run`], but Eval sees `eval_bytes` as the filter data instead of
/// the buffer Prepare validated.
pub fn run_with_eval_filter<O: PackedOperator>(
    op: &mut O,
    case: &OpCase,
    stored: &StoredFilter,
    eval_bytes: &[u8],
    arena: &mut ScratchArena,
) -> Result<Vec<i8>> {
    init_tracing();
    let input_scales = [case.quant.input_scale];
    let output_scales = [case.quant.output_scale];

    let input = TensorView::from_i8(&case.input_dims, &case.input)?.with_quantization(
        QuantizationParams::per_tensor(&input_scales, case.quant.input_zero_point),
    );
    let filter_shape = RuntimeShape::new(&case.filter_dims)?;
    let filter = TensorView::new(TensorType::Int8, filter_shape, &stored.bytes)
        .with_quantization(QuantizationParams {
            scales: &case.quant.filter_scales,
            zero_point: case.quant.filter_zero_point,
            quantized_dimension: 0,
        });
    let bias = case.bias.as_deref().map(|b| TensorView::from_i32(&[b.len()], b)).transpose()?;

    let mut out = vec![0i8; case.output_len()];
    let mut output = TensorViewMut::from_i8(&case.output_dims, &mut out)?.with_quantization(
        QuantizationParams::per_tensor(&output_scales, case.quant.output_zero_point),
    );

    let tensors =
        OpTensors { input, filter, bias, output: output.as_view(), packing: stored.packing };
    op.prepare(arena, &tensors)?;
    let eval_filter = TensorView { data: eval_bytes, ..filter };
    op.eval(arena, &input, &eval_filter, &mut output)?;
    Ok(out)
}
