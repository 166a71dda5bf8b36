//! Conv operator: every packing format and eval variant against the dense
//! reference, both padding policies, and the one-filter-per-kernel layout.

mod support;

use packnn_common::{KernelConfig, KernelError, PackNnError, PackingError, Result};
use packnn_kernels::cpu::reference::conv_reference;
use packnn_kernels::cpu::ConvGeometry;
use packnn_kernels::padding::{compute_output_size, compute_padding};
use packnn_kernels::{
    Conv, ConvParams, ConvWeightLayout, EvalVariant, Padding, PackedOperator, PaddingValues,
    ScratchArena,
};
use packnn_quantization::{CompressionType, OneFilterPerKernel, PackingFormat};
use rand::Rng;
use support::*;

#[derive(Debug, Clone, Copy)]
struct Shape {
    batches: usize,
    input: (usize, usize, usize),
    filter: (usize, usize),
    output_depth: usize,
    stride: (usize, usize),
    dilation: (usize, usize),
    padding: Padding,
}

impl Shape {
    fn params(&self) -> ConvParams {
        ConvParams {
            padding: self.padding,
            stride_width: self.stride.0,
            stride_height: self.stride.1,
            dilation_width_factor: self.dilation.0,
            dilation_height_factor: self.dilation.1,
            ..ConvParams::default()
        }
    }

    fn geometry(&self) -> ConvGeometry {
        let (input_height, input_width, input_depth) = self.input;
        let (filter_height, filter_width) = self.filter;
        let (stride_width, stride_height) = self.stride;
        let (dilation_width, dilation_height) = self.dilation;
        let output_height = compute_output_size(
            self.padding,
            input_height,
            filter_height,
            stride_height,
            dilation_height,
        );
        let output_width = compute_output_size(
            self.padding,
            input_width,
            filter_width,
            stride_width,
            dilation_width,
        );
        ConvGeometry {
            batches: self.batches,
            input_height,
            input_width,
            input_depth,
            filter_height,
            filter_width,
            output_height,
            output_width,
            output_depth: self.output_depth,
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
        }
    }
}

fn shape(input: (usize, usize, usize), filter: (usize, usize), output_depth: usize) -> Shape {
    Shape {
        batches: 1,
        input,
        filter,
        output_depth,
        stride: (1, 1),
        dilation: (1, 1),
        padding: Padding::Same,
    }
}

fn shapes() -> Vec<Shape> {
    vec![
        shape((5, 5, 3), (3, 3), 4),
        Shape {
            batches: 2,
            stride: (2, 1),
            padding: Padding::Valid,
            ..shape((6, 7, 2), (3, 2), 3)
        },
        Shape { dilation: (2, 2), ..shape((7, 7, 2), (3, 3), 2) },
        shape((4, 4, 5), (1, 1), 3),
        Shape { stride: (2, 2), ..shape((5, 5, 1), (3, 3), 2) },
    ]
}

fn random_case(seed: u64, s: &Shape, format: Option<&PackingFormat>) -> OpCase {
    let mut rng = rng(seed);
    let g = s.geometry();
    let range = format.map_or((-127, 127), |f| f.value_range());
    let zero_fraction = if format.is_some_and(|f| f.is_sparse()) { 0.6 } else { 0.1 };
    let filter_len = g.output_depth * g.filter_height * g.filter_width * g.input_depth;
    let filter_scales = (0..g.output_depth).map(|_| rng.gen_range(0.002f32..0.01)).collect();
    OpCase {
        input_dims: vec![g.batches, g.input_height, g.input_width, g.input_depth],
        input: random_values(&mut rng, g.input_size(), (-128, 127), 0.05),
        filter_dims: vec![g.output_depth, g.filter_height, g.filter_width, g.input_depth],
        weights: random_values(&mut rng, filter_len, range, zero_fraction),
        bias: Some(random_bias(&mut rng, g.output_depth)),
        output_dims: vec![g.batches, g.output_height, g.output_width, g.output_depth],
        quant: QuantSetup::typical(filter_scales),
    }
}

fn reference(case: &OpCase, s: &Shape) -> Vec<i8> {
    let multipliers = case.quant.multipliers(s.output_depth);
    conv_reference(
        &case.quant.reference(&multipliers),
        &s.geometry(),
        &case.input,
        &case.weights,
        case.bias.as_deref(),
    )
}

fn conv(s: &Shape) -> Conv {
    Conv::init(s.params(), KernelConfig::default())
}

fn ofpk_conv(s: &Shape, sparse: bool) -> Conv {
    let weight_layout = ConvWeightLayout::OneFilterPerKernel { sparse };
    Conv::init(ConvParams { weight_layout, ..s.params() }, KernelConfig::default())
}

/// Unpacked int8 filter; the dense path needs no scratch at all.
fn run_dense(op: &mut Conv, case: &OpCase) -> Result<Vec<i8>> {
    run(op, case, &StoredFilter::dense(&case.weights), &mut ScratchArena::new(0))
}

// ---------------------------------------------------------------------------
// Numeric agreement
// ---------------------------------------------------------------------------

/// A 1x3 image convolved with a 1x3 box filter under SAME padding; the
/// edge outputs drop the out-of-range tap.
#[test]
fn box_filter_with_same_padding() {
    let s = shape((1, 3, 1), (1, 3), 1);
    let case = OpCase {
        input_dims: vec![1, 1, 3, 1],
        input: vec![1, 2, 3],
        filter_dims: vec![1, 1, 3, 1],
        weights: vec![1, 1, 1],
        bias: None,
        output_dims: vec![1, 1, 3, 1],
        quant: QuantSetup::unit(),
    };
    let format = PackingFormat::new(4, 8, CompressionType::FilterwiseDense);
    for packed_format in hinted(format) {
        let stored = StoredFilter::packed(&case.weights, 1, packed_format);
        let out = run(&mut conv(&s), &case, &stored, &mut ScratchArena::new(ARENA_BYTES)).unwrap();
        assert_eq!(out, vec![3, 6, 5]);
    }
}

#[test]
fn every_format_and_variant_matches_reference() {
    for (si, s) in shapes().iter().enumerate() {
        let dense_case = random_case(0xc0 + si as u64, s, None);
        let dense = run_dense(&mut conv(s), &dense_case).unwrap();
        assert_eq!(dense, reference(&dense_case, s), "dense int8, {s:?}");

        for (fi, format) in formats().iter().enumerate() {
            let case = random_case(((si as u64) << 8) | fi as u64, s, Some(format));
            let expected = reference(&case, s);
            for packed_format in hinted(*format) {
                let mut op = conv(s);
                let stored = StoredFilter::packed(&case.weights, s.output_depth, packed_format);
                let out =
                    run(&mut op, &case, &stored, &mut ScratchArena::new(ARENA_BYTES)).unwrap();
                assert_eq!(out, expected, "{packed_format} via {:?}, {s:?}", op.variant());
            }
        }
    }
}

#[test]
fn padding_policy_follows_geometry() {
    let shapes = shapes();
    let expectations = [false, true, false, true, false];
    for (s, unpadded) in shapes.iter().zip(expectations) {
        let case = random_case(1, s, None);
        let mut op = conv(s);
        run_dense(&mut op, &case).unwrap();
        assert_eq!(op.without_padding(), Some(unpadded), "{s:?}");
    }
}

// ---------------------------------------------------------------------------
// One filter per kernel
// ---------------------------------------------------------------------------

#[test]
fn one_filter_per_kernel_matches_reference() {
    for sparse in [false, true] {
        for (si, s) in shapes().iter().enumerate() {
            let case = random_case(0x0f00 + si as u64, s, None);
            let ofpk = OneFilterPerKernel::new(case.weights.len(), s.output_depth, sparse).unwrap();
            let stored = StoredFilter { bytes: ofpk.pack(&case.weights).unwrap(), packing: None };

            let mut op = ofpk_conv(s, sparse);
            let out = run(&mut op, &case, &stored, &mut ScratchArena::new(ARENA_BYTES)).unwrap();
            assert_eq!(op.variant(), Some(EvalVariant::OneFilterPerKernel));
            assert_eq!(out, reference(&case, s), "sparse={sparse}, {s:?}");
        }
    }
}

#[test]
fn one_filter_per_kernel_needs_scratch() {
    let s = shapes()[0];
    let case = random_case(3, &s, None);
    let ofpk = OneFilterPerKernel::new(case.weights.len(), s.output_depth, false).unwrap();
    let stored = StoredFilter { bytes: ofpk.pack(&case.weights).unwrap(), packing: None };
    let err =
        run(&mut ofpk_conv(&s, false), &case, &stored, &mut ScratchArena::new(8)).unwrap_err();
    assert!(matches!(err, PackNnError::Kernel(KernelError::ScratchExhausted { .. })));
}

#[test]
fn one_filter_per_kernel_rejects_a_descriptor() {
    let s = shapes()[3];
    let format = PackingFormat::new(8, 8, CompressionType::FilterwiseDense);
    let case = random_case(4, &s, Some(&format));
    let stored = StoredFilter::packed(&case.weights, s.output_depth, format);
    let err = run(&mut ofpk_conv(&s, false), &case, &stored, &mut ScratchArena::new(ARENA_BYTES))
        .unwrap_err();
    assert!(matches!(err, PackNnError::Kernel(KernelError::InvalidParams { .. })));
}

#[test]
fn truncated_filter_at_eval_is_an_error() {
    let s = shapes()[1];
    for (fi, format) in formats().iter().enumerate() {
        let case = random_case(0x7d00 + fi as u64, &s, Some(format));
        for packed_format in hinted(*format) {
            let stored = StoredFilter::packed(&case.weights, s.output_depth, packed_format);
            let short = &stored.bytes[..stored.bytes.len() - 1];
            let mut op = conv(&s);
            let mut arena = ScratchArena::new(ARENA_BYTES);
            let err = run_with_eval_filter(&mut op, &case, &stored, short, &mut arena).unwrap_err();
            assert!(
                matches!(err, PackNnError::Packing(PackingError::BufferTooSmall { .. })),
                "{packed_format} via {:?}: {err}",
                op.variant()
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Prepare-time rejections
// ---------------------------------------------------------------------------

#[test]
fn filter_zero_point_must_be_zero() {
    let s = shapes()[0];
    let mut case = random_case(5, &s, None);
    case.quant.filter_zero_point = 1;
    let err = run_dense(&mut conv(&s), &case).unwrap_err();
    assert!(matches!(err, PackNnError::Kernel(KernelError::InvalidParams { .. })));
}

#[test]
fn filter_depth_must_match_input() {
    let s = shapes()[0];
    let mut case = random_case(6, &s, None);
    case.filter_dims[3] = 2;
    case.weights.truncate(case.filter_dims.iter().product());
    let err = run_dense(&mut conv(&s), &case).unwrap_err();
    assert!(matches!(err, PackNnError::Kernel(KernelError::ShapeMismatch { .. })));
}

#[test]
fn zero_stride_is_invalid() {
    let s = Shape { stride: (0, 1), ..shapes()[0] };
    let case = random_case(7, &shapes()[0], None);
    let err = run_dense(&mut conv(&s), &case).unwrap_err();
    assert!(matches!(err, PackNnError::Kernel(KernelError::InvalidParams { .. })));
}
