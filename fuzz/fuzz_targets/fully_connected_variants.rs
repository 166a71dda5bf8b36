#![no_main]

//! Fuzz target: the packed fully-connected operator against the dense
//! reference.
//!
//! Invariants verified:
//!   1. Streaming and unpack-to-scratch variants are bit-exact with the
//!      reference for any weights, inputs, offsets and format.
//!   2. Prepare never panics on the shapes it accepts.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use packnn_common::{
    KernelConfig, QuantizationParams, RuntimeShape, TensorType, TensorView, TensorViewMut,
};
use packnn_kernels::cpu::reference::{fully_connected_reference, ReferenceQuant};
use packnn_kernels::{FullyConnected, FullyConnectedParams, OpTensors, PackedOperator, ScratchArena};
use packnn_quantization::{
    calculate_activation_range, pack_weights, per_channel_multipliers, CompressionType,
    FusedActivation, PackingFormat, UnpackingHint,
};

#[derive(Arbitrary, Debug)]
struct Input {
    bits_hint: u8,
    container_hint: u8,
    compression_hint: u8,
    max_speed: bool,
    accum_hint: u8,
    output_hint: u8,
    input_zero_point: i8,
    filter_zero_point: i8,
    output_zero_point: i8,
    input: Vec<i8>,
    weights: Vec<i8>,
}

fuzz_target!(|input: Input| {
    let bits = u32::from(input.bits_hint % 8) + 1;
    let container = [8, 16, 32][usize::from(input.container_hint % 3)];
    let compression = [
        CompressionType::Dense,
        CompressionType::FilterwiseDense,
        CompressionType::NoRunLengths,
        CompressionType::WordRunLengths,
    ][usize::from(input.compression_hint % 4)];
    let hint = if input.max_speed { UnpackingHint::MaxSpeed } else { UnpackingHint::MinMemory };
    let format = PackingFormat::new(bits, container, compression).with_hint(hint);

    let accum_depth = usize::from(input.accum_hint % 32) + 1;
    let output_depth = usize::from(input.output_hint % 8) + 1;
    if input.input.len() < accum_depth || input.weights.len() < accum_depth * output_depth {
        return;
    }
    let x = &input.input[..accum_depth];
    let (lo, hi) = format.value_range();
    let weights: Vec<i8> = input.weights[..accum_depth * output_depth]
        .iter()
        .map(|&w| i32::from(w).clamp(lo, hi) as i8)
        .collect();
    let packed = pack_weights(&weights, output_depth, &format).unwrap();

    let (input_scale, filter_scale, output_scale) = ([0.05f32], [0.004f32], [0.3f32]);
    let multipliers = per_channel_multipliers(input_scale[0], &filter_scale, output_scale[0]);
    let activation = calculate_activation_range(
        FusedActivation::None,
        output_scale[0],
        i32::from(input.output_zero_point),
    );
    let reference = ReferenceQuant {
        input_offset: -i32::from(input.input_zero_point),
        filter_offset: -i32::from(input.filter_zero_point),
        output_offset: i32::from(input.output_zero_point),
        multipliers: &multipliers,
        activation,
    };
    let expected =
        fully_connected_reference(&reference, x, &weights, None, accum_depth, output_depth);

    let input_view = TensorView::from_i8(&[1, accum_depth], x)
        .unwrap()
        .with_quantization(QuantizationParams::per_tensor(
            &input_scale,
            i32::from(input.input_zero_point),
        ));
    let filter_view = TensorView::new(
        TensorType::Int8,
        RuntimeShape::new(&[output_depth, accum_depth]).unwrap(),
        &packed,
    )
    .with_quantization(QuantizationParams::per_tensor(
        &filter_scale,
        i32::from(input.filter_zero_point),
    ));
    let mut out = vec![0i8; output_depth];
    let mut output = TensorViewMut::from_i8(&[1, output_depth], &mut out)
        .unwrap()
        .with_quantization(QuantizationParams::per_tensor(
            &output_scale,
            i32::from(input.output_zero_point),
        ));

    let mut arena = ScratchArena::new(4096);
    let mut op = FullyConnected::init(FullyConnectedParams::default(), KernelConfig::default());
    let tensors = OpTensors {
        input: input_view,
        filter: filter_view,
        bias: None,
        output: output.as_view(),
        packing: Some(format),
    };
    op.prepare(&mut arena, &tensors).unwrap();
    op.eval(&mut arena, &input_view, &filter_view, &mut output).unwrap();
    drop(output);
    assert_eq!(out, expected, "{format}");
});
