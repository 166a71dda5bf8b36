//! Depthwise-convolution kernel template

use packnn_quantization::{ActivationRange, QuantizedMultiplier, WeightStream};

use super::{requantize, ConvGeometry};
use crate::padding::PaddingPolicy;

/// Geometry and Prepare-time factors of one depthwise-conv Eval.
#[derive(Debug, Clone, Copy)]
pub struct DepthwiseConvArgs<'a> {
    pub geometry: ConvGeometry,
    pub depth_multiplier: usize,
    pub input_offset: i32,
    pub output_offset: i32,
    pub activation: ActivationRange,
    pub multipliers: &'a [QuantizedMultiplier],
    pub channel_factor: &'a [i32],
}

/// NHWC depthwise convolution over filters laid out `[1, fh, fw, out_c]`,
/// with `out_c = in_c * depth_multiplier + m`.
///
/// Weights are stored tap-major, so each output pixel accumulates into
/// `acc` (at least `output_depth` long) across taps. `open` is called once
/// per output pixel and a run ends after every tap.
pub fn depthwise_conv<P: PaddingPolicy, S: WeightStream>(
    args: &DepthwiseConvArgs<'_>,
    input: &[i8],
    mut open: impl FnMut() -> S,
    acc: &mut [i32],
    output: &mut [i8],
) {
    let g = &args.geometry;
    let dm = args.depth_multiplier;
    debug_assert_eq!(g.output_depth, g.input_depth * dm);
    debug_assert_eq!(input.len(), g.input_size());
    debug_assert_eq!(output.len(), g.output_size());

    let acc = &mut acc[..g.output_depth];
    let row = g.input_width * g.input_depth;
    let image_size = g.input_height * row;
    let mut pixels = output.chunks_exact_mut(g.output_depth.max(1));

    for b in 0..g.batches {
        let image = &input[b * image_size..(b + 1) * image_size];
        for out_y in 0..g.output_height {
            for out_x in 0..g.output_width {
                let origin = g.origin(out_x, out_y);
                acc.fill(0);
                let mut weights = open();

                for fy in 0..g.filter_height {
                    for fx in 0..g.filter_width {
                        let (x, y) = g.tap(origin, fx, fy);
                        if P::in_range(x, y, g.input_width, g.input_height) {
                            let at = y as usize * row + x as usize * g.input_depth;
                            let pixel = &image[at..at + g.input_depth];
                            for (channel_acc, &v) in acc.chunks_exact_mut(dm).zip(pixel) {
                                let v = P::offset_input(i32::from(v), args.input_offset);
                                for a in channel_acc {
                                    *a += weights.next_weight() * v;
                                }
                            }
                        } else {
                            for _ in 0..g.output_depth {
                                weights.next_weight();
                            }
                        }
                        weights.end_run();
                    }
                }

                let Some(out) = pixels.next() else { return };
                for (oc, o) in out.iter_mut().enumerate() {
                    let sum = acc[oc] + args.channel_factor[oc];
                    *o = requantize(sum, args.multipliers[oc], args.output_offset, args.activation);
                }
            }
        }
    }
}
