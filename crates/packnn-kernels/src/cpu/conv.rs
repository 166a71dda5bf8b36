//! Convolution kernel template

use packnn_quantization::{ActivationRange, QuantizedMultiplier, WeightStream};

use super::{requantize, ConvGeometry};
use crate::padding::PaddingPolicy;

/// Geometry and Prepare-time factors of one conv Eval.
#[derive(Debug, Clone, Copy)]
pub struct ConvArgs<'a> {
    pub geometry: ConvGeometry,
    pub input_offset: i32,
    pub output_offset: i32,
    pub activation: ActivationRange,
    /// One per output channel.
    pub multipliers: &'a [QuantizedMultiplier],
    /// Added to each channel's raw sum: the bias, plus `input_offset * Σ w`
    /// under [`WithoutPadding`](crate::padding::WithoutPadding).
    pub channel_factor: &'a [i32],
}

/// NHWC convolution over filters laid out `[out_c, fh, fw, in_c]`.
///
/// `open` is called once per output pixel and walks every filter in order;
/// a run ends after each output channel. Taps outside the input still
/// consume their weights.
pub fn conv<P: PaddingPolicy, S: WeightStream>(
    args: &ConvArgs<'_>,
    input: &[i8],
    mut open: impl FnMut() -> S,
    output: &mut [i8],
) {
    let g = &args.geometry;
    debug_assert_eq!(input.len(), g.input_size());
    debug_assert_eq!(output.len(), g.output_size());
    debug_assert_eq!(args.multipliers.len(), g.output_depth);

    let row = g.input_width * g.input_depth;
    let image_size = g.input_height * row;
    let mut out = output.iter_mut();

    for b in 0..g.batches {
        let image = &input[b * image_size..(b + 1) * image_size];
        for out_y in 0..g.output_height {
            for out_x in 0..g.output_width {
                let origin = g.origin(out_x, out_y);
                let mut weights = open();

                for oc in 0..g.output_depth {
                    let mut acc = 0i32;
                    for fy in 0..g.filter_height {
                        for fx in 0..g.filter_width {
                            let (x, y) = g.tap(origin, fx, fy);
                            if P::in_range(x, y, g.input_width, g.input_height) {
                                let at = y as usize * row + x as usize * g.input_depth;
                                for &v in &image[at..at + g.input_depth] {
                                    let v = P::offset_input(i32::from(v), args.input_offset);
                                    acc += weights.next_weight() * v;
                                }
                            } else {
                                for _ in 0..g.input_depth {
                                    weights.next_weight();
                                }
                            }
                        }
                    }
                    weights.end_run();

                    acc += args.channel_factor[oc];
                    if let Some(o) = out.next() {
                        *o = requantize(
                            acc,
                            args.multipliers[oc],
                            args.output_offset,
                            args.activation,
                        );
                    }
                }
            }
        }
    }
}
