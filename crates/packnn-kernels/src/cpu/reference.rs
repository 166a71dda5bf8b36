//! Dense int8 reference kernels
//!
//! Straight transcriptions of the quantized formulas with every offset kept
//! inside the accumulation. They allocate their output and are meant for
//! tests, benches and the fuzz harness, not for deployment.

use packnn_quantization::{ActivationRange, QuantizedMultiplier};

use super::{requantize, ConvGeometry};

/// Quantization parameters shared by the reference kernels.
#[derive(Debug, Clone, Copy)]
pub struct ReferenceQuant<'a> {
    pub input_offset: i32,
    pub filter_offset: i32,
    pub output_offset: i32,
    /// One entry for per-tensor scaling, or one per output channel.
    pub multipliers: &'a [QuantizedMultiplier],
    pub activation: ActivationRange,
}

impl ReferenceQuant<'_> {
    fn multiplier(&self, channel: usize) -> QuantizedMultiplier {
        if self.multipliers.len() == 1 {
            self.multipliers[0]
        } else {
            self.multipliers[channel]
        }
    }

    fn finish(&self, acc: i32, channel: usize) -> i8 {
        requantize(acc, self.multiplier(channel), self.output_offset, self.activation)
    }
}

/// `weights` is `[output_depth, accum_depth]`; the batch count is inferred
/// from `input`.
pub fn fully_connected_reference(
    q: &ReferenceQuant<'_>,
    input: &[i8],
    weights: &[i8],
    bias: Option<&[i32]>,
    accum_depth: usize,
    output_depth: usize,
) -> Vec<i8> {
    let batches = if accum_depth == 0 { 0 } else { input.len() / accum_depth };
    let mut output = Vec::with_capacity(batches * output_depth);
    for b in 0..batches {
        let x = &input[b * accum_depth..(b + 1) * accum_depth];
        for c in 0..output_depth {
            let w = &weights[c * accum_depth..(c + 1) * accum_depth];
            let mut acc: i32 = x
                .iter()
                .zip(w)
                .map(|(&x, &w)| (i32::from(w) + q.filter_offset) * (i32::from(x) + q.input_offset))
                .sum();
            acc += bias.map_or(0, |b| b[c]);
            output.push(q.finish(acc, c));
        }
    }
    output
}

/// `weights` is `[output_depth, filter_height, filter_width, input_depth]`.
pub fn conv_reference(
    q: &ReferenceQuant<'_>,
    g: &ConvGeometry,
    input: &[i8],
    weights: &[i8],
    bias: Option<&[i32]>,
) -> Vec<i8> {
    let mut output = Vec::with_capacity(g.output_size());
    for b in 0..g.batches {
        for out_y in 0..g.output_height {
            for out_x in 0..g.output_width {
                let origin = g.origin(out_x, out_y);
                for oc in 0..g.output_depth {
                    let mut acc = 0i32;
                    for fy in 0..g.filter_height {
                        for fx in 0..g.filter_width {
                            let (x, y) = g.tap(origin, fx, fy);
                            if !inside(g, x, y) {
                                continue;
                            }
                            for ic in 0..g.input_depth {
                                let xv = input[input_index(g, b, y as usize, x as usize, ic)];
                                let w = weights[((oc * g.filter_height + fy) * g.filter_width + fx)
                                    * g.input_depth
                                    + ic];
                                acc += (i32::from(w) + q.filter_offset)
                                    * (i32::from(xv) + q.input_offset);
                            }
                        }
                    }
                    acc += bias.map_or(0, |b| b[oc]);
                    output.push(q.finish(acc, oc));
                }
            }
        }
    }
    output
}

/// `weights` is `[1, filter_height, filter_width, output_depth]` with
/// `output_depth = input_depth * depth_multiplier`.
pub fn depthwise_conv_reference(
    q: &ReferenceQuant<'_>,
    g: &ConvGeometry,
    depth_multiplier: usize,
    input: &[i8],
    weights: &[i8],
    bias: Option<&[i32]>,
) -> Vec<i8> {
    let mut output = Vec::with_capacity(g.output_size());
    for b in 0..g.batches {
        for out_y in 0..g.output_height {
            for out_x in 0..g.output_width {
                let origin = g.origin(out_x, out_y);
                for ic in 0..g.input_depth {
                    for m in 0..depth_multiplier {
                        let oc = ic * depth_multiplier + m;
                        let mut acc = 0i32;
                        for fy in 0..g.filter_height {
                            for fx in 0..g.filter_width {
                                let (x, y) = g.tap(origin, fx, fy);
                                if !inside(g, x, y) {
                                    continue;
                                }
                                let xv = input[input_index(g, b, y as usize, x as usize, ic)];
                                let w = weights[(fy * g.filter_width + fx) * g.output_depth + oc];
                                acc += (i32::from(w) + q.filter_offset)
                                    * (i32::from(xv) + q.input_offset);
                            }
                        }
                        acc += bias.map_or(0, |b| b[oc]);
                        output.push(q.finish(acc, oc));
                    }
                }
            }
        }
    }
    output
}

fn inside(g: &ConvGeometry, x: isize, y: isize) -> bool {
    x >= 0 && (x as usize) < g.input_width && y >= 0 && (y as usize) < g.input_height
}

fn input_index(g: &ConvGeometry, b: usize, y: usize, x: usize, c: usize) -> usize {
    ((b * g.input_height + y) * g.input_width + x) * g.input_depth + c
}
