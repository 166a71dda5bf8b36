//! Fully-connected kernel template

use packnn_quantization::{ActivationRange, QuantizedMultiplier, WeightStream};

use super::requantize;

/// Shapes and Prepare-time factors of one fully-connected Eval.
#[derive(Debug, Clone, Copy)]
pub struct FullyConnectedArgs<'a> {
    pub batches: usize,
    pub accum_depth: usize,
    pub output_depth: usize,
    pub weights_offset: i32,
    pub output_offset: i32,
    pub multiplier: QuantizedMultiplier,
    pub activation: ActivationRange,
    /// `bias[c] + input_offset * Σ_d w[c, d] + accum_depth * input_offset * weights_offset`
    pub sum_of_weights_factor: &'a [i32],
}

/// `output[b, c] = clamp(rescale(Σ_d (w[c, d] + wo) * (x[b, d] + io) + bias[c]) + oo)`.
///
/// Every offset term except `wo * Σ_d x[b, d]` is folded into
/// `sum_of_weights_factor`, so the inner loop multiplies raw values only.
/// `open` is called once per batch row; a run ends after every output row.
pub fn fully_connected<S: WeightStream>(
    args: &FullyConnectedArgs<'_>,
    input: &[i8],
    mut open: impl FnMut() -> S,
    output: &mut [i8],
) {
    debug_assert_eq!(input.len(), args.batches * args.accum_depth);
    debug_assert_eq!(output.len(), args.batches * args.output_depth);
    debug_assert_eq!(args.sum_of_weights_factor.len(), args.output_depth);

    let rows = input.chunks_exact(args.accum_depth).zip(output.chunks_exact_mut(args.output_depth));
    for (x, out) in rows {
        let sum_of_inputs_factor = if args.weights_offset != 0 {
            args.weights_offset * x.iter().map(|&v| i32::from(v)).sum::<i32>()
        } else {
            0
        };

        let mut weights = open();
        for (o, &factor) in out.iter_mut().zip(args.sum_of_weights_factor) {
            let mut acc = factor + sum_of_inputs_factor;
            for &v in x {
                acc += weights.next_weight() * i32::from(v);
            }
            weights.end_run();
            *o = requantize(acc, args.multiplier, args.output_offset, args.activation);
        }
    }
}
