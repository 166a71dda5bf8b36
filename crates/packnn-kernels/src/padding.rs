//! Spatial padding geometry and the padding policies of the conv kernels
//!
//! The policy is chosen once at Prepare. `WithPadding` bounds-checks every
//! filter tap and offsets the input inside the inner loop. `WithoutPadding`
//! is only valid when every tap of every output position lands inside the
//! input; it skips the bounds check and leaves the input offset to a
//! per-channel factor folded in after accumulation.

/// Padding scheme from the operator's builtin parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Padding {
    #[default]
    Same,
    Valid,
}

/// Leading padding, in input elements, per spatial axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PaddingValues {
    pub width: usize,
    pub height: usize,
}

/// Extent of a dilated filter along one axis.
pub fn effective_filter_size(filter_size: usize, dilation: usize) -> usize {
    (filter_size.max(1) - 1) * dilation + 1
}

/// Output extent along one axis for `padding`.
pub fn compute_output_size(
    padding: Padding,
    image_size: usize,
    filter_size: usize,
    stride: usize,
    dilation: usize,
) -> usize {
    let effective = effective_filter_size(filter_size, dilation);
    match padding {
        Padding::Same => image_size.div_ceil(stride),
        Padding::Valid if image_size < effective => 0,
        Padding::Valid => (image_size - effective + stride) / stride,
    }
}

/// Leading padding along one axis. Odd totals put the extra element at the
/// trailing edge.
pub fn compute_padding(
    stride: usize,
    dilation: usize,
    in_size: usize,
    filter_size: usize,
    out_size: usize,
) -> usize {
    let effective = effective_filter_size(filter_size, dilation);
    let needed = out_size.saturating_sub(1) * stride + effective;
    needed.saturating_sub(in_size) / 2
}

/// Whether every tap of every output position lies inside the input with no
/// padding at all. Pairs are `(width, height)`.
pub fn fits_without_padding(
    pad: PaddingValues,
    stride: (usize, usize),
    dilation: (usize, usize),
    input: (usize, usize),
    filter: (usize, usize),
    output: (usize, usize),
) -> bool {
    let axis_fits = |stride: usize, dilation: usize, input: usize, filter: usize, output: usize| {
        output == 0
            || (output - 1) * stride + effective_filter_size(filter, dilation) <= input
    };
    pad.width == 0
        && pad.height == 0
        && axis_fits(stride.0, dilation.0, input.0, filter.0, output.0)
        && axis_fits(stride.1, dilation.1, input.1, filter.1, output.1)
}

/// Compile-time padding policy of the conv and depthwise kernel templates.
pub trait PaddingPolicy {
    const NAME: &'static str;

    /// Whether input position `(x, y)` lies inside a `width` by `height` image.
    fn in_range(x: isize, y: isize, width: usize, height: usize) -> bool;

    /// Input value as it enters the accumulation.
    fn offset_input(value: i32, input_offset: i32) -> i32;
}

/// Per-tap bounds checks; out-of-range taps still consume their weights.
#[derive(Debug, Clone, Copy)]
pub struct WithPadding;

impl PaddingPolicy for WithPadding {
    const NAME: &'static str = "with_padding";

    #[inline(always)]
    fn in_range(x: isize, y: isize, width: usize, height: usize) -> bool {
        x >= 0 && (x as usize) < width && y >= 0 && (y as usize) < height
    }

    #[inline(always)]
    fn offset_input(value: i32, input_offset: i32) -> i32 {
        value + input_offset
    }
}

/// Unchecked fast path. The input offset lives in the per-channel factors.
#[derive(Debug, Clone, Copy)]
pub struct WithoutPadding;

impl PaddingPolicy for WithoutPadding {
    const NAME: &'static str = "without_padding";

    #[inline(always)]
    fn in_range(_x: isize, _y: isize, _width: usize, _height: usize) -> bool {
        true
    }

    #[inline(always)]
    fn offset_input(value: i32, _input_offset: i32) -> i32 {
        value
    }
}
