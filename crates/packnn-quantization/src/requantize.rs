//! Fixed-point requantization
//!
//! Bit-exact with the reference `MultiplyByQuantizedMultiplier`: a Q31
//! doubling high multiply that rounds ties upward, then an arithmetic shift
//! that rounds ties away from zero. Positive shifts are left shifts.

/// Q31 multiplier and power-of-two exponent. `shift > 0` shifts left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QuantizedMultiplier {
    pub multiplier: i32,
    pub shift: i32,
}

impl QuantizedMultiplier {
    /// The multiplier that leaves accumulators unchanged.
    pub const IDENTITY: Self = Self { multiplier: 1 << 30, shift: 1 };

    #[inline(always)]
    pub fn apply(&self, acc: i32) -> i32 {
        rescale(acc, self.multiplier, self.shift)
    }
}

/// `a * b / 2^31` rounded to nearest, ties upward. Saturates the single
/// overflow case `MIN * MIN`.
#[inline(always)]
pub fn saturating_rounding_doubling_high_mul(a: i32, b: i32) -> i32 {
    if a == i32::MIN && b == i32::MIN {
        return i32::MAX;
    }
    let ab = i64::from(a) * i64::from(b);
    let nudge: i64 = if ab >= 0 { 1 << 30 } else { 1 - (1 << 30) };
    ((ab + nudge) / (1i64 << 31)) as i32
}

/// Arithmetic right shift by `exponent`, rounding half away from zero.
#[inline(always)]
pub fn rounding_divide_by_pot(x: i32, exponent: i32) -> i32 {
    debug_assert!((0..=31).contains(&exponent));
    let mask = ((1i64 << exponent) - 1) as i32;
    let remainder = x & mask;
    let threshold = (mask >> 1) + i32::from(x < 0);
    (x >> exponent) + i32::from(remainder > threshold)
}

/// Scale `acc` by `multiplier * 2^shift / 2^31`.
#[inline(always)]
pub fn rescale(acc: i32, multiplier: i32, shift: i32) -> i32 {
    let left_shift = shift.max(0);
    let right_shift = (-shift).max(0);
    let shifted = acc.wrapping_mul(1i32.wrapping_shl(left_shift as u32));
    rounding_divide_by_pot(saturating_rounding_doubling_high_mul(shifted, multiplier), right_shift)
}

/// [`rescale`] for callers that store the exponent as a right shift.
#[inline(always)]
pub fn rescale_legacy(acc: i32, multiplier: i32, right_shift: i32) -> i32 {
    rescale(acc, multiplier, -right_shift)
}

/// Split `x` into a mantissa in `[0.5, 1)` and a power-of-two exponent.
fn frexp(x: f64) -> (f64, i32) {
    if x == 0.0 || !x.is_finite() {
        return (x, 0);
    }
    let bits = x.to_bits();
    let biased = ((bits >> 52) & 0x7ff) as i32;
    if biased == 0 {
        let (m, e) = frexp(x * f64::from_bits(0x4350_0000_0000_0000)); // 2^54
        return (m, e - 54);
    }
    let mantissa = f64::from_bits((bits & !(0x7ffu64 << 52)) | (1022u64 << 52));
    (mantissa, biased - 1022)
}

/// Convert a real multiplier to Q31 form.
pub fn quantize_multiplier(real_multiplier: f64) -> QuantizedMultiplier {
    if real_multiplier == 0.0 {
        return QuantizedMultiplier { multiplier: 0, shift: 0 };
    }
    let (q, mut shift) = frexp(real_multiplier);
    let mut q_fixed = (q * (1i64 << 31) as f64).round() as i64;
    debug_assert!(q_fixed <= 1i64 << 31);
    if q_fixed == 1i64 << 31 {
        q_fixed /= 2;
        shift += 1;
    }
    if shift < -31 {
        shift = 0;
        q_fixed = 0;
    }
    if shift > 30 {
        shift = 30;
        q_fixed = i64::from(i32::MAX);
    }
    QuantizedMultiplier { multiplier: q_fixed as i32, shift }
}

/// Per-output-channel multipliers for `input_scale * filter_scale[c] / output_scale`.
pub fn per_channel_multipliers(
    input_scale: f32,
    filter_scales: &[f32],
    output_scale: f32,
) -> Vec<QuantizedMultiplier> {
    filter_scales
        .iter()
        .map(|&fs| {
            let effective = f64::from(input_scale) * f64::from(fs) / f64::from(output_scale);
            quantize_multiplier(effective)
        })
        .collect()
}

/// Activation fused into an operator's output clamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FusedActivation {
    #[default]
    None,
    Relu,
    ReluN1To1,
    Relu6,
}

/// Clamp bounds in the output's quantized domain. `min <= max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivationRange {
    pub min: i32,
    pub max: i32,
}

impl ActivationRange {
    pub const INT8: Self = Self { min: i8::MIN as i32, max: i8::MAX as i32 };

    #[inline(always)]
    pub fn clamp(&self, v: i32) -> i32 {
        v.max(self.min).min(self.max)
    }
}

/// Int8 clamp bounds for `activation` given the output quantization.
pub fn calculate_activation_range(
    activation: FusedActivation,
    output_scale: f32,
    output_zero_point: i32,
) -> ActivationRange {
    let ActivationRange { min: qmin, max: qmax } = ActivationRange::INT8;
    let quantize = |x: f32| output_zero_point + (x / output_scale).round() as i32;
    let (min, max) = match activation {
        FusedActivation::None => (qmin, qmax),
        FusedActivation::Relu => (qmin.max(quantize(0.0)), qmax),
        FusedActivation::Relu6 => (qmin.max(quantize(0.0)), qmax.min(quantize(6.0))),
        FusedActivation::ReluN1To1 => (qmin.max(quantize(-1.0)), qmax.min(quantize(1.0))),
    };
    ActivationRange { min, max }
}
