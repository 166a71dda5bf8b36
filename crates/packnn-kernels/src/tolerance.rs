//! Bounded-divergence comparison for int8 kernel outputs
//!
//! Some accelerator kernels accumulate int8 products in 16-bit registers and
//! may differ from the reference path by one LSB, or wrap from one end of the
//! int8 range to the other. `rounding_diffs_per_thousand` states how many such
//! differences a comparison accepts.

/// Result of [`check_within_lsb_tolerance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LsbToleranceReport {
    /// Elements compared.
    pub compared: usize,
    /// Elements that differ at all.
    pub lsb_errors: usize,
    /// Differing elements the tolerance accepts.
    pub allowed_errors: usize,
    /// Largest per-element difference, with min/max wrap-around counted as 1.
    pub max_abs_diff: u32,
    /// First element whose difference exceeds the per-element tolerance.
    pub first_violation: Option<usize>,
    pub lengths_match: bool,
}

impl LsbToleranceReport {
    pub fn passed(&self) -> bool {
        self.lengths_match
            && self.first_violation.is_none()
            && self.lsb_errors <= self.allowed_errors
    }
}

/// Compare `observed` against `expected`, allowing one-LSB differences in up
/// to `rounding_diffs_per_thousand` of every thousand elements (rounded up).
/// Zero demands an exact match.
pub fn check_within_lsb_tolerance(
    expected: &[i8],
    observed: &[i8],
    rounding_diffs_per_thousand: u32,
) -> LsbToleranceReport {
    let compared = expected.len().min(observed.len());
    let per_thousand = rounding_diffs_per_thousand as usize;
    let allowed_errors =
        if per_thousand > 0 { (compared * per_thousand).div_ceil(1000) } else { 0 };
    let tolerance = u32::from(per_thousand > 0);

    let mut lsb_errors = 0;
    let mut max_abs_diff = 0;
    let mut first_violation = None;
    for (i, (&e, &o)) in expected.iter().zip(observed).enumerate() {
        let diff = lsb_distance(e, o);
        if diff == 0 {
            continue;
        }
        lsb_errors += 1;
        max_abs_diff = max_abs_diff.max(diff);
        if diff > tolerance && first_violation.is_none() {
            tracing::debug!(index = i, expected = e, observed = o, "difference beyond tolerance");
            first_violation = Some(i);
        }
    }

    LsbToleranceReport {
        compared,
        lsb_errors,
        allowed_errors,
        max_abs_diff,
        first_violation,
        lengths_match: expected.len() == observed.len(),
    }
}

/// Absolute difference of two int8 values, except that a MIN/MAX flip is a
/// single-LSB wrap.
fn lsb_distance(e: i8, o: i8) -> u32 {
    let diff = u32::from((i16::from(e) - i16::from(o)).unsigned_abs());
    if diff == u32::from(u8::MAX) { 1 } else { diff }
}
