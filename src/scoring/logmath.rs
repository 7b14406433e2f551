//! Log-domain arithmetic shared by the prefix scorer and the processors.
//!
//! Every reduction saturates at [`LOG_ZERO`]: a set made only of impossible
//! terms stays impossible instead of drifting to `-inf` or NaN.

use crate::types::LOG_ZERO;

/// `log(exp(a) + exp(b))`.
#[inline(always)]
pub fn log_add(a: f32, b: f32) -> f32 {
    let (hi, lo) = if a >= b { (a, b) } else { (b, a) };
    if hi <= LOG_ZERO {
        return LOG_ZERO;
    }
    hi + (lo - hi).exp().ln_1p()
}

/// `log(sum(exp(v)))` over a small fixed set of values.
pub fn log_sum_exp<const N: usize>(values: [f32; N]) -> f32 {
    log_sum_exp_slice(&values)
}

pub fn log_sum_exp_slice(values: &[f32]) -> f32 {
    let mut acc = LogAccumulator::new();
    for &v in values {
        acc.push(v);
    }
    acc.finish()
}

/// Reduce a row-major `(outer, axis_len, inner)` array along its middle axis.
///
/// Returns an `(outer, inner)` array.
pub fn log_sum_exp_axis(data: &[f32], outer: usize, axis_len: usize, inner: usize) -> Vec<f32> {
    debug_assert_eq!(data.len(), outer * axis_len * inner);
    let mut out = vec![LOG_ZERO; outer * inner];
    for o in 0..outer {
        let base = o * axis_len * inner;
        for i in 0..inner {
            let mut acc = LogAccumulator::new();
            for a in 0..axis_len {
                acc.push(data[base + a * inner + i]);
            }
            out[o * inner + i] = acc.finish();
        }
    }
    out
}

/// Streaming log-sum-exp, one pass with a running maximum.
#[derive(Debug, Clone, Copy)]
pub struct LogAccumulator {
    max: f32,
    sum: f32,
}

impl LogAccumulator {
    pub fn new() -> Self {
        Self {
            max: f32::NEG_INFINITY,
            sum: 0.0,
        }
    }

    #[inline(always)]
    pub fn push(&mut self, value: f32) {
        if value == f32::NEG_INFINITY {
            return;
        }
        if value <= self.max {
            self.sum += (value - self.max).exp();
        } else {
            // The first push lands here with `sum == 0`, so no NaN from
            // `0 * exp(-inf)`.
            self.sum = if self.sum == 0.0 {
                1.0
            } else {
                self.sum * (self.max - value).exp() + 1.0
            };
            self.max = value;
        }
    }

    pub fn finish(self) -> f32 {
        if self.max <= LOG_ZERO {
            LOG_ZERO
        } else {
            self.max + self.sum.ln()
        }
    }
}

impl Default for LogAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

/// Numerically stable log-softmax of one score row, in place.
pub fn log_softmax_in_place(row: &mut [f32]) {
    let norm = log_sum_exp_slice(row);
    if norm <= LOG_ZERO {
        return;
    }
    for v in row.iter_mut() {
        *v -= norm;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn log_add_matches_naive_sum() {
        let a = 0.3f32.ln();
        let b = 0.2f32.ln();
        assert!(approx(log_add(a, b), 0.5f32.ln()));
        assert!(approx(log_add(b, a), 0.5f32.ln()));
    }

    #[test]
    fn log_zero_inputs_stay_log_zero() {
        assert_eq!(log_add(LOG_ZERO, LOG_ZERO), LOG_ZERO);
        assert_eq!(log_sum_exp([LOG_ZERO, LOG_ZERO, LOG_ZERO]), LOG_ZERO);
        assert_eq!(log_sum_exp([2.0 * LOG_ZERO, LOG_ZERO]), LOG_ZERO);
        assert_eq!(log_sum_exp([f32::NEG_INFINITY, f32::NEG_INFINITY]), LOG_ZERO);
        assert_eq!(log_sum_exp_slice(&[]), LOG_ZERO);
    }

    #[test]
    fn log_zero_term_does_not_perturb_sum() {
        let a = -3.25f32;
        assert_eq!(log_add(a, LOG_ZERO), a);
        assert_eq!(log_sum_exp([a, LOG_ZERO]), a);
        assert_eq!(log_sum_exp([LOG_ZERO, a]), a);
    }

    #[test]
    fn slice_reduction_is_stable_for_large_magnitudes() {
        let values = [-1000.0f32, -1000.0, -1000.0, -1000.0];
        assert!(approx(log_sum_exp_slice(&values), -1000.0 + 4.0f32.ln()));
        let values = [500.0f32, 500.0];
        assert!(approx(log_sum_exp_slice(&values), 500.0 + 2.0f32.ln()));
    }

    #[test]
    fn axis_reduction_over_middle_axis() {
        // shape (2, 2, 3)
        let p = |x: f32| x.ln();
        let data = vec![
            p(0.1),
            p(0.2),
            LOG_ZERO,
            p(0.3),
            p(0.4),
            LOG_ZERO,
            p(0.5),
            LOG_ZERO,
            LOG_ZERO,
            p(0.25),
            p(0.5),
            LOG_ZERO,
        ];
        let out = log_sum_exp_axis(&data, 2, 2, 3);
        assert_eq!(out.len(), 6);
        assert!(approx(out[0], p(0.4)));
        assert!(approx(out[1], p(0.6)));
        assert_eq!(out[2], LOG_ZERO);
        assert!(approx(out[3], p(0.75)));
        assert!(approx(out[4], p(0.5)));
        assert_eq!(out[5], LOG_ZERO);
    }

    #[test]
    fn log_softmax_normalizes_row() {
        let mut row = vec![1.0f32, 2.0, 3.0];
        log_softmax_in_place(&mut row);
        let total: f32 = row.iter().map(|v| v.exp()).sum();
        assert!(approx(total, 1.0));
        assert!(row[2] > row[1] && row[1] > row[0]);
    }
}
