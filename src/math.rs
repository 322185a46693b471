//! Log-domain helpers shared by the factor tables, the objective and the sampler.

use rand::Rng;

/// Computes `log(sum(exp(values)))` without overflow.
///
/// Returns `NEG_INFINITY` for an empty slice or one holding only `NEG_INFINITY`,
/// and NaN as soon as any value is NaN.
pub fn log_sum(values: &[f64]) -> f64 {
    log_sum_iter(values.iter().copied())
}

/// Log-sum over every `stride`-th value starting at `start`.
pub fn log_sum_stride(values: &[f64], start: usize, stride: usize) -> f64 {
    log_sum_iter(values.iter().skip(start).step_by(stride).copied())
}

pub(crate) fn log_sum_iter<I>(values: I) -> f64
where
    I: Iterator<Item = f64> + Clone,
{
    let mut max = f64::NEG_INFINITY;
    for v in values.clone() {
        if v.is_nan() {
            return f64::NAN;
        }
        max = max.max(v);
    }
    if max.is_infinite() {
        // all -inf, or a +inf that dominates everything
        return max;
    }
    let sum: f64 = values.map(|v| (v - max).exp()).sum();
    max + sum.ln()
}

/// `log(exp(a) + exp(b))`.
pub fn log_add(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY {
        return b;
    }
    if b == f64::NEG_INFINITY {
        return a;
    }
    if a > b {
        a + (b - a).exp().ln_1p()
    } else {
        b + (a - b).exp().ln_1p()
    }
}

/// Shifts log scores so that they exponentiate to a distribution.
pub fn log_normalize(values: &mut [f64]) {
    let z = log_sum(values);
    for v in values.iter_mut() {
        *v -= z;
    }
}

pub fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    best
}

/// Draws an index from a (normalized) probability vector.
pub fn sample_from_distribution<R: Rng + ?Sized>(probs: &[f64], rng: &mut R) -> usize {
    let u: f64 = rng.gen();
    let mut cumulative = 0.0;
    for (i, &p) in probs.iter().enumerate() {
        cumulative += p;
        if u < cumulative {
            return i;
        }
    }
    // rounding left a sliver of mass; take the last label with any probability
    probs.iter().rposition(|&p| p > 0.0).unwrap_or(probs.len() - 1)
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    #[test]
    fn log_sum_matches_naive() {
        let v = [0.1_f64, -2.0, 3.5];
        let naive = v.iter().map(|x| x.exp()).sum::<f64>().ln();
        assert!((log_sum(&v) - naive).abs() < 1e-12);
    }

    #[test]
    fn log_sum_large_values() {
        let v = [1000.0, 1000.0];
        assert!((log_sum(&v) - (1000.0 + 2f64.ln())).abs() < 1e-9);
    }

    #[test]
    fn log_sum_all_neg_infinity() {
        assert_eq!(log_sum(&[f64::NEG_INFINITY; 3]), f64::NEG_INFINITY);
        assert_eq!(log_sum(&[]), f64::NEG_INFINITY);
    }

    #[test]
    fn log_sum_propagates_nan() {
        assert!(log_sum(&[f64::NAN; 2]).is_nan());
        assert!(log_sum(&[0.0, f64::NAN, 1.0]).is_nan());
        assert!(log_sum_stride(&[f64::NAN, 0.0, f64::NAN], 0, 2).is_nan());
    }

    #[test]
    fn strided() {
        let v = [0.0, 10.0, 0.0, 10.0];
        assert!((log_sum_stride(&v, 1, 2) - (10.0 + 2f64.ln())).abs() < 1e-12);
    }

    #[test]
    fn log_add_symmetric() {
        assert!((log_add(1.0, 2.0) - log_add(2.0, 1.0)).abs() < 1e-12);
        assert_eq!(log_add(f64::NEG_INFINITY, 2.0), 2.0);
    }

    #[test]
    fn sample_respects_zero_mass() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            assert_eq!(sample_from_distribution(&[0.0, 1.0, 0.0], &mut rng), 1);
        }
    }
}
