//! Statistical helpers
//!
//! Quantiles use linear interpolation between order statistics
//! (position `q·(n-1)`). Skewness and kurtosis are the biased moment
//! estimators. Functions return `None` instead of NaN when a statistic is
//! undefined for the input.

use statrs::distribution::{ChiSquared, ContinuousCDF};
use statrs::statistics::Statistics;

/// Fewest samples for which the normality test is computed
pub const NORMALITY_MIN_SAMPLES: usize = 8;

/// Non-null, finite values
pub fn finite(values: &[Option<f64>]) -> Vec<f64> {
    values
        .iter()
        .flatten()
        .copied()
        .filter(|v| v.is_finite())
        .collect()
}

pub fn sorted(values: &[f64]) -> Vec<f64> {
    let mut s = values.to_vec();
    s.sort_by(|a, b| a.total_cmp(b));
    s
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().mean())
    }
}

/// Variance with denominator n
pub fn population_variance(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().population_variance())
    }
}

/// Variance with denominator n-1
pub fn sample_variance(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        None
    } else {
        Some(values.iter().variance())
    }
}

pub fn population_std(values: &[f64]) -> Option<f64> {
    population_variance(values).map(f64::sqrt)
}

/// Linear-interpolated quantile of already sorted values
pub fn quantile_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    match sorted.len() {
        0 => None,
        1 => Some(sorted[0]),
        n => {
            let pos = q.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            let frac = pos - lo as f64;
            Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
        }
    }
}

pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    quantile_sorted(&sorted(values), q)
}

/// `p` in 0-100
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    quantile(values, p / 100.0)
}

pub fn median(values: &[f64]) -> Option<f64> {
    quantile(values, 0.5)
}

/// (Q1, Q3)
pub fn quartiles(values: &[f64]) -> Option<(f64, f64)> {
    let s = sorted(values);
    Some((quantile_sorted(&s, 0.25)?, quantile_sorted(&s, 0.75)?))
}

/// (median, median absolute deviation)
pub fn median_absolute_deviation(values: &[f64]) -> Option<(f64, f64)> {
    let med = median(values)?;
    let deviations: Vec<f64> = values.iter().map(|v| (v - med).abs()).collect();
    Some((med, median(&deviations)?))
}

/// (m2, m3, m4) central moments with denominator n
fn central_moments(values: &[f64]) -> Option<(f64, f64, f64)> {
    let mu = mean(values)?;
    let n = values.len() as f64;
    let (mut m2, mut m3, mut m4) = (0.0, 0.0, 0.0);
    for v in values {
        let d = v - mu;
        m2 += d * d;
        m3 += d * d * d;
        m4 += d * d * d * d;
    }
    Some((m2 / n, m3 / n, m4 / n))
}

/// Biased sample skewness g1 = m3 / m2^1.5
pub fn skewness(values: &[f64]) -> Option<f64> {
    let (m2, m3, _) = central_moments(values)?;
    if m2 <= 0.0 {
        return None;
    }
    Some(m3 / m2.powf(1.5))
}

/// Biased excess kurtosis g2 = m4 / m2² - 3
pub fn excess_kurtosis(values: &[f64]) -> Option<f64> {
    let (m2, _, m4) = central_moments(values)?;
    if m2 <= 0.0 {
        return None;
    }
    Some(m4 / (m2 * m2) - 3.0)
}

fn skew_z(g1: f64, n: f64) -> f64 {
    let y = g1 * ((n + 1.0) * (n + 3.0) / (6.0 * (n - 2.0))).sqrt();
    let beta2 = 3.0 * (n * n + 27.0 * n - 70.0) * (n + 1.0) * (n + 3.0)
        / ((n - 2.0) * (n + 5.0) * (n + 7.0) * (n + 9.0));
    let w2 = -1.0 + (2.0 * (beta2 - 1.0)).sqrt();
    let delta = 1.0 / (0.5 * w2.ln()).sqrt();
    let alpha = (2.0 / (w2 - 1.0)).sqrt();
    let y = if y == 0.0 { 1.0 } else { y };
    delta * (y / alpha + ((y / alpha).powi(2) + 1.0).sqrt()).ln()
}

fn kurtosis_z(b2: f64, n: f64) -> Option<f64> {
    let expected = 3.0 * (n - 1.0) / (n + 1.0);
    let var_b2 = 24.0 * n * (n - 2.0) * (n - 3.0) / ((n + 1.0).powi(2) * (n + 3.0) * (n + 5.0));
    let x = (b2 - expected) / var_b2.sqrt();
    let sqrt_beta1 = 6.0 * (n * n - 5.0 * n + 2.0) / ((n + 7.0) * (n + 9.0))
        * (6.0 * (n + 3.0) * (n + 5.0) / (n * (n - 2.0) * (n - 3.0))).sqrt();
    let a = 6.0 + 8.0 / sqrt_beta1 * (2.0 / sqrt_beta1 + (1.0 + 4.0 / sqrt_beta1.powi(2)).sqrt());
    let term1 = 1.0 - 2.0 / (9.0 * a);
    let denom = 1.0 + x * (2.0 / (a - 4.0)).sqrt();
    if denom == 0.0 {
        return None;
    }
    let term2 = denom.signum() * ((1.0 - 2.0 / a) / denom.abs()).cbrt();
    Some((term1 - term2) / (2.0 / (9.0 * a)).sqrt())
}

/// D'Agostino–Pearson K² omnibus test; returns the p-value.
///
/// `None` below [`NORMALITY_MIN_SAMPLES`] or for a constant sample.
pub fn normality_p_value(values: &[f64]) -> Option<f64> {
    if values.len() < NORMALITY_MIN_SAMPLES {
        return None;
    }
    let n = values.len() as f64;
    let g1 = skewness(values)?;
    let b2 = excess_kurtosis(values)? + 3.0;
    let k2 = skew_z(g1, n).powi(2) + kurtosis_z(b2, n)?.powi(2);
    if !k2.is_finite() {
        return None;
    }
    let chi2 = ChiSquared::new(2.0).ok()?;
    Some((1.0 - chi2.cdf(k2)).clamp(0.0, 1.0))
}

pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    let mx = mean(x)?;
    let my = mean(y)?;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (a, b) in x.iter().zip(y) {
        let dx = a - mx;
        let dy = b - my;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx <= 0.0 || syy <= 0.0 {
        return None;
    }
    Some((sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0))
}

/// 1-based ranks, ties share the average rank
pub fn average_ranks(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        let avg = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = avg;
        }
        i = j + 1;
    }
    ranks
}

/// 1-based ranks, ties broken by input order
pub fn ordinal_ranks(values: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]).then(a.cmp(&b)));
    let mut ranks = vec![0; values.len()];
    for (position, &idx) in order.iter().enumerate() {
        ranks[idx] = position + 1;
    }
    ranks
}

pub fn spearman(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() {
        return None;
    }
    pearson(&average_ranks(x), &average_ranks(y))
}

/// Kendall's tau-b
pub fn kendall_tau(x: &[f64], y: &[f64]) -> Option<f64> {
    let n = x.len();
    if n != y.len() || n < 2 {
        return None;
    }
    let (mut concordant, mut discordant) = (0u64, 0u64);
    let (mut tied_x, mut tied_y) = (0u64, 0u64);
    for i in 0..n {
        for j in (i + 1)..n {
            let dx = x[i] - x[j];
            let dy = y[i] - y[j];
            if dx == 0.0 {
                tied_x += 1;
            }
            if dy == 0.0 {
                tied_y += 1;
            }
            if dx == 0.0 || dy == 0.0 {
                continue;
            }
            if (dx > 0.0) == (dy > 0.0) {
                concordant += 1;
            } else {
                discordant += 1;
            }
        }
    }
    let pairs = n as f64 * (n - 1) as f64 / 2.0;
    tau_b(concordant as f64, discordant as f64, tied_x as f64, tied_y as f64, pairs)
}

/// Tau-b from pair counts, in floating point so large samples cannot overflow
fn tau_b(concordant: f64, discordant: f64, tied_x: f64, tied_y: f64, pairs: f64) -> Option<f64> {
    let denom = ((pairs - tied_x) * (pairs - tied_y)).sqrt();
    if denom.is_nan() || denom <= 0.0 {
        return None;
    }
    Some((concordant - discordant) / denom)
}

/// Dense rank by descending value; equal values share a rank, nulls stay null
pub fn dense_rank_desc(values: &[Option<f64>]) -> Vec<Option<usize>> {
    let mut distinct: Vec<f64> = finite(values);
    distinct.sort_by(|a, b| b.total_cmp(a));
    distinct.dedup();

    values
        .iter()
        .map(|v| {
            v.filter(|x| x.is_finite())
                .map(|x| distinct.partition_point(|&d| d > x) + 1)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_quantiles_linear() {
        let v = [1.0, 2.0, 3.0, 4.0, 100.0];
        assert_eq!(quartiles(&v), Some((2.0, 4.0)));
        assert_eq!(median(&v), Some(3.0));
        assert_abs_diff_eq!(quantile(&[1.0, 2.0], 0.5).unwrap(), 1.5);
        assert_eq!(quantile(&[], 0.5), None);
    }

    #[test]
    fn test_mad() {
        let (med, mad) = median_absolute_deviation(&[1.0, 2.0, 3.0, 4.0, 100.0]).unwrap();
        assert_eq!(med, 3.0);
        assert_eq!(mad, 1.0);
    }

    #[test]
    fn test_moments() {
        let symmetric = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_abs_diff_eq!(skewness(&symmetric).unwrap(), 0.0, epsilon = 1e-12);
        // Uniform-like sample: excess kurtosis of 1..5 is -1.3
        assert_abs_diff_eq!(excess_kurtosis(&symmetric).unwrap(), -1.3, epsilon = 1e-12);
        assert!(skewness(&[2.0, 2.0, 2.0]).is_none());
        assert!(skewness(&[1.0, 1.0, 1.0, 10.0]).unwrap() > 0.0);
    }

    #[test]
    fn test_variances() {
        let v = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_abs_diff_eq!(population_std(&v).unwrap(), 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(sample_variance(&v).unwrap(), 32.0 / 7.0, epsilon = 1e-12);
        assert!(sample_variance(&[1.0]).is_none());
    }

    #[test]
    fn test_normality_small_sample_is_none() {
        assert!(normality_p_value(&[1.0, 2.0, 3.0]).is_none());
    }

    #[test]
    fn test_normality_detects_heavy_outlier() {
        let mut v: Vec<f64> = (0..30).map(|i| (i % 7) as f64).collect();
        let p_clean = normality_p_value(&v).unwrap();
        v.push(1000.0);
        let p_outlier = normality_p_value(&v).unwrap();
        assert!((0.0..=1.0).contains(&p_clean));
        assert!(p_outlier < 0.01, "p = {}", p_outlier);
    }

    #[test]
    fn test_correlations() {
        let x = [1.0, 2.0, 3.0, 4.0];
        let y = [2.0, 4.0, 6.0, 8.0];
        assert_abs_diff_eq!(pearson(&x, &y).unwrap(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(spearman(&x, &[1.0, 10.0, 100.0, 1000.0]).unwrap(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(kendall_tau(&x, &[4.0, 3.0, 2.0, 1.0]).unwrap(), -1.0, epsilon = 1e-12);
        assert!(pearson(&x, &[1.0, 1.0, 1.0, 1.0]).is_none());
    }

    #[test]
    fn test_tau_b_large_counts() {
        // 100k observations: the squared pair count is far past i64
        let n = 100_000f64;
        let pairs = n * (n - 1.0) / 2.0;
        assert_abs_diff_eq!(tau_b(pairs, 0.0, 0.0, 0.0, pairs).unwrap(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(
            tau_b(0.75 * pairs, 0.25 * pairs, 0.0, 0.0, pairs).unwrap(),
            0.5,
            epsilon = 1e-12
        );
        assert!(tau_b(0.0, 0.0, pairs, 0.0, pairs).is_none());
    }

    #[test]
    fn test_kendall_with_ties() {
        // scipy.stats.kendalltau([1,2,2,3],[1,2,3,3]) = 0.8
        let tau = kendall_tau(&[1.0, 2.0, 2.0, 3.0], &[1.0, 2.0, 3.0, 3.0]).unwrap();
        assert_abs_diff_eq!(tau, 0.8, epsilon = 1e-12);
    }

    #[test]
    fn test_ranks() {
        assert_eq!(average_ranks(&[10.0, 20.0, 20.0, 5.0]), vec![2.0, 3.5, 3.5, 1.0]);
        assert_eq!(ordinal_ranks(&[10.0, 20.0, 20.0, 5.0]), vec![2, 3, 4, 1]);
    }

    #[test]
    fn test_dense_rank_desc() {
        let ranks = dense_rank_desc(&[Some(0.5), Some(0.9), None, Some(0.5), Some(0.1)]);
        assert_eq!(ranks, vec![Some(2), Some(1), None, Some(2), Some(3)]);
    }
}
