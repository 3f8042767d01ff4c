//! Summary statistics over bootstrap sample sequences.
//!
//! Percentiles use the R-7 definition (linear interpolation between order
//! statistics), the default of most numerical environments. Every function maps an
//! empty input to 0.0 so that degenerate engines still emit finite artifacts.

/// Percentile `q` (in [0, 100]) of `data`, R-7 interpolation.
pub fn percentile(data: &[f64], q: f64) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mut sorted = data.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    percentile_sorted(&sorted, q)
}

/// Same as [`percentile`] for data already sorted ascending.
pub fn percentile_sorted(sorted: &[f64], q: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n == 1 {
        return sorted[0];
    }

    let p = (q / 100.0).clamp(0.0, 1.0);
    let h = (n - 1) as f64 * p;
    let lo = h.floor() as usize;
    if lo >= n - 1 {
        return sorted[n - 1];
    }
    let frac = h - lo as f64;
    sorted[lo] + frac * (sorted[lo + 1] - sorted[lo])
}

/// Lower and upper percentile bounds of a two-sided interval at `confidence_level`.
pub fn percentile_interval(data: &[f64], confidence_level: f64) -> (f64, f64) {
    if data.is_empty() {
        return (0.0, 0.0);
    }
    let alpha = 1.0 - confidence_level;
    let mut sorted = data.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    (
        percentile_sorted(&sorted, 100.0 * alpha / 2.0),
        percentile_sorted(&sorted, 100.0 * (1.0 - alpha / 2.0)),
    )
}

pub fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        0.0
    } else {
        data.iter().sum::<f64>() / data.len() as f64
    }
}

/// Sample standard deviation (ddof = 1). Fewer than two values yield 0.0.
pub fn sample_std(data: &[f64]) -> f64 {
    let n = data.len();
    if n < 2 {
        return 0.0;
    }
    let m = mean(data);
    let ss: f64 = data.iter().map(|x| (x - m) * (x - m)).sum();
    (ss / (n - 1) as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn percentile_interpolates_between_order_statistics() {
        let data = [4.0, 1.0, 3.0, 2.0, 5.0];
        assert_abs_diff_eq!(percentile(&data, 0.0), 1.0);
        assert_abs_diff_eq!(percentile(&data, 50.0), 3.0);
        assert_abs_diff_eq!(percentile(&data, 100.0), 5.0);
        // h = 4 * 0.025 = 0.1 -> 1.0 + 0.1 * (2.0 - 1.0)
        assert_abs_diff_eq!(percentile(&data, 2.5), 1.1, epsilon = 1e-12);
        // h = 4 * 0.975 = 3.9 -> 4.0 + 0.9 * (5.0 - 4.0)
        assert_abs_diff_eq!(percentile(&data, 97.5), 4.9, epsilon = 1e-12);
    }

    #[test]
    fn interval_bounds_are_ordered() {
        let data: Vec<f64> = (0..200).map(|i| ((i * 37) % 101) as f64 / 101.0).collect();
        let (lo, hi) = percentile_interval(&data, 0.95);
        assert!(lo <= hi);
        assert!(lo >= 0.0 && hi <= 1.0);
    }

    #[test]
    fn degenerate_inputs_are_finite() {
        assert_eq!(percentile(&[], 50.0), 0.0);
        assert_eq!(percentile_interval(&[], 0.95), (0.0, 0.0));
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(sample_std(&[]), 0.0);
        assert_eq!(sample_std(&[0.7]), 0.0);
        assert_eq!(percentile(&[0.3], 97.5), 0.3);
    }

    #[test]
    fn sample_std_uses_bessel_correction() {
        let data = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        // population variance 4.0, sample variance 32 / 7
        assert_abs_diff_eq!(sample_std(&data), (32.0_f64 / 7.0).sqrt(), epsilon = 1e-12);
    }
}
