//! Small statistics helpers for the aggregation stage. All functions skip
//! NaN entries so gaps in telemetry or metrics do not poison group results.

fn finite(values: &[f64]) -> Vec<f64> {
    values.iter().copied().filter(|v| !v.is_nan()).collect()
}

/// Mean of the non-NaN values; NaN when there are none.
pub fn mean(values: &[f64]) -> f64 {
    let values = finite(values);
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Median of the non-NaN values; NaN when there are none.
pub fn median(values: &[f64]) -> f64 {
    let mut values = finite(values);
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = values.len();
    if n % 2 == 0 {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    } else {
        values[n / 2]
    }
}

/// Sample standard deviation (n - 1) of the non-NaN values; NaN when fewer
/// than two remain.
pub fn std_dev(values: &[f64]) -> f64 {
    let values = finite(values);
    let n = values.len();
    if n < 2 {
        return f64::NAN;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let variance = values
        .iter()
        .map(|v| {
            let diff = v - mean;
            diff * diff
        })
        .sum::<f64>()
        / (n - 1) as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_and_median_of_odd_sample() {
        let values = [3.0, 1.0, 2.0];
        assert_eq!(mean(&values), 2.0);
        assert_eq!(median(&values), 2.0);
    }

    #[test]
    fn median_of_even_sample_averages_the_middle() {
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
    }

    #[test]
    fn std_dev_uses_sample_variance() {
        // Variance of 2,4,4,4,5,5,7,9 with n-1 is 32/7
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((std_dev(&values) - (32.0f64 / 7.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn nan_entries_are_skipped() {
        assert_eq!(mean(&[1.0, f64::NAN, 3.0]), 2.0);
        assert_eq!(median(&[1.0, f64::NAN, 3.0]), 2.0);
    }

    #[test]
    fn empty_and_singleton_edge_cases() {
        assert!(mean(&[]).is_nan());
        assert!(median(&[f64::NAN]).is_nan());
        assert!(std_dev(&[1.0]).is_nan());
    }
}
