//! Statistical summaries for per-iteration benchmark scores.
//!
//! The reported interval is the classic closed-form Student-t confidence
//! interval at the 99.9% level: `error = t(0.999, n-1) * stddev / sqrt(n)`.
//! Samples with fewer than [`MIN_SAMPLES_FOR_ERROR`] scores report no error.

pub mod confidence;
pub mod percentiles;

pub use confidence::{half_width_999, t_quantile_999};
pub use percentiles::percentile;

/// Minimum sample count for a meaningful confidence interval.
pub const MIN_SAMPLES_FOR_ERROR: usize = 3;

/// Summary of one benchmark's measurement sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub n: usize,
    pub mean: f64,
    /// Sample standard deviation (n-1 divisor); 0.0 for n < 2.
    pub std_dev: f64,
    /// Half-width of the 99.9% confidence interval; `None` for n < 3.
    pub error: Option<f64>,
}

/// Arithmetic mean. Returns 0.0 for an empty slice.
pub fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

/// Sample standard deviation with the n-1 divisor. `None` for n < 2.
pub fn std_dev(data: &[f64]) -> Option<f64> {
    if data.len() < 2 {
        return None;
    }
    let m = mean(data);
    let var = data.iter().map(|x| (x - m) * (x - m)).sum::<f64>() / (data.len() - 1) as f64;
    Some(var.sqrt())
}

/// Compute the full summary for a sample. `None` when the sample is empty.
pub fn summarize(data: &[f64]) -> Option<Summary> {
    if data.is_empty() {
        return None;
    }
    let n = data.len();
    let m = mean(data);
    let sd = std_dev(data).unwrap_or(0.0);
    let error = if n >= MIN_SAMPLES_FOR_ERROR {
        Some(half_width_999(sd, n))
    } else {
        None
    };
    Some(Summary {
        n,
        mean: m,
        std_dev: sd,
        error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_of_known_values() {
        assert_eq!(mean(&[1.0, 2.0, 3.0, 4.0]), 2.5);
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(mean(&[7.0]), 7.0);
    }

    #[test]
    fn std_dev_of_known_values() {
        // Variance of [2, 4, 4, 4, 5, 5, 7, 9] with n-1 divisor is 32/7.
        let data = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let sd = std_dev(&data).unwrap();
        assert!((sd - (32.0f64 / 7.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn std_dev_needs_two_points() {
        assert!(std_dev(&[]).is_none());
        assert!(std_dev(&[1.0]).is_none());
        assert!(std_dev(&[1.0, 1.0]).is_some());
    }

    #[test]
    fn summary_of_constant_sample() {
        let s = summarize(&[5.0; 10]).unwrap();
        assert_eq!(s.n, 10);
        assert_eq!(s.mean, 5.0);
        assert_eq!(s.std_dev, 0.0);
        assert_eq!(s.error, Some(0.0));
    }

    #[test]
    fn summary_error_absent_below_three_samples() {
        assert!(summarize(&[1.0]).unwrap().error.is_none());
        assert!(summarize(&[1.0, 2.0]).unwrap().error.is_none());
        assert!(summarize(&[1.0, 2.0, 3.0]).unwrap().error.is_some());
    }

    #[test]
    fn summary_of_empty_sample_is_none() {
        assert!(summarize(&[]).is_none());
    }

    #[test]
    fn mean_lies_within_interval() {
        // Self-consistency: the reported mean is the center of the interval.
        let data = [10.0, 11.0, 9.5, 10.5, 10.2];
        let s = summarize(&data).unwrap();
        let err = s.error.unwrap();
        let m = mean(&data);
        assert!(m >= s.mean - err && m <= s.mean + err);
        assert!(err > 0.0);
    }

    #[test]
    fn hand_computed_interval() {
        // n = 5, df = 4, t = 8.610; stddev of [1..5] = sqrt(2.5).
        let data = [1.0, 2.0, 3.0, 4.0, 5.0];
        let s = summarize(&data).unwrap();
        let expected = 8.610 * 2.5f64.sqrt() / 5.0f64.sqrt();
        assert!((s.error.unwrap() - expected).abs() < 1e-9);
    }
}
