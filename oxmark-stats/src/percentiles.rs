//! Percentiles over sample-time distributions.

/// Compute the `p`-th percentile (0.0..=100.0) of `data` by linear
/// interpolation between closest ranks. Returns 0.0 for an empty slice.
///
/// `data` does not need to be sorted; a sorted copy is taken internally.
pub fn percentile(data: &[f64], p: f64) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mut sorted = data.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    percentile_sorted(&sorted, p)
}

/// Same as [`percentile`] but assumes `sorted` is already ascending.
pub fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let p = p.clamp(0.0, 100.0);
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_zero() {
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn single_element() {
        assert_eq!(percentile(&[42.0], 0.0), 42.0);
        assert_eq!(percentile(&[42.0], 100.0), 42.0);
    }

    #[test]
    fn median_of_even_count_interpolates() {
        assert_eq!(percentile(&[1.0, 2.0, 3.0, 4.0], 50.0), 2.5);
    }

    #[test]
    fn extremes_are_min_and_max() {
        let data = [5.0, 1.0, 9.0, 3.0];
        assert_eq!(percentile(&data, 0.0), 1.0);
        assert_eq!(percentile(&data, 100.0), 9.0);
    }

    #[test]
    fn p90_of_ten_values() {
        let data: Vec<f64> = (1..=10).map(|x| x as f64).collect();
        // rank = 0.9 * 9 = 8.1 -> 9 + 0.1 * (10 - 9)
        assert!((percentile(&data, 90.0) - 9.1).abs() < 1e-12);
    }

    #[test]
    fn unsorted_input_handled() {
        let data = [3.0, 1.0, 2.0];
        assert_eq!(percentile(&data, 50.0), 2.0);
    }

    #[test]
    fn out_of_range_p_clamped() {
        let data = [1.0, 2.0, 3.0];
        assert_eq!(percentile(&data, -5.0), 1.0);
        assert_eq!(percentile(&data, 250.0), 3.0);
    }
}
