//! Student-t quantiles for the two-sided 99.9% confidence interval.
//!
//! Quantiles t(0.9995, df) are tabulated exactly for df <= 30, linearly
//! interpolated between the standard anchors up to df = 120, and clamped to
//! the normal-distribution asymptote beyond that.

/// t(0.9995, df) for df = 1..=30.
const T_999_SMALL: [f64; 30] = [
    636.619, 31.599, 12.924, 8.610, 6.869, 5.959, 5.408, 5.041, 4.781, 4.587, 4.437, 4.318, 4.221,
    4.140, 4.073, 4.015, 3.965, 3.922, 3.883, 3.850, 3.819, 3.792, 3.768, 3.745, 3.725, 3.707,
    3.690, 3.674, 3.659, 3.646,
];

/// Anchors (df, t) for df > 30.
const T_999_ANCHORS: [(f64, f64); 6] = [
    (30.0, 3.646),
    (40.0, 3.551),
    (50.0, 3.496),
    (60.0, 3.460),
    (80.0, 3.416),
    (100.0, 3.390),
];

/// Normal-distribution limit of t(0.9995, df) as df grows.
pub const T_999_ASYMPTOTE: f64 = 3.291;

const T_999_AT_120: f64 = 3.373;

/// Two-sided 99.9% Student-t quantile for `df` degrees of freedom.
///
/// `df = 0` has no defined quantile; callers gate on sample size first, so
/// it conservatively returns the df = 1 value.
pub fn t_quantile_999(df: usize) -> f64 {
    match df {
        0 => T_999_SMALL[0],
        1..=30 => T_999_SMALL[df - 1],
        31..=100 => {
            let x = df as f64;
            let mut window = (T_999_ANCHORS[0], T_999_ANCHORS[1]);
            for pair in T_999_ANCHORS.windows(2) {
                if x >= pair[0].0 && x <= pair[1].0 {
                    window = (pair[0], pair[1]);
                    break;
                }
            }
            let ((x0, y0), (x1, y1)) = window;
            y0 + (y1 - y0) * (x - x0) / (x1 - x0)
        }
        101..=120 => {
            let x = df as f64;
            3.390 + (T_999_AT_120 - 3.390) * (x - 100.0) / 20.0
        }
        _ => T_999_ASYMPTOTE,
    }
}

/// Half-width of the 99.9% confidence interval for a sample of size `n`
/// with sample standard deviation `std_dev`.
pub fn half_width_999(std_dev: f64, n: usize) -> f64 {
    if n < 2 {
        return 0.0;
    }
    t_quantile_999(n - 1) * std_dev / (n as f64).sqrt()
}
