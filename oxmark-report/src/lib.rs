//! Result rows and their renderings.
//!
//! The supervisor aggregates per-fork frames into [`ResultRow`]s; this crate
//! turns rows into the final console table and the tab-separated result file.
//! Rows carry plain strings and numbers so the crate stays independent of
//! the wire protocol.

pub mod table;
pub mod tsv;

pub use table::format_table;
pub use tsv::write_tsv;

/// Condition marker attached to a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RowFlag {
    #[default]
    None,
    /// Some measurement iterations were discarded because an operation body
    /// panicked.
    InvalidIterations(u32),
    /// At least one fork was aborted by the hard timeout; the score covers
    /// the completed forks only.
    Incomplete,
    /// The unit produced no score at all (fixture failure, every fork lost).
    Skipped,
}

/// One line of the final report.
#[derive(Debug, Clone)]
pub struct ResultRow {
    /// Benchmark id, `group:role`, or a derived name like `rtt:p99`.
    pub name: String,
    /// Mode label (`avgt`, `thrpt`, `ss`, `sample`).
    pub mode: String,
    /// Number of scores behind the mean.
    pub samples: u32,
    /// Mean score in the output unit. `None` renders as `N/A`.
    pub score: Option<f64>,
    /// 99.9% confidence half-width in the output unit, when computable.
    pub error: Option<f64>,
    /// Unit column text, e.g. `ns/op` or `ops/ms`.
    pub unit: String,
    pub flag: RowFlag,
}

impl ResultRow {
    fn display_name(&self) -> String {
        match self.flag {
            RowFlag::None => self.name.clone(),
            RowFlag::InvalidIterations(n) => format!("{} ({n} invalid)", self.name),
            RowFlag::Incomplete => format!("{} (incomplete)", self.name),
            RowFlag::Skipped => format!("{} (failed)", self.name),
        }
    }
}

/// Format `value` to `sig` significant figures with a fixed decimal point.
pub fn format_sig(value: f64, sig: u32) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    if value == 0.0 {
        return format!("{value:.3}");
    }
    let magnitude = value.abs().log10().floor() as i32;
    let decimals = (sig as i32 - 1 - magnitude).clamp(0, 9) as usize;
    format!("{value:.decimals$}")
}

/// Convert a raw score (ns/op, or ops/ns for rates) into the output unit.
pub fn scale_score(raw: f64, is_rate: bool, unit_nanos: u64) -> f64 {
    if is_rate {
        raw * unit_nanos as f64
    } else {
        raw / unit_nanos as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn six_significant_figures() {
        assert_eq!(format_sig(123456.7, 6), "123457");
        assert_eq!(format_sig(1234.567, 6), "1234.57");
        assert_eq!(format_sig(1.234567, 6), "1.23457");
        assert_eq!(format_sig(0.001234567, 6), "0.00123457");
        assert_eq!(format_sig(0.0, 6), "0.000");
        assert_eq!(format_sig(-42.42424, 6), "-42.4242");
    }

    #[test]
    fn tiny_values_cap_their_decimals() {
        // Nine decimals at most, even for sub-nanosecond rates.
        assert_eq!(format_sig(0.000000001234, 6), "0.000000001");
    }

    #[test]
    fn scaling_durations_and_rates() {
        // 1234 ns/op in microseconds.
        assert_eq!(scale_score(1234.0, false, 1_000), 1.234);
        // 0.5 ops/ns in ops/ms.
        assert_eq!(scale_score(0.5, true, 1_000_000), 500_000.0);
    }

    #[test]
    fn flags_annotate_the_name() {
        let mut row = ResultRow {
            name: "alloc_small".to_string(),
            mode: "avgt".to_string(),
            samples: 10,
            score: Some(1.0),
            error: None,
            unit: "ns/op".to_string(),
            flag: RowFlag::None,
        };
        assert_eq!(row.display_name(), "alloc_small");
        row.flag = RowFlag::InvalidIterations(2);
        assert_eq!(row.display_name(), "alloc_small (2 invalid)");
        row.flag = RowFlag::Incomplete;
        assert_eq!(row.display_name(), "alloc_small (incomplete)");
        row.flag = RowFlag::Skipped;
        assert_eq!(row.display_name(), "alloc_small (failed)");
    }
}
