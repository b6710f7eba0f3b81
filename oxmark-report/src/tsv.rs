//! Tab-separated result file.
//!
//! One header line, one line per row, full-precision values. Missing scores
//! and errors are written as `NA` so downstream tooling can tell "absent"
//! from zero.

use crate::ResultRow;
use std::io::Write;

pub const TSV_HEADER: &str = "name\tmode\tsamples\tmean\terror\tunit";

/// Write rows as TSV to `writer`.
pub fn write_tsv<W: Write>(writer: &mut W, rows: &[ResultRow]) -> std::io::Result<()> {
    writeln!(writer, "{TSV_HEADER}")?;
    for row in rows {
        let mean = match row.score {
            Some(s) => s.to_string(),
            None => "NA".to_string(),
        };
        let error = match row.error {
            Some(e) => e.to_string(),
            None => "NA".to_string(),
        };
        writeln!(
            writer,
            "{}\t{}\t{}\t{}\t{}\t{}",
            row.name, row.mode, row.samples, mean, error, row.unit
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RowFlag;

    #[test]
    fn rows_serialize_with_header() {
        let rows = [
            ResultRow {
                name: "rw:read".to_string(),
                mode: "thrpt".to_string(),
                samples: 15,
                score: Some(123.456),
                error: Some(1.5),
                unit: "ops/ms".to_string(),
                flag: RowFlag::None,
            },
            ResultRow {
                name: "broken".to_string(),
                mode: "avgt".to_string(),
                samples: 0,
                score: None,
                error: None,
                unit: "ns/op".to_string(),
                flag: RowFlag::Skipped,
            },
        ];

        let mut buf = Vec::new();
        write_tsv(&mut buf, &rows).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], TSV_HEADER);
        assert_eq!(lines[1], "rw:read\tthrpt\t15\t123.456\t1.5\tops/ms");
        // Flags stay out of the machine-readable name.
        assert_eq!(lines[2], "broken\tavgt\t0\tNA\tNA\tns/op");
    }
}
