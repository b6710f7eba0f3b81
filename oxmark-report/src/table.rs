//! Console result table.
//!
//! Mirrors the classic benchmark-report layout: a header line, one row per
//! result, name column left-aligned, numeric columns right-aligned, scores
//! to six significant figures with the confidence half-width after a `±`.

use crate::{format_sig, ResultRow};

const HEADERS: [&str; 6] = ["Benchmark", "Mode", "Cnt", "Score", "Error", "Units"];
const SIG_FIGURES: u32 = 6;
const GUTTER: &str = "  ";

/// Render rows into the final table, including the header line.
pub fn format_table(rows: &[ResultRow]) -> String {
    let cells: Vec<[String; 6]> = rows.iter().map(row_cells).collect();

    // Widths in characters, not bytes; the error column contains `±`.
    let mut widths: [usize; 6] = HEADERS.map(|h| h.chars().count());
    for row in &cells {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    render_line(&mut out, &HEADERS.map(String::from), &widths);
    for row in &cells {
        render_line(&mut out, row, &widths);
    }
    out
}

fn row_cells(row: &ResultRow) -> [String; 6] {
    let score = match row.score {
        Some(s) => format_sig(s, SIG_FIGURES),
        None => "N/A".to_string(),
    };
    let error = match row.error {
        Some(e) => format!("± {}", format_sig(e, SIG_FIGURES)),
        None => "N/A".to_string(),
    };
    [
        row.display_name(),
        row.mode.clone(),
        row.samples.to_string(),
        score,
        error,
        row.unit.clone(),
    ]
}

fn render_line(out: &mut String, cells: &[String; 6], widths: &[usize; 6]) {
    // Name flushes left, everything else flushes right.
    out.push_str(&format!("{:<width$}", cells[0], width = widths[0]));
    for (cell, width) in cells[1..].iter().zip(&widths[1..]) {
        out.push_str(GUTTER);
        out.push_str(&format!("{cell:>width$}"));
    }
    out.push('\n');
}
