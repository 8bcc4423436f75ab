//! Output helpers shared by the subcommands.

use serde::Serialize;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Render an aligned table with a dashed header separator. Columns whose
/// cells all parse as numbers are right-aligned, so SEQ and duration
/// columns line up by magnitude.
pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    let mut numeric: Vec<bool> = vec![!rows.is_empty(); headers.len()];
    for row in &rows {
        for (i, cell) in row.iter().enumerate().take(widths.len()) {
            widths[i] = widths[i].max(cell.len());
            if cell.parse::<f64>().is_err() {
                numeric[i] = false;
            }
        }
    }

    let headers: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
    println!("{}", render_row(&headers, &widths, &numeric));
    let dashes: Vec<String> = widths.iter().map(|&w| "-".repeat(w)).collect();
    println!("{}", dashes.join("  "));
    for row in &rows {
        println!("{}", render_row(row, &widths, &numeric));
    }
}

fn render_row(cells: &[String], widths: &[usize], right: &[bool]) -> String {
    let line = cells
        .iter()
        .enumerate()
        .map(|(i, cell)| {
            let width = widths.get(i).copied().unwrap_or(0);
            if right.get(i).copied().unwrap_or(false) {
                format!("{cell:>width$}")
            } else {
                format!("{cell:<width$}")
            }
        })
        .collect::<Vec<_>>()
        .join("  ");
    line.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_columns_right_align() {
        let cells = vec!["7".to_string(), "seek".to_string()];
        let line = render_row(&cells, &[3, 6], &[true, false]);
        assert_eq!(line, "  7  seek");
    }
}
