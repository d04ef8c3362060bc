//! Aligned, human-readable tables.
//!
//! Columns are sized to their widest cell, measured in terminal columns
//! rather than bytes.

use unicode_width::UnicodeWidthStr;

/// A simple table formatter.
#[derive(Debug, Default)]
pub struct TableFormatter {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    max_width: Option<usize>,
}

impl TableFormatter {
    /// Create a new table formatter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the column headers.
    pub fn headers<I, S>(&mut self, headers: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.headers = headers.into_iter().map(Into::into).collect();
        self
    }

    /// Add a row to the table.
    pub fn row<I, S>(&mut self, cells: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rows.push(cells.into_iter().map(Into::into).collect());
        self
    }

    /// Cap every column at `width`; longer cells are truncated with `...`.
    pub fn max_column_width(&mut self, width: usize) -> &mut Self {
        self.max_width = Some(width);
        self
    }

    fn calculate_widths(&self) -> Vec<usize> {
        let num_cols = self.headers.len().max(self.rows.iter().map(Vec::len).max().unwrap_or(0));
        let mut widths = vec![0usize; num_cols];

        for row in std::iter::once(&self.headers).chain(&self.rows) {
            for (i, cell) in row.iter().enumerate() {
                widths[i] = widths[i].max(UnicodeWidthStr::width(cell.as_str()));
            }
        }
        if let Some(max) = self.max_width {
            for w in &mut widths {
                *w = (*w).min(max);
            }
        }
        widths
    }

    /// Render the table as a string.
    pub fn render(&self) -> String {
        let widths = self.calculate_widths();
        let mut output = String::new();

        if !self.headers.is_empty() {
            output.push_str(&row_to_string(&self.headers, &widths));
            output.push('\n');
            let sep: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
            output.push_str(&sep.join("  "));
            output.push('\n');
        }

        for row in &self.rows {
            output.push_str(&row_to_string(row, &widths));
            output.push('\n');
        }

        output
    }
}

fn row_to_string(cells: &[String], widths: &[usize]) -> String {
    let last = cells.len().saturating_sub(1);
    let parts: Vec<String> = cells
        .iter()
        .enumerate()
        .map(|(i, cell)| {
            let width = widths.get(i).copied().unwrap_or(0);
            let cell_width = UnicodeWidthStr::width(cell.as_str());

            if cell_width > width {
                truncate(cell, width)
            } else if i == last {
                cell.clone()
            } else {
                format!("{}{}", cell, " ".repeat(width - cell_width))
            }
        })
        .collect();

    parts.join("  ")
}

/// Truncate a string to fit within a given width.
fn truncate(s: &str, max_width: usize) -> String {
    if max_width <= 3 {
        return ".".repeat(max_width);
    }

    let mut width = 0;
    let mut chars = String::new();

    for c in s.chars() {
        let char_width = unicode_width::UnicodeWidthChar::width(c).unwrap_or(0);
        if width + char_width + 3 > max_width {
            chars.push_str("...");
            break;
        }
        chars.push(c);
        width += char_width;
    }

    let current_width = UnicodeWidthStr::width(chars.as_str());
    if current_width < max_width {
        chars.push_str(&" ".repeat(max_width - current_width));
    }

    chars
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_table_alignment() {
        let mut table = TableFormatter::new();
        table.headers(["COMPONENT", "STATUS"]);
        table.row(["database", "installed"]);
        table.row(["monitoringService", "pending"]);

        let output = table.render();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines[0], "COMPONENT          STATUS");
        assert_eq!(lines[1], "-----------------  ---------");
        assert_eq!(lines[2], "database           installed");
        assert_eq!(lines[3], "monitoringService  pending");
    }

    #[test]
    fn test_max_column_width_truncates() {
        let mut table = TableFormatter::new();
        table.max_column_width(8);
        table.row(["hello world", "x"]);
        assert_eq!(table.render(), "hello...  x\n");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello world", 8), "hello...");
        assert_eq!(truncate("hi", 10).trim(), "hi");
    }
}
