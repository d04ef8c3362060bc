//! Output formatting for the CLI.
//!
//! Supports multiple output formats:
//! - `table` - Human-readable table (default)
//! - `json` - Structured JSON
//! - `yaml` - YAML format

mod table;

pub use table::TableFormatter;

use clap::ValueEnum;
use serde::Serialize;

use crate::error::Result;

/// Widest a table cell may get; JSON and YAML keep the full text.
pub const MAX_CELL_WIDTH: usize = 80;

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON format.
    Json,
    /// YAML format.
    Yaml,
}

/// Types that can be shown as table rows.
pub trait Displayable {
    /// Display as a table row.
    fn table_row(&self) -> Vec<String>;

    /// Get column headers for table display.
    fn table_headers() -> Vec<&'static str>;
}

/// Render `items` in `format`.
pub fn render<T: Displayable + Serialize>(format: OutputFormat, items: &[T]) -> Result<String> {
    match format {
        OutputFormat::Table => {
            let mut formatter = TableFormatter::new();
            formatter.headers(T::table_headers()).max_column_width(MAX_CELL_WIDTH);
            for item in items {
                formatter.row(item.table_row());
            }
            Ok(formatter.render())
        }
        OutputFormat::Json => {
            let mut json = serde_json::to_string_pretty(&items)?;
            json.push('\n');
            Ok(json)
        }
        OutputFormat::Yaml => Ok(serde_yaml::to_string(&items)?),
    }
}
