//! Progress lines on the terminal.

use std::io::{self, Write};

use teapot::style::{CLEAR_LINE, Color, RESET};

use super::is_interactive;
use crate::progress::LogSink;
use crate::status::Component;

/// Prints every progress line to stderr, prefixed with its component.
///
/// On a terminal the line under a running spinner is cleared first so the
/// spinner redraws below the log instead of through it.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink {
    quiet: bool,
}

impl ConsoleSink {
    /// A sink that prints nothing when `quiet` is set.
    pub const fn new(quiet: bool) -> Self {
        Self { quiet }
    }

    fn print(&self, component: Component, line: &str) {
        if self.quiet {
            return;
        }
        let mut stderr = io::stderr().lock();
        if is_interactive(false) {
            let _ = writeln!(stderr, "\r{CLEAR_LINE}{}", format_line(component, line, true));
        } else {
            let _ = writeln!(stderr, "{}", format_line(component, line, false));
        }
    }
}

/// `  database           line`, with the component dimmed when `color`.
fn format_line(component: Component, line: &str, color: bool) -> String {
    let key = format!("{:<18}", component.key());
    if color {
        format!("  {}{key}{RESET} {line}", Color::BrightBlack.to_ansi_fg())
    } else {
        format!("  {key} {line}")
    }
}

impl LogSink for ConsoleSink {
    fn add_log(&self, component: Component, line: &str) {
        self.print(component, line);
    }

    fn set_logs(&self, component: Component, lines: Vec<String>) {
        for line in &lines {
            self.print(component, line);
        }
    }
}
