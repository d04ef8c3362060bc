//! Step lines with dot leaders.
//!
//! ```text
//! Database ................................. INSTALLED
//! ```

use teapot::style::{Color, RESET};
use unicode_width::UnicodeWidthChar;

/// Total width of a step line.
pub const STEP_LINE_WIDTH: usize = 60;

/// Print a phase header.
pub fn print_phase_header(title: &str) {
    println!("\n  {title} ...\n");
}

/// Print an indented hint under a step.
pub fn print_hint(hint: &str) {
    println!("    {}{hint}{RESET}", Color::BrightBlack.to_ansi_fg());
}

/// Terminal columns taken by `s`, ignoring ANSI escape sequences.
pub fn visible_len(s: &str) -> usize {
    let mut len = 0;
    let mut in_escape = false;
    for c in s.chars() {
        if in_escape {
            if c == 'm' {
                in_escape = false;
            }
        } else if c == '\x1b' {
            in_escape = true;
        } else {
            len += c.width().unwrap_or(0);
        }
    }
    len
}

/// Format `{text} {dots} {status}` padded to [`STEP_LINE_WIDTH`].
///
/// Known statuses are coloured: green for success words, red for failures,
/// dim for skips.
pub fn format_dot_leader(text: &str, status: &str) -> String {
    let dim = Color::BrightBlack.to_ansi_fg();
    let green = Color::Green.to_ansi_fg();
    let red = Color::Red.to_ansi_fg();

    let status_colored = match status.to_uppercase().as_str() {
        "OK" | "INSTALLED" | "READY" | "REMOVED" => format!("{green}{status}{RESET}"),
        "FAILED" | "ERROR" | "MISSING" | "UNREACHABLE" => format!("{red}{status}{RESET}"),
        "SKIPPED" | "PLANNED" | "PENDING" => format!("{dim}{status}{RESET}"),
        _ => status.to_string(),
    };

    let dots_len = STEP_LINE_WIDTH
        .saturating_sub(visible_len(text))
        .saturating_sub(visible_len(status))
        .saturating_sub(2);
    let dots = ".".repeat(dots_len);

    format!("{text} {dim}{dots}{RESET} {status_colored}")
}

/// Print a dot leader line.
pub fn print_step(text: &str, status: &str) {
    println!("{}", format_dot_leader(text, status));
}
