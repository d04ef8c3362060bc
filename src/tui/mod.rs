//! Terminal UI helpers built on Teapot.
//!
//! Spinners, dot-leader step lines, the destructive-action prompt and the
//! [`ConsoleSink`] the CLI hands to the pipeline. Everything degrades to
//! plain lines when stdout is not a terminal or when running in CI.

mod confirm;
mod console;
pub mod output;
mod spinner;

pub use confirm::confirm_danger;
pub use console::ConsoleSink;
pub use output::{format_dot_leader, print_hint, print_phase_header, print_step};
pub use spinner::{SpinnerHandle, spin, start as start_spinner};

/// Check if we should use interactive TUI features.
///
/// Returns false if:
/// - Running in CI
/// - Output is not a TTY
/// - Quiet mode is enabled
pub fn is_interactive(quiet: bool) -> bool {
    !quiet && teapot::output::is_tty() && !teapot::output::is_ci()
}
