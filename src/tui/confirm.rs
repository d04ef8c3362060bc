//! Confirmation prompt for destructive commands.

use std::io::{self, BufRead, Write};

use teapot::Model;
use teapot::components::Confirm as TeapotConfirm;
use teapot::output::{is_ci, is_tty};
use teapot::style::{Color, RESET};

use crate::error::Result;

/// Ask before doing something destructive. Defaults to no.
///
/// Without a terminal there is nobody to ask, so the answer is no and the
/// caller should point at `--yes`.
pub fn confirm_danger(message: &str) -> Result<bool> {
    if !is_tty() || is_ci() {
        teapot::output::info(&format!("{message} [N] (non-interactive, using default)"));
        return Ok(false);
    }

    eprint!("{}⚠{} ", Color::Red.to_ansi_fg(), RESET);

    let confirm = TeapotConfirm::new(message)
        .default(false)
        .yes_label("Yes, remove it")
        .no_label("Cancel")
        .selected_color(Color::Red);

    eprint!("{} ", confirm.view());
    io::stderr().flush()?;

    let mut input = String::new();
    io::stdin().lock().read_line(&mut input)?;
    Ok(parse_answer(&input))
}

/// Only an explicit yes counts.
fn parse_answer(input: &str) -> bool {
    matches!(input.trim().to_lowercase().as_str(), "y" | "yes")
}
