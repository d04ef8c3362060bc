//! `status`: show the recorded installation state.

use serde::Serialize;

use super::Context;
use crate::error::Result;
use crate::output::{self, Displayable, OutputFormat};
use crate::status::{Component, ComponentStatus, InstallationState};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusRow {
    component: Component,
    status: ComponentStatus,
    updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl Displayable for StatusRow {
    fn table_row(&self) -> Vec<String> {
        vec![
            self.component.to_string(),
            self.status.to_string(),
            self.updated_at.clone(),
            self.message.clone().unwrap_or_default(),
        ]
    }

    fn table_headers() -> Vec<&'static str> {
        vec!["COMPONENT", "STATUS", "UPDATED", "MESSAGE"]
    }
}

fn rows(state: &InstallationState) -> Vec<StatusRow> {
    state
        .records()
        .map(|(component, record)| StatusRow {
            component,
            status: record.status,
            updated_at: record.updated_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            message: record.message.clone(),
        })
        .collect()
}

/// Print the state file's contents.
pub fn status(ctx: &Context, format: OutputFormat) -> Result<()> {
    let state = InstallationState::load(&ctx.state_path)?;
    print!("{}", output::render(format, &rows(&state))?);

    if format == OutputFormat::Table && !ctx.quiet {
        println!();
        if state.setup_complete() {
            teapot::output::success("Setup complete");
        } else {
            teapot::output::info("Run 'ctf-installer install' to install pending components");
        }
    }
    Ok(())
}
