//! `install`: run the pipeline for every (or the selected) component.

use std::path::PathBuf;

use super::{Context, cancel_on_ctrl_c};
use crate::config::Config;
use crate::error::Result;
use crate::exec::{CommandExecutor, DryRunExecutor, SystemExecutor};
use crate::kubectl::Kubectl;
use crate::pipeline::{ComponentOutcome, InstallSummary, Pipeline};
use crate::poller::CancelFlag;
use crate::progress::{LogSink, Tee, TracingSink};
use crate::status::{Component, InstallationState};
use crate::tui::{self, ConsoleSink};

/// Install the platform.
pub async fn install(
    ctx: &Context,
    only: &[Component],
    dry_run: bool,
    timeout: Option<u64>,
) -> Result<()> {
    let config = ctx.config_with_timeout(timeout)?;
    let cancel = CancelFlag::new();
    cancel_on_ctrl_c(cancel.clone());

    let console = ConsoleSink::new(ctx.quiet);
    let sink = Tee(&console, &TracingSink);

    let summary = if dry_run {
        let executor = DryRunExecutor::new();
        let kubectl = Kubectl::new(&executor, config.kube_context.clone());
        let mut state = InstallationState::new();
        let summary =
            run_pipeline(&kubectl, &config, &sink, cancel, None, &mut state, only, true).await;

        tui::print_phase_header("Commands that would run");
        for command in executor.commands() {
            println!("  {command}");
        }
        summary
    } else {
        let executor = SystemExecutor::new();
        let kubectl = Kubectl::new(&executor, config.kube_context.clone());
        tui::spin("Checking cluster access...", kubectl.cluster_reachable()).await?;

        let mut state = InstallationState::load(&ctx.state_path)?;
        let spinner = tui::start_spinner("Installing platform components...");
        let summary = run_pipeline(
            &kubectl,
            &config,
            &sink,
            cancel,
            Some(ctx.state_path.clone()),
            &mut state,
            only,
            false,
        )
        .await;
        spinner.clear();
        summary
    };

    print_summary(&summary);
    summary.into_result().map(|_| ())
}

#[allow(clippy::too_many_arguments)]
async fn run_pipeline<E: CommandExecutor>(
    kubectl: &Kubectl<'_, E>,
    config: &Config,
    sink: &dyn LogSink,
    cancel: CancelFlag,
    state_path: Option<PathBuf>,
    state: &mut InstallationState,
    only: &[Component],
    dry_run: bool,
) -> InstallSummary {
    let mut pipeline = Pipeline::new(kubectl, config, sink).with_cancel(cancel).dry_run(dry_run);
    if let Some(path) = state_path {
        pipeline = pipeline.with_state_file(path);
    }
    pipeline.run(state, only).await
}

fn print_summary(summary: &InstallSummary) {
    tui::print_phase_header("Summary");
    for result in &summary.results {
        let name = result.component.display_name();
        match &result.outcome {
            ComponentOutcome::Installed { detail, duration } => {
                tui::print_step(name, "INSTALLED");
                tui::print_hint(&format!("{detail} ({}s)", duration.as_secs()));
            }
            ComponentOutcome::Failed { message, diagnostics } => {
                tui::print_step(name, "FAILED");
                tui::print_hint(message);
                if let Some(diagnostics) = diagnostics {
                    for line in diagnostics.lines() {
                        tui::print_hint(line);
                    }
                }
            }
            ComponentOutcome::Planned => tui::print_step(name, "PLANNED"),
            ComponentOutcome::Skipped => tui::print_step(name, "SKIPPED"),
        }
        if result.cleanup_warnings > 0 {
            tui::print_hint(&format!("{} cleanup warning(s), see log above", result.cleanup_warnings));
        }
    }
    println!();
}
