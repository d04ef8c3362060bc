//! `wait`: block until a component's probes all report ready.

use super::{Context, cancel_on_ctrl_c};
use crate::components::{AnyComponent, PlatformComponent};
use crate::error::Result;
use crate::exec::SystemExecutor;
use crate::kubectl::Kubectl;
use crate::poller::{CancelFlag, ReadinessPoller};
use crate::progress::{Tee, TracingSink};
use crate::status::Component;
use crate::tui::{self, ConsoleSink};

/// Poll every probe of `component` in order. Nothing is changed on the
/// cluster or in the state file.
pub async fn wait(ctx: &Context, component: Component, timeout: Option<u64>) -> Result<()> {
    let config = ctx.config_with_timeout(timeout)?;
    let target = AnyComponent::from_config(component, &config);

    let cancel = CancelFlag::new();
    cancel_on_ctrl_c(cancel.clone());

    let executor = SystemExecutor::new();
    let kubectl = Kubectl::new(&executor, config.kube_context.clone());
    let console = ConsoleSink::new(ctx.quiet);
    let sink = Tee(&console, &TracingSink);
    let poller = ReadinessPoller::new(&kubectl, config.poll_config())
        .with_cancel(cancel)
        .with_sink(&sink, component);

    for probe in target.probes() {
        let label = probe.to_string();
        let spinner = tui::start_spinner(format!("Waiting for {label}..."));
        match poller.wait(&probe).await.into_result(&label) {
            Ok(evidence) => spinner.success(&evidence.summary()),
            Err(e) => {
                spinner.error(&format!("{label}: not ready"));
                return Err(e);
            }
        }
    }

    if !ctx.quiet {
        teapot::output::success(&format!("{} is ready", component.display_name()));
    }
    Ok(())
}
