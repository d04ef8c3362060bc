//! `cleanup`: remove one component from the cluster.

use super::Context;
use crate::components::{AnyComponent, InstallContext, PlatformComponent};
use crate::error::Result;
use crate::exec::SystemExecutor;
use crate::kubectl::Kubectl;
use crate::pipeline::Pipeline;
use crate::poller::CancelFlag;
use crate::progress::{Tee, TracingSink};
use crate::status::{Component, InstallationState};
use crate::tui::{self, ConsoleSink};

/// Uninstall `component`, sweep what it left behind and reset its status.
pub async fn cleanup(ctx: &Context, component: Component) -> Result<()> {
    let target = AnyComponent::from_config(component, &ctx.config);
    let confirmed = ctx.confirm(&format!(
        "Remove {} from namespace '{}'? Its data volumes are deleted too.",
        component.display_name(),
        target.namespace()
    ))?;
    if !confirmed {
        teapot::output::info("Cancelled.");
        return Ok(());
    }

    let executor = SystemExecutor::new();
    let kubectl = Kubectl::new(&executor, ctx.config.kube_context.clone());
    tui::spin("Checking cluster access...", kubectl.cluster_reachable()).await?;

    let console = ConsoleSink::new(ctx.quiet);
    let sink = Tee(&console, &TracingSink);
    let install_ctx = InstallContext {
        kubectl: &kubectl,
        sink: &sink,
        cancel: CancelFlag::new(),
        helm: ctx.config.helm.retry.clone(),
    };

    let spinner = tui::start_spinner(format!("Removing {}...", component.display_name()));
    let uninstalled = target.uninstall(&install_ctx).await;
    let report = Pipeline::new(&kubectl, &ctx.config, &sink).reconcile(&target).await;
    if let Err(e) = uninstalled {
        spinner.error(&format!("{} could not be uninstalled", component.display_name()));
        return Err(e);
    }

    let mut state = InstallationState::load(&ctx.state_path)?;
    state.reset(component);
    state.save(&ctx.state_path)?;

    if report.warnings.is_empty() {
        spinner.success(&format!(
            "{} removed ({} object(s) deleted)",
            component.display_name(),
            report.deleted.len()
        ));
    } else {
        spinner.warning(&format!(
            "{} removed with {} cleanup warning(s)",
            component.display_name(),
            report.warnings.len()
        ));
    }
    Ok(())
}
