//! The installation pipeline.
//!
//! Components are installed one after another, in [`Component::ALL`] order:
//!
//! 1. mark `installing`
//! 2. reconcile prior state
//! 3. apply (Helm or manifests)
//! 4. wait for every readiness probe
//! 5. verify
//! 6. mark `installed` with the poller's evidence, or `error`
//!
//! A failure is recorded against its component and the pipeline moves on.
//! Cancellation is the exception: it stops the run.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::components::{AnyComponent, InstallContext, PlatformComponent};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::exec::CommandExecutor;
use crate::kubectl::Kubectl;
use crate::poller::{CancelFlag, ReadinessEvidence, ReadinessPoller};
use crate::progress::LogSink;
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::status::{Component, InstallationState};

/// How one component's run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentOutcome {
    /// Observed ready and verified.
    Installed {
        /// What the last probe saw.
        detail: String,
        /// Wall time spent.
        duration: Duration,
    },
    /// Something failed; the component is in `error`.
    Failed {
        /// Error message.
        message: String,
        /// Logs or describe output, if any were gathered.
        diagnostics: Option<String>,
    },
    /// Dry run: commands were recorded, nothing was observed.
    Planned,
    /// Not attempted because the run was cancelled first.
    Skipped,
}

/// Result for one component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentResult {
    /// Which component.
    pub component: Component,
    /// How it ended.
    pub outcome: ComponentOutcome,
    /// Cleanup warnings from reconciliation.
    pub cleanup_warnings: usize,
}

/// Result of a pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallSummary {
    /// Per-component results in installation order.
    pub results: Vec<ComponentResult>,
    /// Whether the run was cancelled.
    pub cancelled: bool,
}

impl InstallSummary {
    /// True if nothing failed and the run was not cancelled.
    pub fn success(&self) -> bool {
        !self.cancelled
            && self.results.iter().all(|r| !matches!(r.outcome, ComponentOutcome::Failed { .. }))
    }

    /// Components that failed.
    pub fn failed(&self) -> impl Iterator<Item = &ComponentResult> {
        self.results.iter().filter(|r| matches!(r.outcome, ComponentOutcome::Failed { .. }))
    }

    /// Turn the summary into the command's result.
    pub fn into_result(self) -> Result<Self> {
        if self.cancelled {
            return Err(Error::Cancelled);
        }
        let failed: Vec<String> = self.failed().map(|r| r.component.to_string()).collect();
        if failed.is_empty() {
            Ok(self)
        } else {
            Err(Error::other(format!("installation failed for: {}", failed.join(", "))))
        }
    }
}

/// Runs components through reconcile, apply, poll and verify.
pub struct Pipeline<'a, E> {
    kubectl: &'a Kubectl<'a, E>,
    config: &'a Config,
    sink: &'a dyn LogSink,
    cancel: CancelFlag,
    dry_run: bool,
    state_path: Option<PathBuf>,
}

impl<'a, E: CommandExecutor> Pipeline<'a, E> {
    /// Create a pipeline.
    pub fn new(kubectl: &'a Kubectl<'a, E>, config: &'a Config, sink: &'a dyn LogSink) -> Self {
        Self { kubectl, config, sink, cancel: CancelFlag::new(), dry_run: false, state_path: None }
    }

    /// Share a cancellation flag with the signal handler.
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Skip polling, verification and status changes.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Persist the state after every transition.
    pub fn with_state_file(mut self, path: PathBuf) -> Self {
        self.state_path = Some(path);
        self
    }

    fn context(&self) -> InstallContext<'a, E> {
        InstallContext {
            kubectl: self.kubectl,
            sink: self.sink,
            cancel: self.cancel.clone(),
            helm: self.config.helm.retry.clone(),
        }
    }

    fn persist(&self, state: &InstallationState) {
        if self.dry_run {
            return;
        }
        if let Some(path) = &self.state_path
            && let Err(e) = state.save(path)
        {
            warn!(path = %path.display(), error = %e, "failed to save installation state");
        }
    }

    /// Install `only` (every component when empty), in installation order.
    pub async fn run(&self, state: &mut InstallationState, only: &[Component]) -> InstallSummary {
        let mut summary = InstallSummary::default();

        for component in Component::ALL {
            if !only.is_empty() && !only.contains(&component) {
                continue;
            }
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                summary.results.push(ComponentResult {
                    component,
                    outcome: ComponentOutcome::Skipped,
                    cleanup_warnings: 0,
                });
                continue;
            }

            let result = self.install(&AnyComponent::from_config(component, self.config), state).await;
            if matches!(&result.outcome, ComponentOutcome::Failed { .. })
                && self.cancel.is_cancelled()
            {
                summary.cancelled = true;
            }
            summary.results.push(result);
        }

        if !self.dry_run && state.setup_complete() {
            info!("all components installed");
        }
        summary
    }

    /// Run one component through every step and record the outcome.
    pub async fn install<C: PlatformComponent>(
        &self,
        component: &C,
        state: &mut InstallationState,
    ) -> ComponentResult {
        let key = component.component();
        let started = Instant::now();

        if !self.dry_run {
            if let Err(e) = state.begin(key) {
                return ComponentResult {
                    component: key,
                    outcome: ComponentOutcome::Failed { message: e.to_string(), diagnostics: None },
                    cleanup_warnings: 0,
                };
            }
            self.persist(state);
        }
        self.sink.add_log(key, &format!("Installing {}", key.display_name()));

        let report = self.reconcile(component).await;
        let cleanup_warnings = report.warnings.len();

        let result = self.apply_and_wait(component).await;
        let outcome = self.record_outcome(state, key, result, started);
        self.persist(state);

        ComponentResult { component: key, outcome, cleanup_warnings }
    }

    /// Move `key` to `installed` or `error` according to `result`.
    ///
    /// A ready component whose state cannot be updated counts as failed and
    /// goes through the same `error` path as any other failure.
    fn record_outcome(
        &self,
        state: &mut InstallationState,
        key: Component,
        result: Result<Option<ReadinessEvidence>>,
        started: Instant,
    ) -> ComponentOutcome {
        let recorded = result.and_then(|evidence| match evidence {
            Some(evidence) => {
                let detail = evidence.summary();
                state.mark_installed(key, evidence).map(|()| Some(detail))
            }
            None => Ok(None),
        });

        match recorded {
            Ok(None) => ComponentOutcome::Planned,
            Ok(Some(detail)) => {
                info!(component = %key, %detail, "installed");
                self.sink.add_log(key, &format!("{} installed", key.display_name()));
                ComponentOutcome::Installed { detail, duration: started.elapsed() }
            }
            Err(e) => {
                error!(component = %key, error = %e, "installation failed");
                self.sink.add_log(key, &format!("{} failed: {e}", key.display_name()));
                if let Err(transition) = state.mark_error(key, e.to_string()) {
                    warn!(component = %key, error = %transition, "could not record failure");
                }
                ComponentOutcome::Failed {
                    message: e.to_string(),
                    diagnostics: e.diagnostics().map(str::to_string),
                }
            }
        }
    }

    /// Reconcile every cleanup target of `component`.
    pub async fn reconcile<C: PlatformComponent>(&self, component: &C) -> ReconcileReport {
        let reconciler = Reconciler::new(self.kubectl);
        let mut report = ReconcileReport::default();
        for target in component.cleanup_targets() {
            report.merge(reconciler.reconcile(&target).await);
        }
        if !report.deleted.is_empty() {
            self.sink.add_log(
                component.component(),
                &format!("Removed {} leftover object(s)", report.deleted.len()),
            );
        }
        for warning in &report.warnings {
            self.sink.add_log(component.component(), &format!("Cleanup warning: {warning}"));
        }
        report
    }

    /// Apply, then (unless dry run) wait for every probe and verify.
    ///
    /// Returns the last probe's evidence, or `None` in a dry run.
    async fn apply_and_wait<C: PlatformComponent>(
        &self,
        component: &C,
    ) -> Result<Option<ReadinessEvidence>> {
        let key = component.component();
        let ctx = self.context();
        component.apply(&ctx).await?;

        if self.dry_run {
            return Ok(None);
        }

        let poller = ReadinessPoller::new(self.kubectl, self.config.poll_config())
            .with_cancel(self.cancel.clone())
            .with_sink(self.sink, key);

        let mut evidence = None;
        for probe in component.probes() {
            let outcome = poller
                .wait_with_cleanup(&probe, || async {
                    warn!(component = %key, "cancelled, removing partial installation");
                    self.reconcile(component).await;
                })
                .await;
            evidence = Some(outcome.into_result(&probe.to_string())?);
        }

        component.verify(&ctx).await?;
        evidence.map(Some).ok_or_else(|| Error::other(format!("{key} has no readiness probes")))
    }
}
