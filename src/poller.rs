//! Blocking until a cluster resource is healthy.
//!
//! The poller repeatedly observes a [`ReadinessProbe`] and walks a small
//! state machine until it reaches a terminal state:
//!
//! | State       | Meaning                                  | Terminal |
//! |-------------|------------------------------------------|----------|
//! | `Searching` | nothing matched the probe yet            | no       |
//! | `Pending`   | found, not ready (ContainerCreating ...) | no       |
//! | `Ready`     | success predicate met                    | yes      |
//! | `Failed`    | CrashLoopBackOff, phase Failed, ...      | yes      |
//! | `Cancelled` | the cancel flag was set                  | yes      |
//! | `TimedOut`  | time or attempt budget exhausted         | yes      |
//!
//! Pacing between observations comes from a [`BackoffPolicy`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bon::Builder;
use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backoff::BackoffPolicy;
use crate::error::{Error, Result};
use crate::exec::CommandExecutor;
use crate::helm;
use crate::kubectl::{Kubectl, ResourceFilter};
use crate::progress::LogSink;
use crate::status::Component;

/// Lines of container logs attached to a failure.
const DIAGNOSTIC_LOG_LINES: u32 = 50;

/// Cooperative cancellation shared between the signal handler and the poller.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// A flag that is not set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Something the poller can wait on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessProbe {
    /// Pods by name or label selector: phase Running and all containers ready.
    Pods {
        /// Namespace to look in.
        namespace: String,
        /// `ResourceFilter::Name` or `ResourceFilter::Selector`.
        filter: ResourceFilter,
    },
    /// A Helm release in state `deployed`.
    HelmRelease {
        /// Release name.
        release: String,
        /// Release namespace.
        namespace: String,
    },
    /// A named object exists (Secret, ConfigMap, CRD ...).
    Exists {
        /// kubectl kind.
        kind: String,
        /// Object name.
        name: String,
        /// Namespace, `None` for cluster-scoped kinds.
        namespace: Option<String>,
    },
}

impl fmt::Display for ReadinessProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pods { namespace, filter } => write!(f, "pods {filter} in {namespace}"),
            Self::HelmRelease { release, namespace } => {
                write!(f, "helm release {release} in {namespace}")
            }
            Self::Exists { kind, name, namespace: Some(ns) } => write!(f, "{kind}/{name} in {ns}"),
            Self::Exists { kind, name, namespace: None } => write!(f, "{kind}/{name}"),
        }
    }
}

/// One look at the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// Nothing matched.
    NotFound,
    /// Found but not ready; the string says why.
    Pending(String),
    /// Success predicate met.
    Ready(String),
    /// Unrecoverable. `pod` names the pod to pull logs from.
    Failed {
        /// What went wrong.
        reason: String,
        /// Pod to collect logs and describe output from.
        pod: Option<String>,
    },
}

impl ReadinessProbe {
    /// Pods matching a label selector.
    pub fn pods(namespace: impl Into<String>, selector: impl Into<String>) -> Self {
        Self::Pods { namespace: namespace.into(), filter: ResourceFilter::Selector(selector.into()) }
    }

    /// A Helm release.
    pub fn helm_release(release: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self::HelmRelease { release: release.into(), namespace: namespace.into() }
    }

    /// A named, namespaced object.
    pub fn exists(
        kind: impl Into<String>,
        name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self::Exists { kind: kind.into(), name: name.into(), namespace: Some(namespace.into()) }
    }

    /// Observe the cluster once.
    pub async fn observe<E: CommandExecutor>(&self, kubectl: &Kubectl<'_, E>) -> Observation {
        match self {
            Self::Pods { namespace, filter } => {
                let pods = match kubectl.observe_pods(namespace, filter).await {
                    Ok(pods) => pods,
                    // Transient API errors look the same as "not there yet".
                    Err(e) => return Observation::Pending(format!("query failed: {e}")),
                };
                let pods: Vec<_> = pods.into_iter().filter(|p| p.phase != "Succeeded").collect();
                if pods.is_empty() {
                    return Observation::NotFound;
                }
                if let Some((pod, reason)) =
                    pods.iter().find_map(|p| p.failure_reason().map(|r| (p.name.clone(), r)))
                {
                    return Observation::Failed { reason, pod: Some(pod) };
                }
                if pods.iter().all(|p| p.is_ready()) {
                    let names: Vec<&str> = pods.iter().map(|p| p.name.as_str()).collect();
                    return Observation::Ready(format!("{} ready", names.join(", ")));
                }
                let summary: Vec<String> = pods
                    .iter()
                    .filter(|p| !p.is_ready())
                    .map(|p| match p.reasons.first() {
                        Some(reason) => format!("{} {} ({reason})", p.name, p.phase),
                        None => format!("{} {}", p.name, p.phase),
                    })
                    .collect();
                Observation::Pending(summary.join(", "))
            }
            Self::HelmRelease { release, namespace } => {
                match helm::release_status(kubectl.executor(), kubectl.context(), release, namespace)
                    .await
                {
                    None => Observation::NotFound,
                    Some(status) if status == "deployed" => {
                        Observation::Ready(format!("release {release} deployed"))
                    }
                    Some(status) if status == "failed" => Observation::Failed {
                        reason: format!("release {release} is in state failed"),
                        pod: None,
                    },
                    Some(status) => Observation::Pending(format!("release {release} {status}")),
                }
            }
            Self::Exists { kind, name, namespace } => {
                if kubectl.resource_exists(kind, name, namespace.as_deref()).await {
                    Observation::Ready(format!("{kind}/{name} present"))
                } else {
                    Observation::NotFound
                }
            }
        }
    }

    /// Gather `kubectl describe` style context for a failure report.
    pub async fn diagnose<E: CommandExecutor>(&self, kubectl: &Kubectl<'_, E>) -> Option<String> {
        match self {
            Self::Pods { namespace, filter: ResourceFilter::Selector(selector) } => {
                let out = kubectl
                    .run(&["describe", "pods", "-l", selector.as_str(), "-n", namespace.as_str()])
                    .await;
                Some(if out.success() { out.stdout } else { out.error_text().to_string() })
            }
            Self::Pods { namespace, filter: ResourceFilter::Name(name) } => {
                Some(kubectl.describe("pod", name, namespace).await)
            }
            Self::HelmRelease { release, namespace } => {
                let mut args = vec!["status", release.as_str(), "-n", namespace.as_str()];
                if let Some(ctx) = kubectl.context() {
                    args.extend(["--kube-context", ctx]);
                }
                let out = kubectl.executor().run("helm", &args).await;
                Some(if out.success() { out.stdout } else { out.error_text().to_string() })
            }
            Self::Pods { .. } | Self::Exists { .. } => None,
        }
    }
}

/// Where the poller is right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// Nothing found yet.
    Searching,
    /// Found, not ready.
    Pending,
    /// Ready.
    Ready,
    /// Unrecoverable failure.
    Failed,
    /// Aborted by the cancel flag.
    Cancelled,
    /// Budget exhausted.
    TimedOut,
}

impl PollState {
    /// Whether the poller stops in this state.
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Searching | Self::Pending)
    }
}

/// Proof that the poller observed a success condition on the cluster.
///
/// Only this module constructs it, so a component cannot be recorded as
/// installed on the strength of an exit code alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessEvidence {
    target: String,
    detail: String,
    attempts: u32,
    observed_at: DateTime<Utc>,
}

impl ReadinessEvidence {
    fn observed(target: String, detail: String, attempts: u32) -> Self {
        Self { target, detail, attempts, observed_at: Utc::now() }
    }

    #[cfg(test)]
    pub(crate) fn for_tests(detail: &str) -> Self {
        Self::observed("test".to_string(), detail.to_string(), 1)
    }

    /// What was polled.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Number of observations it took.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// When readiness was observed.
    pub fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }

    /// Short human readable description of what was seen.
    pub fn summary(&self) -> String {
        self.detail.clone()
    }
}

/// Terminal result of a poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Ready, with proof.
    Ready(ReadinessEvidence),
    /// Unrecoverable failure with diagnostics.
    Failed {
        /// What went wrong.
        reason: String,
        /// Logs and describe output.
        diagnostics: Option<String>,
    },
    /// Cancel flag observed; cleanup has run.
    Cancelled,
    /// Time or attempt budget exhausted.
    TimedOut {
        /// Observations made.
        attempts: u32,
        /// Time spent.
        elapsed: Duration,
        /// Last thing seen.
        last: Option<String>,
        /// Describe output gathered at timeout.
        diagnostics: Option<String>,
    },
}

impl PollOutcome {
    /// The terminal state this outcome represents.
    pub const fn state(&self) -> PollState {
        match self {
            Self::Ready(_) => PollState::Ready,
            Self::Failed { .. } => PollState::Failed,
            Self::Cancelled => PollState::Cancelled,
            Self::TimedOut { .. } => PollState::TimedOut,
        }
    }

    /// Convert to a `Result`, naming `target` in the error.
    pub fn into_result(self, target: &str) -> Result<ReadinessEvidence> {
        match self {
            Self::Ready(evidence) => Ok(evidence),
            Self::Failed { reason, diagnostics } => {
                Err(Error::Poll { target: target.to_string(), reason, diagnostics })
            }
            Self::Cancelled => Err(Error::Cancelled),
            Self::TimedOut { attempts, elapsed, last, diagnostics } => Err(Error::Poll {
                target: target.to_string(),
                reason: format!(
                    "timed out after {}s and {attempts} check(s){}",
                    elapsed.as_secs(),
                    last.map(|l| format!(", last seen: {l}")).unwrap_or_default()
                ),
                diagnostics,
            }),
        }
    }
}

/// Time budget and pacing for one poll.
#[derive(Debug, Clone, PartialEq, Builder)]
pub struct PollConfig {
    /// Give up once this much time has passed.
    pub timeout: Duration,
    /// Delay between observations and optional attempt cap.
    #[builder(default)]
    pub backoff: BackoffPolicy,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(300), backoff: BackoffPolicy::default() }
    }
}

/// Waits for probes to become ready.
pub struct ReadinessPoller<'a, E> {
    kubectl: &'a Kubectl<'a, E>,
    config: PollConfig,
    cancel: Option<CancelFlag>,
    sink: Option<(&'a dyn LogSink, Component)>,
}

impl<'a, E: CommandExecutor> ReadinessPoller<'a, E> {
    /// Create a poller.
    pub fn new(kubectl: &'a Kubectl<'a, E>, config: PollConfig) -> Self {
        Self { kubectl, config, cancel: None, sink: None }
    }

    /// Check `flag` at the top of every iteration.
    pub fn with_cancel(mut self, flag: CancelFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Mirror progress lines to a log sink under `component`.
    pub fn with_sink(mut self, sink: &'a dyn LogSink, component: Component) -> Self {
        self.sink = Some((sink, component));
        self
    }

    fn report(&self, line: String) {
        if let Some((sink, component)) = self.sink {
            sink.add_log(component, &line);
        }
    }

    /// Wait for `probe` without a cleanup callback.
    pub async fn wait(&self, probe: &ReadinessProbe) -> PollOutcome {
        self.wait_with_cleanup(probe, || async {}).await
    }

    /// Wait for `probe`. On cancellation `cleanup` runs exactly once.
    pub async fn wait_with_cleanup<F, Fut>(&self, probe: &ReadinessProbe, cleanup: F) -> PollOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()>,
    {
        let target = probe.to_string();
        let start = Instant::now();
        let mut attempts: u32 = 0;
        let mut last: Option<String> = None;

        loop {
            if self.cancel.as_ref().is_some_and(CancelFlag::is_cancelled) {
                warn!(%target, attempts, "poll cancelled");
                self.report(format!("Cancelled while waiting for {target}"));
                cleanup().await;
                return PollOutcome::Cancelled;
            }

            if start.elapsed() >= self.config.timeout || !self.config.backoff.allows_another(attempts) {
                return self.time_out(probe, &target, attempts, start.elapsed(), last).await;
            }

            attempts += 1;
            let state = match probe.observe(self.kubectl).await {
                Observation::Ready(detail) => {
                    info!(%target, attempts, %detail, "ready");
                    self.report(format!("{target}: {detail}"));
                    return PollOutcome::Ready(ReadinessEvidence::observed(target, detail, attempts));
                }
                Observation::Failed { reason, pod } => {
                    warn!(%target, %reason, "entered a failed state");
                    self.report(format!("{target} failed: {reason}"));
                    let diagnostics = self.collect_failure_diagnostics(probe, pod.as_deref()).await;
                    return PollOutcome::Failed { reason, diagnostics };
                }
                Observation::NotFound => {
                    last = Some("not found".to_string());
                    PollState::Searching
                }
                Observation::Pending(detail) => {
                    last = Some(detail);
                    PollState::Pending
                }
            };

            // No sleep when the cap leaves no attempt to wait for.
            if !self.config.backoff.allows_another(attempts) {
                return self.time_out(probe, &target, attempts, start.elapsed(), last).await;
            }

            let delay = self
                .config
                .backoff
                .delay(attempts)
                .min(self.config.timeout.saturating_sub(start.elapsed()));
            debug!(
                %target,
                attempts,
                ?state,
                last = last.as_deref().unwrap_or_default(),
                delay_ms = delay.as_millis() as u64,
                "not ready yet"
            );
            self.report(format!(
                "Waiting for {target} ({}), retrying in {}s",
                last.as_deref().unwrap_or("searching"),
                delay.as_secs()
            ));
            tokio::time::sleep(delay).await;
        }
    }

    async fn time_out(
        &self,
        probe: &ReadinessProbe,
        target: &str,
        attempts: u32,
        elapsed: Duration,
        last: Option<String>,
    ) -> PollOutcome {
        warn!(%target, attempts, elapsed_secs = elapsed.as_secs(), "poll timed out");
        self.report(format!("Timed out waiting for {target}"));
        let diagnostics = probe.diagnose(self.kubectl).await;
        PollOutcome::TimedOut { attempts, elapsed, last, diagnostics }
    }

    async fn collect_failure_diagnostics(
        &self,
        probe: &ReadinessProbe,
        pod: Option<&str>,
    ) -> Option<String> {
        let (Some(pod), ReadinessProbe::Pods { namespace, .. }) = (pod, probe) else {
            return probe.diagnose(self.kubectl).await;
        };
        let logs = self.kubectl.pod_logs(namespace, pod, DIAGNOSTIC_LOG_LINES).await;
        let describe = self.kubectl.describe("pod", pod, namespace).await;
        Some(format!("--- logs {pod} ---\n{logs}\n--- describe {pod} ---\n{describe}"))
    }
}
