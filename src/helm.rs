//! Helm chart installation with classified retries.
//!
//! `helm upgrade --install --atomic` rolls back on failure, which leaves
//! behind exactly the kind of storage debris (unbound PVCs, released PVs,
//! `pending-install` release secrets) that makes the next attempt fail the
//! same way. Failures are therefore classified by their stderr:
//!
//! | Class     | Action before retrying                          |
//! |-----------|-------------------------------------------------|
//! | `Storage` | storage cleanup pass, then wait `backoff`       |
//! | `Timeout` | storage cleanup pass, then wait `backoff`       |
//! | `Other`   | none, the error is returned immediately         |
//!
//! A `--wait` timeout is usually a volume that never bound, so both
//! retryable classes get the same cleanup.

use std::path::PathBuf;
use std::time::Duration;

use bon::Builder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::backoff::BackoffPolicy;
use crate::error::{Error, Result};
use crate::exec::{CommandExecutor, CommandOutput};
use crate::kubectl::Kubectl;
use crate::poller::CancelFlag;
use crate::progress::LogSink;
use crate::reconcile::Reconciler;
use crate::status::Component;

const STORAGE_KEYWORDS: &[&str] =
    &["pvc", "persistentvolume", "storage", "volume", "provisioner", "unbound immediate"];

const TIMEOUT_KEYWORDS: &[&str] = &["timed out", "timeout", "context deadline exceeded"];

/// What kind of failure a Helm stderr describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Volume provisioning or binding problem.
    Storage,
    /// `--wait` ran out of time.
    Timeout,
    /// Anything else; not retried.
    Other,
}

/// Classify a Helm failure by case-insensitive keyword match.
///
/// Storage keywords win over timeout keywords, since a PVC that never binds
/// usually surfaces as a timeout too.
pub fn classify_error(stderr: &str) -> ErrorClass {
    let lower = stderr.to_lowercase();
    if STORAGE_KEYWORDS.iter().any(|k| lower.contains(k)) {
        ErrorClass::Storage
    } else if TIMEOUT_KEYWORDS.iter().any(|k| lower.contains(k)) {
        ErrorClass::Timeout
    } else {
        ErrorClass::Other
    }
}

/// `info.status` of a release, or `None` if Helm does not know it.
pub async fn release_status<E: CommandExecutor>(
    executor: &E,
    kube_context: Option<&str>,
    release: &str,
    namespace: &str,
) -> Option<String> {
    let mut args = vec!["status", release, "-n", namespace, "-o", "json"];
    if let Some(ctx) = kube_context {
        args.extend(["--kube-context", ctx]);
    }
    let out = executor.run("helm", &args).await;
    if !out.success() {
        return None;
    }
    let json: Value = serde_json::from_str(&out.stdout).ok()?;
    json.pointer("/info/status").and_then(Value::as_str).map(str::to_string)
}

/// A chart repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelmRepo {
    /// Local alias (`bitnami`).
    pub name: String,
    /// Repository URL.
    pub url: String,
}

impl HelmRepo {
    /// Create a repo reference.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self { name: name.into(), url: url.into() }
    }
}

/// One `helm upgrade --install` invocation.
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
pub struct HelmChart {
    /// Release name.
    #[builder(into)]
    pub release: String,
    /// Chart reference (`bitnami/postgresql`).
    #[builder(into)]
    pub chart: String,
    /// Target namespace, created if missing.
    #[builder(into)]
    pub namespace: String,
    /// Pinned chart version.
    #[builder(into)]
    pub version: Option<String>,
    /// Repository to add before installing.
    pub repo: Option<HelmRepo>,
    /// `--set key=value` pairs, in order.
    #[builder(default)]
    pub values: Vec<(String, String)>,
    /// `-f` values file.
    pub values_file: Option<PathBuf>,
    /// Helm's own `--timeout` for `--wait`.
    #[builder(default = Duration::from_secs(600))]
    pub timeout: Duration,
}

impl HelmChart {
    /// Arguments for `helm upgrade --install`.
    pub fn upgrade_args(&self, kube_context: Option<&str>) -> Vec<String> {
        let mut args: Vec<String> = [
            "upgrade",
            "--install",
            self.release.as_str(),
            self.chart.as_str(),
            "-n",
            self.namespace.as_str(),
            "--create-namespace",
            "--atomic",
            "--wait",
            "--timeout",
        ]
        .iter()
        .map(|s| (*s).to_string())
        .collect();
        args.push(format!("{}s", self.timeout.as_secs()));

        if let Some(version) = &self.version {
            args.extend(["--version".to_string(), version.clone()]);
        }
        for (key, value) in &self.values {
            args.extend(["--set".to_string(), format!("{key}={value}")]);
        }
        if let Some(file) = &self.values_file {
            args.extend(["-f".to_string(), file.display().to_string()]);
        }
        if let Some(ctx) = kube_context {
            args.extend(["--kube-context".to_string(), ctx.to_string()]);
        }
        args
    }
}

/// Retry ceiling and pacing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HelmRetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Wait after the cleanup pass that follows a retryable failure.
    pub backoff: BackoffPolicy,
}

impl Default for HelmRetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, backoff: BackoffPolicy::linear(Duration::from_secs(30)) }
    }
}

/// A release that Helm reported as installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelmInstall {
    /// Release name.
    pub release: String,
    /// Attempts it took.
    pub attempts: u32,
    /// Storage cleanup passes run along the way.
    pub storage_cleanups: u32,
}

/// Runs Helm with retries.
pub struct HelmInstaller<'a, E> {
    kubectl: &'a Kubectl<'a, E>,
    policy: HelmRetryPolicy,
    cancel: Option<CancelFlag>,
    sink: Option<(&'a dyn LogSink, Component)>,
}

impl<'a, E: CommandExecutor> HelmInstaller<'a, E> {
    /// Create an installer.
    pub fn new(kubectl: &'a Kubectl<'a, E>, policy: HelmRetryPolicy) -> Self {
        Self { kubectl, policy, cancel: None, sink: None }
    }

    /// Stop between attempts when `flag` is set.
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

    async fn helm(&self, args: &[&str]) -> CommandOutput {
        self.kubectl.executor().run("helm", args).await
    }

    /// `helm repo add --force-update` then `helm repo update <name>`.
    pub async fn ensure_repo(&self, repo: &HelmRepo) -> Result<()> {
        debug!(name = %repo.name, url = %repo.url, "adding helm repo");
        self.helm(&["repo", "add", &repo.name, &repo.url, "--force-update"])
            .await
            .into_result("helm")?;
        self.helm(&["repo", "update", &repo.name]).await.into_result("helm")?;
        Ok(())
    }

    /// Install or upgrade `chart`, retrying per the policy.
    pub async fn install(&self, chart: &HelmChart) -> Result<HelmInstall> {
        if let Some(repo) = &chart.repo {
            self.ensure_repo(repo).await?;
        }

        let args = chart.upgrade_args(self.kubectl.context());
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut storage_cleanups = 0;
        let mut attempt = 0;

        loop {
            if self.cancel.as_ref().is_some_and(CancelFlag::is_cancelled) {
                return Err(Error::Cancelled);
            }
            attempt += 1;
            info!(release = %chart.release, chart = %chart.chart, attempt, max_attempts, "helm upgrade --install");
            self.report(format!("helm upgrade --install {} (attempt {attempt}/{max_attempts})", chart.release));

            let out = self.helm(&args).await;
            if out.success() {
                self.report(format!("Release {} deployed", chart.release));
                return Ok(HelmInstall {
                    release: chart.release.clone(),
                    attempts: attempt,
                    storage_cleanups,
                });
            }

            let stderr = out.error_text().to_string();
            let class = classify_error(&stderr);
            warn!(release = %chart.release, attempt, ?class, %stderr, "helm install failed");

            if class == ErrorClass::Other || attempt >= max_attempts {
                return Err(Error::Helm { release: chart.release.clone(), attempts: attempt, stderr });
            }

            self.report(format!("{class:?} error, cleaning up volumes and release state"));
            let report =
                Reconciler::new(self.kubectl).storage_cleanup(&chart.namespace, &chart.release).await;
            storage_cleanups += 1;
            debug!(deleted = report.deleted.len(), warnings = report.warnings.len(), "storage cleanup done");

            let delay = self.policy.backoff.delay(attempt);
            self.report(format!("Retrying in {}s", delay.as_secs()));
            tokio::time::sleep(delay).await;
        }
    }

    /// `helm uninstall`, treating an unknown release as success.
    pub async fn uninstall(&self, release: &str, namespace: &str) -> Result<()> {
        let mut args = vec!["uninstall", release, "-n", namespace, "--wait"];
        if let Some(ctx) = self.kubectl.context() {
            args.extend(["--kube-context", ctx]);
        }
        let out = self.helm(&args).await;
        if out.success() || out.error_text().contains("not found") {
            return Ok(());
        }
        out.into_result("helm").map(|_| ())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;
    use tokio::time::Instant;

    use super::*;
    use crate::exec::testing::ScriptedExecutor;

    fn chart() -> HelmChart {
        HelmChart::builder()
            .release("ctf-database")
            .chart("bitnami/postgresql")
            .namespace("ctf-platform")
            .values(vec![("auth.database".to_string(), "ctf".to_string())])
            .build()
    }

    #[test]
    fn test_classify_error() {
        assert_eq!(
            classify_error("pod has unbound immediate PersistentVolumeClaims"),
            ErrorClass::Storage
        );
        assert_eq!(classify_error("waiting for provisioner \"rancher.io/local-path\""), ErrorClass::Storage);
        assert_eq!(
            classify_error("Error: INSTALLATION FAILED: context deadline exceeded"),
            ErrorClass::Timeout
        );
        assert_eq!(classify_error("Error: UPGRADE FAILED: Timed Out waiting for the condition"), ErrorClass::Timeout);
        assert_eq!(classify_error("Error: chart \"postgresql\" not found"), ErrorClass::Other);
    }

    #[test]
    fn test_upgrade_args() {
        let chart = HelmChart::builder()
            .release("ctf-monitoring")
            .chart("prometheus-community/kube-prometheus-stack")
            .namespace("monitoring")
            .version("58.2.1")
            .values(vec![("grafana.enabled".into(), "true".into())])
            .timeout(Duration::from_secs(300))
            .build();
        assert_eq!(
            chart.upgrade_args(Some("kind-ctf")).join(" "),
            "upgrade --install ctf-monitoring prometheus-community/kube-prometheus-stack -n monitoring \
             --create-namespace --atomic --wait --timeout 300s --version 58.2.1 \
             --set grafana.enabled=true --kube-context kind-ctf"
        );
    }

    #[tokio::test]
    async fn test_release_status_parses_json() {
        let exec = ScriptedExecutor::new().on(
            "helm status",
            vec![CommandOutput::ok(json!({ "info": { "status": "deployed" } }).to_string())],
        );
        let status = release_status(&exec, Some("kind-ctf"), "ctf-database", "ctf").await;
        assert_eq!(status.as_deref(), Some("deployed"));
        assert_eq!(
            exec.calls()[0],
            "helm status ctf-database -n ctf -o json --kube-context kind-ctf"
        );
    }

    #[tokio::test]
    async fn test_release_status_unknown_release() {
        let exec = ScriptedExecutor::new()
            .on("helm status", vec![CommandOutput::failed(1, "Error: release: not found")]);
        assert_eq!(release_status(&exec, None, "x", "ctf").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_first_try() {
        let exec = ScriptedExecutor::new();
        let kubectl = Kubectl::new(&exec, None);
        let result =
            HelmInstaller::new(&kubectl, HelmRetryPolicy::default()).install(&chart()).await.unwrap();
        assert_eq!(result.attempts, 1);
        assert_eq!(exec.count("upgrade --install"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_storage_error_cleans_up_and_backs_off_linearly() {
        let exec = ScriptedExecutor::new().on(
            "upgrade --install",
            vec![
                CommandOutput::failed(1, "Error: pod has unbound immediate PersistentVolumeClaims"),
                CommandOutput::failed(1, "Error: pod has unbound immediate PersistentVolumeClaims"),
                CommandOutput::ok("STATUS: deployed"),
            ],
        );
        let kubectl = Kubectl::new(&exec, None);

        let start = Instant::now();
        let result =
            HelmInstaller::new(&kubectl, HelmRetryPolicy::default()).install(&chart()).await.unwrap();

        assert_eq!(result.attempts, 3);
        assert_eq!(result.storage_cleanups, 2);
        // 30s after attempt 1, 60s after attempt 2.
        assert_eq!(start.elapsed(), Duration::from_secs(90));
        assert_eq!(exec.count("get pvc -n ctf-platform"), 2);
        assert_eq!(exec.count("get pv -o json"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_error_cleans_up_and_backs_off_linearly() {
        let exec = ScriptedExecutor::new().on(
            "upgrade --install",
            vec![
                CommandOutput::failed(1, "Error: INSTALLATION FAILED: context deadline exceeded"),
                CommandOutput::failed(1, "Error: timed out waiting for the condition"),
                CommandOutput::ok("STATUS: deployed"),
            ],
        );
        let kubectl = Kubectl::new(&exec, None);

        let start = Instant::now();
        let result =
            HelmInstaller::new(&kubectl, HelmRetryPolicy::default()).install(&chart()).await.unwrap();

        assert_eq!(result.attempts, 3);
        assert_eq!(result.storage_cleanups, 2);
        // 30s after attempt 1, 60s after attempt 2.
        assert_eq!(start.elapsed(), Duration::from_secs(90));
        assert_eq!(exec.count("get pvc -n ctf-platform"), 2);
        assert_eq!(exec.count("get pv -o json"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_error_is_not_retried() {
        let exec = ScriptedExecutor::new().on(
            "upgrade --install",
            vec![CommandOutput::failed(1, "Error: chart \"postgresql\" version \"99\" not found")],
        );
        let kubectl = Kubectl::new(&exec, None);

        let err = HelmInstaller::new(&kubectl, HelmRetryPolicy::default())
            .install(&chart())
            .await
            .unwrap_err();

        assert_eq!(exec.count("upgrade --install"), 1);
        let Error::Helm { attempts, stderr, .. } = err else { panic!("expected helm error") };
        assert_eq!(attempts, 1);
        assert_eq!(stderr, "Error: chart \"postgresql\" version \"99\" not found");
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_at_ceiling_with_last_stderr_verbatim() {
        let exec = ScriptedExecutor::new().on(
            "upgrade --install",
            vec![
                CommandOutput::failed(1, "Error: timed out waiting for the condition (1)"),
                CommandOutput::failed(1, "Error: timed out waiting for the condition (2)"),
                CommandOutput::failed(1, "Error: timed out waiting for the condition (3)"),
            ],
        );
        let kubectl = Kubectl::new(&exec, None);

        let err = HelmInstaller::new(&kubectl, HelmRetryPolicy::default())
            .install(&chart())
            .await
            .unwrap_err();

        assert_eq!(exec.count("upgrade --install"), 3);
        assert_eq!(
            err.to_string(),
            "helm release 'ctf-database' failed after 3 attempt(s): Error: timed out waiting for the condition (3)"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_repo_added_before_install() {
        let exec = ScriptedExecutor::new();
        let kubectl = Kubectl::new(&exec, None);
        let chart = HelmChart { repo: Some(HelmRepo::new("bitnami", "https://charts.bitnami.com/bitnami")), ..chart() };

        HelmInstaller::new(&kubectl, HelmRetryPolicy::default()).install(&chart).await.unwrap();

        let calls = exec.calls();
        assert_eq!(calls[0], "helm repo add bitnami https://charts.bitnami.com/bitnami --force-update");
        assert_eq!(calls[1], "helm repo update bitnami");
        assert!(calls[2].starts_with("helm upgrade --install ctf-database"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_before_next_attempt() {
        let exec = ScriptedExecutor::new();
        let kubectl = Kubectl::new(&exec, None);
        let flag = CancelFlag::new();
        flag.cancel();
        let err = HelmInstaller::new(&kubectl, HelmRetryPolicy::default())
            .with_cancel(flag)
            .install(&chart())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(exec.count("helm"), 0);
    }
}
