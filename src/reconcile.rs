//! Clearing out a component's previous installation.
//!
//! Reinstalling on top of a half-finished install fails in unhelpful ways
//! (stuck finalizers, Terminating namespaces, PVCs that never bind), so
//! every component is reconciled first: list what is there, strip
//! finalizers, force-delete.
//!
//! Every step is best-effort. Failures become [`CleanupWarning`]s in the
//! [`ReconcileReport`]; nothing here returns an error.

use tracing::{debug, info, warn};

use crate::error::CleanupWarning;
use crate::exec::{CommandExecutor, CommandOutput};
use crate::kubectl::{Kubectl, ResourceFilter, ResourceRef};

/// Kinds that carry a component's label and are removed on reinstall.
pub const LABELLED_KINDS: &[&str] =
    &["deployment", "statefulset", "service", "ingress", "configmap", "pvc"];

/// Helm release states that block a new `upgrade --install`.
const STUCK_RELEASE_STATES: &str = "failed,pending-install,pending-upgrade,pending-rollback";

/// One kind plus the filter selecting a component's objects of that kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindFilter {
    /// kubectl kind.
    pub kind: String,
    /// Which objects.
    pub filter: ResourceFilter,
    /// Listed without `-n` when true.
    pub cluster_scoped: bool,
}

impl KindFilter {
    /// A namespaced kind.
    pub fn namespaced(kind: impl Into<String>, filter: ResourceFilter) -> Self {
        Self { kind: kind.into(), filter, cluster_scoped: false }
    }

    /// A cluster-scoped kind.
    pub fn cluster(kind: impl Into<String>, filter: ResourceFilter) -> Self {
        Self { kind: kind.into(), filter, cluster_scoped: true }
    }
}

/// Everything that belongs to one component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupTarget {
    /// Component namespace.
    pub namespace: String,
    /// Kinds and filters to sweep.
    pub kinds: Vec<KindFilter>,
}

impl CleanupTarget {
    /// Sweep [`LABELLED_KINDS`] by `selector` in `namespace`.
    pub fn labelled(namespace: impl Into<String>, selector: &str) -> Self {
        Self {
            namespace: namespace.into(),
            kinds: LABELLED_KINDS
                .iter()
                .map(|kind| KindFilter::namespaced(*kind, ResourceFilter::Selector(selector.into())))
                .collect(),
        }
    }

    /// Also sweep Helm's release secrets for `release`.
    pub fn with_helm_release(mut self, release: &str) -> Self {
        self.kinds.push(KindFilter::namespaced(
            "secret",
            ResourceFilter::Selector(format!("owner=helm,name={release}")),
        ));
        self
    }

    /// Also sweep CRDs whose name ends with `group_suffix`.
    pub fn with_crds(mut self, group_suffix: &str) -> Self {
        self.kinds.push(KindFilter::cluster("crd", ResourceFilter::NameSuffix(group_suffix.into())));
        self
    }
}

/// What a reconciliation did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// `kind/name` of every object a delete was issued for.
    pub deleted: Vec<String>,
    /// `kind/name` of every object whose finalizers were stripped.
    pub finalizers_stripped: Vec<String>,
    /// Whether the namespace was found Terminating and purged.
    pub namespace_purged: bool,
    /// Non-fatal failures.
    pub warnings: Vec<CleanupWarning>,
}

impl ReconcileReport {
    /// Fold another report into this one.
    pub fn merge(&mut self, other: Self) {
        self.deleted.extend(other.deleted);
        self.finalizers_stripped.extend(other.finalizers_stripped);
        self.namespace_purged |= other.namespace_purged;
        self.warnings.extend(other.warnings);
    }

    /// True if nothing was touched and nothing failed.
    pub fn is_noop(&self) -> bool {
        self.deleted.is_empty() && self.finalizers_stripped.is_empty() && self.warnings.is_empty()
    }

    fn warn(&mut self, resource: impl Into<String>, action: &'static str, message: impl Into<String>) {
        let warning = CleanupWarning { resource: resource.into(), action, message: message.into() };
        warn!(%warning, "cleanup step failed, continuing");
        self.warnings.push(warning);
    }
}

/// Force-removes prior component state.
pub struct Reconciler<'a, E> {
    kubectl: &'a Kubectl<'a, E>,
}

impl<'a, E: CommandExecutor> Reconciler<'a, E> {
    /// Create a reconciler.
    pub fn new(kubectl: &'a Kubectl<'a, E>) -> Self {
        Self { kubectl }
    }

    /// Remove everything `target` describes.
    pub async fn reconcile(&self, target: &CleanupTarget) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        for kind in &target.kinds {
            let namespace = (!kind.cluster_scoped).then_some(target.namespace.as_str());
            self.sweep(&kind.kind, namespace, &kind.filter, &mut report).await;
        }

        if self.kubectl.namespace_phase(&target.namespace).await.as_deref() == Some("Terminating") {
            report.merge(self.purge_namespace(&target.namespace).await);
        }

        if report.is_noop() {
            debug!(namespace = %target.namespace, "nothing to reconcile");
        } else {
            info!(
                namespace = %target.namespace,
                deleted = report.deleted.len(),
                stripped = report.finalizers_stripped.len(),
                warnings = report.warnings.len(),
                "reconciled prior state"
            );
        }
        report
    }

    /// Delete every namespaced object in a Terminating namespace, then
    /// strip the namespace's own finalizers.
    pub async fn purge_namespace(&self, namespace: &str) -> ReconcileReport {
        let mut report = ReconcileReport { namespace_purged: true, ..Default::default() };
        warn!(namespace, "namespace stuck Terminating, purging");

        match self.kubectl.namespaced_kinds().await {
            Ok(kinds) => {
                for kind in kinds {
                    self.sweep(&kind, Some(namespace), &ResourceFilter::All, &mut report).await;
                }
            }
            Err(e) => report.warn(format!("namespace/{namespace}"), "list api resources", e.to_string()),
        }

        match self.kubectl.finalize_namespace(namespace).await {
            Ok(out) if out.success() => {
                report.finalizers_stripped.push(format!("namespace/{namespace}"));
            }
            Ok(out) => report.warn(
                format!("namespace/{namespace}"),
                "finalize namespace",
                out.error_text(),
            ),
            Err(e) => report.warn(format!("namespace/{namespace}"), "finalize namespace", e.to_string()),
        }
        report
    }

    /// Aggressive storage cleanup used between Helm retries.
    ///
    /// Removes PVCs in `namespace` that are not `Bound` (or are stuck
    /// terminating), persistent volumes released by claims from that
    /// namespace, and Helm release secrets left in a failed/pending state.
    pub async fn storage_cleanup(&self, namespace: &str, release: &str) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        info!(namespace, release, "running storage cleanup");

        match self.kubectl.list("pvc", Some(namespace), &ResourceFilter::All).await {
            Ok(pvcs) => {
                for pvc in pvcs.iter().filter(|p| p.terminating || p.phase.as_deref() != Some("Bound")) {
                    self.remove(pvc, &mut report).await;
                }
            }
            Err(e) => report.warn(format!("pvc in {namespace}"), "list", e.to_string()),
        }

        match self.kubectl.list("pv", None, &ResourceFilter::All).await {
            Ok(pvs) => {
                let stuck = pvs.iter().filter(|pv| {
                    pv.claim_namespace.as_deref() == Some(namespace)
                        && (pv.terminating
                            || matches!(pv.phase.as_deref(), Some("Released" | "Failed")))
                });
                for pv in stuck {
                    self.remove(pv, &mut report).await;
                }
            }
            Err(e) => report.warn("pv", "list", e.to_string()),
        }

        let selector = format!("owner=helm,name={release},status in ({STUCK_RELEASE_STATES})");
        self.sweep("secret", Some(namespace), &ResourceFilter::Selector(selector), &mut report)
            .await;

        report
    }

    async fn sweep(
        &self,
        kind: &str,
        namespace: Option<&str>,
        filter: &ResourceFilter,
        report: &mut ReconcileReport,
    ) {
        match self.kubectl.list(kind, namespace, filter).await {
            Ok(resources) => {
                for resource in &resources {
                    self.remove(resource, report).await;
                }
            }
            Err(e) => report.warn(format!("{kind} ({filter})"), "list", e.to_string()),
        }
    }

    async fn remove(&self, resource: &ResourceRef, report: &mut ReconcileReport) {
        if !resource.finalizers.is_empty() {
            let out = self.kubectl.strip_finalizers(resource).await;
            record(report, resource, "strip finalizers", &out, |r| &mut r.finalizers_stripped);
        }
        let out = self.kubectl.force_delete(resource).await;
        record(report, resource, "force delete", &out, |r| &mut r.deleted);
    }
}

fn record(
    report: &mut ReconcileReport,
    resource: &ResourceRef,
    action: &'static str,
    out: &CommandOutput,
    list: impl FnOnce(&mut ReconcileReport) -> &mut Vec<String>,
) {
    if out.success() {
        debug!(%resource, action, "ok");
        list(report).push(resource.to_string());
    } else {
        report.warn(resource.to_string(), action, out.error_text());
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::exec::testing::ScriptedExecutor;

    fn items(v: serde_json::Value) -> CommandOutput {
        CommandOutput::ok(json!({ "items": v }).to_string())
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent_on_empty_cluster() {
        let exec = ScriptedExecutor::new()
            .on("jsonpath", vec![CommandOutput::ok("Active")])
            .on("get", vec![items(json!([]))]);
        let kubectl = Kubectl::new(&exec, None);
        let reconciler = Reconciler::new(&kubectl);
        let target = CleanupTarget::labelled("ctf", "app.kubernetes.io/instance=ctf-database")
            .with_helm_release("ctf-database");

        let first = reconciler.reconcile(&target).await;
        let first_calls = exec.calls();
        let second = reconciler.reconcile(&target).await;
        let second_calls = exec.calls()[first_calls.len()..].to_vec();

        assert!(first.is_noop());
        assert_eq!(first, second);
        assert_eq!(first_calls, second_calls);
        assert!(first_calls.iter().all(|c| !c.contains("delete") && !c.contains("patch")));
    }

    #[tokio::test]
    async fn test_strips_finalizers_then_force_deletes() {
        let exec = ScriptedExecutor::new()
            .on("jsonpath", vec![CommandOutput::ok("Active")])
            .on(
                "get pvc",
                vec![items(json!([
                    { "metadata": { "name": "data-0", "namespace": "ctf",
                                    "finalizers": ["kubernetes.io/pvc-protection"] } }
                ]))],
            )
            .on(
                "get deployment",
                vec![items(json!([{ "metadata": { "name": "instance-manager", "namespace": "ctf" } }]))],
            )
            .on("get", vec![items(json!([]))]);
        let kubectl = Kubectl::new(&exec, None);
        let target = CleanupTarget::labelled("ctf", "app=x");

        let report = Reconciler::new(&kubectl).reconcile(&target).await;

        assert_eq!(report.finalizers_stripped, vec!["pvc/data-0".to_string()]);
        assert_eq!(
            report.deleted,
            vec!["deployment/instance-manager".to_string(), "pvc/data-0".to_string()]
        );
        assert!(report.warnings.is_empty());
        let calls = exec.calls();
        let patch = calls.iter().position(|c| c.contains("patch pvc data-0")).unwrap();
        let delete = calls.iter().position(|c| c.contains("delete pvc data-0")).unwrap();
        assert!(patch < delete);
        // Deployments carry no finalizers; no patch issued.
        assert_eq!(exec.count("patch deployment"), 0);
    }

    #[tokio::test]
    async fn test_failures_are_warnings_not_errors() {
        let exec = ScriptedExecutor::new()
            .on("jsonpath", vec![CommandOutput::ok("Active")])
            .on("delete", vec![CommandOutput::failed(1, "Error from server (Forbidden)")])
            .on("get service", vec![CommandOutput::failed(1, "Unable to connect to the server")])
            .on(
                "get deployment",
                vec![items(json!([{ "metadata": { "name": "a", "namespace": "ctf" } },
                                  { "metadata": { "name": "b", "namespace": "ctf" } }]))],
            )
            .on("get", vec![items(json!([]))]);
        let kubectl = Kubectl::new(&exec, None);

        let report =
            Reconciler::new(&kubectl).reconcile(&CleanupTarget::labelled("ctf", "app=x")).await;

        // Both deletes attempted even though the first failed.
        assert_eq!(exec.count("delete deployment"), 2);
        assert!(report.deleted.is_empty());
        assert_eq!(report.warnings.len(), 3);
        assert_eq!(report.warnings[0].action, "force delete");
        assert_eq!(report.warnings[2].action, "list");
    }

    #[tokio::test]
    async fn test_terminating_namespace_is_purged() {
        let ns = json!({ "metadata": { "name": "monitoring" }, "spec": { "finalizers": ["kubernetes"] } });
        let exec = ScriptedExecutor::new()
            .on("jsonpath", vec![CommandOutput::ok("Terminating")])
            .on("api-resources", vec![CommandOutput::ok("configmaps\nservicemonitors.monitoring.coreos.com\n")])
            .on(
                "get servicemonitors.monitoring.coreos.com -n monitoring",
                vec![items(json!([{ "metadata": { "name": "grafana", "namespace": "monitoring",
                                                 "finalizers": ["x"] } }]))],
            )
            .on("get namespace monitoring -o json", vec![CommandOutput::ok(ns.to_string())])
            .on("get", vec![items(json!([]))]);
        let kubectl = Kubectl::new(&exec, None);

        let report = Reconciler::new(&kubectl)
            .reconcile(&CleanupTarget::labelled("monitoring", "release=ctf-monitoring"))
            .await;

        assert!(report.namespace_purged);
        assert_eq!(
            report.deleted,
            vec!["servicemonitors.monitoring.coreos.com/grafana".to_string()]
        );
        assert!(report.finalizers_stripped.contains(&"namespace/monitoring".to_string()));
        assert_eq!(exec.count("replace --raw /api/v1/namespaces/monitoring/finalize"), 1);
    }

    #[tokio::test]
    async fn test_storage_cleanup_targets_only_stuck_volumes() {
        let exec = ScriptedExecutor::new()
            .on(
                "get pvc",
                vec![items(json!([
                    { "metadata": { "name": "bound", "namespace": "ctf" }, "status": { "phase": "Bound" } },
                    { "metadata": { "name": "pending", "namespace": "ctf" }, "status": { "phase": "Pending" } }
                ]))],
            )
            .on(
                "get pv",
                vec![items(json!([
                    { "metadata": { "name": "pv-ours", "finalizers": ["kubernetes.io/pv-protection"] },
                      "spec": { "claimRef": { "namespace": "ctf" } }, "status": { "phase": "Released" } },
                    { "metadata": { "name": "pv-other" },
                      "spec": { "claimRef": { "namespace": "other" } }, "status": { "phase": "Released" } },
                    { "metadata": { "name": "pv-bound" },
                      "spec": { "claimRef": { "namespace": "ctf" } }, "status": { "phase": "Bound" } }
                ]))],
            )
            .on("get secret", vec![items(json!([{ "metadata": { "name": "sh.helm.release.v1.ctf-database.v1", "namespace": "ctf" } }]))]);
        let kubectl = Kubectl::new(&exec, None);

        let report = Reconciler::new(&kubectl).storage_cleanup("ctf", "ctf-database").await;

        assert_eq!(
            report.deleted,
            vec![
                "pvc/pending".to_string(),
                "pv/pv-ours".to_string(),
                "secret/sh.helm.release.v1.ctf-database.v1".to_string()
            ]
        );
        assert_eq!(report.finalizers_stripped, vec!["pv/pv-ours".to_string()]);
        assert!(exec.calls().iter().any(|c| c.contains(
            "owner=helm,name=ctf-database,status in (failed,pending-install,pending-upgrade,pending-rollback)"
        )));
    }
}
