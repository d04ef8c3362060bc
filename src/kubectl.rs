//! Kubernetes operations through `kubectl`.
//!
//! A thin layer over [`CommandExecutor`] that knows kubectl's argument
//! conventions and how to read its JSON output. Nothing here caches
//! cluster state; every call re-reads it.

use std::fmt;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::exec::{CommandExecutor, CommandOutput, apply_manifest_from_string};

/// Container waiting/terminated reasons that mean the pod will not recover
/// without intervention.
pub const FATAL_CONTAINER_REASONS: &[&str] = &[
    "CrashLoopBackOff",
    "Error",
    "ImagePullBackOff",
    "ErrImagePull",
    "CreateContainerConfigError",
    "InvalidImageName",
];

/// How to select resources of a kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceFilter {
    /// A single object by name.
    Name(String),
    /// Objects matching a label selector.
    Selector(String),
    /// Objects whose name ends with the suffix (e.g. CRDs of an API group).
    NameSuffix(String),
    /// Every object of the kind.
    All,
}

impl fmt::Display for ResourceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => write!(f, "name={name}"),
            Self::Selector(selector) => write!(f, "selector={selector}"),
            Self::NameSuffix(suffix) => write!(f, "name=*{suffix}"),
            Self::All => f.write_str("all"),
        }
    }
}

/// A live object as seen by a list call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    /// kubectl resource kind (e.g. `pvc`, `deployment`).
    pub kind: String,
    /// Object name.
    pub name: String,
    /// Namespace, if namespaced.
    pub namespace: Option<String>,
    /// `metadata.finalizers`.
    pub finalizers: Vec<String>,
    /// `status.phase`, for kinds that have one.
    pub phase: Option<String>,
    /// Whether `metadata.deletionTimestamp` is set.
    pub terminating: bool,
    /// `spec.claimRef.namespace`, for persistent volumes.
    pub claim_namespace: Option<String>,
}

impl ResourceRef {
    fn from_json(kind: &str, item: &Value) -> Option<Self> {
        let name = item.pointer("/metadata/name")?.as_str()?.to_string();
        let namespace =
            item.pointer("/metadata/namespace").and_then(Value::as_str).map(str::to_string);
        let finalizers = item
            .pointer("/metadata/finalizers")
            .and_then(Value::as_array)
            .map(|f| f.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();
        let phase = item.pointer("/status/phase").and_then(Value::as_str).map(str::to_string);
        let terminating = item.pointer("/metadata/deletionTimestamp").is_some();
        let claim_namespace =
            item.pointer("/spec/claimRef/namespace").and_then(Value::as_str).map(str::to_string);

        Some(Self {
            kind: kind.to_string(),
            name,
            namespace,
            finalizers,
            phase,
            terminating,
            claim_namespace,
        })
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// What one pod looks like right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodObservation {
    /// Pod name.
    pub name: String,
    /// `status.phase` (Pending, Running, Succeeded, Failed, Unknown).
    pub phase: String,
    /// Whether every container reports `ready: true` (false if none reported).
    pub all_containers_ready: bool,
    /// Waiting or terminated reasons across containers.
    pub reasons: Vec<String>,
}

impl PodObservation {
    /// Parse a pod object from `kubectl get pod -o json`.
    pub fn from_json(item: &Value) -> Option<Self> {
        let name = item.pointer("/metadata/name")?.as_str()?.to_string();
        let phase = item
            .pointer("/status/phase")
            .and_then(Value::as_str)
            .unwrap_or("Unknown")
            .to_string();

        let statuses = item
            .pointer("/status/containerStatuses")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let all_containers_ready = !statuses.is_empty()
            && statuses.iter().all(|c| c.get("ready").and_then(Value::as_bool).unwrap_or(false));

        let reasons = statuses
            .iter()
            .filter_map(|c| {
                c.pointer("/state/waiting/reason")
                    .or_else(|| c.pointer("/state/terminated/reason"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .collect();

        Some(Self { name, phase, all_containers_ready, reasons })
    }

    /// `phase == Running` and all containers ready.
    pub fn is_ready(&self) -> bool {
        self.phase == "Running" && self.all_containers_ready
    }

    /// The first reason this pod is unrecoverable, if any.
    pub fn failure_reason(&self) -> Option<String> {
        if self.phase == "Failed" {
            return Some("pod phase Failed".to_string());
        }
        self.reasons.iter().find(|r| FATAL_CONTAINER_REASONS.contains(&r.as_str())).cloned()
    }
}

/// Whether kubectl output says the object does not exist.
pub fn is_not_found(output: &CommandOutput) -> bool {
    let text = output.error_text();
    text.contains("NotFound") || text.contains("not found")
}

/// kubectl bound to an executor and an optional kube context.
#[derive(Debug)]
pub struct Kubectl<'a, E> {
    executor: &'a E,
    context: Option<String>,
}

impl<'a, E: CommandExecutor> Kubectl<'a, E> {
    /// Create a kubectl wrapper. `context` selects `--context`.
    pub fn new(executor: &'a E, context: Option<String>) -> Self {
        Self { executor, context }
    }

    /// The underlying executor.
    pub fn executor(&self) -> &'a E {
        self.executor
    }

    /// The kube context, if one was selected.
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Arguments prepended to every kubectl call.
    pub fn global_args(&self) -> Vec<&str> {
        match &self.context {
            Some(ctx) => vec!["--context", ctx.as_str()],
            None => Vec::new(),
        }
    }

    /// Run kubectl with the global arguments prepended.
    pub async fn run(&self, args: &[&str]) -> CommandOutput {
        let mut full = self.global_args();
        full.extend_from_slice(args);
        self.executor.run("kubectl", &full).await
    }

    async fn run_with_stdin(&self, args: &[&str], stdin: &str) -> CommandOutput {
        let mut full = self.global_args();
        full.extend_from_slice(args);
        self.executor.run_with_stdin("kubectl", &full, stdin).await
    }

    /// Apply a YAML manifest (written to a temp file first).
    pub async fn apply_manifest(&self, yaml: &str) -> Result<CommandOutput> {
        apply_manifest_from_string(self.executor, yaml, &self.global_args()).await
    }

    /// `kubectl get` as JSON. Returns `Ok(None)` when the object is absent.
    pub async fn get_json(
        &self,
        kind: &str,
        namespace: Option<&str>,
        filter: &ResourceFilter,
    ) -> Result<Option<Value>> {
        let mut args = vec!["get", kind];
        match filter {
            ResourceFilter::Name(name) => args.push(name.as_str()),
            ResourceFilter::Selector(selector) => args.extend(["-l", selector.as_str()]),
            ResourceFilter::NameSuffix(_) | ResourceFilter::All => {}
        }
        if let Some(ns) = namespace {
            args.extend(["-n", ns]);
        }
        args.extend(["-o", "json"]);

        let out = self.run(&args).await;
        if !out.success() {
            if is_not_found(&out) {
                return Ok(None);
            }
            return out.into_result("kubectl").map(|_| None);
        }
        if out.stdout.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&out.stdout)?))
    }

    /// List objects of `kind` matching `filter`.
    pub async fn list(
        &self,
        kind: &str,
        namespace: Option<&str>,
        filter: &ResourceFilter,
    ) -> Result<Vec<ResourceRef>> {
        let Some(json) = self.get_json(kind, namespace, filter).await? else {
            return Ok(Vec::new());
        };

        let items: Vec<&Value> = match json.get("items").and_then(Value::as_array) {
            Some(items) => items.iter().collect(),
            None => vec![&json],
        };

        Ok(items
            .into_iter()
            .filter_map(|item| ResourceRef::from_json(kind, item))
            .filter(|r| match filter {
                ResourceFilter::NameSuffix(suffix) => r.name.ends_with(suffix.as_str()),
                _ => true,
            })
            .collect())
    }

    /// Merge-patch `metadata.finalizers` to null.
    pub async fn strip_finalizers(&self, resource: &ResourceRef) -> CommandOutput {
        let mut args = vec![
            "patch",
            resource.kind.as_str(),
            resource.name.as_str(),
            "--type=merge",
            "-p",
            r#"{"metadata":{"finalizers":null}}"#,
        ];
        if let Some(ns) = &resource.namespace {
            args.extend(["-n", ns.as_str()]);
        }
        self.run(&args).await
    }

    /// Delete with zero grace period, without waiting.
    pub async fn force_delete(&self, resource: &ResourceRef) -> CommandOutput {
        let mut args = vec![
            "delete",
            resource.kind.as_str(),
            resource.name.as_str(),
            "--grace-period=0",
            "--force",
            "--ignore-not-found",
            "--wait=false",
        ];
        if let Some(ns) = &resource.namespace {
            args.extend(["-n", ns.as_str()]);
        }
        self.run(&args).await
    }

    /// `status.phase` of a namespace, or `None` if it does not exist.
    pub async fn namespace_phase(&self, namespace: &str) -> Option<String> {
        let out = self.run(&["get", "namespace", namespace, "-o", "jsonpath={.status.phase}"]).await;
        out.success().then(|| out.stdout.trim().to_string()).filter(|p| !p.is_empty())
    }

    /// Create a namespace if it doesn't exist.
    pub async fn ensure_namespace(&self, namespace: &str) -> Result<()> {
        if self.namespace_phase(namespace).await.is_some() {
            return Ok(());
        }
        let out = self.run(&["create", "namespace", namespace]).await;
        if out.success() || out.error_text().contains("AlreadyExists") {
            Ok(())
        } else {
            out.into_result("kubectl").map(|_| ())
        }
    }

    /// Every namespaced kind that supports `list`.
    pub async fn namespaced_kinds(&self) -> Result<Vec<String>> {
        let out = self.run(&["api-resources", "--verbs=list", "--namespaced", "-o", "name"]).await;
        let stdout = out.into_result("kubectl")?;
        Ok(stdout.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string).collect())
    }

    /// Clear a namespace's `spec.finalizers` through the finalize subresource.
    pub async fn finalize_namespace(&self, namespace: &str) -> Result<CommandOutput> {
        let Some(mut ns) = self
            .get_json("namespace", None, &ResourceFilter::Name(namespace.to_string()))
            .await?
        else {
            return Ok(CommandOutput::ok(""));
        };

        if let Some(spec) = ns.get_mut("spec").and_then(Value::as_object_mut) {
            spec.insert("finalizers".to_string(), Value::Array(Vec::new()));
        }
        let body = serde_json::to_string(&ns)?;
        let path = format!("/api/v1/namespaces/{namespace}/finalize");

        Ok(self.run_with_stdin(&["replace", "--raw", &path, "-f", "-"], &body).await)
    }

    /// Observe pods matching `filter` (a name or a label selector).
    pub async fn observe_pods(
        &self,
        namespace: &str,
        filter: &ResourceFilter,
    ) -> Result<Vec<PodObservation>> {
        let Some(json) = self.get_json("pods", Some(namespace), filter).await? else {
            return Ok(Vec::new());
        };
        let pods = match json.get("items").and_then(Value::as_array) {
            Some(items) => items.iter().filter_map(PodObservation::from_json).collect(),
            None => PodObservation::from_json(&json).into_iter().collect(),
        };
        Ok(pods)
    }

    /// Last `tail` lines of logs from every container of a pod.
    pub async fn pod_logs(&self, namespace: &str, pod: &str, tail: u32) -> String {
        let tail = format!("--tail={tail}");
        let out =
            self.run(&["logs", pod, "-n", namespace, "--all-containers=true", &tail]).await;
        if out.success() { out.stdout } else { out.error_text().to_string() }
    }

    /// `kubectl describe` output, or the error text.
    pub async fn describe(&self, kind: &str, name: &str, namespace: &str) -> String {
        let out = self.run(&["describe", kind, name, "-n", namespace]).await;
        if out.success() { out.stdout } else { out.error_text().to_string() }
    }

    /// Whether a named object exists.
    pub async fn resource_exists(&self, kind: &str, name: &str, namespace: Option<&str>) -> bool {
        let mut args = vec!["get", kind, name, "-o", "name"];
        if let Some(ns) = namespace {
            args.extend(["-n", ns]);
        }
        self.run(&args).await.success()
    }

    /// Run a command inside a pod.
    pub async fn exec_in_pod(&self, namespace: &str, pod: &str, cmd: &[&str]) -> CommandOutput {
        let mut args = vec!["exec", pod, "-n", namespace, "--"];
        args.extend_from_slice(cmd);
        self.run(&args).await
    }

    /// Get the current kubectl context.
    pub async fn current_context(&self) -> Option<String> {
        let out = self.run(&["config", "current-context"]).await;
        out.success().then(|| out.stdout.trim().to_string())
    }

    /// Whether the API server answers.
    pub async fn cluster_reachable(&self) -> Result<()> {
        let out = self.run(&["cluster-info", "--request-timeout=10s"]).await;
        if out.success() {
            Ok(())
        } else {
            Err(Error::other(format!("cluster unreachable: {}", out.error_text())))
        }
    }
}
