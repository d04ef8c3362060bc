//! Kubernetes objects built as JSON values and rendered to YAML.
//!
//! Objects are plain [`serde_json::Value`]s so callers can tweak any field
//! before rendering; [`render`] turns a list of them into a single
//! `---`-separated document stream for `kubectl apply`.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::Result;

/// Label every object created by the installer carries.
pub const MANAGED_BY: (&str, &str) = ("app.kubernetes.io/managed-by", "ctf-installer");

/// Standard labels for an application.
pub fn labels(name: &str, part_of: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app.kubernetes.io/name".to_string(), name.to_string()),
        ("app.kubernetes.io/part-of".to_string(), part_of.to_string()),
        (MANAGED_BY.0.to_string(), MANAGED_BY.1.to_string()),
    ])
}

fn metadata(name: &str, namespace: &str, labels: &BTreeMap<String, String>) -> Value {
    json!({ "name": name, "namespace": namespace, "labels": labels })
}

/// A ServiceAccount.
pub fn service_account(name: &str, namespace: &str, labels: &BTreeMap<String, String>) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "ServiceAccount",
        "metadata": metadata(name, namespace, labels),
    })
}

/// One RBAC policy rule.
#[derive(Debug, Clone, Copy)]
pub struct PolicyRule<'a> {
    /// `apiGroups`; `""` is the core group.
    pub api_groups: &'a [&'a str],
    /// Resource names.
    pub resources: &'a [&'a str],
    /// Allowed verbs.
    pub verbs: &'a [&'a str],
}

/// A namespaced Role.
pub fn role(
    name: &str,
    namespace: &str,
    labels: &BTreeMap<String, String>,
    rules: &[PolicyRule<'_>],
) -> Value {
    let rules: Vec<Value> = rules
        .iter()
        .map(|r| json!({ "apiGroups": r.api_groups, "resources": r.resources, "verbs": r.verbs }))
        .collect();
    json!({
        "apiVersion": "rbac.authorization.k8s.io/v1",
        "kind": "Role",
        "metadata": metadata(name, namespace, labels),
        "rules": rules,
    })
}

/// Bind `role` in `namespace` to a service account that may live elsewhere.
pub fn role_binding(
    name: &str,
    namespace: &str,
    labels: &BTreeMap<String, String>,
    role: &str,
    service_account: (&str, &str),
) -> Value {
    let (account, account_namespace) = service_account;
    json!({
        "apiVersion": "rbac.authorization.k8s.io/v1",
        "kind": "RoleBinding",
        "metadata": metadata(name, namespace, labels),
        "roleRef": { "apiGroup": "rbac.authorization.k8s.io", "kind": "Role", "name": role },
        "subjects": [{ "kind": "ServiceAccount", "name": account, "namespace": account_namespace }],
    })
}

/// A ConfigMap.
pub fn config_map(
    name: &str,
    namespace: &str,
    labels: &BTreeMap<String, String>,
    data: &BTreeMap<String, String>,
) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": metadata(name, namespace, labels),
        "data": data,
    })
}

/// Container settings for [`deployment`].
#[derive(Debug, Clone)]
pub struct ContainerSpec<'a> {
    /// Container name.
    pub name: &'a str,
    /// Image reference.
    pub image: &'a str,
    /// Container port.
    pub port: u16,
    /// ConfigMap whose keys become environment variables.
    pub env_from_config_map: Option<&'a str>,
    /// HTTP readiness probe path.
    pub readiness_path: Option<&'a str>,
}

/// A single-container Deployment selecting on `app.kubernetes.io/name`.
pub fn deployment(
    name: &str,
    namespace: &str,
    labels: &BTreeMap<String, String>,
    replicas: u32,
    service_account: &str,
    container: &ContainerSpec<'_>,
) -> Value {
    let selector = labels
        .get("app.kubernetes.io/name")
        .map(|n| json!({ "app.kubernetes.io/name": n }))
        .unwrap_or_else(|| json!({ "app.kubernetes.io/name": name }));

    let mut env_from = Vec::new();
    if let Some(cm) = container.env_from_config_map {
        env_from.push(json!({ "configMapRef": { "name": cm } }));
    }

    let mut spec = json!({
        "name": container.name,
        "image": container.image,
        "ports": [{ "name": "http", "containerPort": container.port }],
        "envFrom": env_from,
    });
    if let Some(path) = container.readiness_path {
        spec["readinessProbe"] = json!({
            "httpGet": { "path": path, "port": "http" },
            "initialDelaySeconds": 5,
            "periodSeconds": 5,
        });
    }

    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": metadata(name, namespace, labels),
        "spec": {
            "replicas": replicas,
            "selector": { "matchLabels": selector },
            "template": {
                "metadata": { "labels": labels },
                "spec": { "serviceAccountName": service_account, "containers": [spec] },
            },
        },
    })
}

/// A ClusterIP Service forwarding `port` to the pod's `http` port.
pub fn service(name: &str, namespace: &str, labels: &BTreeMap<String, String>, port: u16) -> Value {
    let selector = labels.get("app.kubernetes.io/name").cloned().unwrap_or_else(|| name.to_string());
    json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": metadata(name, namespace, labels),
        "spec": {
            "type": "ClusterIP",
            "selector": { "app.kubernetes.io/name": selector },
            "ports": [{ "name": "http", "port": port, "targetPort": "http" }],
        },
    })
}

/// Render objects as a `---`-separated YAML stream.
pub fn render(objects: &[Value]) -> Result<String> {
    let mut out = String::new();
    for (i, object) in objects.iter().enumerate() {
        if i > 0 {
            out.push_str("---\n");
        }
        out.push_str(&serde_yaml::to_string(object)?);
    }
    Ok(out)
}

/// Parse a multi-document YAML stream, skipping empty documents.
pub fn split_documents(yaml: &str) -> Result<Vec<Value>> {
    let mut docs = Vec::new();
    for document in serde_yaml::Deserializer::from_str(yaml) {
        let value = Value::deserialize(document)?;
        if !value.is_null() {
            docs.push(value);
        }
    }
    Ok(docs)
}

/// `kind/name` of every object in a stream.
pub fn describe_objects(objects: &[Value]) -> Vec<String> {
    objects
        .iter()
        .map(|o| {
            format!(
                "{}/{}",
                o.get("kind").and_then(Value::as_str).unwrap_or("?"),
                o.pointer("/metadata/name").and_then(Value::as_str).unwrap_or("?")
            )
        })
        .collect()
}
