//! The instance manager: the service that starts and reaps per-team
//! challenge instances. Shipped as plain manifests rather than a chart.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{InstallContext, PlatformComponent};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::exec::CommandExecutor;
use crate::kubectl::ResourceFilter;
use crate::manifest::{self, ContainerSpec, PolicyRule};
use crate::poller::ReadinessProbe;
use crate::reconcile::{CleanupTarget, KindFilter};
use crate::status::Component;

const NAME: &str = "instance-manager";
const CONFIG_MAP: &str = "instance-manager-config";
const PART_OF: &str = "ctf-platform";

/// Instance manager settings from the `instance_manager` config section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceManagerSettings {
    /// Container image.
    pub image: String,
    /// Deployment replicas.
    pub replicas: u32,
    /// HTTP port.
    pub port: u16,
    /// Namespace challenge instances are created in.
    pub challenge_namespace: String,
    /// Concurrent instances a team may run.
    pub max_instances_per_team: u32,
    /// Minutes before an idle instance is reaped.
    pub instance_ttl_minutes: u32,
    /// Service log level.
    pub log_level: String,
}

impl Default for InstanceManagerSettings {
    fn default() -> Self {
        Self {
            image: "ghcr.io/ctf-platform/instance-manager:latest".to_string(),
            replicas: 1,
            port: 8080,
            challenge_namespace: "ctf-challenges".to_string(),
            max_instances_per_team: 3,
            instance_ttl_minutes: 60,
            log_level: "info".to_string(),
        }
    }
}

/// The instance manager component.
#[derive(Debug, Clone)]
pub struct InstanceManager {
    settings: InstanceManagerSettings,
    namespace: String,
    database_host: String,
    database_name: String,
    database_secret: String,
}

impl InstanceManager {
    /// Build from the loaded config. Database coordinates come from the
    /// `database` section.
    pub fn from_config(config: &Config) -> Self {
        let db_namespace = config.database.namespace.as_deref().unwrap_or(&config.namespace);
        Self {
            settings: config.instance_manager.clone(),
            namespace: config.namespace.clone(),
            database_host: format!(
                "{}-postgresql.{db_namespace}.svc.cluster.local",
                config.database.release
            ),
            database_name: config.database.database.clone(),
            database_secret: format!("{}-postgresql", config.database.release),
        }
    }

    fn selector() -> String {
        format!("app.kubernetes.io/name={NAME}")
    }

    /// Every object the component consists of.
    pub fn objects(&self) -> Vec<Value> {
        let labels = manifest::labels(NAME, PART_OF);
        let ns = self.namespace.as_str();
        let challenges = self.settings.challenge_namespace.as_str();

        let data = BTreeMap::from([
            ("DATABASE_HOST".to_string(), self.database_host.clone()),
            ("DATABASE_PORT".to_string(), "5432".to_string()),
            ("DATABASE_NAME".to_string(), self.database_name.clone()),
            ("DATABASE_SECRET".to_string(), self.database_secret.clone()),
            ("CHALLENGE_NAMESPACE".to_string(), challenges.to_string()),
            ("MAX_INSTANCES_PER_TEAM".to_string(), self.settings.max_instances_per_team.to_string()),
            ("INSTANCE_TTL_MINUTES".to_string(), self.settings.instance_ttl_minutes.to_string()),
            ("LOG_LEVEL".to_string(), self.settings.log_level.clone()),
        ]);

        let rules = [
            PolicyRule {
                api_groups: &[""],
                resources: &["pods", "services", "configmaps", "secrets"],
                verbs: &["get", "list", "watch", "create", "update", "patch", "delete"],
            },
            PolicyRule {
                api_groups: &["apps"],
                resources: &["deployments"],
                verbs: &["get", "list", "watch", "create", "update", "patch", "delete"],
            },
            PolicyRule {
                api_groups: &["networking.k8s.io"],
                resources: &["networkpolicies", "ingresses"],
                verbs: &["get", "list", "create", "delete"],
            },
        ];

        vec![
            manifest::service_account(NAME, ns, &labels),
            manifest::role(NAME, challenges, &labels, &rules),
            manifest::role_binding(NAME, challenges, &labels, NAME, (NAME, ns)),
            manifest::config_map(CONFIG_MAP, ns, &labels, &data),
            manifest::deployment(
                NAME,
                ns,
                &labels,
                self.settings.replicas,
                NAME,
                &ContainerSpec {
                    name: NAME,
                    image: &self.settings.image,
                    port: self.settings.port,
                    env_from_config_map: Some(CONFIG_MAP),
                    readiness_path: Some("/healthz"),
                },
            ),
            manifest::service(NAME, ns, &labels, self.settings.port),
        ]
    }

    /// The rendered YAML stream.
    pub fn render(&self) -> Result<String> {
        manifest::render(&self.objects())
    }
}

impl PlatformComponent for InstanceManager {
    fn component(&self) -> Component {
        Component::InstanceManager
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn cleanup_targets(&self) -> Vec<CleanupTarget> {
        let selector = Self::selector();
        let mut own = CleanupTarget::labelled(&self.namespace, &selector);
        own.kinds.push(KindFilter::namespaced("serviceaccount", ResourceFilter::Selector(selector.clone())));

        let challenges = CleanupTarget {
            namespace: self.settings.challenge_namespace.clone(),
            kinds: ["role", "rolebinding"]
                .iter()
                .map(|kind| KindFilter::namespaced(*kind, ResourceFilter::Selector(selector.clone())))
                .collect(),
        };
        vec![own, challenges]
    }

    fn probes(&self) -> Vec<ReadinessProbe> {
        vec![
            ReadinessProbe::pods(&self.namespace, Self::selector()),
            ReadinessProbe::exists("configmap", CONFIG_MAP, &self.namespace),
        ]
    }

    async fn apply<E: CommandExecutor>(&self, ctx: &InstallContext<'_, E>) -> Result<()> {
        ctx.kubectl.ensure_namespace(&self.namespace).await?;
        ctx.kubectl.ensure_namespace(&self.settings.challenge_namespace).await?;

        let objects = self.objects();
        let yaml = manifest::render(&objects)?;
        for object in manifest::describe_objects(&objects) {
            ctx.log(Component::InstanceManager, format!("Applying {object}"));
        }
        let out = ctx.kubectl.apply_manifest(&yaml).await?;
        out.into_result("kubectl")?;
        Ok(())
    }

    /// The Deployment reports every replica available.
    async fn verify<E: CommandExecutor>(&self, ctx: &InstallContext<'_, E>) -> Result<()> {
        let deployment = ctx
            .kubectl
            .get_json("deployment", Some(&self.namespace), &ResourceFilter::Name(NAME.to_string()))
            .await?
            .ok_or_else(|| Error::verification(format!("deployment/{NAME} not found")))?;

        let available = deployment
            .pointer("/status/availableReplicas")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        if available < u64::from(self.settings.replicas) {
            return Err(Error::verification(format!(
                "deployment/{NAME} has {available}/{} replicas available",
                self.settings.replicas
            )));
        }
        Ok(())
    }

    /// Nothing beyond what the reconciler sweeps.
    async fn uninstall<E: CommandExecutor>(&self, _ctx: &InstallContext<'_, E>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::exec::CommandOutput;
    use crate::exec::testing::ScriptedExecutor;
    use crate::helm::HelmRetryPolicy;
    use crate::kubectl::Kubectl;
    use crate::poller::CancelFlag;
    use crate::progress::LogBuffer;

    #[test]
    fn test_bundle_contents() {
        let im = InstanceManager::from_config(&Config::default());
        let yaml = im.render().unwrap();
        let docs = manifest::split_documents(&yaml).unwrap();

        assert_eq!(
            manifest::describe_objects(&docs),
            vec![
                "ServiceAccount/instance-manager",
                "Role/instance-manager",
                "RoleBinding/instance-manager",
                "ConfigMap/instance-manager-config",
                "Deployment/instance-manager",
                "Service/instance-manager",
            ]
        );
        assert_eq!(docs[1]["metadata"]["namespace"], "ctf-challenges");
        assert_eq!(
            docs[3]["data"]["DATABASE_HOST"],
            "ctf-database-postgresql.ctf-platform.svc.cluster.local"
        );
        assert_eq!(docs[4]["spec"]["template"]["spec"]["serviceAccountName"], "instance-manager");
    }

    #[test]
    fn test_probes() {
        let im = InstanceManager::from_config(&Config::default());
        let probes: Vec<String> = im.probes().iter().map(ToString::to_string).collect();
        assert_eq!(
            probes,
            vec![
                "pods selector=app.kubernetes.io/name=instance-manager in ctf-platform",
                "configmap/instance-manager-config in ctf-platform",
            ]
        );
    }

    #[tokio::test]
    async fn test_apply_creates_namespaces_and_applies_bundle() {
        let exec = ScriptedExecutor::new()
            .on("jsonpath", vec![CommandOutput::failed(1, "NotFound")]);
        let kubectl = Kubectl::new(&exec, None);
        let sink = LogBuffer::new();
        let ctx = InstallContext {
            kubectl: &kubectl,
            sink: &sink,
            cancel: CancelFlag::new(),
            helm: HelmRetryPolicy::default(),
        };

        InstanceManager::from_config(&Config::default()).apply(&ctx).await.unwrap();

        assert_eq!(exec.count("create namespace ctf-platform"), 1);
        assert_eq!(exec.count("create namespace ctf-challenges"), 1);
        assert_eq!(exec.count("kubectl apply -f"), 1);
        assert_eq!(sink.lines(Component::InstanceManager).len(), 6);
    }

    #[tokio::test]
    async fn test_verify_checks_available_replicas() {
        let exec = ScriptedExecutor::new().on(
            "get deployment",
            vec![
                CommandOutput::ok(json!({ "status": { "availableReplicas": 0 } }).to_string()),
                CommandOutput::ok(json!({ "status": { "availableReplicas": 1 } }).to_string()),
            ],
        );
        let kubectl = Kubectl::new(&exec, None);
        let sink = LogBuffer::new();
        let ctx = InstallContext {
            kubectl: &kubectl,
            sink: &sink,
            cancel: CancelFlag::new(),
            helm: HelmRetryPolicy::default(),
        };
        let im = InstanceManager::from_config(&Config::default());

        assert!(im.verify(&ctx).await.is_err());
        im.verify(&ctx).await.unwrap();
    }
}
