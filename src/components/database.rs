//! PostgreSQL for the platform dashboard, installed from the Bitnami chart.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{InstallContext, PlatformComponent};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::exec::CommandExecutor;
use crate::helm::{HelmChart, HelmRepo};
use crate::kubectl::ResourceFilter;
use crate::poller::ReadinessProbe;
use crate::reconcile::CleanupTarget;
use crate::status::Component;

/// Database settings from the `database` config section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Helm release name.
    pub release: String,
    /// Namespace; the global namespace when unset.
    pub namespace: Option<String>,
    /// Chart reference.
    pub chart: String,
    /// Pinned chart version.
    pub version: Option<String>,
    /// Chart repository.
    pub repo: HelmRepo,
    /// Application database created on first start.
    pub database: String,
    /// Application user.
    pub username: String,
    /// Persistent volume size.
    pub storage_size: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            release: "ctf-database".to_string(),
            namespace: None,
            chart: "bitnami/postgresql".to_string(),
            version: None,
            repo: HelmRepo::new("bitnami", "https://charts.bitnami.com/bitnami"),
            database: "ctf".to_string(),
            username: "ctf".to_string(),
            storage_size: "8Gi".to_string(),
        }
    }
}

/// The database component.
#[derive(Debug, Clone)]
pub struct Database {
    settings: DatabaseSettings,
    namespace: String,
    helm_timeout: Duration,
}

impl Database {
    /// Build from the loaded config.
    pub fn from_config(config: &Config) -> Self {
        let settings = config.database.clone();
        let namespace = settings.namespace.clone().unwrap_or_else(|| config.namespace.clone());
        Self { settings, namespace, helm_timeout: config.helm.timeout() }
    }

    /// Secret the chart writes the generated passwords to.
    pub fn secret_name(&self) -> String {
        format!("{}-postgresql", self.settings.release)
    }

    fn pod_selector(&self) -> String {
        format!("app.kubernetes.io/name=postgresql,app.kubernetes.io/instance={}", self.settings.release)
    }

    fn chart(&self) -> HelmChart {
        HelmChart::builder()
            .release(self.settings.release.clone())
            .chart(self.settings.chart.clone())
            .namespace(self.namespace.clone())
            .maybe_version(self.settings.version.clone())
            .repo(self.settings.repo.clone())
            .values(vec![
                ("auth.database".to_string(), self.settings.database.clone()),
                ("auth.username".to_string(), self.settings.username.clone()),
                ("primary.persistence.size".to_string(), self.settings.storage_size.clone()),
            ])
            .timeout(self.helm_timeout)
            .build()
    }
}

impl PlatformComponent for Database {
    fn component(&self) -> Component {
        Component::Database
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn cleanup_targets(&self) -> Vec<CleanupTarget> {
        vec![
            CleanupTarget::labelled(
                &self.namespace,
                &format!("app.kubernetes.io/instance={}", self.settings.release),
            )
            .with_helm_release(&self.settings.release),
        ]
    }

    fn probes(&self) -> Vec<ReadinessProbe> {
        vec![
            ReadinessProbe::helm_release(&self.settings.release, &self.namespace),
            ReadinessProbe::pods(&self.namespace, self.pod_selector()),
            ReadinessProbe::exists("secret", self.secret_name(), &self.namespace),
        ]
    }

    async fn apply<E: CommandExecutor>(&self, ctx: &InstallContext<'_, E>) -> Result<()> {
        ctx.log(Component::Database, format!("Installing {} into {}", self.settings.chart, self.namespace));
        ctx.helm_installer(Component::Database).install(&self.chart()).await?;
        Ok(())
    }

    /// `pg_isready` inside the primary pod.
    async fn verify<E: CommandExecutor>(&self, ctx: &InstallContext<'_, E>) -> Result<()> {
        let pods = ctx
            .kubectl
            .observe_pods(&self.namespace, &ResourceFilter::Selector(self.pod_selector()))
            .await?;
        let pod = pods
            .iter()
            .find(|p| p.is_ready())
            .ok_or_else(|| Error::verification("no ready postgresql pod to check"))?;

        let out =
            ctx.kubectl.exec_in_pod(&self.namespace, &pod.name, &["pg_isready", "-U", "postgres"]).await;
        if !out.success() {
            return Err(Error::verification(format!(
                "pg_isready in {} failed: {}",
                pod.name,
                out.error_text()
            )));
        }
        debug!(pod = %pod.name, "pg_isready ok");
        ctx.log(Component::Database, format!("{}: {}", pod.name, out.stdout.trim()));
        Ok(())
    }

    async fn uninstall<E: CommandExecutor>(&self, ctx: &InstallContext<'_, E>) -> Result<()> {
        ctx.helm_installer(Component::Database)
            .uninstall(&self.settings.release, &self.namespace)
            .await
    }
}
