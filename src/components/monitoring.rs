//! Prometheus and Grafana via kube-prometheus-stack.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{InstallContext, PlatformComponent};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::exec::CommandExecutor;
use crate::helm::{HelmChart, HelmRepo};
use crate::poller::ReadinessProbe;
use crate::reconcile::CleanupTarget;
use crate::status::Component;

/// API group suffix of the operator's CRDs.
pub const CRD_GROUP_SUFFIX: &str = ".monitoring.coreos.com";

/// Prometheus pods. The operator labels them this way regardless of release name.
pub const PROMETHEUS_SELECTOR: &str = "app.kubernetes.io/name=prometheus";

const GRAFANA_SELECTOR: &str = "app.kubernetes.io/name=grafana";

/// Monitoring settings from the `monitoring` config section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringSettings {
    /// Helm release name.
    pub release: String,
    /// Namespace.
    pub namespace: String,
    /// Chart reference.
    pub chart: String,
    /// Pinned chart version.
    pub version: Option<String>,
    /// Chart repository.
    pub repo: HelmRepo,
    /// Deploy Grafana alongside Prometheus.
    pub grafana: bool,
    /// Prometheus retention (`7d`, `12h`).
    pub retention: String,
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            release: "ctf-monitoring".to_string(),
            namespace: "monitoring".to_string(),
            chart: "prometheus-community/kube-prometheus-stack".to_string(),
            version: None,
            repo: HelmRepo::new(
                "prometheus-community",
                "https://prometheus-community.github.io/helm-charts",
            ),
            grafana: true,
            retention: "7d".to_string(),
        }
    }
}

/// The monitoring component.
#[derive(Debug, Clone)]
pub struct Monitoring {
    settings: MonitoringSettings,
    helm_timeout: Duration,
}

impl Monitoring {
    /// Build from the loaded config.
    pub fn from_config(config: &Config) -> Self {
        Self { settings: config.monitoring.clone(), helm_timeout: config.helm.timeout() }
    }

    fn chart(&self) -> HelmChart {
        HelmChart::builder()
            .release(self.settings.release.clone())
            .chart(self.settings.chart.clone())
            .namespace(self.settings.namespace.clone())
            .maybe_version(self.settings.version.clone())
            .repo(self.settings.repo.clone())
            .values(vec![
                ("grafana.enabled".to_string(), self.settings.grafana.to_string()),
                (
                    "prometheus.prometheusSpec.retention".to_string(),
                    self.settings.retention.clone(),
                ),
                // Pick up ServiceMonitors from every release, not only ours.
                (
                    "prometheus.prometheusSpec.serviceMonitorSelectorNilUsesHelmValues".to_string(),
                    "false".to_string(),
                ),
            ])
            .timeout(self.helm_timeout)
            .build()
    }
}

impl PlatformComponent for Monitoring {
    fn component(&self) -> Component {
        Component::MonitoringService
    }

    fn namespace(&self) -> &str {
        &self.settings.namespace
    }

    fn cleanup_targets(&self) -> Vec<CleanupTarget> {
        vec![
            CleanupTarget::labelled(&self.settings.namespace, &format!("release={}", self.settings.release))
                .with_helm_release(&self.settings.release)
                .with_crds(CRD_GROUP_SUFFIX),
        ]
    }

    fn probes(&self) -> Vec<ReadinessProbe> {
        let ns = &self.settings.namespace;
        let mut probes = vec![
            ReadinessProbe::helm_release(&self.settings.release, ns),
            ReadinessProbe::pods(ns, PROMETHEUS_SELECTOR),
        ];
        if self.settings.grafana {
            probes.push(ReadinessProbe::pods(ns, GRAFANA_SELECTOR));
        }
        probes
    }

    async fn apply<E: CommandExecutor>(&self, ctx: &InstallContext<'_, E>) -> Result<()> {
        ctx.log(
            Component::MonitoringService,
            format!("Installing {} into {}", self.settings.chart, self.settings.namespace),
        );
        ctx.helm_installer(Component::MonitoringService).install(&self.chart()).await?;
        Ok(())
    }

    /// The operator's Prometheus CRD is registered.
    async fn verify<E: CommandExecutor>(&self, ctx: &InstallContext<'_, E>) -> Result<()> {
        let crd = format!("prometheuses{CRD_GROUP_SUFFIX}");
        if ctx.kubectl.resource_exists("crd", &crd, None).await {
            Ok(())
        } else {
            Err(Error::verification(format!("crd/{crd} is not registered")))
        }
    }

    async fn uninstall<E: CommandExecutor>(&self, ctx: &InstallContext<'_, E>) -> Result<()> {
        ctx.helm_installer(Component::MonitoringService)
            .uninstall(&self.settings.release, &self.settings.namespace)
            .await
    }
}
