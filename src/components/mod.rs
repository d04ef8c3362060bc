//! The platform's three installable components.
//!
//! Each component knows how to describe its prior state (for the
//! reconciler), how to apply itself, which probes prove it healthy and how
//! to verify it afterwards. The pipeline drives them through
//! [`PlatformComponent`]; [`AnyComponent`] picks the right one for a
//! [`Component`] key.

pub mod database;
pub mod instance_manager;
pub mod monitoring;

use std::future::Future;

pub use database::{Database, DatabaseSettings};
pub use instance_manager::{InstanceManager, InstanceManagerSettings};
pub use monitoring::{Monitoring, MonitoringSettings};

use crate::config::Config;
use crate::error::Result;
use crate::exec::CommandExecutor;
use crate::helm::{HelmInstaller, HelmRetryPolicy};
use crate::kubectl::Kubectl;
use crate::poller::{CancelFlag, ReadinessProbe};
use crate::progress::LogSink;
use crate::reconcile::CleanupTarget;
use crate::status::Component;

/// Everything a component needs while installing.
pub struct InstallContext<'a, E> {
    /// Cluster access.
    pub kubectl: &'a Kubectl<'a, E>,
    /// Progress lines.
    pub sink: &'a dyn LogSink,
    /// Shared cancellation flag.
    pub cancel: CancelFlag,
    /// Helm retry behaviour.
    pub helm: HelmRetryPolicy,
}

impl<'a, E: CommandExecutor> InstallContext<'a, E> {
    /// A Helm installer reporting under `component`.
    pub fn helm_installer(&self, component: Component) -> HelmInstaller<'a, E> {
        HelmInstaller::new(self.kubectl, self.helm.clone())
            .with_cancel(self.cancel.clone())
            .with_sink(self.sink, component)
    }

    /// Send a progress line.
    pub fn log(&self, component: Component, line: impl AsRef<str>) {
        self.sink.add_log(component, line.as_ref());
    }
}

/// One installable part of the platform.
pub trait PlatformComponent {
    /// Which component this is.
    fn component(&self) -> Component;

    /// Namespace the component lives in.
    fn namespace(&self) -> &str;

    /// Prior state to clear before applying.
    fn cleanup_targets(&self) -> Vec<CleanupTarget>;

    /// Probes that must all report ready, in order.
    fn probes(&self) -> Vec<ReadinessProbe>;

    /// Create or update the component on the cluster.
    fn apply<E: CommandExecutor>(
        &self,
        ctx: &InstallContext<'_, E>,
    ) -> impl Future<Output = Result<()>>;

    /// Checks run after every probe is ready.
    fn verify<E: CommandExecutor>(
        &self,
        ctx: &InstallContext<'_, E>,
    ) -> impl Future<Output = Result<()>>;

    /// Remove what [`apply`](Self::apply) created beyond what the
    /// reconciler sweeps (Helm releases).
    fn uninstall<E: CommandExecutor>(
        &self,
        ctx: &InstallContext<'_, E>,
    ) -> impl Future<Output = Result<()>>;
}

/// Any of the three components, built from the config.
#[derive(Debug, Clone)]
pub enum AnyComponent {
    /// PostgreSQL.
    Database(Database),
    /// Instance manager.
    InstanceManager(InstanceManager),
    /// Prometheus and Grafana.
    Monitoring(Monitoring),
}

impl AnyComponent {
    /// Build `component` from `config`.
    pub fn from_config(component: Component, config: &Config) -> Self {
        match component {
            Component::Database => Self::Database(Database::from_config(config)),
            Component::InstanceManager => {
                Self::InstanceManager(InstanceManager::from_config(config))
            }
            Component::MonitoringService => Self::Monitoring(Monitoring::from_config(config)),
        }
    }
}

macro_rules! dispatch {
    ($self:ident, $c:ident => $call:expr) => {
        match $self {
            Self::Database($c) => $call,
            Self::InstanceManager($c) => $call,
            Self::Monitoring($c) => $call,
        }
    };
}

impl PlatformComponent for AnyComponent {
    fn component(&self) -> Component {
        dispatch!(self, c => c.component())
    }

    fn namespace(&self) -> &str {
        dispatch!(self, c => c.namespace())
    }

    fn cleanup_targets(&self) -> Vec<CleanupTarget> {
        dispatch!(self, c => c.cleanup_targets())
    }

    fn probes(&self) -> Vec<ReadinessProbe> {
        dispatch!(self, c => c.probes())
    }

    async fn apply<E: CommandExecutor>(&self, ctx: &InstallContext<'_, E>) -> Result<()> {
        dispatch!(self, c => c.apply(ctx).await)
    }

    async fn verify<E: CommandExecutor>(&self, ctx: &InstallContext<'_, E>) -> Result<()> {
        dispatch!(self, c => c.verify(ctx).await)
    }

    async fn uninstall<E: CommandExecutor>(&self, ctx: &InstallContext<'_, E>) -> Result<()> {
        dispatch!(self, c => c.uninstall(ctx).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_any_component_matches_key() {
        let config = Config::default();
        for component in Component::ALL {
            let built = AnyComponent::from_config(component, &config);
            assert_eq!(built.component(), component);
            assert!(!built.probes().is_empty());
            assert!(!built.cleanup_targets().is_empty());
        }
    }

    #[test]
    fn test_default_namespaces() {
        let config = Config::default();
        assert_eq!(AnyComponent::from_config(Component::Database, &config).namespace(), "ctf-platform");
        assert_eq!(
            AnyComponent::from_config(Component::MonitoringService, &config).namespace(),
            "monitoring"
        );
    }
}
