//! Installation status of each platform component.
//!
//! The state is an explicit value handed to the pipeline rather than a
//! process-wide map. Transitions are checked:
//!
//! ```text
//! pending ──▶ installing ──▶ installed
//!                 │   ▲          │
//!                 ▼   └──────────┘ (re-run)
//!               error ──▶ installing (re-run)
//! ```
//!
//! Moving to `installed` requires a [`ReadinessEvidence`], which only the
//! readiness poller hands out.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::poller::ReadinessEvidence;

/// A platform component managed by the installer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Component {
    /// PostgreSQL backing the dashboard.
    Database,
    /// Service that spins up per-team challenge instances.
    InstanceManager,
    /// Prometheus and Grafana.
    MonitoringService,
}

impl Component {
    /// All components in installation order.
    pub const ALL: [Self; 3] = [Self::Database, Self::InstanceManager, Self::MonitoringService];

    /// Stable key used in state files and on the command line.
    pub const fn key(self) -> &'static str {
        match self {
            Self::Database => "database",
            Self::InstanceManager => "instanceManager",
            Self::MonitoringService => "monitoringService",
        }
    }

    /// Human readable name.
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Database => "Database",
            Self::InstanceManager => "Instance manager",
            Self::MonitoringService => "Monitoring service",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Component {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "database" | "db" => Ok(Self::Database),
            "instancemanager" => Ok(Self::InstanceManager),
            "monitoringservice" | "monitoring" => Ok(Self::MonitoringService),
            _ => Err(format!(
                "unknown component '{s}' (expected database, instanceManager, monitoringService)"
            )),
        }
    }
}

/// Where a component is in its installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Not attempted yet.
    #[default]
    Pending,
    /// Reconcile/apply/poll in progress.
    Installing,
    /// Observed healthy on the cluster.
    Installed,
    /// Last attempt failed.
    Error,
}

impl ComponentStatus {
    fn can_move_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending | Self::Error | Self::Installed, Self::Installing)
                | (Self::Installing, Self::Installed | Self::Error)
        )
    }
}

impl fmt::Display for ComponentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::Error => "error",
        })
    }
}

/// Status of one component plus bookkeeping for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentRecord {
    /// Current status.
    pub status: ComponentStatus,
    /// When the status last changed.
    pub updated_at: DateTime<Utc>,
    /// Error message or readiness detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Default for ComponentRecord {
    fn default() -> Self {
        Self { status: ComponentStatus::Pending, updated_at: Utc::now(), message: None }
    }
}

/// Status of every component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationState {
    components: BTreeMap<Component, ComponentRecord>,
}

impl Default for InstallationState {
    fn default() -> Self {
        Self::new()
    }
}

impl InstallationState {
    /// Every component pending.
    pub fn new() -> Self {
        Self {
            components: Component::ALL.iter().map(|c| (*c, ComponentRecord::default())).collect(),
        }
    }

    /// Current status of a component.
    pub fn status(&self, component: Component) -> ComponentStatus {
        self.components.get(&component).map_or(ComponentStatus::Pending, |r| r.status)
    }

    /// Full record of a component.
    pub fn record(&self, component: Component) -> Option<&ComponentRecord> {
        self.components.get(&component)
    }

    /// All records in installation order.
    pub fn records(&self) -> impl Iterator<Item = (Component, &ComponentRecord)> {
        self.components.iter().map(|(c, r)| (*c, r))
    }

    fn transition(
        &mut self,
        component: Component,
        next: ComponentStatus,
        message: Option<String>,
    ) -> Result<()> {
        let from = self.status(component);
        if !from.can_move_to(next) {
            return Err(Error::InvalidTransition { component, from, to: next });
        }
        tracing::debug!(%component, %from, to = %next, "status transition");
        self.components
            .insert(component, ComponentRecord { status: next, updated_at: Utc::now(), message });
        Ok(())
    }

    /// Mark a component as being installed.
    pub fn begin(&mut self, component: Component) -> Result<()> {
        self.transition(component, ComponentStatus::Installing, None)
    }

    /// Mark a component installed. Only callable with proof from the poller.
    pub fn mark_installed(&mut self, component: Component, evidence: ReadinessEvidence) -> Result<()> {
        self.transition(component, ComponentStatus::Installed, Some(evidence.summary()))?;
        tracing::debug!(
            %component,
            target_resource = evidence.target(),
            attempts = evidence.attempts(),
            "readiness recorded"
        );
        if let Some(record) = self.components.get_mut(&component) {
            record.updated_at = evidence.observed_at();
        }
        Ok(())
    }

    /// Mark a component failed.
    pub fn mark_error(&mut self, component: Component, message: impl Into<String>) -> Result<()> {
        self.transition(component, ComponentStatus::Error, Some(message.into()))
    }

    /// Forget a component after it was removed from the cluster.
    pub fn reset(&mut self, component: Component) {
        tracing::debug!(%component, "status reset");
        self.components.insert(component, ComponentRecord::default());
    }

    /// True once every component reports `installed`.
    pub fn setup_complete(&self) -> bool {
        Component::ALL.iter().all(|c| self.status(*c) == ComponentStatus::Installed)
    }

    /// Load from a JSON file; a missing file yields a fresh state.
    ///
    /// Components left `installing` by an interrupted run come back as
    /// `error` so the next run may start them again.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let contents = std::fs::read_to_string(path)?;
        let mut state: Self = serde_json::from_str(&contents)?;
        for component in Component::ALL {
            let record = state.components.entry(component).or_default();
            // A previous run died mid-install.
            if record.status == ComponentStatus::Installing {
                record.status = ComponentStatus::Error;
                record.message = Some("interrupted before completion".to_string());
            }
        }
        Ok(state)
    }

    /// Save as JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_new_state_is_all_pending() {
        let state = InstallationState::new();
        for c in Component::ALL {
            assert_eq!(state.status(c), ComponentStatus::Pending);
        }
        assert!(!state.setup_complete());
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut state = InstallationState::new();
        state.begin(Component::Database).unwrap();
        assert_eq!(state.status(Component::Database), ComponentStatus::Installing);
        let evidence = ReadinessEvidence::for_tests("pod db-0 ready");
        let observed_at = evidence.observed_at();
        state.mark_installed(Component::Database, evidence).unwrap();
        assert_eq!(state.status(Component::Database), ComponentStatus::Installed);
        let record = state.record(Component::Database).unwrap();
        assert_eq!(record.message.as_deref(), Some("pod db-0 ready"));
        assert_eq!(record.updated_at, observed_at);
    }

    #[test]
    fn test_cannot_install_without_installing() {
        let mut state = InstallationState::new();
        let err = state
            .mark_installed(Component::Database, ReadinessEvidence::for_tests("x"))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition {
                from: ComponentStatus::Pending,
                to: ComponentStatus::Installed,
                ..
            }
        ));
    }

    #[test]
    fn test_error_can_be_retried() {
        let mut state = InstallationState::new();
        state.begin(Component::InstanceManager).unwrap();
        state.mark_error(Component::InstanceManager, "CrashLoopBackOff").unwrap();
        assert!(state.mark_error(Component::InstanceManager, "again").is_err());
        state.begin(Component::InstanceManager).unwrap();
        assert_eq!(state.status(Component::InstanceManager), ComponentStatus::Installing);
    }

    #[test]
    fn test_setup_complete_requires_all_three() {
        let mut state = InstallationState::new();
        for c in [Component::Database, Component::InstanceManager] {
            state.begin(c).unwrap();
            state.mark_installed(c, ReadinessEvidence::for_tests("ok")).unwrap();
        }
        assert!(!state.setup_complete());
        state.begin(Component::MonitoringService).unwrap();
        state
            .mark_installed(Component::MonitoringService, ReadinessEvidence::for_tests("ok"))
            .unwrap();
        assert!(state.setup_complete());
    }

    #[test]
    fn test_component_parsing() {
        assert_eq!("database".parse::<Component>().unwrap(), Component::Database);
        assert_eq!("instance-manager".parse::<Component>().unwrap(), Component::InstanceManager);
        assert_eq!("instanceManager".parse::<Component>().unwrap(), Component::InstanceManager);
        assert_eq!("monitoring".parse::<Component>().unwrap(), Component::MonitoringService);
        assert!("redis".parse::<Component>().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let mut state = InstallationState::new();
        state.begin(Component::MonitoringService).unwrap();
        state.mark_error(Component::MonitoringService, "helm timeout").unwrap();
        state.save(&path).unwrap();

        let json = std::fs::read_to_string(&path).unwrap();
        assert!(json.contains("\"monitoringService\""));
        assert!(json.contains("\"error\""));

        let loaded = InstallationState::load(&path).unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn test_load_missing_file_is_fresh() {
        let dir = TempDir::new().unwrap();
        let state = InstallationState::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(state.status(Component::Database), ComponentStatus::Pending);
    }

    #[test]
    fn test_load_recovers_interrupted_install() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let mut state = InstallationState::new();
        state.begin(Component::Database).unwrap();
        state.save(&path).unwrap();

        let mut loaded = InstallationState::load(&path).unwrap();
        assert_eq!(loaded.status(Component::Database), ComponentStatus::Error);
        loaded.begin(Component::Database).unwrap();
    }

    #[test]
    fn test_reset_returns_to_pending() {
        let mut state = InstallationState::new();
        state.begin(Component::Database).unwrap();
        state.mark_installed(Component::Database, ReadinessEvidence::for_tests("ok")).unwrap();
        state.reset(Component::Database);
        assert_eq!(state.status(Component::Database), ComponentStatus::Pending);
        assert!(state.record(Component::Database).unwrap().message.is_none());
    }
}
