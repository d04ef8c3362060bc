//! Configuration for the installer.
//!
//! The configuration follows the XDG Base Directory Specification and is
//! layered, lowest precedence first:
//! - Built-in defaults
//! - User config: `~/.config/ctf-installer/config.yaml`
//! - Project config: `.ctf-installer.yaml` in the current directory
//! - An explicit `--config <file>`
//! - Environment variables: `CTF_INSTALLER_*`
//! - Command-line flags (applied by the caller)
//!
//! Layers are deep-merged as YAML before deserializing, so a file only
//! needs to mention the keys it changes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::backoff::BackoffPolicy;
use crate::components::{DatabaseSettings, InstanceManagerSettings, MonitoringSettings};
use crate::error::{Error, Result};
use crate::helm::HelmRetryPolicy;
use crate::poller::PollConfig;

const APP_DIR: &str = "ctf-installer";
const PROJECT_CONFIG: &str = ".ctf-installer.yaml";

/// Environment variable overriding the platform namespace.
pub const ENV_NAMESPACE: &str = "CTF_INSTALLER_NAMESPACE";
/// Environment variable selecting the kube context.
pub const ENV_KUBE_CONTEXT: &str = "CTF_INSTALLER_KUBE_CONTEXT";
/// Environment variable overriding the readiness timeout, in seconds.
pub const ENV_TIMEOUT_SECS: &str = "CTF_INSTALLER_TIMEOUT_SECS";

/// Main installer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Namespace for the database and instance manager.
    pub namespace: String,

    /// kubectl/helm context; the current context when unset.
    pub kube_context: Option<String>,

    /// Readiness polling.
    pub poll: PollSettings,

    /// Helm invocation and retries.
    pub helm: HelmSettings,

    /// Database component.
    pub database: DatabaseSettings,

    /// Instance manager component.
    pub instance_manager: InstanceManagerSettings,

    /// Monitoring component.
    pub monitoring: MonitoringSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: "ctf-platform".to_string(),
            kube_context: None,
            poll: PollSettings::default(),
            helm: HelmSettings::default(),
            database: DatabaseSettings::default(),
            instance_manager: InstanceManagerSettings::default(),
            monitoring: MonitoringSettings::default(),
        }
    }
}

/// Readiness polling configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    /// Per-probe timeout in seconds.
    pub timeout_secs: u64,
    /// Pacing between observations.
    pub backoff: BackoffPolicy,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self { timeout_secs: 300, backoff: BackoffPolicy::default() }
    }
}

/// Helm configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HelmSettings {
    /// Value passed to `helm --timeout`, in seconds.
    pub timeout_secs: u64,
    /// Retry ceiling and per-class waits.
    #[serde(flatten)]
    pub retry: HelmRetryPolicy,
}

impl Default for HelmSettings {
    fn default() -> Self {
        Self { timeout_secs: 600, retry: HelmRetryPolicy::default() }
    }
}

impl HelmSettings {
    /// `timeout_secs` as a duration.
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Load configuration from all sources with proper precedence.
    ///
    /// `explicit` is a `--config` path; unlike the implicit files it must
    /// exist.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut layers = Vec::new();
        if let Some(path) = Self::user_config_path()
            && path.exists()
        {
            layers.push(Self::read_layer(&path)?);
        }
        let project = PathBuf::from(PROJECT_CONFIG);
        if project.exists() {
            layers.push(Self::read_layer(&project)?);
        }
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(Error::config(format!("Config file {} does not exist", path.display())));
            }
            layers.push(Self::read_layer(path)?);
        }

        let mut config = Self::from_layers(layers)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn read_layer(path: &Path) -> Result<Value> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let value: Value = serde_yaml::from_str(&contents).map_err(|e| {
            Error::config(format!("Failed to parse config file {}: {}", path.display(), e))
        })?;
        tracing::debug!(path = %path.display(), "loaded config layer");
        Ok(value)
    }

    fn from_layers(layers: Vec<Value>) -> Result<Self> {
        let mut merged = serde_yaml::to_value(Self::default())?;
        // An empty file parses as null and contributes nothing.
        for layer in layers.into_iter().filter(|layer| !layer.is_null()) {
            merge(&mut merged, layer);
        }
        let config: Self = serde_yaml::from_value(merged)
            .map_err(|e| Error::config(format!("Invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.poll.backoff.validate("poll.backoff")?;
        self.helm.retry.backoff.validate("helm.backoff")
    }

    /// Apply `CTF_INSTALLER_*` overrides read through `lookup`.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(namespace) = lookup(ENV_NAMESPACE).filter(|v| !v.is_empty()) {
            self.namespace = namespace;
        }
        if let Some(context) = lookup(ENV_KUBE_CONTEXT).filter(|v| !v.is_empty()) {
            self.kube_context = Some(context);
        }
        if let Some(timeout) = lookup(ENV_TIMEOUT_SECS).filter(|v| !v.is_empty()) {
            self.poll.timeout_secs = timeout.parse().map_err(|_| {
                Error::config(format!("{ENV_TIMEOUT_SECS} must be a number of seconds, got '{timeout}'"))
            })?;
        }
        Ok(())
    }

    /// Poll configuration for one probe.
    pub fn poll_config(&self) -> PollConfig {
        PollConfig::builder()
            .timeout(Duration::from_secs(self.poll.timeout_secs))
            .backoff(self.poll.backoff.clone())
            .build()
    }

    /// Get the path to the user config file.
    #[must_use]
    pub fn user_config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.yaml"))
    }

    /// Get the path to the installation state file.
    #[must_use]
    pub fn state_path() -> Option<PathBuf> {
        Self::state_dir().map(|p| p.join("state.json"))
    }

    /// Get the path to the user config directory.
    ///
    /// Cross-platform behavior:
    /// - If `XDG_CONFIG_HOME` is set, uses `$XDG_CONFIG_HOME/ctf-installer`
    /// - Linux/macOS: Falls back to `~/.config/ctf-installer` (XDG default)
    /// - Windows: Falls back to `%APPDATA%\ctf-installer`
    #[must_use]
    pub fn config_dir() -> Option<PathBuf> {
        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME")
            && !xdg_config.is_empty()
        {
            return Some(PathBuf::from(xdg_config).join(APP_DIR));
        }

        #[cfg(windows)]
        {
            dirs::config_dir().map(|p| p.join(APP_DIR))
        }

        #[cfg(not(windows))]
        {
            dirs::home_dir().map(|p| p.join(".config").join(APP_DIR))
        }
    }

    /// Get the path to the state directory.
    ///
    /// Cross-platform behavior:
    /// - If `XDG_STATE_HOME` is set, uses `$XDG_STATE_HOME/ctf-installer`
    /// - Linux/macOS: Falls back to `~/.local/state/ctf-installer` (XDG default)
    /// - Windows: Falls back to `%LOCALAPPDATA%\ctf-installer`
    #[must_use]
    pub fn state_dir() -> Option<PathBuf> {
        if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME")
            && !xdg_state.is_empty()
        {
            return Some(PathBuf::from(xdg_state).join(APP_DIR));
        }

        #[cfg(windows)]
        {
            dirs::data_local_dir().map(|p| p.join(APP_DIR))
        }

        #[cfg(not(windows))]
        {
            dirs::home_dir().map(|p| p.join(".local").join("state").join(APP_DIR))
        }
    }
}

/// Deep-merge `overlay` into `base`. Mappings merge key by key; anything
/// else replaces, so an explicit `~` unsets an optional key.
fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base), Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
