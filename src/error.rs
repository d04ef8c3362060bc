//! Error types for the CTF platform installer.
//!
//! Fatal errors propagate up to the pipeline, which marks the affected
//! component as `error`. Cleanup failures are deliberately *not* part of
//! this enum; see [`CleanupWarning`].

use std::fmt;
use std::io;

use thiserror::Error;

use crate::status::{Component, ComponentStatus};

/// Installer error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error (invalid config file, missing required values).
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error (file operations, process spawning, etc.).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Invalid command-line argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Command line rejected by the parser, which has already printed why.
    #[error("")]
    Usage,

    /// An external command exited unsuccessfully where success was required.
    #[error("{program} failed (exit code {code}): {stderr}")]
    Command {
        /// Program that was run.
        program: String,
        /// Exit code, or -1 when the process never produced one.
        code: i32,
        /// Captured standard error.
        stderr: String,
    },

    /// Helm install gave up; `stderr` is the last attempt's output, verbatim.
    #[error("helm release '{release}' failed after {attempts} attempt(s): {stderr}")]
    Helm {
        /// Release name.
        release: String,
        /// Number of attempts made.
        attempts: u32,
        /// Standard error of the last attempt.
        stderr: String,
    },

    /// The readiness poller reached a terminal failure state.
    #[error("{target} did not become ready: {reason}")]
    Poll {
        /// Human readable probe target.
        target: String,
        /// Why polling stopped.
        reason: String,
        /// Logs and `kubectl describe` output gathered at failure time.
        diagnostics: Option<String>,
    },

    /// A status transition that the state machine does not allow.
    #[error("{component} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Component whose status was being changed.
        component: Component,
        /// Current status.
        from: ComponentStatus,
        /// Requested status.
        to: ComponentStatus,
    },

    /// A post-install verification failed.
    #[error("Verification failed: {0}")]
    Verification(String),

    /// User or signal cancelled an operation.
    #[error("Operation cancelled")]
    Cancelled,

    /// General/unspecified error.
    #[error("{0}")]
    Other(String),
}

/// Convenient Result type alias for installer operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns the process exit code for this error type.
    ///
    /// - 1: General error
    /// - 2: Invalid arguments or configuration
    /// - 3: External command failure
    /// - 4: Component did not become ready
    /// - 130: Cancelled (matches SIGINT convention)
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::InvalidArgument(_) | Self::Usage => 2,
            Self::Command { .. } | Self::Helm { .. } => 3,
            Self::Poll { .. } | Self::Verification(_) => 4,
            Self::Cancelled => 130,
            Self::Io(_)
            | Self::Json(_)
            | Self::Yaml(_)
            | Self::InvalidTransition { .. }
            | Self::Other(_) => 1,
        }
    }

    /// Diagnostics attached to a polling failure, if any.
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            Self::Poll { diagnostics, .. } => diagnostics.as_deref(),
            _ => None,
        }
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid argument error.
    pub fn invalid_arg(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a verification error.
    pub fn verification(msg: impl Into<String>) -> Self {
        Self::Verification(msg.into())
    }

    /// Create a general error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

/// A failure during best-effort cleanup.
///
/// Cleanup must never block forward progress, so these are collected and
/// logged instead of being raised. There is intentionally no conversion
/// into [`Error`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupWarning {
    /// What was being cleaned up (e.g. `pvc/data-ctf-database-0`).
    pub resource: String,
    /// The action that failed (e.g. `strip finalizers`).
    pub action: &'static str,
    /// Error text from the executor.
    pub message: String,
}

impl fmt::Display for CleanupWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.action, self.resource, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(Error::config("bad").exit_code(), 2);
        assert_eq!(Error::invalid_arg("bad").exit_code(), 2);
        assert_eq!(
            Error::Helm { release: "r".into(), attempts: 3, stderr: "boom".into() }.exit_code(),
            3
        );
        assert_eq!(Error::verification("missing secret").exit_code(), 4);
        assert_eq!(Error::Cancelled.exit_code(), 130);
        assert_eq!(Error::other("x").exit_code(), 1);
    }

    #[test]
    fn test_helm_error_keeps_stderr_verbatim() {
        let err = Error::Helm {
            release: "ctf-database".into(),
            attempts: 3,
            stderr: "Error: UPGRADE FAILED: timed out waiting for the condition".into(),
        };
        assert!(err.to_string().ends_with("Error: UPGRADE FAILED: timed out waiting for the condition"));
    }

    #[test]
    fn test_diagnostics_only_on_poll_errors() {
        let err = Error::Poll {
            target: "pod app=db".into(),
            reason: "CrashLoopBackOff".into(),
            diagnostics: Some("panic: no config".into()),
        };
        assert_eq!(err.diagnostics(), Some("panic: no config"));
        assert_eq!(Error::Cancelled.diagnostics(), None);
    }

    #[test]
    fn test_cleanup_warning_display() {
        let w = CleanupWarning {
            resource: "pvc/data-0".into(),
            action: "force delete",
            message: "forbidden".into(),
        };
        assert_eq!(w.to_string(), "force delete pvc/data-0: forbidden");
    }
}
