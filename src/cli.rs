//! Command-line argument parsing and command definitions.
//!
//! Uses clap with derive macros for type-safe argument parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

use crate::output::OutputFormat;
use crate::status::Component;

/// CTF platform installer - database, instance manager and monitoring
#[derive(Parser, Debug)]
#[command(name = "ctf-installer")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Platform namespace (overrides config and CTF_INSTALLER_NAMESPACE)
    #[arg(long, global = true)]
    pub namespace: Option<String>,

    /// Kubernetes context to use (overrides config and CTF_INSTALLER_KUBE_CONTEXT)
    #[arg(long, global = true)]
    pub context: Option<String>,

    /// Additional config file, merged over the user and project config
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Skip confirmations (answer yes to all prompts)
    #[arg(short, long, global = true)]
    pub yes: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Install the platform components in order
    Install {
        /// Only install these components (database, instanceManager, monitoringService)
        #[arg(long, value_name = "COMPONENT", num_args = 1..)]
        only: Vec<Component>,

        /// Print the commands that would run without touching the cluster
        #[arg(long)]
        dry_run: bool,

        /// Readiness timeout per probe, in seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },

    /// Show the recorded installation state
    Status {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },

    /// Remove a component and everything it left behind
    Cleanup {
        /// Component to remove
        component: Component,
    },

    /// Wait for an installed component to become ready
    Wait {
        /// Component to wait for
        component: Component,

        /// Readiness timeout per probe, in seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },

    /// Check that kubectl, helm and the cluster are usable
    Doctor,

    /// Inspect configuration
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Generate shell completions
    Completions {
        /// Target shell
        shell: Shell,
    },
}

/// `config` subcommands.
#[derive(Subcommand, Debug, Clone, Copy)]
pub enum ConfigCommands {
    /// Print the effective configuration as YAML
    Show,
    /// Print where configuration and state are read from
    Path,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_install_only_parses_components() {
        let cli = Cli::try_parse_from([
            "ctf-installer",
            "install",
            "--only",
            "database",
            "monitoringService",
            "--dry-run",
        ])
        .unwrap();

        match cli.command {
            Commands::Install { only, dry_run, timeout } => {
                assert_eq!(only, vec![Component::Database, Component::MonitoringService]);
                assert!(dry_run);
                assert_eq!(timeout, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_component_is_rejected() {
        assert!(Cli::try_parse_from(["ctf-installer", "cleanup", "redis"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "ctf-installer",
            "status",
            "-o",
            "json",
            "--namespace",
            "ctf-test",
            "--yes",
        ])
        .unwrap();
        assert_eq!(cli.namespace.as_deref(), Some("ctf-test"));
        assert!(cli.yes);
        assert!(matches!(cli.command, Commands::Status { output: OutputFormat::Json }));
    }
}
