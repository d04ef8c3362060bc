//! Command implementations for the installer CLI.
//!
//! Each submodule implements one command. They all share a [`Context`]
//! holding the effective configuration and global flags.

mod cleanup;
mod config;
mod doctor;
mod install;
mod status;
mod wait;

use std::path::PathBuf;

use crate::cli::{Cli, Commands};
use crate::config::Config;
use crate::error::{Error, Result};

/// Effective configuration plus the global flags.
#[derive(Debug, Clone)]
pub struct Context {
    /// Configuration with every layer and the CLI flags applied.
    pub config: Config,
    /// Where the installation state is persisted.
    pub state_path: PathBuf,
    /// Suppress non-essential output.
    pub quiet: bool,
    /// Answer yes to confirmations.
    pub yes: bool,
}

impl Context {
    /// Load configuration and apply the global flags on top.
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let mut config = Config::load(cli.config.as_deref())?;
        if let Some(namespace) = &cli.namespace {
            config.namespace.clone_from(namespace);
        }
        if let Some(context) = &cli.context {
            config.kube_context = Some(context.clone());
        }

        let state_path = Config::state_path()
            .ok_or_else(|| Error::config("Could not determine the state directory"))?;

        Ok(Self { config, state_path, quiet: cli.quiet, yes: cli.yes })
    }

    /// Ask before a destructive action unless `--yes` was given.
    pub fn confirm(&self, message: &str) -> Result<bool> {
        if self.yes {
            return Ok(true);
        }
        crate::tui::confirm_danger(message)
    }

    /// Copy of the config with the per-probe timeout replaced.
    pub fn config_with_timeout(&self, timeout: Option<u64>) -> Result<Config> {
        let mut config = self.config.clone();
        if let Some(secs) = timeout {
            if secs == 0 {
                return Err(Error::invalid_arg("--timeout must be at least 1 second"));
            }
            config.poll.timeout_secs = secs;
        }
        Ok(config)
    }
}

/// Execute a CLI command.
pub async fn execute(ctx: &Context, command: &Commands) -> Result<()> {
    match command {
        Commands::Install { only, dry_run, timeout } => {
            install::install(ctx, only, *dry_run, *timeout).await
        }
        Commands::Status { output } => status::status(ctx, *output),
        Commands::Cleanup { component } => cleanup::cleanup(ctx, *component).await,
        Commands::Wait { component, timeout } => wait::wait(ctx, *component, *timeout).await,
        Commands::Doctor => doctor::doctor(ctx).await,
        Commands::Config { command } => config::config(ctx, *command),
        // Handled before a context exists.
        Commands::Completions { .. } => Ok(()),
    }
}

/// Write completions for `shell` to stdout.
pub fn completions(shell: clap_complete::Shell) {
    use clap::CommandFactory;

    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    clap_complete::generate(shell, &mut cmd, name, &mut std::io::stdout());
}

/// Forward Ctrl-C to `cancel`.
pub(crate) fn cancel_on_ctrl_c(cancel: crate::poller::CancelFlag) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling");
            cancel.cancel();
        }
    });
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn context() -> Context {
        Context {
            config: Config::default(),
            state_path: PathBuf::from("state.json"),
            quiet: true,
            yes: false,
        }
    }

    #[test]
    fn test_timeout_flag_overrides_config() {
        let ctx = context();
        assert_eq!(ctx.config_with_timeout(None).unwrap().poll.timeout_secs, 300);
        assert_eq!(ctx.config_with_timeout(Some(42)).unwrap().poll.timeout_secs, 42);
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let err = context().config_with_timeout(Some(0)).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(err.exit_code(), 2);
    }
}
