//! CTF platform installer library.
//!
//! Provisions the platform's supporting services onto a Kubernetes
//! cluster: a PostgreSQL database, the challenge instance manager and a
//! Prometheus/Grafana monitoring stack.
//!
//! ## Usage
//!
//! ```bash
//! ctf-installer doctor                       # Check kubectl, helm and cluster access
//! ctf-installer install                      # Install everything in order
//! ctf-installer install --only database      # Install a single component
//! ctf-installer status -o json               # Show recorded state
//! ```
//!
//! Each component is reconciled (leftovers from earlier attempts removed),
//! applied, polled until its pods are ready and verified. Only a component
//! observed healthy is recorded as installed.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod cli;
pub mod commands;
pub mod components;
pub mod config;
pub mod error;
pub mod exec;
pub mod helm;
pub mod kubectl;
pub mod manifest;
pub mod output;
pub mod pipeline;
pub mod poller;
pub mod progress;
pub mod reconcile;
pub mod status;
pub mod tui;

pub use cli::Cli;
pub use error::{Error, Result};

/// CLI version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Run the CLI with the given arguments.
///
/// This is the main entry point for the CLI, parsing arguments and
/// dispatching to the appropriate command handler.
pub async fn run(args: Vec<String>) -> Result<()> {
    use clap::Parser;

    let cli_args = match Cli::try_parse_from(&args) {
        Ok(cli) => cli,
        Err(e) => {
            // Print clap error (includes help/version)
            e.print().ok();
            use clap::error::ErrorKind;
            match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => return Ok(()),
                _ => return Err(Error::Usage),
            }
        }
    };

    if cli_args.debug || std::env::var_os("RUST_LOG").is_some() {
        init_logging();
    }

    // Completions must work without a readable config.
    if let cli::Commands::Completions { shell } = &cli_args.command {
        commands::completions(*shell);
        return Ok(());
    }

    let ctx = commands::Context::from_cli(&cli_args)?;
    tracing::debug!(namespace = %ctx.config.namespace, state = %ctx.state_path.display(), "starting");

    commands::execute(&ctx, &cli_args.command).await
}

/// Initialize tracing/logging for debug mode.
fn init_logging() {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ctf_installer=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true).with_writer(std::io::stderr))
        .init();
}
