//! Executor that records commands instead of running them.

use std::sync::Mutex;

use tracing::info;

use super::{CommandExecutor, CommandOutput};

/// Records every command line and reports success with empty output.
///
/// Used by `install --dry-run` to print the plan without touching the
/// cluster. List-style queries come back empty, so reconciliation sees
/// nothing to delete.
#[derive(Debug, Default)]
pub struct DryRunExecutor {
    commands: Mutex<Vec<String>>,
}

impl DryRunExecutor {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands recorded so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, line: String) {
        info!(command = %line, "dry-run");
        if let Ok(mut commands) = self.commands.lock() {
            commands.push(line);
        }
    }
}

impl CommandExecutor for DryRunExecutor {
    async fn run(&self, program: &str, args: &[&str]) -> CommandOutput {
        self.record(format!("{program} {}", args.join(" ")));
        CommandOutput::ok("")
    }

    async fn run_with_stdin(&self, program: &str, args: &[&str], stdin: &str) -> CommandOutput {
        self.record(format!("{program} {} <<< ({} bytes)", args.join(" "), stdin.len()));
        CommandOutput::ok("")
    }
}
