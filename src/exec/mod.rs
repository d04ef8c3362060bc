//! External command execution.
//!
//! Every interaction with the cluster goes through a [`CommandExecutor`]:
//! `kubectl`, `helm`, and anything else the installer shells out to. The
//! executor runs a program to completion and reports what happened; it
//! never treats a non-zero exit as an error and never retries. Callers
//! inspect the [`CommandOutput`] and decide.

mod dry_run;
#[cfg(test)]
pub(crate) mod testing;

pub use dry_run::DryRunExecutor;

use std::future::Future;
use std::io::Write as IoWrite;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::trace;

use crate::error::{Error, Result};

/// Result of running an external program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` if the process was killed by a signal or never started.
    pub exit_code: Option<i32>,
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8).
    pub stderr: String,
}

impl CommandOutput {
    /// A successful run with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self { exit_code: Some(0), stdout: stdout.into(), stderr: String::new() }
    }

    /// A failed run with the given exit code and stderr.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self { exit_code: Some(code), stdout: String::new(), stderr: stderr.into() }
    }

    /// A process that could not be spawned.
    pub fn spawn_failed(program: &str, err: &std::io::Error) -> Self {
        Self {
            exit_code: None,
            stdout: String::new(),
            stderr: format!("failed to run {program}: {err}"),
        }
    }

    /// Whether the process exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Exit code, or -1 when there is none.
    pub fn code(&self) -> i32 {
        self.exit_code.unwrap_or(-1)
    }

    /// Best available error text: stderr, falling back to stdout.
    pub fn error_text(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() { self.stdout.trim() } else { stderr }
    }

    /// Convert into `Ok(stdout)` on success or a [`Error::Command`] otherwise.
    pub fn into_result(self, program: &str) -> Result<String> {
        if self.success() {
            Ok(self.stdout)
        } else {
            Err(Error::Command {
                program: program.to_string(),
                code: self.code(),
                stderr: self.error_text().to_string(),
            })
        }
    }
}

/// Runs external programs on behalf of the installer.
pub trait CommandExecutor {
    /// Run `program` with `args` and capture its output.
    fn run(&self, program: &str, args: &[&str]) -> impl Future<Output = CommandOutput>;

    /// Run `program` with `args`, writing `stdin` to its standard input.
    fn run_with_stdin(
        &self,
        program: &str,
        args: &[&str],
        stdin: &str,
    ) -> impl Future<Output = CommandOutput>;
}

/// Executor that spawns real processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemExecutor;

impl SystemExecutor {
    /// Create a new system executor.
    pub const fn new() -> Self {
        Self
    }
}

impl CommandExecutor for SystemExecutor {
    async fn run(&self, program: &str, args: &[&str]) -> CommandOutput {
        trace!(program, ?args, "exec");
        match Command::new(program).args(args).stdin(Stdio::null()).output().await {
            Ok(output) => CommandOutput {
                exit_code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            },
            Err(e) => CommandOutput::spawn_failed(program, &e),
        }
    }

    async fn run_with_stdin(&self, program: &str, args: &[&str], stdin: &str) -> CommandOutput {
        trace!(program, ?args, bytes = stdin.len(), "exec with stdin");
        let mut child = match Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => return CommandOutput::spawn_failed(program, &e),
        };

        if let Some(mut pipe) = child.stdin.take() {
            if let Err(e) = pipe.write_all(stdin.as_bytes()).await {
                return CommandOutput::spawn_failed(program, &e);
            }
            // Dropping the handle closes stdin so the child sees EOF.
            drop(pipe);
        }

        match child.wait_with_output().await {
            Ok(output) => CommandOutput {
                exit_code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            },
            Err(e) => CommandOutput::spawn_failed(program, &e),
        }
    }
}

/// Write `yaml` to a temporary file and `kubectl apply` it.
///
/// `kubectl_args` is prepended to the apply arguments (e.g. `--context`).
/// The file is removed once the command has finished.
pub async fn apply_manifest_from_string<E: CommandExecutor>(
    executor: &E,
    yaml: &str,
    kubectl_args: &[&str],
) -> Result<CommandOutput> {
    let mut file = tempfile::Builder::new().prefix("ctf-manifest-").suffix(".yaml").tempfile()?;
    file.write_all(yaml.as_bytes())?;
    file.flush()?;

    let path = file.path().to_string_lossy().to_string();
    let mut args: Vec<&str> = kubectl_args.to_vec();
    args.extend(["apply", "-f", path.as_str()]);

    Ok(executor.run("kubectl", &args).await)
}

/// Check if a command is available in PATH.
pub async fn command_exists<E: CommandExecutor>(executor: &E, cmd: &str) -> bool {
    executor.run("which", &[cmd]).await.success()
}

/// Extract a "vX.Y.Z" style version from command output.
///
/// Build metadata after `+` is dropped, so `v3.15.2+g1a500d5` is `v3.15.2`.
pub fn extract_version(output: &str) -> Option<String> {
    output
        .split(|c: char| c.is_whitespace() || matches!(c, '"' | ',' | ':' | '{' | '}'))
        .map(|word| word.split('+').next().unwrap_or(word))
        .filter(|word| !word.is_empty())
        .find_map(|word| {
            let digits = word.strip_prefix('v').unwrap_or(word);
            let looks_like_version = digits.split('.').count() >= 2
                && digits.split('.').next().is_some_and(|major| {
                    !major.is_empty() && major.chars().all(|c| c.is_ascii_digit())
                });
            looks_like_version.then(|| format!("v{digits}"))
        })
}
