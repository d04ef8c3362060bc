//! `doctor`: check the tools and cluster access the installer needs.

use super::Context;
use crate::error::{Error, Result};
use crate::exec::{CommandExecutor, SystemExecutor, command_exists, extract_version};
use crate::kubectl::Kubectl;
use crate::tui;

/// A command-line tool the installer shells out to.
struct Dependency {
    name: &'static str,
    command: &'static str,
    version_args: &'static [&'static str],
    install_hint: &'static str,
}

const DEPENDENCIES: &[Dependency] = &[
    Dependency {
        name: "kubectl",
        command: "kubectl",
        version_args: &["version", "--client"],
        install_hint: "https://kubernetes.io/docs/tasks/tools/",
    },
    Dependency {
        name: "Helm",
        command: "helm",
        version_args: &["version", "--short"],
        install_hint: "https://helm.sh/docs/intro/install/",
    },
];

/// Result of one check.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Check {
    name: String,
    status: String,
    hint: Option<String>,
    ok: bool,
}

impl Check {
    fn ok(name: impl Into<String>, status: impl Into<String>) -> Self {
        Self { name: name.into(), status: status.into(), hint: None, ok: true }
    }

    fn failed(name: impl Into<String>, status: &str, hint: impl Into<String>) -> Self {
        Self { name: name.into(), status: status.to_string(), hint: Some(hint.into()), ok: false }
    }
}

async fn check_dependency<E: CommandExecutor>(executor: &E, dep: &Dependency) -> Check {
    if !command_exists(executor, dep.command).await {
        return Check::failed(dep.name, "MISSING", format!("install: {}", dep.install_hint));
    }
    let out = executor.run(dep.command, dep.version_args).await;
    let version = extract_version(&out.stdout).unwrap_or_else(|| "installed".to_string());
    Check::ok(dep.name, version)
}

async fn run_checks<E: CommandExecutor>(executor: &E, kube_context: Option<String>) -> Vec<Check> {
    let mut checks = Vec::new();
    for dep in DEPENDENCIES {
        checks.push(check_dependency(executor, dep).await);
    }

    // Cluster checks need kubectl.
    if !checks.first().is_some_and(|c| c.ok) {
        return checks;
    }

    let kubectl = Kubectl::new(executor, kube_context);
    let context = match kubectl.context() {
        Some(context) => Some(context.to_string()),
        None => kubectl.current_context().await,
    };
    match context {
        Some(context) => checks.push(Check::ok("Kubernetes context", context)),
        None => checks.push(Check::failed(
            "Kubernetes context",
            "MISSING",
            "select one with 'kubectl config use-context' or pass --context",
        )),
    }
    match kubectl.cluster_reachable().await {
        Ok(()) => checks.push(Check::ok("Cluster API", "OK")),
        Err(e) => checks.push(Check::failed("Cluster API", "UNREACHABLE", e.to_string())),
    }
    checks
}

/// Print every check; fail if any did.
pub async fn doctor(ctx: &Context) -> Result<()> {
    let executor = SystemExecutor::new();
    let checks =
        tui::spin("Checking environment...", run_checks(&executor, ctx.config.kube_context.clone()))
            .await;

    tui::print_phase_header("Environment");
    for check in &checks {
        tui::print_step(&check.name, &check.status);
        if let Some(hint) = &check.hint {
            tui::print_hint(hint);
        }
    }
    println!();

    let failed = checks.iter().filter(|c| !c.ok).count();
    if failed == 0 {
        teapot::output::success("Ready to install");
        Ok(())
    } else {
        Err(Error::other(format!("{failed} check(s) failed")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::exec::CommandOutput;
    use crate::exec::testing::ScriptedExecutor;

    #[tokio::test]
    async fn test_all_checks_pass() {
        let exec = ScriptedExecutor::new()
            .on("kubectl version", vec![CommandOutput::ok("Client Version: v1.30.2")])
            .on("helm version", vec![CommandOutput::ok("v3.15.1")])
            .on("current-context", vec![CommandOutput::ok("kind-ctf\n")]);

        let checks = run_checks(&exec, None).await;
        let statuses: Vec<&str> = checks.iter().map(|c| c.status.as_str()).collect();
        assert_eq!(statuses, vec!["v1.30.2", "v3.15.1", "kind-ctf", "OK"]);
        assert!(checks.iter().all(|c| c.ok));
    }

    #[tokio::test]
    async fn test_missing_kubectl_skips_cluster_checks() {
        let exec = ScriptedExecutor::new()
            .on("which kubectl", vec![CommandOutput::failed(1, "")])
            .on("helm version", vec![CommandOutput::ok("v3.15.1")]);

        let checks = run_checks(&exec, None).await;
        assert_eq!(checks.len(), 2);
        assert_eq!(
            checks[0],
            Check::failed("kubectl", "MISSING", "install: https://kubernetes.io/docs/tasks/tools/")
        );
        assert!(checks[1].ok);
    }

    #[tokio::test]
    async fn test_unreachable_cluster_fails() {
        let exec = ScriptedExecutor::new().on(
            "cluster-info",
            vec![CommandOutput::failed(1, "connection refused")],
        );

        let checks = run_checks(&exec, Some("prod".into())).await;
        let cluster = checks.last().unwrap();
        assert_eq!(cluster.status, "UNREACHABLE");
        assert!(cluster.hint.as_deref().unwrap().contains("connection refused"));
        assert_eq!(checks[2], Check::ok("Kubernetes context", "prod"));
        assert_eq!(exec.count("current-context"), 0);
    }
}
