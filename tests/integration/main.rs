//! Integration tests for the `ctf-installer` binary.
//!
//! Nothing here needs a cluster: the commands exercised either stay local
//! or run in dry-run mode.

#![allow(clippy::unwrap_used)] // Tests can use unwrap for cleaner assertions

mod common;

use common::TestEnv;
use predicates::prelude::*;

/// Test that the CLI shows help.
#[test]
fn test_help() {
    TestEnv::new()
        .cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("CTF platform installer"))
        .stdout(predicate::str::contains("install"))
        .stdout(predicate::str::contains("doctor"));
}

/// Test that the CLI shows version.
#[test]
fn test_version() {
    TestEnv::new()
        .cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

/// Unrecognized commands are usage errors.
#[test]
fn test_unknown_command() {
    TestEnv::new().cmd().arg("unknown-command").assert().failure().code(2);
}

#[test]
fn test_unknown_component() {
    TestEnv::new()
        .cmd()
        .args(["install", "--only", "redis"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("unknown component 'redis'"));
}

#[test]
fn test_config_path_follows_xdg() {
    let env = TestEnv::new();
    env.cmd()
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains(env.user_config_file().display().to_string()))
        .stdout(predicate::str::contains(env.state_file().display().to_string()));
}

#[test]
fn test_config_show_layers() {
    let env = TestEnv::new();
    env.write(&env.user_config_file(), "namespace: from-user\nmonitoring:\n  grafana: false\n");
    env.write(&env.path().join("work").join(".ctf-installer.yaml"), "namespace: from-project\n");

    env.cmd()
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("namespace: from-project"))
        .stdout(predicate::str::contains("grafana: false"));

    env.cmd()
        .args(["config", "show", "--namespace", "from-flag"])
        .env("CTF_INSTALLER_NAMESPACE", "from-env")
        .assert()
        .success()
        .stdout(predicate::str::contains("namespace: from-flag"));
}

#[test]
fn test_missing_explicit_config_is_config_error() {
    TestEnv::new()
        .cmd()
        .args(["config", "show", "--config", "nope.yaml"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn test_bad_timeout_env_is_config_error() {
    TestEnv::new()
        .cmd()
        .args(["config", "show"])
        .env("CTF_INSTALLER_TIMEOUT_SECS", "soon")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("CTF_INSTALLER_TIMEOUT_SECS"));
}

#[test]
fn test_zero_timeout_is_invalid_argument() {
    TestEnv::new()
        .cmd()
        .args(["install", "--dry-run", "--timeout", "0"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("--timeout must be at least 1 second"));
}

#[test]
fn test_negative_backoff_in_config_is_rejected() {
    let env = TestEnv::new();
    let path = env.path().join("bad-backoff.yaml");
    env.write(&path, "poll:\n  backoff:\n    strategy: fixed\n    interval_secs: -1\n");
    env.cmd()
        .args(["config", "show", "--config"])
        .arg(&path)
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("poll.backoff.interval_secs"));
}

#[test]
fn test_install_dry_run_prints_plan() {
    let env = TestEnv::new();
    env.cmd()
        .args(["install", "--dry-run", "--namespace", "ctf-test"])
        .assert()
        .success()
        .stdout(predicate::str::contains("helm repo add bitnami https://charts.bitnami.com/bitnami"))
        .stdout(predicate::str::contains(
            "helm upgrade --install ctf-database bitnami/postgresql -n ctf-test",
        ))
        .stdout(predicate::str::contains("kubectl apply -f"))
        .stdout(predicate::str::contains("kube-prometheus-stack"))
        .stdout(predicate::str::contains("PLANNED"));

    assert!(!env.state_file().exists(), "dry run must not write state");
}

#[test]
fn test_install_dry_run_only_selected() {
    TestEnv::new()
        .cmd()
        .args(["install", "--dry-run", "--only", "monitoring"])
        .assert()
        .success()
        .stdout(predicate::str::contains("kube-prometheus-stack"))
        .stdout(predicate::str::contains("bitnami/postgresql").not());
}

#[test]
fn test_status_table_and_json() {
    let env = TestEnv::new();
    env.write(
        &env.state_file(),
        r#"{
  "components": {
    "database": {
      "status": "installed",
      "updated_at": "2026-01-02T03:04:05Z",
      "message": "pods ready (2 attempts)"
    },
    "instanceManager": {
      "status": "error",
      "updated_at": "2026-01-02T03:10:00Z",
      "message": "ImagePullBackOff"
    }
  }
}"#,
    );

    env.cmd()
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("COMPONENT"))
        .stdout(predicate::str::contains("2026-01-02 03:04:05 UTC"))
        .stdout(predicate::str::contains("ImagePullBackOff"))
        .stdout(predicate::str::contains("monitoringService  pending"));

    let output = env.cmd().args(["status", "-o", "json"]).output().unwrap();
    assert!(output.status.success());
    let rows: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(rows[0]["component"], "database");
    assert_eq!(rows[0]["status"], "installed");
    assert_eq!(rows[1]["status"], "error");
    assert_eq!(rows[2]["status"], "pending");
}

#[test]
fn test_status_without_state_is_all_pending() {
    TestEnv::new()
        .cmd()
        .args(["status", "-o", "yaml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("status: pending").count(3));
}

/// Without a terminal the prompt answers no, so nothing is touched.
#[test]
fn test_cleanup_declined_without_tty() {
    let env = TestEnv::new();
    env.cmd().args(["cleanup", "database"]).assert().success();
    assert!(!env.state_file().exists());
}

#[test]
fn test_completions() {
    TestEnv::new()
        .cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ctf-installer"));
}
