//! Common test utilities.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use tempfile::TempDir;

/// An isolated home: config, state and working directory all live in one
/// temp dir, and no `CTF_INSTALLER_*` variable leaks in from the caller.
pub struct TestEnv {
    dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        std::fs::create_dir_all(dir.path().join("work")).expect("Failed to create work dir");
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn state_file(&self) -> PathBuf {
        self.path().join("state").join("ctf-installer").join("state.json")
    }

    pub fn user_config_file(&self) -> PathBuf {
        self.path().join("config").join("ctf-installer").join("config.yaml")
    }

    pub fn write(&self, path: &Path, contents: &str) {
        std::fs::create_dir_all(path.parent().expect("path has a parent"))
            .expect("Failed to create parent dir");
        std::fs::write(path, contents).expect("Failed to write file");
    }

    pub fn cmd(&self) -> Command {
        let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("ctf-installer"));
        cmd.current_dir(self.path().join("work"))
            .env("XDG_CONFIG_HOME", self.path().join("config"))
            .env("XDG_STATE_HOME", self.path().join("state"))
            .env("CI", "true")
            .env_remove("RUST_LOG")
            .env_remove("CTF_INSTALLER_NAMESPACE")
            .env_remove("CTF_INSTALLER_KUBE_CONTEXT")
            .env_remove("CTF_INSTALLER_TIMEOUT_SECS");
        cmd
    }
}
