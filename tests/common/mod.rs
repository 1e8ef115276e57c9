//! Common test utilities for fleetseal integration tests.
//!
//! Provides `TestEnv` for isolated test environments that never read the
//! user's `~/.config/fleetseal/` or the caller's `ROBOT_*` variables.

#![allow(dead_code)]

use assert_cmd::Command;
use fleetseal::envelope::Identity;
use std::path::{Path, PathBuf};
pub use tempfile::TempDir;

/// Variables the binary reads that must not leak in from the test runner.
const SCRUBBED_ENV: &[&str] = &[
    "FLEETSEAL_DIR",
    "FLEETSEAL_CONFIG",
    "FLEETSEAL_SECRETS_DIR",
    "FLEETSEAL_KEYS_DIR",
    "FLEETSEAL_RUNTIME_DIR",
    "FLEETSEAL_AUDIT_LOG",
    "FLEETSEAL_KEY_FILE",
    "FLEETSEAL_LOG",
    "ROBOT_IDENTITY",
    "ROBOT_ENDPOINT",
    "ROBOT_SIGNALING_URL",
    "ROBOT_CREDENTIAL",
];

/// A test environment with an isolated project and system config dir.
///
/// The `fseal()` method returns a `Command` that runs in the project
/// directory with `FLEETSEAL_CONFIG_DIR` pointed at an empty directory,
/// making tests parallel-safe.
pub struct TestEnv {
    pub project_dir: TempDir,
    pub config_dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            project_dir: TempDir::new().unwrap(),
            config_dir: TempDir::new().unwrap(),
        }
    }

    /// Get a Command for the fseal binary with isolated configuration.
    pub fn fseal(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_fseal"));
        cmd.current_dir(self.project_dir.path());
        for var in SCRUBBED_ENV {
            cmd.env_remove(var);
        }
        cmd.env("FLEETSEAL_CONFIG_DIR", self.config_dir.path());
        cmd
    }

    pub fn path(&self) -> &Path {
        self.project_dir.path()
    }

    pub fn write_config(&self, text: &str) {
        std::fs::write(self.path().join("fleetseal.kdl"), text).unwrap();
    }

    /// Write a fresh key file and return its path and public key.
    pub fn new_key(&self, name: &str) -> (PathBuf, String) {
        let identity = Identity::generate();
        let path = self.path().join(name);
        std::fs::write(&path, identity.to_file_contents().as_bytes()).unwrap();
        (path, identity.recipient().to_string())
    }

    /// Seal TOML values for a target via `fseal seal`.
    pub fn seal(&self, target: &str, toml: &str, recipient: &str) {
        self.fseal()
            .args(["seal", target, "-r", recipient])
            .write_stdin(toml)
            .assert()
            .success();
    }

    pub fn artifact_path(&self, target: &str) -> PathBuf {
        self.path().join("secrets").join(format!("{}.enc.json", target))
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a command's stdout as JSON.
pub fn json(output: &[u8]) -> serde_json::Value {
    serde_json::from_slice(output).unwrap()
}
