//! Common test utilities and helpers
//!
//! This module provides shared utilities for integration tests.

use std::path::PathBuf;
use std::process::{Command, Output};
use tempfile::TempDir;

/// Temporary repository root
pub struct TestRepo {
    /// Temporary directory holding the repository
    pub dir: TempDir,
}

#[allow(dead_code)]
impl TestRepo {
    /// Empty directory, not yet initialized
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Repository created with `reposmith init`
    pub fn initialized() -> Self {
        let repo = Self::new();
        let output = repo.run(&["init", &repo.arg()]);
        assert!(
            output.status.success(),
            "init failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        repo
    }

    /// Path of the repository root
    pub fn path(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    /// Repository root as a command-line argument
    pub fn arg(&self) -> String {
        self.dir.path().to_string_lossy().into_owned()
    }

    /// Create a file relative to the root
    pub fn create_file(&self, name: &str, content: &str) {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        std::fs::write(path, content).expect("Failed to write file");
    }

    /// Check if a path exists relative to the root
    pub fn file_exists(&self, name: &str) -> bool {
        self.dir.path().join(name).exists()
    }

    /// Read a file relative to the root
    pub fn read_file(&self, name: &str) -> String {
        std::fs::read_to_string(self.dir.path().join(name)).expect("Failed to read file")
    }

    /// Run the binary with isolated config and credentials
    pub fn run(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_reposmith"))
            .args(args)
            .env("REPOSMITH_CONFIG_DIR", self.dir.path().join(".config"))
            .env_remove("GH_TOKEN")
            .env_remove("REPO_PASSWD")
            .output()
            .expect("Failed to execute reposmith")
    }
}

impl Default for TestRepo {
    fn default() -> Self {
        Self::new()
    }
}

/// Cask definition built from a private-store payload
#[allow(dead_code)]
pub const SAMPLE_TAP: &str = r#"VERSION 1.2
COPY_SRC Tool.dmg
CASK
  cask "tool" do
    version "$VERSION"
    url "$TAP_FILE"
  end
"#;
