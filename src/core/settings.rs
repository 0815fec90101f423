//! Repository settings
//!
//! Optional `reposmith.toml` at the repository root. Every field has a
//! default, so a missing file is the same as an empty one.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::config::defaults;

/// Settings error types
#[derive(Error, Debug)]
pub enum SettingsError {
    /// Failed to read settings file
    #[error("Failed to read settings file '{path}': {error}")]
    ReadError { path: String, error: String },

    /// Failed to parse settings file
    #[error("Failed to parse settings file '{path}': {error}")]
    ParseError { path: String, error: String },
}

/// Per-repository settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// APT `Release` metadata
    #[serde(default)]
    pub apt: AptSettings,

    /// Debian package synthesis
    #[serde(default)]
    pub debian: DebianSettings,

    /// GitHub release lookup
    #[serde(default)]
    pub github: GithubSettings,

    /// Downloads and subprocesses
    #[serde(default)]
    pub network: NetworkSettings,

    /// Browser automation driver
    #[serde(default)]
    pub browser: BrowserSettings,

    /// Chocolatey tooling and feed
    #[serde(default)]
    pub choco: ChocoSettings,

    /// Orchestration
    #[serde(default)]
    pub build: BuildSettings,
}

/// Fields of the APT `Release` file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AptSettings {
    pub origin: Option<String>,
    pub label: Option<String>,
    pub suite: Option<String>,
    pub codename: Option<String>,
    pub version: Option<String>,
    pub architectures: Option<String>,
    pub components: Option<String>,
    pub description: Option<String>,
}

/// Debian package synthesis
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DebianSettings {
    /// `Maintainer:` field of generated control files
    pub maintainer: Option<String>,
    /// Where payload entries are installed
    pub install_root: Option<String>,
}

/// GitHub release lookup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GithubSettings {
    /// Newest releases searched for an asset
    pub lookback: Option<usize>,
    /// Attempt ceiling while rate limited
    pub max_attempts: Option<u32>,
}

/// Downloads and subprocesses
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// Attempts per download
    pub download_retries: Option<u32>,
    /// Timeout for external tools, in seconds
    pub process_timeout: Option<u64>,
}

/// Browser automation driver
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrowserSettings {
    /// Driver command; browser downloads fail without one
    pub driver: Option<String>,
    /// Timeout for one browser download, in seconds
    pub timeout: Option<u64>,
}

/// Chocolatey tooling and feed
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChocoSettings {
    /// Explicit `choco` command
    pub command: Option<String>,
    /// Port of the served feed
    pub port: Option<u16>,
    /// Command replacing the built-in feed restart
    pub reload_command: Option<String>,
}

/// Orchestration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildSettings {
    /// Concurrent package builds
    pub jobs: Option<usize>,
}

/// Resolved APT `Release` fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseFields {
    pub origin: String,
    pub label: String,
    pub suite: String,
    pub codename: String,
    pub version: String,
    pub architectures: String,
    pub components: String,
    pub description: String,
}

impl Settings {
    /// Load `reposmith.toml` from the repository root
    pub fn load(repo: &Path) -> Result<Self, SettingsError> {
        Self::load_from_path(&repo.join(defaults::SETTINGS_FILE))
    }

    /// Load settings from a specific path
    ///
    /// If the file doesn't exist, returns the defaults.
    pub fn load_from_path(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| SettingsError::ReadError {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| SettingsError::ParseError {
            path: path.display().to_string(),
            error: e.to_string(),
        })
    }

    /// APT `Release` fields with defaults applied
    #[must_use]
    pub fn release_fields(&self) -> ReleaseFields {
        let apt = &self.apt;
        let or = |v: &Option<String>, d: &str| v.clone().unwrap_or_else(|| d.to_string());
        ReleaseFields {
            origin: or(&apt.origin, "Custom Repository"),
            label: or(&apt.label, "Custom"),
            suite: or(&apt.suite, "stable"),
            codename: or(&apt.codename, "stable"),
            version: or(&apt.version, "1.0"),
            architectures: or(&apt.architectures, "amd64"),
            components: or(&apt.components, "main"),
            description: or(
                &apt.description,
                "A set of packages not available in the official repositories.",
            ),
        }
    }

    /// `Maintainer:` of generated control files
    #[must_use]
    pub fn maintainer(&self) -> &str {
        self.debian
            .maintainer
            .as_deref()
            .unwrap_or("reposmith <reposmith@localhost>")
    }

    /// Install root for Debian payloads
    #[must_use]
    pub fn install_root(&self) -> &str {
        self.debian.install_root.as_deref().unwrap_or("/")
    }

    /// Release lookback
    #[must_use]
    pub fn github_lookback(&self) -> usize {
        self.github.lookback.unwrap_or(defaults::GITHUB_LOOKBACK)
    }

    /// Rate-limit attempt ceiling
    #[must_use]
    pub fn github_max_attempts(&self) -> u32 {
        self.github
            .max_attempts
            .unwrap_or(defaults::GITHUB_MAX_ATTEMPTS)
    }

    /// Attempts per download
    #[must_use]
    pub fn download_retries(&self) -> u32 {
        self.network
            .download_retries
            .unwrap_or(defaults::MAX_DOWNLOAD_RETRIES)
    }

    /// Timeout for external tools
    #[must_use]
    pub fn process_timeout(&self) -> Duration {
        Duration::from_secs(
            self.network
                .process_timeout
                .unwrap_or(defaults::PROCESS_TIMEOUT_SECS),
        )
    }

    /// Timeout for one browser download
    #[must_use]
    pub fn browser_timeout(&self) -> Duration {
        Duration::from_secs(self.browser.timeout.unwrap_or(defaults::BROWSER_TIMEOUT_SECS))
    }

    /// Port of the served Chocolatey feed
    #[must_use]
    pub fn choco_port(&self) -> u16 {
        self.choco.port.unwrap_or(defaults::CHOCO_PORT)
    }

    /// Concurrent package builds
    #[must_use]
    pub fn jobs(&self) -> usize {
        self.build.jobs.unwrap_or_else(num_cpus::get).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        let fields = settings.release_fields();
        assert_eq!(fields.origin, "Custom Repository");
        assert_eq!(fields.suite, "stable");
        assert_eq!(fields.architectures, "amd64");
        assert_eq!(settings.install_root(), "/");
        assert_eq!(settings.choco_port(), 7996);
        assert_eq!(settings.github_lookback(), 30);
        assert!(settings.jobs() >= 1);
    }

    #[test]
    fn test_load_missing_file_returns_default() {
        let temp_dir = TempDir::new().unwrap();
        let settings = Settings::load(temp_dir.path()).unwrap();
        assert!(settings.apt.origin.is_none());
    }

    #[test]
    fn test_load_valid_settings() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join("reposmith.toml"),
            r#"
[apt]
origin = "Acme"

[debian]
maintainer = "Ops <ops@acme.example>"
install_root = "/opt/acme"

[choco]
port = 8080
reload_command = "systemctl reload choco-feed"

[build]
jobs = 2
"#,
        )
        .unwrap();

        let settings = Settings::load(temp_dir.path()).unwrap();
        assert_eq!(settings.release_fields().origin, "Acme");
        assert_eq!(settings.release_fields().label, "Custom");
        assert_eq!(settings.maintainer(), "Ops <ops@acme.example>");
        assert_eq!(settings.install_root(), "/opt/acme");
        assert_eq!(settings.choco_port(), 8080);
        assert_eq!(settings.jobs(), 2);
    }

    #[test]
    fn test_load_invalid_toml_returns_error() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("reposmith.toml"), "invalid toml [[[").unwrap();
        assert!(matches!(
            Settings::load(temp_dir.path()),
            Err(SettingsError::ParseError { .. })
        ));
    }

    #[test]
    fn test_unknown_section_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("reposmith.toml"), "[registry]\nurl = 1\n").unwrap();
        assert!(Settings::load(temp_dir.path()).is_err());
    }
}
