//! Platform-specific directory management
//!
//! The only per-user state is the default signing key, stored under the
//! config directory. `REPOSMITH_CONFIG_DIR` overrides the platform default.

use std::env;
use std::path::PathBuf;

/// Environment variable overriding the config directory
pub const ENV_CONFIG_DIR: &str = "REPOSMITH_CONFIG_DIR";

/// Application name used in directory paths
const APP_NAME: &str = "reposmith";

/// Default signing key file name
const SIGNING_KEY_FILE: &str = "signing.key";

/// Platform-specific directory provider
#[derive(Debug, Clone)]
pub struct ReposmithDirs {
    config_dir: PathBuf,
}

impl ReposmithDirs {
    /// Resolve directories from the environment or platform defaults
    #[must_use]
    pub fn new() -> Self {
        Self {
            config_dir: Self::resolve_config_dir(),
        }
    }

    /// Config directory
    ///
    /// - Linux: `$XDG_CONFIG_HOME/reposmith` or `~/.config/reposmith`
    /// - macOS: `~/Library/Application Support/reposmith`
    #[must_use]
    pub fn config_dir(&self) -> PathBuf {
        self.config_dir.clone()
    }

    /// Default location of the repository signing key
    #[must_use]
    pub fn default_key_file(&self) -> PathBuf {
        self.config_dir.join(SIGNING_KEY_FILE)
    }

    fn resolve_config_dir() -> PathBuf {
        if let Ok(path) = env::var(ENV_CONFIG_DIR) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .map(|p| p.join(APP_NAME))
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .map(|h| h.join(".config").join(APP_NAME))
                    .unwrap_or_else(|| PathBuf::from(".").join(".config").join(APP_NAME))
            })
    }
}

impl Default for ReposmithDirs {
    fn default() -> Self {
        Self::new()
    }
}
