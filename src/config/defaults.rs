//! Default configuration values

/// Maximum number of download retry attempts
pub const MAX_DOWNLOAD_RETRIES: u32 = 3;

/// Base delay for download retries (in milliseconds)
pub const DOWNLOAD_RETRY_DELAY_MS: u64 = 1000;

/// Per-attempt HTTP timeout (in seconds)
pub const HTTP_TIMEOUT_SECS: u64 = 300;

/// HTTP connect timeout (in seconds)
pub const HTTP_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Number of newest releases searched for a matching asset
pub const GITHUB_LOOKBACK: usize = 30;

/// Attempt ceiling for rate-limited release queries
pub const GITHUB_MAX_ATTEMPTS: u32 = 5;

/// Base delay for rate-limit backoff (in milliseconds)
pub const GITHUB_BACKOFF_MS: u64 = 2000;

/// Timeout for external tools (in seconds)
pub const PROCESS_TIMEOUT_SECS: u64 = 3600;

/// Timeout for a browser-driven download (in seconds)
pub const BROWSER_TIMEOUT_SECS: u64 = 600;

/// Port of the locally served Chocolatey feed
pub const CHOCO_PORT: u16 = 7996;

/// Debian compatibility level written to `debian/compat`
pub const DEBHELPER_COMPAT: u32 = 13;

/// Settings file name at the repository root
pub const SETTINGS_FILE: &str = "reposmith.toml";

/// Environment variable that keeps temporary directories for debugging
pub const ENV_KEEP_TEMP: &str = "TMPDIR_DEBUG";

/// Environment variable holding the GitHub token
pub const ENV_GH_TOKEN: &str = "GH_TOKEN";

/// Environment variable holding the repository password
pub const ENV_REPO_PASSWD: &str = "REPO_PASSWD";
