//! Upstream service URLs

/// GitHub REST API base URL
pub const GITHUB_API: &str = "https://api.github.com";

/// GitHub API version header value
pub const GITHUB_API_VERSION: &str = "2022-11-28";

/// GitHub media type for JSON responses
pub const GITHUB_ACCEPT: &str = "application/vnd.github+json";

/// Primary public conda channel used when building recipes
pub const CONDA_FORGE_CHANNEL: &str = "conda-forge";
