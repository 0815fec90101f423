//! GitHub release lookup
//!
//! One query answers both "which version" and "which asset": callers get a
//! [`ReleaseSelection`] and never query the API twice for the same package.
//! Rate-limited responses are retried with exponential backoff up to a fixed
//! attempt ceiling.

use backoff::ExponentialBackoffBuilder;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

use crate::config::{defaults, urls};
use crate::error::{DownloadError, ReleaseError};

/// A release asset
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Asset {
    /// File name of the asset
    pub name: String,
    /// Public download URL
    pub browser_download_url: String,
}

/// A release as returned by the API
#[derive(Debug, Clone, Deserialize)]
pub struct Release {
    /// Git tag of the release
    pub tag_name: String,
    /// Marked as prerelease
    #[serde(default)]
    pub prerelease: bool,
    /// Unpublished draft
    #[serde(default)]
    pub draft: bool,
    /// Attached assets
    #[serde(default)]
    pub assets: Vec<Asset>,
}

/// The release chosen for a package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseSelection {
    /// `user/repo`
    pub repo: String,
    /// Tag of the chosen release
    pub tag: String,
    /// Version derived from the tag
    pub version: String,
    /// Matching asset, when a pattern was given
    pub asset: Option<Asset>,
}

/// Client for the releases API
#[derive(Debug, Clone)]
pub struct ReleaseClient {
    client: reqwest::Client,
    api_base: String,
    token: Option<String>,
    lookback: usize,
    max_attempts: u32,
    base_delay_ms: u64,
}

impl ReleaseClient {
    /// Create a client against the public API
    pub fn new(token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(defaults::HTTP_CONNECT_TIMEOUT_SECS * 2))
                .user_agent(concat!("reposmith/", env!("CARGO_PKG_VERSION")))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            api_base: urls::GITHUB_API.to_string(),
            token,
            lookback: defaults::GITHUB_LOOKBACK,
            max_attempts: defaults::GITHUB_MAX_ATTEMPTS,
            base_delay_ms: defaults::GITHUB_BACKOFF_MS,
        }
    }

    /// Point the client at another API root
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    /// Number of newest releases searched for an asset
    pub fn with_lookback(mut self, lookback: usize) -> Self {
        self.lookback = lookback.max(1);
        self
    }

    /// Attempt ceiling and base delay for rate-limit backoff
    pub fn with_retry(mut self, max_attempts: u32, base_delay_ms: u64) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.base_delay_ms = base_delay_ms;
        self
    }

    /// Whether a token is configured
    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    /// Headers for API calls
    fn api_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(urls::GITHUB_ACCEPT));
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static(urls::GITHUB_API_VERSION),
        );
        headers.extend(self.auth_headers());
        headers
    }

    /// Authorization header, if a token is configured
    pub fn auth_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(token) = &self.token {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        headers
    }

    /// GET a JSON document, backing off while rate limited
    async fn get_json<T>(&self, repo: &str, url: &str) -> Result<T, ReleaseError>
    where
        T: serde::de::DeserializeOwned,
    {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.base_delay_ms))
            .with_max_interval(Duration::from_secs(60))
            .with_max_elapsed_time(None)
            .build();

        let mut attempts = 0u32;
        let max_attempts = self.max_attempts;

        let body = backoff::future::retry(policy, || {
            attempts += 1;
            let attempt = attempts;
            async move {
                let response = self
                    .client
                    .get(url)
                    .headers(self.api_headers())
                    .send()
                    .await
                    .map_err(|e| {
                        backoff::Error::permanent(ReleaseError::Download(
                            DownloadError::NetworkError {
                                url: url.to_string(),
                                error: e.to_string(),
                            },
                        ))
                    })?;

                let status = response.status();
                if is_rate_limited(status, response.headers()) {
                    let err = ReleaseError::Download(DownloadError::RateLimited {
                        url: url.to_string(),
                        attempts: attempt,
                    });
                    if attempt >= max_attempts {
                        return Err(backoff::Error::permanent(err));
                    }
                    tracing::warn!("Rate limited by {} (attempt {}), backing off", url, attempt);
                    return Err(backoff::Error::transient(err));
                }
                if status == StatusCode::NOT_FOUND {
                    return Err(backoff::Error::permanent(ReleaseError::NoRelease {
                        repo: repo.to_string(),
                    }));
                }
                if !status.is_success() {
                    return Err(backoff::Error::permanent(ReleaseError::Download(
                        DownloadError::NetworkError {
                            url: url.to_string(),
                            error: format!("HTTP {status}"),
                        },
                    )));
                }

                response.text().await.map_err(|e| {
                    backoff::Error::permanent(ReleaseError::Download(DownloadError::NetworkError {
                        url: url.to_string(),
                        error: e.to_string(),
                    }))
                })
            }
        })
        .await?;

        serde_json::from_str(&body).map_err(|e| ReleaseError::InvalidResponse {
            repo: repo.to_string(),
            error: e.to_string(),
        })
    }

    /// Newest releases, bounded by the lookback
    pub async fn list_releases(&self, repo: &str) -> Result<Vec<Release>, ReleaseError> {
        let url = format!(
            "{}/repos/{}/releases?per_page={}",
            self.api_base, repo, self.lookback
        );
        let mut releases: Vec<Release> = self.get_json(repo, &url).await?;
        releases.truncate(self.lookback);
        Ok(releases)
    }

    /// The release carrying `tag`
    pub async fn release_by_tag(&self, repo: &str, tag: &str) -> Result<Release, ReleaseError> {
        let url = format!("{}/repos/{}/releases/tags/{}", self.api_base, repo, tag);
        self.get_json(repo, &url).await
    }

    /// Choose the release (and asset) for `repo`
    ///
    /// With a pinned `tag` only that release is considered. Otherwise the
    /// newest non-prerelease release with a matching asset wins; without a
    /// pattern the newest non-prerelease release wins.
    pub async fn resolve(
        &self,
        repo: &str,
        pattern: Option<&str>,
        tag: Option<&str>,
    ) -> Result<ReleaseSelection, ReleaseError> {
        let releases = match tag {
            Some(tag) => vec![self.release_by_tag(repo, tag).await?],
            None => self.list_releases(repo).await?,
        };
        let selection = select_release(repo, &releases, pattern, tag.is_some())?;
        tracing::info!(
            "Selected release {} of {}{}",
            selection.tag,
            repo,
            selection
                .asset
                .as_ref()
                .map(|a| format!(" (asset {})", a.name))
                .unwrap_or_default()
        );
        Ok(selection)
    }
}

/// HTTP 429, or 403 with an exhausted quota
fn is_rate_limited(status: StatusCode, headers: &HeaderMap) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN
            && headers
                .get("x-ratelimit-remaining")
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.trim() == "0"))
}

/// Pick the release and asset from an ordered (newest first) release list
pub fn select_release(
    repo: &str,
    releases: &[Release],
    pattern: Option<&str>,
    pinned: bool,
) -> Result<ReleaseSelection, ReleaseError> {
    let candidates = releases
        .iter()
        .filter(|r| pinned || (!r.prerelease && !r.draft));

    let Some(pattern) = pattern else {
        let release = candidates.into_iter().next().ok_or_else(|| ReleaseError::NoRelease {
            repo: repo.to_string(),
        })?;
        return Ok(selection(repo, release, None));
    };

    let glob = glob::Pattern::new(pattern).map_err(|e| ReleaseError::InvalidPattern {
        pattern: pattern.to_string(),
        error: e.to_string(),
    })?;

    let mut searched = 0;
    for release in candidates {
        searched += 1;
        let matches: Vec<&Asset> = release
            .assets
            .iter()
            .filter(|a| glob.matches(&a.name))
            .collect();
        match matches.as_slice() {
            [] => {
                tracing::debug!("Release {} of {} has no asset matching {}", release.tag_name, repo, pattern);
            }
            [asset] => return Ok(selection(repo, release, Some((*asset).clone()))),
            many => {
                return Err(ReleaseError::AmbiguousAsset {
                    repo: repo.to_string(),
                    tag: release.tag_name.clone(),
                    matches: many.iter().map(|a| a.name.clone()).collect(),
                })
            }
        }
    }

    Err(ReleaseError::NoMatchingAsset {
        repo: repo.to_string(),
        pattern: pattern.to_string(),
        searched,
    })
}

fn selection(repo: &str, release: &Release, asset: Option<Asset>) -> ReleaseSelection {
    ReleaseSelection {
        repo: repo.to_string(),
        tag: release.tag_name.clone(),
        version: tag_to_version(&release.tag_name),
        asset,
    }
}

/// Turn a tag such as `release-v1.2.3` into `1.2.3`
///
/// Keeps digits, `.`, `-` and `_`, then drops everything before the first
/// digit.
pub fn tag_to_version(tag: &str) -> String {
    let kept: String = tag
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '_'))
        .collect();
    kept.trim_start_matches(|c: char| !c.is_ascii_digit())
        .to_string()
}
