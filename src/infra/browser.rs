//! Browser-driven downloads
//!
//! Some vendors only hand out files after a few clicks on a web page. The
//! automation itself is an external driver; this module only defines the
//! capability and a process-backed implementation of it.
//!
//! The driver contract: it is invoked as
//! `<driver> [--headful] --output-dir <dir> <url> [css:<selector>|text:<label>]...`,
//! performs the clicks in order, saves the resulting download into `<dir>`
//! and exits zero.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::DownloadError;
use crate::infra::filesystem;
use crate::infra::process::ProcessSpec;

/// One click performed on the page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickTarget {
    /// Structural selector such as `#download`
    Css(String),
    /// Element found by its visible text
    Text(String),
}

impl ClickTarget {
    /// Parse one `>`-separated segment
    ///
    /// `#id` and `css=...` are structural selectors, `text=...` and
    /// anything else match visible text.
    pub fn parse(segment: &str) -> Self {
        if let Some(css) = segment.strip_prefix("css=") {
            Self::Css(css.to_string())
        } else if let Some(text) = segment.strip_prefix("text=") {
            Self::Text(text.to_string())
        } else if segment.starts_with('#') {
            Self::Css(segment.to_string())
        } else {
            Self::Text(segment.to_string())
        }
    }

    fn as_arg(&self) -> String {
        match self {
            Self::Css(s) => format!("css:{s}"),
            Self::Text(s) => format!("text:{s}"),
        }
    }
}

/// A browser fetch request: `url>click>click...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserRequest {
    /// Page to open
    pub url: String,
    /// Clicks in order; the last one triggers the download
    pub clicks: Vec<ClickTarget>,
}

impl BrowserRequest {
    /// Split a `DOWNLOAD_BROWSER` argument
    pub fn parse(spec: &str) -> Self {
        let mut parts = spec.split('>');
        let url = parts.next().unwrap_or_default().trim().to_string();
        let clicks = parts
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ClickTarget::parse)
            .collect();
        Self { url, clicks }
    }
}

/// Capability: open a page, click through it, return the downloaded file
#[async_trait]
pub trait BrowserFetcher: Send + Sync {
    /// Download into `dir` and return the saved file
    async fn fetch(&self, request: &BrowserRequest, dir: &Path) -> Result<PathBuf, DownloadError>;
}

/// Used when no driver is configured
#[derive(Debug, Clone, Default)]
pub struct NoBrowser;

#[async_trait]
impl BrowserFetcher for NoBrowser {
    async fn fetch(&self, request: &BrowserRequest, _dir: &Path) -> Result<PathBuf, DownloadError> {
        Err(DownloadError::BrowserUnavailable {
            url: request.url.clone(),
        })
    }
}

/// Runs an external automation driver
#[derive(Debug, Clone)]
pub struct ExternalBrowser {
    command: String,
    headful: bool,
    timeout: Duration,
}

impl ExternalBrowser {
    /// Create a driver wrapper
    pub fn new(command: impl Into<String>, headful: bool, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            headful,
            timeout,
        }
    }
}

#[async_trait]
impl BrowserFetcher for ExternalBrowser {
    async fn fetch(&self, request: &BrowserRequest, dir: &Path) -> Result<PathBuf, DownloadError> {
        let failed = |error: String| DownloadError::Browser {
            url: request.url.clone(),
            error,
        };

        // Driver writes into a private directory so the new file is unambiguous
        let staging = dir.join(".browser-download");
        filesystem::remove_path(&staging).map_err(|e| failed(e.to_string()))?;
        filesystem::create_dir_all(&staging).map_err(|e| failed(e.to_string()))?;

        let mut spec = ProcessSpec::new(&self.command).timeout(self.timeout);
        if self.headful {
            spec = spec.arg("--headful");
        }
        let result = spec
            .arg("--output-dir")
            .arg(staging.to_string_lossy())
            .arg(&request.url)
            .args(request.clicks.iter().map(ClickTarget::as_arg))
            .run()
            .await;

        let outcome = match result {
            Ok(_) => filesystem::single_entry(&staging)
                .map_err(|e| failed(format!("driver did not produce a single file: {e}")))
                .and_then(|file| {
                    let target = dir.join(filesystem::file_name(&file));
                    filesystem::rename(&file, &target).map_err(|e| failed(e.to_string()))?;
                    Ok(target)
                }),
            Err(e) => Err(failed(e.to_string())),
        };

        let _ = filesystem::remove_path(&staging);
        outcome
    }
}
