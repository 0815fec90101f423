//! Build command implementation
//!
//! Implements `reposmith build`: prepares the repository, gathers
//! credentials and the signing key, runs one orchestration pass and prints
//! the report. Package failures do not make the command fail; they turn
//! into exit code 2.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use base64::Engine;

use crate::cli::output::{create_build_bar, summary_lines, OutputConfig};
use crate::config::defaults;
use crate::core::assembler::Assembler;
use crate::core::builder::BuildOrchestrator;
use crate::core::context::BuildServices;
use crate::core::layout::RepositoryLayout;
use crate::core::reload;
use crate::core::settings::Settings;
use crate::infra::browser::{BrowserFetcher, ExternalBrowser, NoBrowser};
use crate::infra::dirs::ReposmithDirs;
use crate::infra::download::DownloadManager;
use crate::infra::github::ReleaseClient;
use crate::infra::gpg::{GpgSigner, KeyIdentity};

/// Exit code of a pass with failed packages
pub const EXIT_PACKAGE_FAILURES: i32 = 2;

/// Build options
#[derive(Debug, Default)]
pub struct BuildOptions {
    pub key: Option<PathBuf>,
    pub domain: String,
    pub github: Option<PathBuf>,
    pub user: Option<String>,
    pub passwd: Option<PathBuf>,
    pub headful: bool,
    pub restart: bool,
    pub jobs: Option<usize>,
    pub packages: Vec<String>,
}

/// Check the scheme and drop trailing slashes
pub fn normalize_domain(domain: &str) -> Result<String> {
    if !(domain.starts_with("http://") || domain.starts_with("https://")) {
        bail!("Domain '{domain}' must start with http:// or https://");
    }
    Ok(domain.trim_end_matches('/').to_string())
}

/// First line of a secret file, or the environment variable
fn read_secret(file: Option<&Path>, env: &str) -> Result<Option<String>> {
    if let Some(file) = file {
        let text = std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        return Ok(Some(text.lines().next().unwrap_or("").trim().to_string()));
    }
    Ok(std::env::var(env).ok().filter(|v| !v.is_empty()))
}

/// `base64(user:password)` for `$AUTHORIZATION`
pub fn authorization(user: Option<&str>, passwd: Option<&Path>) -> Result<Option<String>> {
    let Some(user) = user else {
        if passwd.is_some() {
            bail!("--passwd requires --user");
        }
        return Ok(None);
    };
    let Some(password) = read_secret(passwd, defaults::ENV_REPO_PASSWD)? else {
        bail!(
            "No password for '{user}': pass --passwd or set {}",
            defaults::ENV_REPO_PASSWD
        );
    };
    let token = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{password}"));
    Ok(Some(token))
}

/// Load the signing key, creating it first when missing
async fn signer(key: Option<PathBuf>) -> Result<GpgSigner> {
    let key = key.unwrap_or_else(|| ReposmithDirs::new().default_key_file());
    if !key.exists() {
        tracing::warn!("Signing key {} not found, creating it", key.display());
        GpgSigner::create_key(&key, &KeyIdentity::default())
            .await
            .with_context(|| format!("Failed to create signing key {}", key.display()))?;
    }
    GpgSigner::load(&key)
        .await
        .with_context(|| format!("Failed to load signing key {}", key.display()))
}

fn browser(settings: &Settings, headful: bool) -> Arc<dyn BrowserFetcher> {
    match &settings.browser.driver {
        Some(driver) => Arc::new(ExternalBrowser::new(
            driver.clone(),
            headful,
            settings.browser_timeout(),
        )),
        None => Arc::new(NoBrowser),
    }
}

/// Execute the build command
pub async fn execute(repo: &Path, options: BuildOptions, output: OutputConfig) -> Result<i32> {
    let domain = normalize_domain(&options.domain)?;
    let layout = RepositoryLayout::new(repo);
    layout
        .prepare()
        .with_context(|| format!("Failed to prepare repository at {}", repo.display()))?;
    let settings = Settings::load(repo).with_context(|| "Failed to load repository settings")?;

    let authorization = authorization(options.user.as_deref(), options.passwd.as_deref())?;
    let token = read_secret(options.github.as_deref(), defaults::ENV_GH_TOKEN)?;
    let releases = ReleaseClient::new(token)
        .with_lookback(settings.github_lookback())
        .with_retry(settings.github_max_attempts(), defaults::GITHUB_BACKOFF_MS);
    if !releases.is_authenticated() {
        tracing::warn!("No GitHub token, release queries are unauthenticated");
    }
    let signer = signer(options.key).await?;

    let services = BuildServices {
        layout: layout.clone(),
        downloads: DownloadManager::with_config(
            settings.download_retries(),
            defaults::DOWNLOAD_RETRY_DELAY_MS,
        ),
        releases,
        browser: browser(&settings, options.headful),
        domain,
        authorization,
        settings: settings.clone(),
    };
    let assembler = Assembler::new(layout.clone(), settings.clone(), Arc::new(signer));

    let mut orchestrator = BuildOrchestrator::new(Arc::new(services), Arc::new(assembler))
        .with_packages(options.packages);
    if let Some(jobs) = options.jobs {
        orchestrator = orchestrator.with_jobs(jobs);
    }
    if output.show_progress() {
        orchestrator = orchestrator.with_progress(create_build_bar(0));
    }

    let report = orchestrator
        .run()
        .await
        .with_context(|| "Failed to discover package definitions")?;

    if options.restart {
        reload::hook_for(&settings)
            .reload(&layout)
            .await
            .with_context(|| "Failed to restart the Chocolatey feed")?;
    }

    if output.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if !output.quiet {
        for line in summary_lines(&report) {
            println!("{line}");
        }
    }

    Ok(if report.has_failures() {
        EXIT_PACKAGE_FAILURES
    } else {
        0
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_normalize_domain() {
        assert_eq!(
            normalize_domain("https://pkgs.example/").unwrap(),
            "https://pkgs.example"
        );
        assert!(normalize_domain("pkgs.example").is_err());
        assert!(normalize_domain("ftp://pkgs.example").is_err());
    }

    #[test]
    fn test_authorization_from_file() {
        let temp = TempDir::new().unwrap();
        let pw = temp.path().join("pw");
        std::fs::write(&pw, "s3cret\n").unwrap();
        assert_eq!(
            authorization(Some("ci"), Some(&pw)).unwrap().as_deref(),
            Some("Y2k6czNjcmV0")
        );
        assert_eq!(authorization(None, None).unwrap(), None);
        assert!(authorization(None, Some(&pw)).is_err());
    }

    #[test]
    #[serial]
    fn test_authorization_from_env() {
        std::env::set_var(defaults::ENV_REPO_PASSWD, "s3cret");
        let result = authorization(Some("ci"), None);
        std::env::remove_var(defaults::ENV_REPO_PASSWD);
        assert_eq!(result.unwrap().as_deref(), Some("Y2k6czNjcmV0"));

        assert!(authorization(Some("ci"), None).is_err());
    }
}
