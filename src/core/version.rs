//! Version resolution
//!
//! The version is resolved before any command runs, because the artifact
//! stem (and with it the up-to-date check) depends on it:
//!
//! - literal versions are used as written;
//! - `re:<pattern>` is matched against the remote file name of the
//!   download command, and capture group 1 is the version;
//! - `gh:<user>/<repo>` takes the newest release. When the definition also
//!   uses `DOWNLOAD_GH`, that one query selects both version and asset.
//!
//! The versions of different packages are compared with [`compare_versions`]
//! when the tap keeps only the newest cask per name.

use regex::Regex;
use semver::Version;
use std::cmp::Ordering;
use std::path::PathBuf;

use crate::core::context::BuildServices;
use crate::core::definition::{Command, PackageDefinition, VersionSpec};
use crate::error::{BuildError, DownloadError, VersionError};
use crate::infra::browser::BrowserRequest;
use crate::infra::filesystem;
use crate::infra::github::ReleaseSelection;
use crate::infra::scratch::ScratchDir;

/// Suffixes removed from file names before a `re:` match
const ARCHIVE_SUFFIXES: &[&str] = &[".tar", ".gz", ".tgz", ".bz2", ".tbz2"];

/// A file downloaded while resolving the version
#[derive(Debug)]
pub struct Prefetched {
    pub file: PathBuf,
    pub dir: ScratchDir,
}

/// Outcome of version resolution
#[derive(Debug)]
pub struct Resolution {
    pub version: String,
    /// Release chosen by a `gh:` version or `DOWNLOAD_GH`
    pub release: Option<ReleaseSelection>,
    /// Remote file name learned while resolving
    pub remote_name: Option<String>,
    pub prefetched: Option<Prefetched>,
}

impl Resolution {
    /// A version known without any lookup
    pub fn literal(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            release: None,
            remote_name: None,
            prefetched: None,
        }
    }
}

/// Version from a file name using a `re:` pattern
///
/// Archive suffixes are dropped first and the match is anchored at the
/// start of the name.
pub fn version_from_file_name(pattern: &str, file_name: &str) -> Result<String, VersionError> {
    let mut name = file_name.to_string();
    for suffix in ARCHIVE_SUFFIXES {
        name = name.replace(suffix, "");
    }

    let regex = Regex::new(&format!("^(?:{pattern})")).map_err(|e| VersionError::InvalidPattern {
        pattern: pattern.to_string(),
        error: e.to_string(),
    })?;
    let captures = regex.captures(&name).ok_or_else(|| VersionError::NoMatch {
        pattern: pattern.to_string(),
        filename: file_name.to_string(),
    })?;
    let version = captures
        .get(1)
        .ok_or_else(|| VersionError::MissingGroup {
            pattern: pattern.to_string(),
        })?
        .as_str();
    if version.is_empty() {
        return Err(VersionError::Empty {
            source_text: file_name.to_string(),
        });
    }
    Ok(version.to_string())
}

/// Order two version strings
///
/// `latest` ranks above everything. Semantic versions compare as such;
/// anything else falls back to comparing numeric runs, then text.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (a == "latest", b == "latest") {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Greater,
        (false, true) => return Ordering::Less,
        _ => {}
    }
    if let (Ok(va), Ok(vb)) = (Version::parse(a), Version::parse(b)) {
        return va.cmp(&vb);
    }
    let numbers = |s: &str| -> Vec<u64> {
        s.split(|c: char| !c.is_ascii_digit())
            .filter(|p| !p.is_empty())
            .filter_map(|p| p.parse().ok())
            .collect()
    };
    numbers(a).cmp(&numbers(b)).then_with(|| a.cmp(b))
}

/// Resolve the version of `definition`
pub async fn resolve(
    services: &BuildServices,
    definition: &PackageDefinition,
) -> Result<Resolution, BuildError> {
    let download = definition.download();

    // DOWNLOAD_GH drives the lookup whether or not VERSION gh: is present
    if let Some(Command::DownloadGh { repo, pattern, tag }) = download {
        let selection = services
            .releases
            .resolve(repo, Some(pattern), tag.as_deref())
            .await?;
        return from_release(selection);
    }

    match &definition.version {
        Some(VersionSpec::Literal(version)) => Ok(Resolution::literal(version)),
        Some(VersionSpec::GitHub { repo, pattern }) => {
            let selection = services
                .releases
                .resolve(repo, pattern.as_deref(), None)
                .await
                .map_err(VersionError::from)?;
            from_release(selection)
        }
        Some(VersionSpec::Regex(pattern)) => from_remote_name(services, definition, pattern).await,
        None => Err(VersionError::Empty {
            source_text: definition.name.clone(),
        }
        .into()),
    }
}

fn from_release(selection: ReleaseSelection) -> Result<Resolution, BuildError> {
    if selection.version.is_empty() {
        return Err(VersionError::Empty {
            source_text: selection.tag,
        }
        .into());
    }
    tracing::info!("Found release {} of {}", selection.version, selection.repo);
    Ok(Resolution {
        version: selection.version.clone(),
        remote_name: selection.asset.as_ref().map(|a| a.name.clone()),
        release: Some(selection),
        prefetched: None,
    })
}

async fn from_remote_name(
    services: &BuildServices,
    definition: &PackageDefinition,
    pattern: &str,
) -> Result<Resolution, BuildError> {
    let scope = services.base_scope(definition);

    let (remote_name, prefetched) = match definition.download() {
        Some(Command::DownloadRemoteName { url }) => {
            let url = scope.substitute(url);
            (services.downloads.remote_name(&url).await?, None)
        }
        Some(Command::DownloadBrowser { spec }) => {
            let request = BrowserRequest::parse(&scope.substitute(spec));
            let dir = ScratchDir::new_in(services.layout.root(), ".prefetch-")?;
            let file = services.browser.fetch(&request, dir.path()).await?;
            (filesystem::file_name(&file), Some(Prefetched { file, dir }))
        }
        _ => {
            return Err(DownloadError::InvalidFileName {
                name: definition.name.clone(),
            }
            .into())
        }
    };

    let version = version_from_file_name(pattern, &remote_name)?;
    tracing::info!("Found version {} from {}", version, remote_name);
    Ok(Resolution {
        version,
        release: None,
        remote_name: Some(remote_name),
        prefetched,
    })
}
