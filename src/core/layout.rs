//! Repository layout
//!
//! Everything reposmith reads or writes lives under one root:
//!
//! ```text
//! <root>/
//! ├── configs/                 package definitions
//! ├── private/                 unserved source blobs
//! ├── pkgs/{apt,brew,conda,choco}/   finished artifacts, named by stem
//! └── public/
//!     ├── data/{brew,choco}/   payloads referenced by casks and nuspecs
//!     ├── debs/  conda/  choco/  tap.git
//! ```
//!
//! Artifacts are named after their *stem*, `name|version|ecosystem`, which is
//! what the up-to-date check and the data cleanup key on.

use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::error::FilesystemError;
use crate::infra::filesystem;

/// Extensions kept when naming downloaded files
pub const ALLOWED_EXTENSIONS: &[&str] = &[
    ".tgz", ".tar.gz", ".tbz2", ".bz2", ".tar", ".gz", ".xz", ".zip", ".7z", ".deb", ".rpm",
    ".exe", ".msi", ".rb", ".nupkg", ".nuspec", ".ps1", ".xml",
];

/// Directories a repository must have, relative to the root
pub const REQUIRED_DIRS: &[&str] = &[
    "configs",
    "private",
    "pkgs",
    "pkgs/apt",
    "pkgs/brew",
    "pkgs/conda",
    "pkgs/choco",
    "public",
    "public/data",
    "public/data/brew",
    "public/data/choco",
];

/// Layout errors
#[derive(Error, Debug)]
pub enum LayoutError {
    /// A required directory is missing
    #[error("'{path}' is not a repository: missing directory '{missing}'")]
    Missing { path: PathBuf, missing: String },

    /// A stem-named file cannot be parsed
    #[error("Malformed artifact name '{path}': {error}")]
    Malformed { path: PathBuf, error: String },

    /// Filesystem failure
    #[error(transparent)]
    Filesystem(#[from] FilesystemError),
}

/// Target package-manager family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Ecosystem {
    Apt,
    Brew,
    Conda,
    Choco,
}

impl Ecosystem {
    /// All ecosystems, in assembly order
    pub const ALL: [Self; 4] = [Self::Apt, Self::Conda, Self::Choco, Self::Brew];

    /// Name used in stems and directory names
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Apt => "apt",
            Self::Brew => "brew",
            Self::Conda => "conda",
            Self::Choco => "choco",
        }
    }

    /// Parse the ecosystem part of a stem
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "apt" => Some(Self::Apt),
            "brew" => Some(Self::Brew),
            "conda" => Some(Self::Conda),
            "choco" => Some(Self::Choco),
            _ => None,
        }
    }

    /// Ecosystem of a definition file extension (without the dot)
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "rep" => Some(Self::Apt),
            "tap" => Some(Self::Brew),
            "conda" => Some(Self::Conda),
            "choco" => Some(Self::Choco),
            _ => None,
        }
    }

    /// Definition file extension
    pub fn extension(self) -> &'static str {
        match self {
            Self::Apt => "rep",
            Self::Brew => "tap",
            Self::Conda => "conda",
            Self::Choco => "choco",
        }
    }
}

impl std::fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a definition is built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageKind {
    /// `.choco` package directory
    ChocoPackage,
    /// `.tap` file producing a cask
    CaskTap,
    /// `.rep` directory built from scratch in a sandbox
    DebianScratch,
    /// `.rep` file fetching a ready `.deb` from a website or the private store
    DebianWebsite,
    /// `.rep` file fetching a ready `.deb` from a GitHub release
    DebianGitHub,
    /// `.conda` package directory
    CondaPackage,
}

impl PackageKind {
    /// Ecosystem this kind publishes to
    pub fn ecosystem(self) -> Ecosystem {
        match self {
            Self::ChocoPackage => Ecosystem::Choco,
            Self::CaskTap => Ecosystem::Brew,
            Self::DebianScratch | Self::DebianWebsite | Self::DebianGitHub => Ecosystem::Apt,
            Self::CondaPackage => Ecosystem::Conda,
        }
    }
}

impl std::fmt::Display for PackageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ChocoPackage => "choco package",
            Self::CaskTap => "cask tap",
            Self::DebianScratch => "debian scratch",
            Self::DebianWebsite => "debian website",
            Self::DebianGitHub => "debian github",
            Self::CondaPackage => "conda package",
        };
        f.write_str(s)
    }
}

/// Artifact stem: `name|version|ecosystem`
pub fn stem(name: &str, version: &str, ecosystem: Ecosystem) -> String {
    format!("{name}|{version}|{ecosystem}")
}

/// Dot-separated suffixes of a file name, e.g. `[".tar", ".gz"]`
///
/// Leading dots are ignored, so `.hidden` has none.
pub fn suffixes(name: &str) -> Vec<String> {
    let trimmed = name.trim_start_matches('.');
    if trimmed.ends_with('.') {
        return Vec::new();
    }
    trimmed
        .split('.')
        .skip(1)
        .map(|s| format!(".{s}"))
        .collect()
}

/// Keep the trailing run of allowed extensions
///
/// Returns `None` when an allowed extension appears before a disallowed one,
/// as in `tool.tar.backup`, since such a name cannot be classified.
pub fn filter_suffixes(suffixes: &[String]) -> Option<Vec<String>> {
    let kept = suffixes
        .iter()
        .rev()
        .take_while(|s| ALLOWED_EXTENSIONS.contains(&s.as_str()))
        .count();
    let (rest, tail) = suffixes.split_at(suffixes.len() - kept);
    if rest.iter().any(|s| ALLOWED_EXTENSIONS.contains(&s.as_str())) {
        return None;
    }
    Some(tail.to_vec())
}

/// [`filter_suffixes`] applied to a file name
pub fn filter_exts(name: &str) -> Option<Vec<String>> {
    filter_suffixes(&suffixes(name))
}

/// `(name, version, ecosystem)` encoded in a stem-named file
pub fn parse_stem_file(path: &Path) -> Result<(String, String, Ecosystem), LayoutError> {
    let name = filesystem::file_name(path);
    let malformed = |error: &str| LayoutError::Malformed {
        path: path.to_path_buf(),
        error: error.to_string(),
    };

    let exts = filter_exts(&name).ok_or_else(|| malformed("unclassifiable extension"))?;
    let mut parts = name.splitn(4, '|');
    let (Some(pkg), Some(version), Some(eco)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(malformed("expected name|version|ecosystem"));
    };

    let ext = exts.concat();
    let eco = eco.strip_suffix(ext.as_str()).unwrap_or(eco);
    let ecosystem =
        Ecosystem::parse(eco).ok_or_else(|| malformed(&format!("unknown ecosystem '{eco}'")))?;
    Ok((pkg.to_string(), version.to_string(), ecosystem))
}

/// The on-disk repository
#[derive(Debug, Clone)]
pub struct RepositoryLayout {
    root: PathBuf,
}

impl RepositoryLayout {
    /// Wrap a repository root
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Repository root
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn configs(&self) -> PathBuf {
        self.root.join("configs")
    }

    pub fn private(&self) -> PathBuf {
        self.root.join("private")
    }

    pub fn public(&self) -> PathBuf {
        self.root.join("public")
    }

    /// Artifact store of one ecosystem
    pub fn pkgs(&self, ecosystem: Ecosystem) -> PathBuf {
        self.root.join("pkgs").join(ecosystem.as_str())
    }

    /// Served payload directory of one ecosystem
    pub fn data(&self, ecosystem: Ecosystem) -> PathBuf {
        self.public().join("data").join(ecosystem.as_str())
    }

    /// Served index directory of one ecosystem
    pub fn index_dir(&self, ecosystem: Ecosystem) -> PathBuf {
        match ecosystem {
            Ecosystem::Apt => self.public().join("debs"),
            Ecosystem::Conda => self.public().join("conda"),
            Ecosystem::Choco => self.public().join("choco"),
            Ecosystem::Brew => self.public().join("tap.git"),
        }
    }

    /// Directory is missing or holds nothing
    pub fn is_empty(&self) -> bool {
        std::fs::read_dir(&self.root).map_or(true, |mut d| d.next().is_none())
    }

    /// Create every required directory
    pub fn init(&self) -> Result<(), LayoutError> {
        for dir in REQUIRED_DIRS {
            filesystem::create_dir_all(&self.root.join(dir))?;
        }
        tracing::info!("Initialized repository at {}", self.root.display());
        Ok(())
    }

    /// Check that every required directory exists
    pub fn verify(&self) -> Result<(), LayoutError> {
        for dir in REQUIRED_DIRS {
            if !self.root.join(dir).is_dir() {
                return Err(LayoutError::Missing {
                    path: self.root.clone(),
                    missing: (*dir).to_string(),
                });
            }
        }
        Ok(())
    }

    /// Initialize an empty root, verify a populated one
    pub fn prepare(&self) -> Result<(), LayoutError> {
        if self.is_empty() {
            self.init()
        } else {
            self.verify()
        }
    }

    /// Final artifact path of a stem (apt artifacts are matched by prefix)
    pub fn final_artifact(&self, ecosystem: Ecosystem, stem: &str) -> PathBuf {
        let ext = match ecosystem {
            Ecosystem::Apt => ".deb",
            Ecosystem::Brew => ".rb",
            Ecosystem::Conda => ".tar.bz2",
            Ecosystem::Choco => ".nupkg",
        };
        self.pkgs(ecosystem).join(format!("{stem}{ext}"))
    }

    /// Whether the stem already has its final artifact
    pub fn final_exists(&self, ecosystem: Ecosystem, stem: &str) -> Result<bool, LayoutError> {
        if ecosystem != Ecosystem::Apt {
            let path = self.final_artifact(ecosystem, stem);
            tracing::debug!("Checking {}: {}", path.display(), path.exists());
            return Ok(path.exists());
        }

        let dir = self.pkgs(Ecosystem::Apt);
        if !dir.is_dir() {
            return Ok(false);
        }
        Ok(filesystem::list_dir(&dir)?
            .iter()
            .any(|p| filesystem::file_name(p).starts_with(stem)))
    }

    /// Remove payloads under `public/data` with no matching artifact
    ///
    /// Returns the removed paths.
    pub fn clean_data(&self) -> Result<Vec<PathBuf>, LayoutError> {
        let mut installed = HashSet::new();
        for eco in Ecosystem::ALL {
            for artifact in visible_entries(&self.pkgs(eco))? {
                installed.insert(parse_stem_file(&artifact)?);
            }
        }

        let mut removed = Vec::new();
        for eco in Ecosystem::ALL {
            for payload in visible_entries(&self.data(eco))? {
                if !installed.contains(&parse_stem_file(&payload)?) {
                    tracing::warn!("Removing {}", payload.display());
                    filesystem::remove_path(&payload)?;
                    removed.push(payload);
                }
            }
        }
        Ok(removed)
    }
}

/// Entries of `dir` not starting with a dot; missing dirs are empty
fn visible_entries(dir: &Path) -> Result<Vec<PathBuf>, LayoutError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    Ok(filesystem::list_dir(dir)?
        .into_iter()
        .filter(|p| !filesystem::file_name(p).starts_with('.'))
        .collect())
}
