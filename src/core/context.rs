//! Per-build state
//!
//! [`BuildServices`] is shared by every worker of a build pass and only read.
//! [`BuildContext`] belongs to exactly one package build: it carries the
//! working directory, the variable scope and the last produced file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::debian::DebianBuild;
use crate::core::definition::PackageDefinition;
use crate::core::layout::{self, PackageKind, RepositoryLayout};
use crate::core::scope::VariableScope;
use crate::core::settings::Settings;
use crate::core::version::Resolution;
use crate::error::FilesystemError;
use crate::infra::browser::BrowserFetcher;
use crate::infra::download::DownloadManager;
use crate::infra::filesystem;
use crate::infra::github::ReleaseSelection;
use crate::infra::scratch::ScratchDir;

/// Read-only collaborators shared across package builds
pub struct BuildServices {
    pub layout: RepositoryLayout,
    pub settings: Settings,
    pub downloads: DownloadManager,
    pub releases: crate::infra::github::ReleaseClient,
    pub browser: Arc<dyn BrowserFetcher>,
    /// Public base URL, without trailing slash
    pub domain: String,
    /// `base64(user:password)`, when credentials were given
    pub authorization: Option<String>,
}

impl std::fmt::Debug for BuildServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildServices")
            .field("layout", &self.layout)
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}

impl BuildServices {
    /// Scope known before the version is resolved
    pub fn base_scope(&self, definition: &PackageDefinition) -> VariableScope {
        let mut scope = VariableScope::new();
        scope.set_builtin("NAME", &definition.name);
        scope.set_builtin("REPO", self.layout.root().to_string_lossy());
        scope.set_builtin("DOMAIN", &self.domain);
        scope.set_builtin("MGR", definition.ecosystem.as_str());
        if let Some(pkg) = &definition.pkg_dir {
            scope.set_builtin("PKG", pkg.to_string_lossy());
        }
        if let Some(auth) = &self.authorization {
            scope.set_builtin("AUTHORIZATION", auth);
        }
        scope
    }

    /// `{domain}/{quoted path relative to public/}`
    pub fn public_url(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(self.layout.public()).ok()?;
        Some(format!(
            "{}/{}",
            self.domain,
            crate::infra::download::percent_quote(&rel.to_string_lossy())
        ))
    }
}

/// Where the commands of a package run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// `pkgs/apt`; downloads are named after the stem
    AptPool,
    /// `public/data/brew`; files are prefixed with `stem|`
    BrewData,
    /// Private temporary directory
    Temp,
    /// Debian sandbox
    Sandbox,
}

impl Placement {
    /// Temporary places use remote names as they are
    pub fn is_temporary(self) -> bool {
        matches!(self, Self::Temp | Self::Sandbox)
    }
}

/// Mutable state of one package build
#[derive(Debug)]
pub struct BuildContext<'a> {
    pub services: &'a BuildServices,
    pub definition: &'a PackageDefinition,
    pub scope: VariableScope,
    /// Resolved once, never changed
    version: String,
    stem: String,
    wd: PathBuf,
    placement: Placement,
    /// Last produced file (`$FILE`)
    pub file: Option<PathBuf>,
    /// Remote name of the last download
    pub remote_name: Option<String>,
    pub release: Option<ReleaseSelection>,
    /// File fetched while resolving the version
    pub prefetched: Option<PathBuf>,
    pub debian: DebianBuild,
    /// Keeps the version resolver's download alive
    _prefetch_dir: Option<ScratchDir>,
    /// Private temp dir of conda and choco builds
    temp: Option<ScratchDir>,
}

impl<'a> BuildContext<'a> {
    /// Set up the working directory for `definition`
    pub fn new(
        services: &'a BuildServices,
        definition: &'a PackageDefinition,
        resolution: Resolution,
    ) -> Result<Self, FilesystemError> {
        let version = resolution.version;
        let stem = layout::stem(&definition.name, &version, definition.ecosystem);
        let root = services.layout.root();

        let mut temp = None;
        let (wd, placement) = match definition.kind {
            PackageKind::DebianWebsite | PackageKind::DebianGitHub => (
                services.layout.pkgs(definition.ecosystem),
                Placement::AptPool,
            ),
            PackageKind::CaskTap => (services.layout.data(definition.ecosystem), Placement::BrewData),
            PackageKind::CondaPackage | PackageKind::ChocoPackage => {
                let dir = ScratchDir::new_in(root, ".build-")?;
                let path = dir.path().to_path_buf();
                temp = Some(dir);
                (path, Placement::Temp)
            }
            // Replaced by the sandbox before the first command runs
            PackageKind::DebianScratch => (
                definition.pkg_dir.clone().unwrap_or_else(|| root.to_path_buf()),
                Placement::Sandbox,
            ),
        };
        filesystem::create_dir_all(&wd)?;

        let mut scope = services.base_scope(definition);
        scope.set_builtin("VERSION", &version);
        scope.set_builtin("STEM", &stem);
        scope.set_builtin("DIR", wd.to_string_lossy());

        let (prefetched, prefetch_dir) = match resolution.prefetched {
            Some(p) => (Some(p.file), Some(p.dir)),
            None => (None, None),
        };

        Ok(Self {
            services,
            definition,
            scope,
            version,
            stem,
            wd,
            placement,
            file: None,
            remote_name: resolution.remote_name,
            release: resolution.release,
            prefetched,
            debian: DebianBuild::default(),
            _prefetch_dir: prefetch_dir,
            temp,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// `name|version|ecosystem`
    pub fn stem(&self) -> &str {
        &self.stem
    }

    /// `name-version`
    pub fn dest_name(&self) -> String {
        format!("{}-{}", self.definition.name, self.version)
    }

    pub fn wd(&self) -> &Path {
        &self.wd
    }

    pub fn placement(&self) -> Placement {
        self.placement
    }

    /// Move the working directory (used when the sandbox opens)
    pub fn set_wd(&mut self, wd: PathBuf) {
        self.scope.set_builtin("DIR", wd.to_string_lossy());
        self.wd = wd;
    }

    /// Record the last produced file
    pub fn set_file(&mut self, path: PathBuf) {
        self.scope.set_builtin("FILE", path.to_string_lossy());
        self.file = Some(path);
    }

    /// Substitute variables in `text`
    pub fn substitute(&self, text: &str) -> String {
        self.scope.substitute(text)
    }

    /// Local name for a fetched file, per placement
    ///
    /// The apt pool uses the stem plus the file's recognised extensions;
    /// the brew data dir prefixes the stem; temporary places keep the name.
    pub fn local_name(&self, remote: &str) -> Option<String> {
        match self.placement {
            Placement::AptPool => {
                let exts = layout::filter_exts(remote)?;
                Some(format!("{}{}", self.stem, exts.concat()))
            }
            Placement::BrewData => Some(format!("{}|{remote}", self.stem)),
            Placement::Temp | Placement::Sandbox => Some(remote.to_string()),
        }
    }

    /// Remove temporary directories, reporting failures
    pub fn finish(mut self) -> Result<(), FilesystemError> {
        let sandbox = self.debian.close_sandbox();
        let temp = self.temp.take().map_or(Ok(()), ScratchDir::close);
        sandbox.and(temp)
    }
}

/// Services over an initialized repository at `root`, without network access
#[cfg(test)]
pub(crate) fn test_services(root: &Path) -> BuildServices {
    let layout = RepositoryLayout::new(root);
    layout.init().unwrap();
    BuildServices {
        layout,
        settings: Settings::default(),
        downloads: DownloadManager::with_config(1, 0),
        releases: crate::infra::github::ReleaseClient::new(None),
        browser: Arc::new(crate::infra::browser::NoBrowser),
        domain: "https://pkgs.example".to_string(),
        authorization: None,
    }
}
