//! Repository assembler
//!
//! Turns the artifact stores under `pkgs/` into the served indexes under
//! `public/`. Each ecosystem remembers the artifacts it last indexed (name,
//! size and modification time) in `.index.list`; when they and the outputs
//! are still there, the run is skipped and nothing under `public/` changes.
//!
//! The apt and conda indexes are generated in a hidden sibling directory and
//! swapped in only once complete, so a failed scan or signature leaves the
//! previous index in place.

mod apt;
mod choco;
mod conda;
mod tap;

pub use apt::{release_file, sort_stanzas, DpkgScanner, PackageScanner};
pub use choco::{app_yaml, packages_json};
pub use tap::select_casks;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use serde::Serialize;

use crate::core::layout::{Ecosystem, RepositoryLayout};
use crate::core::settings::Settings;
use crate::error::{AssemblyError, FilesystemError};
use crate::infra::filesystem;
use crate::infra::gpg::Signer;

/// Name of the artifact list kept next to each index
pub const INDEX_LIST: &str = ".index.list";

/// Result of one assembly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssemblyStatus {
    /// Indexes regenerated
    Rebuilt,
    /// Artifact list unchanged, nothing written
    Unchanged,
}

/// Regenerates per-ecosystem indexes
pub struct Assembler {
    layout: RepositoryLayout,
    settings: Settings,
    signer: Arc<dyn Signer>,
    scanner: Arc<dyn PackageScanner>,
}

impl std::fmt::Debug for Assembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assembler")
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

impl Assembler {
    /// Assembler using `dpkg-scanpackages` for the apt index
    pub fn new(layout: RepositoryLayout, settings: Settings, signer: Arc<dyn Signer>) -> Self {
        let scanner = Arc::new(DpkgScanner::new(settings.process_timeout()));
        Self {
            layout,
            settings,
            signer,
            scanner,
        }
    }

    /// Replace the apt package scanner
    #[must_use]
    pub fn with_scanner(mut self, scanner: Arc<dyn PackageScanner>) -> Self {
        self.scanner = scanner;
        self
    }

    pub fn layout(&self) -> &RepositoryLayout {
        &self.layout
    }

    /// Regenerate the index of one ecosystem
    pub async fn assemble(&self, ecosystem: Ecosystem) -> Result<AssemblyStatus, AssemblyError> {
        let store = self.layout.pkgs(ecosystem);
        let artifacts = artifacts(&store, ecosystem)?;
        let index = self.layout.index_dir(ecosystem);

        if artifacts.is_empty() && !index.join(INDEX_LIST).exists() {
            tracing::debug!("No {ecosystem} artifacts yet");
            return Ok(AssemblyStatus::Unchanged);
        }
        let listing = fingerprint(&artifacts)?;
        if is_current(&index, &listing, output_marker(ecosystem)) {
            tracing::debug!("{ecosystem} index is current");
            return Ok(AssemblyStatus::Unchanged);
        }

        tracing::info!("Assembling {ecosystem} index ({} artifacts)", artifacts.len());
        match ecosystem {
            Ecosystem::Apt | Ecosystem::Conda => {
                let staging = staging_dir(&index);
                filesystem::remove_path(&staging)?;
                let built = self.generate(ecosystem, &staging, &artifacts).await;
                if let Err(e) = built {
                    if let Err(cleanup) = filesystem::remove_path(&staging) {
                        tracing::warn!("{cleanup}");
                    }
                    return Err(e);
                }
                filesystem::write_file(&staging.join(INDEX_LIST), &listing)?;
                swap_in(&staging, &index)?;
            }
            Ecosystem::Brew => {
                tap::assemble(&index, &artifacts)?;
                filesystem::write_file(&index.join(INDEX_LIST), &listing)?;
            }
            Ecosystem::Choco => {
                choco::assemble(&index, &artifacts)?;
                filesystem::write_file(&index.join(INDEX_LIST), &listing)?;
            }
        }
        Ok(AssemblyStatus::Rebuilt)
    }

    /// Generate a complete apt or conda index in `dir`
    async fn generate(
        &self,
        ecosystem: Ecosystem,
        dir: &Path,
        artifacts: &[PathBuf],
    ) -> Result<(), AssemblyError> {
        match ecosystem {
            Ecosystem::Apt => {
                apt::assemble(
                    dir,
                    artifacts,
                    &self.settings,
                    self.scanner.as_ref(),
                    self.signer.as_ref(),
                )
                .await
            }
            _ => conda::assemble(dir, artifacts, &self.settings).await,
        }
    }
}

/// Hidden sibling an index is generated in
fn staging_dir(index: &Path) -> PathBuf {
    index.with_file_name(format!(".staging-{}", filesystem::file_name(index)))
}

/// Replace `index` with the finished `staging` tree
///
/// The old tree is parked under a hidden name until the new one is in
/// place and restored when the second rename fails.
fn swap_in(staging: &Path, index: &Path) -> Result<(), AssemblyError> {
    let previous = index.with_file_name(format!(".previous-{}", filesystem::file_name(index)));
    filesystem::remove_path(&previous)?;
    let parked = index.exists();
    if parked {
        filesystem::rename(index, &previous)?;
    }
    if let Err(e) = filesystem::rename(staging, index) {
        if parked {
            if let Err(restore) = filesystem::rename(&previous, index) {
                tracing::error!("{restore}");
            }
        }
        return Err(e.into());
    }
    filesystem::remove_path(&previous)?;
    Ok(())
}

/// One line per artifact: name, size and modification time in nanoseconds
fn fingerprint(artifacts: &[PathBuf]) -> Result<String, AssemblyError> {
    let mut lines = Vec::with_capacity(artifacts.len());
    for path in artifacts {
        let meta = std::fs::metadata(path).map_err(|e| FilesystemError::ReadFile {
            path: path.clone(),
            error: e.to_string(),
        })?;
        let modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_nanos());
        lines.push(format!(
            "{}\t{}\t{modified}",
            filesystem::file_name(path),
            meta.len()
        ));
    }
    Ok(lines.join("\n"))
}

/// File whose presence means the index was produced
fn output_marker(ecosystem: Ecosystem) -> &'static str {
    match ecosystem {
        Ecosystem::Apt => "dists/stable/Release",
        Ecosystem::Conda => "linux-64/repodata.json",
        Ecosystem::Brew => "HEAD",
        Ecosystem::Choco => "packages.json",
    }
}

fn is_current(index: &Path, listing: &str, marker: &str) -> bool {
    if !index.join(marker).exists() {
        return false;
    }
    std::fs::read_to_string(index.join(INDEX_LIST)).is_ok_and(|list| list == listing)
}

/// Sorted artifacts of a store
///
/// Hidden entries (half-published files) are ignored; anything the
/// ecosystem does not know is an error. Source tarballs left next to
/// `.deb` files are tolerated.
pub fn artifacts(store: &Path, ecosystem: Ecosystem) -> Result<Vec<PathBuf>, AssemblyError> {
    if !store.is_dir() {
        return Ok(Vec::new());
    }
    let mut found = Vec::new();
    for path in filesystem::list_dir(store)? {
        let name = filesystem::file_name(&path);
        if name.starts_with('.') {
            continue;
        }
        let known = match ecosystem {
            Ecosystem::Apt => {
                if name.ends_with(".tar") || name.ends_with(".tar.gz") {
                    continue;
                }
                name.ends_with(".deb")
            }
            Ecosystem::Conda => name.ends_with(".tar.bz2"),
            Ecosystem::Brew => name.ends_with(".rb"),
            Ecosystem::Choco => name.ends_with(".nupkg"),
        };
        if !known {
            return Err(AssemblyError::UnexpectedFile { path });
        }
        found.push(path);
    }
    Ok(found)
}

/// Empty `dir` except hidden entries, creating it if needed
fn reset_dir(dir: &Path, keep_hidden: bool) -> Result<(), AssemblyError> {
    if dir.exists() {
        for entry in filesystem::list_dir(dir)? {
            if keep_hidden && filesystem::file_name(&entry).starts_with('.') {
                continue;
            }
            filesystem::remove_path(&entry)?;
        }
    }
    filesystem::create_dir_all(dir)?;
    Ok(())
}

/// Symlink every artifact into `dir`
fn link_all(artifacts: &[PathBuf], dir: &Path) -> Result<(), AssemblyError> {
    filesystem::create_dir_all(dir)?;
    for artifact in artifacts {
        filesystem::symlink(artifact, &dir.join(filesystem::file_name(artifact)))?;
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::testing::{FakeScanner, FakeSigner};
    use super::*;
    use crate::infra::gpg::SigningError;
    use tempfile::TempDir;

    fn assembler(root: &Path) -> Assembler {
        let layout = RepositoryLayout::new(root);
        layout.init().unwrap();
        Assembler::new(layout, Settings::default(), Arc::new(FakeSigner))
            .with_scanner(Arc::new(FakeScanner))
    }

    // ============================================
    // Artifact stores
    // ============================================

    #[test]
    fn test_artifacts_skip_hidden_and_source_tarballs() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a|1|apt.deb"), "").unwrap();
        std::fs::write(temp.path().join("a|1|apt.tar.gz"), "").unwrap();
        std::fs::write(temp.path().join(".partial-b|1|apt.deb"), "").unwrap();

        let found = artifacts(temp.path(), Ecosystem::Apt).unwrap();
        assert_eq!(found, vec![temp.path().join("a|1|apt.deb")]);
    }

    #[test]
    fn test_unexpected_artifact() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a|1|conda.zip"), "").unwrap();
        assert!(matches!(
            artifacts(temp.path(), Ecosystem::Conda),
            Err(AssemblyError::UnexpectedFile { .. })
        ));
    }

    // ============================================
    // Idempotence
    // ============================================

    #[tokio::test]
    async fn test_apt_rerun_is_skipped_and_byte_identical() {
        let temp = TempDir::new().unwrap();
        let assembler = assembler(temp.path());
        std::fs::write(temp.path().join("pkgs/apt/p|1.0|apt.deb"), "deb").unwrap();

        assert_eq!(
            assembler.assemble(Ecosystem::Apt).await.unwrap(),
            AssemblyStatus::Rebuilt
        );
        let dists = temp.path().join("public/debs/dists/stable");
        let packages = std::fs::read(dists.join("main/binary-amd64/Packages")).unwrap();
        let gz = std::fs::read(dists.join("main/binary-amd64/Packages.gz")).unwrap();
        let release = std::fs::read(dists.join("Release")).unwrap();

        assert_eq!(
            assembler.assemble(Ecosystem::Apt).await.unwrap(),
            AssemblyStatus::Unchanged
        );
        assert_eq!(std::fs::read(dists.join("main/binary-amd64/Packages")).unwrap(), packages);
        assert_eq!(std::fs::read(dists.join("main/binary-amd64/Packages.gz")).unwrap(), gz);
        assert_eq!(std::fs::read(dists.join("Release")).unwrap(), release);
    }

    #[tokio::test]
    async fn test_apt_new_package_is_listed() {
        let temp = TempDir::new().unwrap();
        let assembler = assembler(temp.path());
        std::fs::write(temp.path().join("pkgs/apt/p|1.0|apt.deb"), "deb").unwrap();
        assembler.assemble(Ecosystem::Apt).await.unwrap();

        std::fs::write(temp.path().join("pkgs/apt/q|2.0|apt.deb"), "deb").unwrap();
        assert_eq!(
            assembler.assemble(Ecosystem::Apt).await.unwrap(),
            AssemblyStatus::Rebuilt
        );
        let packages = std::fs::read_to_string(
            temp.path()
                .join("public/debs/dists/stable/main/binary-amd64/Packages"),
        )
        .unwrap();
        assert!(packages.contains("Package: q|2.0|apt.deb"));
        assert!(temp.path().join("public/debs/pool/main/q|2.0|apt.deb").is_symlink());
        assert!(temp.path().join("public/debs/dists/stable/InRelease").is_file());
        assert!(temp.path().join("public/debs/dists/stable/Release.gpg").is_file());
        assert!(temp.path().join("public/debs/pub.gpg").is_file());
    }

    #[tokio::test]
    async fn test_replaced_artifact_triggers_rebuild() {
        let temp = TempDir::new().unwrap();
        let assembler = assembler(temp.path());
        let deb = temp.path().join("pkgs/apt/p|1.0|apt.deb");
        std::fs::write(&deb, "short").unwrap();
        assembler.assemble(Ecosystem::Apt).await.unwrap();

        std::fs::write(&deb, "a longer package under the same name").unwrap();
        assert_eq!(
            assembler.assemble(Ecosystem::Apt).await.unwrap(),
            AssemblyStatus::Rebuilt
        );
        let listing = std::fs::read_to_string(temp.path().join("public/debs").join(INDEX_LIST))
            .unwrap();
        assert!(listing.starts_with("p|1.0|apt.deb\t36\t"));
    }

    /// Signer that always fails
    struct BrokenSigner;

    #[async_trait::async_trait]
    impl Signer for BrokenSigner {
        async fn detach_sign(&self, input: &Path, _output: &Path) -> Result<(), SigningError> {
            Err(SigningError::InvalidKey {
                path: input.to_path_buf(),
                error: "no secret key".to_string(),
            })
        }

        async fn clear_sign(&self, input: &Path, output: &Path) -> Result<(), SigningError> {
            self.detach_sign(input, output).await
        }

        async fn export_public_key(&self, output: &Path) -> Result<(), SigningError> {
            self.detach_sign(output, output).await
        }
    }

    #[tokio::test]
    async fn test_failed_signing_keeps_previous_index() {
        let temp = TempDir::new().unwrap();
        let good = assembler(temp.path());
        std::fs::write(temp.path().join("pkgs/apt/p|1.0|apt.deb"), "deb").unwrap();
        good.assemble(Ecosystem::Apt).await.unwrap();

        std::fs::write(temp.path().join("pkgs/apt/q|2.0|apt.deb"), "deb").unwrap();
        let broken = Assembler::new(
            RepositoryLayout::new(temp.path()),
            Settings::default(),
            Arc::new(BrokenSigner),
        )
        .with_scanner(Arc::new(FakeScanner));
        assert!(matches!(
            broken.assemble(Ecosystem::Apt).await,
            Err(AssemblyError::Signing(_))
        ));

        let debs = temp.path().join("public/debs");
        let dist = debs.join("dists/stable");
        assert!(dist.join("Release.gpg").is_file());
        assert!(dist.join("InRelease").is_file());
        let packages =
            std::fs::read_to_string(dist.join("main/binary-amd64/Packages")).unwrap();
        assert!(packages.contains("p|1.0|apt.deb"));
        assert!(!packages.contains("q|2.0|apt.deb"));
        assert!(!temp.path().join("public/.staging-debs").exists());

        // The next good run picks the new package up
        assert_eq!(
            good.assemble(Ecosystem::Apt).await.unwrap(),
            AssemblyStatus::Rebuilt
        );
        assert!(debs.join("pool/main/q|2.0|apt.deb").is_symlink());
        assert!(!temp.path().join("public/.previous-debs").exists());
    }

    #[tokio::test]
    async fn test_choco_feed_keeps_hidden_state() {
        let temp = TempDir::new().unwrap();
        let assembler = assembler(temp.path());
        std::fs::write(temp.path().join("pkgs/choco/app|3.0|choco.nupkg"), "nupkg").unwrap();
        std::fs::create_dir_all(temp.path().join("public/choco")).unwrap();
        std::fs::write(temp.path().join("public/choco/.server.pid"), "42").unwrap();
        std::fs::write(temp.path().join("public/choco/stale.nupkg"), "").unwrap();

        assembler.assemble(Ecosystem::Choco).await.unwrap();
        let feed = temp.path().join("public/choco");
        assert!(feed.join("app|3.0|choco.nupkg").is_symlink());
        assert!(!feed.join("stale.nupkg").exists());
        assert_eq!(std::fs::read_to_string(feed.join(".server.pid")).unwrap(), "42");
        assert!(feed.join("app.yaml").is_file());
        assert!(feed.join("packages.json").is_file());
    }

    #[tokio::test]
    async fn test_tap_commits_once_per_change() {
        let temp = TempDir::new().unwrap();
        let assembler = assembler(temp.path());
        std::fs::write(temp.path().join("pkgs/brew/tool|1.0|brew.rb"), "cask 1").unwrap();
        assembler.assemble(Ecosystem::Brew).await.unwrap();

        std::fs::write(temp.path().join("pkgs/brew/tool|2.0|brew.rb"), "cask 2").unwrap();
        assembler.assemble(Ecosystem::Brew).await.unwrap();
        assert_eq!(
            assembler.assemble(Ecosystem::Brew).await.unwrap(),
            AssemblyStatus::Unchanged
        );

        let repo =
            crate::infra::git::TapRepository::open_or_init(&temp.path().join("public/tap.git"))
                .unwrap();
        assert_eq!(repo.history_len().unwrap(), 2);
        assert_eq!(
            repo.read_head_file("Casks", "tool.rb").unwrap().as_deref(),
            Some(b"cask 2".as_slice())
        );
    }
}
