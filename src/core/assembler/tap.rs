//! Homebrew tap: casks committed into a bare git repository

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::AssemblyError;
use crate::core::layout::parse_stem_file;
use crate::core::version::compare_versions;
use crate::infra::filesystem;
use crate::infra::git::{TapRepository, TreeFile};

const CASKS_DIR: &str = "Casks";

/// Highest version of each cask name, as `(name, version, path)`
pub fn select_casks(casks: &[PathBuf]) -> Result<Vec<(String, String, PathBuf)>, AssemblyError> {
    let mut best: BTreeMap<String, (String, PathBuf)> = BTreeMap::new();
    for path in casks {
        let (name, version, _) = parse_stem_file(path)
            .map_err(|_| AssemblyError::UnexpectedFile { path: path.clone() })?;
        match best.get(&name) {
            Some((current, _)) if compare_versions(&version, current) != Ordering::Greater => {
                tracing::debug!("Skipping {name} {version}: {current} is newer");
            }
            _ => {
                best.insert(name, (version, path.clone()));
            }
        }
    }
    Ok(best
        .into_iter()
        .map(|(name, (version, path))| (name, version, path))
        .collect())
}

pub(super) fn assemble(tap: &Path, casks: &[PathBuf]) -> Result<(), AssemblyError> {
    let repo = TapRepository::open_or_init(tap)?;

    let mut files = Vec::new();
    for (name, _, path) in select_casks(casks)? {
        files.push(TreeFile {
            name: format!("{name}.rb"),
            content: filesystem::read_bytes(&path)?,
        });
    }
    if files.is_empty() {
        tracing::warn!("No casks to publish");
        files.push(TreeFile {
            name: ".empty".to_string(),
            content: b"No Cask files found.".to_vec(),
        });
    }

    repo.commit_files(CASKS_DIR, &files, "Update casks")?;
    repo.update_server_info()?;
    Ok(())
}
