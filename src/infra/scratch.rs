//! Scratch directories
//!
//! Temporary directories that are removed on drop, unless `TMPDIR_DEBUG` is
//! set, in which case they are kept and their location is logged.

use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::config::defaults;
use crate::error::FilesystemError;

/// A temporary directory with an opt-out for cleanup
#[derive(Debug)]
pub struct ScratchDir {
    dir: Option<TempDir>,
    path: PathBuf,
    keep: bool,
}

impl ScratchDir {
    /// Create a scratch directory in the system temp location
    pub fn new(prefix: &str) -> Result<Self, FilesystemError> {
        Self::build(prefix, None)
    }

    /// Create a scratch directory inside `parent`
    pub fn new_in(parent: &Path, prefix: &str) -> Result<Self, FilesystemError> {
        Self::build(prefix, Some(parent))
    }

    fn build(prefix: &str, parent: Option<&Path>) -> Result<Self, FilesystemError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(prefix);
        let dir = match parent {
            Some(p) => builder.tempdir_in(p),
            None => builder.tempdir(),
        }
        .map_err(|e| FilesystemError::CreateDir {
            path: parent.map_or_else(std::env::temp_dir, Path::to_path_buf),
            error: e.to_string(),
        })?;

        let keep = keep_requested();
        if keep {
            tracing::warn!(
                "Temporary directory created and won't be removed: {}",
                dir.path().display()
            );
        }

        Ok(Self {
            path: dir.path().to_path_buf(),
            dir: Some(dir),
            keep,
        })
    }

    /// Path of the directory
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the directory now, reporting failures
    pub fn close(mut self) -> Result<(), FilesystemError> {
        match self.dir.take() {
            Some(dir) if !self.keep => dir.close().map_err(|e| FilesystemError::Remove {
                path: self.path.clone(),
                error: e.to_string(),
            }),
            Some(dir) => {
                let _ = dir.into_path();
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            if self.keep {
                tracing::warn!("Temporary directory {} not removed", self.path.display());
                let _ = dir.into_path();
            }
        }
    }
}

fn keep_requested() -> bool {
    std::env::var_os(defaults::ENV_KEEP_TEMP).is_some_and(|v| !v.is_empty())
}
