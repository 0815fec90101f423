//! Filesystem operations
//!
//! Thin wrappers over `std::fs` that attach the offending path to every
//! error.

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::FilesystemError;

/// Create a directory and all parent directories
pub fn create_dir_all(path: &Path) -> Result<(), FilesystemError> {
    std::fs::create_dir_all(path).map_err(|e| FilesystemError::CreateDir {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

/// Remove a file, symlink or directory tree; missing paths are fine
pub fn remove_path(path: &Path) -> Result<(), FilesystemError> {
    let Ok(meta) = std::fs::symlink_metadata(path) else {
        return Ok(());
    };
    let result = if meta.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    result.map_err(|e| FilesystemError::Remove {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

/// Write content to a file, creating parent directories
pub fn write_file(path: &Path, content: impl AsRef<[u8]>) -> Result<(), FilesystemError> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }
    std::fs::write(path, content).map_err(|e| FilesystemError::WriteFile {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

/// Read content from a file
pub fn read_file(path: &Path) -> Result<String, FilesystemError> {
    std::fs::read_to_string(path).map_err(|e| FilesystemError::ReadFile {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

/// Read raw bytes from a file
pub fn read_bytes(path: &Path) -> Result<Vec<u8>, FilesystemError> {
    std::fs::read(path).map_err(|e| FilesystemError::ReadFile {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

/// Copy a single file; a directory target receives the file under its own name
pub fn copy_file(from: &Path, to: &Path) -> Result<PathBuf, FilesystemError> {
    let target = if to.is_dir() {
        match from.file_name() {
            Some(name) => to.join(name),
            None => to.to_path_buf(),
        }
    } else {
        to.to_path_buf()
    };
    if let Some(parent) = target.parent() {
        create_dir_all(parent)?;
    }
    std::fs::copy(from, &target).map_err(|e| FilesystemError::Copy {
        from: from.to_path_buf(),
        to: target.clone(),
        error: e.to_string(),
    })?;
    Ok(target)
}

/// Recursively copy a directory tree, keeping symlinks as symlinks
pub fn copy_dir(from: &Path, to: &Path) -> Result<(), FilesystemError> {
    let copy_err = |e: String| FilesystemError::Copy {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        error: e,
    };

    for entry in WalkDir::new(from).follow_links(false) {
        let entry = entry.map_err(|e| copy_err(e.to_string()))?;
        let rel = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| copy_err(e.to_string()))?;
        let target = to.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            let link = std::fs::read_link(entry.path()).map_err(|e| copy_err(e.to_string()))?;
            symlink(&link, &target)?;
        } else {
            copy_file(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Create a symlink at `link` pointing to `target`
pub fn symlink(target: &Path, link: &Path) -> Result<(), FilesystemError> {
    if let Some(parent) = link.parent() {
        create_dir_all(parent)?;
    }
    #[cfg(unix)]
    let result = std::os::unix::fs::symlink(target, link);
    #[cfg(not(unix))]
    let result = std::fs::copy(target, link).map(|_| ());

    result.map_err(|e| FilesystemError::Symlink {
        link: link.to_path_buf(),
        target: target.to_path_buf(),
        error: e.to_string(),
    })
}

/// Move `from` to `to`, creating the parent of `to`
pub fn rename(from: &Path, to: &Path) -> Result<(), FilesystemError> {
    if let Some(parent) = to.parent() {
        create_dir_all(parent)?;
    }
    std::fs::rename(from, to).map_err(|e| FilesystemError::Rename {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        error: e.to_string(),
    })
}

/// Entries directly inside `dir`, sorted by name
pub fn list_dir(dir: &Path) -> Result<Vec<PathBuf>, FilesystemError> {
    let read = std::fs::read_dir(dir).map_err(|e| FilesystemError::ReadFile {
        path: dir.to_path_buf(),
        error: e.to_string(),
    })?;
    let mut entries = read
        .map(|e| e.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| FilesystemError::ReadFile {
            path: dir.to_path_buf(),
            error: e.to_string(),
        })?;
    entries.sort();
    Ok(entries)
}

/// The one entry inside `dir`; anything else is an error
pub fn single_entry(dir: &Path) -> Result<PathBuf, FilesystemError> {
    let mut entries = list_dir(dir)?;
    if entries.len() != 1 {
        return Err(FilesystemError::Contents {
            path: dir.to_path_buf(),
            error: format!("expected exactly one entry, found {}", entries.len()),
        });
    }
    Ok(entries.remove(0))
}

/// Entries of `dir` whose file name matches a glob, sorted
pub fn glob_in(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>, FilesystemError> {
    let glob = glob::Pattern::new(pattern).map_err(|e| FilesystemError::Contents {
        path: dir.to_path_buf(),
        error: format!("invalid glob '{pattern}': {e}"),
    })?;
    Ok(list_dir(dir)?
        .into_iter()
        .filter(|p| {
            p.file_name()
                .is_some_and(|n| glob.matches(&n.to_string_lossy()))
        })
        .collect())
}

/// Hidden sibling that `path` is staged under until it is complete
pub fn partial_path(path: &Path) -> PathBuf {
    path.with_file_name(format!(".partial-{}", file_name(path)))
}

/// File name of `path` as a `String`
pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
