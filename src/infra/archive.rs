//! Archive extraction
//!
//! The format is detected from the file name. gzip, tar and zip are
//! unpacked in-process; bzip2 and xz tarballs go through the system `tar`.
//! Entries are unpacked as stored (no component stripping) and may not
//! escape the destination directory.

use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tar::Archive;

use crate::error::ArchiveError;
use crate::infra::process::ProcessSpec;

/// Archive formats understood by [`extract`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// `.tar.gz`, `.tgz`
    TarGz,
    /// `.tar.bz2`, `.tbz2`
    TarBz2,
    /// `.tar.xz`, `.txz`
    TarXz,
    /// `.tar`
    Tar,
    /// `.zip`
    Zip,
    /// A single gzip-compressed file
    Gz,
}

impl ArchiveFormat {
    /// Detect the format from a file name
    pub fn detect(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        let format = if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Self::TarGz
        } else if lower.ends_with(".tar.bz2") || lower.ends_with(".tbz2") {
            Self::TarBz2
        } else if lower.ends_with(".tar.xz") || lower.ends_with(".txz") {
            Self::TarXz
        } else if lower.ends_with(".tar") {
            Self::Tar
        } else if lower.ends_with(".zip") {
            Self::Zip
        } else if lower.ends_with(".gz") {
            Self::Gz
        } else {
            return None;
        };
        Some(format)
    }
}

fn io_error(path: &Path) -> impl Fn(std::io::Error) -> ArchiveError + '_ {
    move |e| ArchiveError::IoError {
        path: path.to_path_buf(),
        error: e.to_string(),
    }
}

/// Unpack `archive` into `dest`
pub async fn extract(archive: &Path, dest: &Path) -> Result<(), ArchiveError> {
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let format = ArchiveFormat::detect(&name).ok_or_else(|| ArchiveError::Unsupported {
        path: archive.to_path_buf(),
    })?;

    tokio::fs::create_dir_all(dest)
        .await
        .map_err(io_error(dest))?;

    tracing::debug!("Extracting {} ({:?})", archive.display(), format);

    match format {
        ArchiveFormat::TarBz2 | ArchiveFormat::TarXz => {
            let flag = if format == ArchiveFormat::TarBz2 { "-xjf" } else { "-xJf" };
            ProcessSpec::new("tar")
                .arg(flag)
                .arg(archive.to_string_lossy())
                .arg("-C")
                .arg(dest.to_string_lossy())
                .run()
                .await?;
            Ok(())
        }
        _ => {
            let archive = archive.to_path_buf();
            let dest = dest.to_path_buf();
            let joined = archive.clone();
            tokio::task::spawn_blocking(move || unpack_sync(format, &archive, &dest))
                .await
                .map_err(|e| ArchiveError::IoError {
                    path: joined,
                    error: e.to_string(),
                })?
        }
    }
}

fn unpack_sync(format: ArchiveFormat, archive: &Path, dest: &Path) -> Result<(), ArchiveError> {
    let file = File::open(archive).map_err(io_error(archive))?;
    match format {
        ArchiveFormat::TarGz => unpack_tar(Archive::new(GzDecoder::new(BufReader::new(file))), archive, dest),
        ArchiveFormat::Tar => unpack_tar(Archive::new(BufReader::new(file)), archive, dest),
        ArchiveFormat::Zip => unpack_zip(file, archive, dest),
        ArchiveFormat::Gz => unpack_gz(file, archive, dest),
        ArchiveFormat::TarBz2 | ArchiveFormat::TarXz => Err(ArchiveError::Unsupported {
            path: archive.to_path_buf(),
        }),
    }
}

fn unpack_tar<R: std::io::Read>(
    mut tar: Archive<R>,
    archive: &Path,
    dest: &Path,
) -> Result<(), ArchiveError> {
    tar.set_preserve_permissions(true);
    for entry in tar.entries().map_err(io_error(archive))? {
        let mut entry = entry.map_err(io_error(archive))?;
        // unpack_in refuses entries that would land outside dest
        entry.unpack_in(dest).map_err(io_error(archive))?;
    }
    Ok(())
}

fn unpack_zip(file: File, archive: &Path, dest: &Path) -> Result<(), ArchiveError> {
    let zip_error = |e: zip::result::ZipError| ArchiveError::IoError {
        path: archive.to_path_buf(),
        error: e.to_string(),
    };
    let mut zip = zip::ZipArchive::new(BufReader::new(file)).map_err(zip_error)?;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(zip_error)?;
        let Some(rel) = entry.enclosed_name() else {
            return Err(ArchiveError::IoError {
                path: archive.to_path_buf(),
                error: format!("entry '{}' escapes the destination", entry.name()),
            });
        };
        let out = dest.join(rel);

        if entry.is_dir() {
            fs::create_dir_all(&out).map_err(io_error(&out))?;
            continue;
        }
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }
        let mut outfile = File::create(&out).map_err(io_error(&out))?;
        std::io::copy(&mut entry, &mut outfile).map_err(io_error(&out))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                fs::set_permissions(&out, fs::Permissions::from_mode(mode)).map_err(io_error(&out))?;
            }
        }
    }
    Ok(())
}

fn unpack_gz(file: File, archive: &Path, dest: &Path) -> Result<(), ArchiveError> {
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = &name[..name.len() - ".gz".len()];
    let out: PathBuf = dest.join(stem);
    let mut decoder = GzDecoder::new(BufReader::new(file));
    let mut outfile = File::create(&out).map_err(io_error(&out))?;
    std::io::copy(&mut decoder, &mut outfile).map_err(io_error(archive))?;
    Ok(())
}
