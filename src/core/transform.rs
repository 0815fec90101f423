//! File transform primitives
//!
//! `EXTRACT`, `MKDIR`, `RENAME`, `REMOVE` and the `COPY` family. Paths are
//! substituted first and resolved against the working directory; they may
//! not climb out of it. Sources may also be absolute paths inside the
//! package directory (`$PKG/...`).

use std::path::{Component, Path, PathBuf};

use crate::core::context::BuildContext;
use crate::core::definition::Command;
use crate::error::{ArchiveError, BuildError, DefinitionError, FilesystemError};
use crate::infra::archive::{self, ArchiveFormat};
use crate::infra::filesystem;
use crate::infra::scratch::ScratchDir;

/// Run one transform command
pub async fn run(ctx: &mut BuildContext<'_>, command: &Command) -> Result<(), BuildError> {
    match command {
        Command::Extract { glob } => extract(ctx, glob.as_deref()).await,
        Command::Mkdir { path } => {
            let dir = target_path(ctx, path)?;
            filesystem::create_dir_all(&dir)?;
            Ok(())
        }
        Command::Rename { path } => rename(ctx, path),
        Command::Remove { path } => {
            let target = target_path(ctx, path)?;
            if !target.exists() && std::fs::symlink_metadata(&target).is_err() {
                tracing::warn!("REMOVE: {} does not exist", target.display());
            }
            filesystem::remove_path(&target)?;
            Ok(())
        }
        Command::Copy { src, dst } => {
            let (src, dst) = (source_path(ctx, src)?, target_path(ctx, dst)?);
            filesystem::copy_file(&src, &dst)?;
            Ok(())
        }
        Command::CopyFix { src, dst } => copy_fix(ctx, src, dst),
        Command::CopyDir { src, dst } => {
            let (src, dst) = (source_path(ctx, src)?, target_path(ctx, dst)?);
            if !src.is_dir() {
                return Err(FilesystemError::Contents {
                    path: src,
                    error: "COPY_DIR source is not a directory".to_string(),
                }
                .into());
            }
            filesystem::copy_dir(&src, &dst)?;
            Ok(())
        }
        Command::CopyGlob { src_dir, glob, dst } => copy_glob(ctx, src_dir.as_deref(), glob, dst),
        other => Err(DefinitionError::Invalid {
            message: format!("{} is not a file transform", other.name()),
        }
        .into()),
    }
}

/// Relative path below `base`, rejecting anything that climbs out
fn confined(base: &Path, rel: &Path, raw: &str) -> Result<PathBuf, DefinitionError> {
    if rel
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
    {
        return Err(DefinitionError::Invalid {
            message: format!("path '{raw}' leaves the working directory"),
        });
    }
    Ok(base.join(rel))
}

/// Destination inside the working directory
fn target_path(ctx: &BuildContext<'_>, raw: &str) -> Result<PathBuf, BuildError> {
    let text = ctx.substitute(raw);
    let path = Path::new(&text);
    if let Ok(rel) = path.strip_prefix(ctx.wd()) {
        return Ok(confined(ctx.wd(), rel, raw)?);
    }
    Ok(confined(ctx.wd(), path, raw)?)
}

/// Source inside the working directory or the package directory
fn source_path(ctx: &BuildContext<'_>, raw: &str) -> Result<PathBuf, BuildError> {
    let text = ctx.substitute(raw);
    let path = Path::new(&text);
    if let Some(pkg) = &ctx.definition.pkg_dir {
        if let Ok(rel) = path.strip_prefix(pkg) {
            return Ok(confined(pkg, rel, raw)?);
        }
    }
    target_path(ctx, raw)
}

/// Unpack archives into the working directory
///
/// Entries land through a staging directory so the new names are known.
/// Outside temporary places they are prefixed with the stem and the
/// archive stays; in temporary places the archive is deleted.
async fn extract(ctx: &mut BuildContext<'_>, glob: Option<&str>) -> Result<(), BuildError> {
    let archives = match glob {
        Some(pattern) => {
            let pattern = ctx.substitute(pattern);
            let found = filesystem::glob_in(ctx.wd(), &pattern)?;
            if found.is_empty() {
                return Err(FilesystemError::Contents {
                    path: ctx.wd().to_path_buf(),
                    error: format!("no file matches '{pattern}'"),
                }
                .into());
            }
            found
        }
        None => match &ctx.file {
            Some(file) if file.exists() => vec![file.clone()],
            _ => vec![filesystem::single_entry(ctx.wd())?],
        },
    };

    let temporary = ctx.placement().is_temporary();
    let mut produced = Vec::new();
    for archive_path in archives {
        if ArchiveFormat::detect(&filesystem::file_name(&archive_path)).is_none() {
            return Err(ArchiveError::Unsupported { path: archive_path }.into());
        }

        let staging = ScratchDir::new_in(ctx.services.layout.root(), ".extract-")?;
        archive::extract(&archive_path, staging.path()).await?;

        for entry in filesystem::list_dir(staging.path())? {
            let name = filesystem::file_name(&entry);
            let target = if temporary {
                ctx.wd().join(&name)
            } else {
                ctx.wd().join(format!("{}|{name}", ctx.stem()))
            };
            filesystem::remove_path(&target)?;
            filesystem::rename(&entry, &target)?;
            produced.push(target);
        }
        staging.close()?;

        if temporary {
            filesystem::remove_path(&archive_path)?;
        }
        tracing::debug!("Extracted {}", archive_path.display());
    }

    if let [only] = produced.as_slice() {
        ctx.set_file(only.clone());
    }
    Ok(())
}

/// Move the single top-level entry of the working directory
fn rename(ctx: &mut BuildContext<'_>, raw: &str) -> Result<(), BuildError> {
    let entry = filesystem::single_entry(ctx.wd())?;
    let target = target_path(ctx, raw)?;
    if entry == target {
        return Ok(());
    }
    if target.starts_with(&entry) {
        // Moving a directory into itself: go through a sibling first
        let tmp = ctx.wd().join(format!(".rename-{}", filesystem::file_name(&entry)));
        filesystem::rename(&entry, &tmp)?;
        filesystem::rename(&tmp, &target)?;
    } else {
        filesystem::rename(&entry, &target)?;
    }
    if ctx.file.as_deref() == Some(entry.as_path()) {
        ctx.set_file(target);
    }
    Ok(())
}

/// Copy with variable substitution; binary files are copied unchanged
fn copy_fix(ctx: &BuildContext<'_>, src: &str, dst: &str) -> Result<(), BuildError> {
    let (src, dst) = (source_path(ctx, src)?, target_path(ctx, dst)?);
    let bytes = filesystem::read_bytes(&src)?;
    let target = if dst.is_dir() {
        dst.join(filesystem::file_name(&src))
    } else {
        dst
    };

    match std::str::from_utf8(&bytes) {
        Ok(text) if !text.contains('\0') => {
            filesystem::write_file(&target, ctx.substitute(text))?;
        }
        _ => {
            tracing::debug!("{} is binary, copying unchanged", src.display());
            filesystem::copy_file(&src, &target)?;
        }
    }
    Ok(())
}

fn copy_glob(
    ctx: &BuildContext<'_>,
    src_dir: Option<&str>,
    glob: &str,
    dst: &str,
) -> Result<(), BuildError> {
    let dir = match src_dir {
        Some(raw) => source_path(ctx, raw)?,
        None => ctx.wd().to_path_buf(),
    };
    let pattern = ctx.substitute(glob);
    let matches = filesystem::glob_in(&dir, &pattern)?;
    if matches.is_empty() {
        return Err(FilesystemError::Contents {
            path: dir,
            error: format!("no entry matches '{pattern}'"),
        }
        .into());
    }

    let dst = target_path(ctx, dst)?;
    filesystem::create_dir_all(&dst)?;
    for entry in matches {
        if entry.is_dir() {
            filesystem::copy_dir(&entry, &dst.join(filesystem::file_name(&entry)))?;
        } else {
            filesystem::copy_file(&entry, &dst)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::{test_services, BuildServices};
    use crate::core::definition::{PackageDefinition, VersionSpec};
    use crate::core::layout::{Ecosystem, PackageKind};
    use crate::core::version::Resolution;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::TempDir;

    fn conda_definition(pkg_dir: &Path) -> PackageDefinition {
        PackageDefinition {
            name: "lib".to_string(),
            ecosystem: Ecosystem::Conda,
            kind: PackageKind::CondaPackage,
            path: pkg_dir.join("lib.conda"),
            pkg_dir: Some(pkg_dir.to_path_buf()),
            version: Some(VersionSpec::Literal("1.0".to_string())),
            commands: Vec::new(),
            sandboxed: false,
        }
    }

    fn tap_definition() -> PackageDefinition {
        PackageDefinition {
            name: "tool".to_string(),
            ecosystem: Ecosystem::Brew,
            kind: PackageKind::CaskTap,
            path: PathBuf::from("configs/tool.tap"),
            pkg_dir: None,
            version: Some(VersionSpec::Literal("2".to_string())),
            commands: Vec::new(),
            sandboxed: false,
        }
    }

    fn setup(temp: &TempDir) -> (BuildServices, PathBuf) {
        let services = test_services(&temp.path().join("repo"));
        let pkg = temp.path().join("repo/configs/lib.conda");
        std::fs::create_dir_all(pkg.join("recipe")).unwrap();
        std::fs::write(pkg.join("recipe/meta.yaml"), "version: $VERSION\n").unwrap();
        (services, pkg)
    }

    fn tar_gz(path: &Path, entries: &[(&str, &[u8])]) {
        let file = std::fs::File::create(path).unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    // ============================================
    // Copies
    // ============================================

    #[tokio::test]
    async fn test_copy_dir_from_package() {
        let temp = TempDir::new().unwrap();
        let (services, pkg) = setup(&temp);
        let def = conda_definition(&pkg);
        let mut ctx = BuildContext::new(&services, &def, Resolution::literal("1.0")).unwrap();

        let cmd = Command::CopyDir {
            src: "$PKG/recipe".to_string(),
            dst: "recipe".to_string(),
        };
        run(&mut ctx, &cmd).await.unwrap();
        assert!(ctx.wd().join("recipe/meta.yaml").is_file());
    }

    #[tokio::test]
    async fn test_copy_fix_substitutes_known_tokens_only() {
        let temp = TempDir::new().unwrap();
        let (services, pkg) = setup(&temp);
        std::fs::write(pkg.join("recipe/build.sh"), "echo $NAME $VERSION $PREFIX\n").unwrap();
        let def = conda_definition(&pkg);
        let mut ctx = BuildContext::new(&services, &def, Resolution::literal("1.0")).unwrap();

        let cmd = Command::CopyFix {
            src: "$PKG/recipe/build.sh".to_string(),
            dst: "build.sh".to_string(),
        };
        run(&mut ctx, &cmd).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(ctx.wd().join("build.sh")).unwrap(),
            "echo lib 1.0 $PREFIX\n"
        );
    }

    #[tokio::test]
    async fn test_copy_fix_leaves_binary_untouched() {
        let temp = TempDir::new().unwrap();
        let (services, pkg) = setup(&temp);
        let blob = b"\x00$NAME\xff\xfe".to_vec();
        std::fs::write(pkg.join("recipe/run_test.sh"), &blob).unwrap();
        let def = conda_definition(&pkg);
        let mut ctx = BuildContext::new(&services, &def, Resolution::literal("1.0")).unwrap();

        let cmd = Command::CopyFix {
            src: "$PKG/recipe/run_test.sh".to_string(),
            dst: "out.bin".to_string(),
        };
        run(&mut ctx, &cmd).await.unwrap();
        assert_eq!(std::fs::read(ctx.wd().join("out.bin")).unwrap(), blob);
    }

    #[tokio::test]
    async fn test_copy_glob_into_directory() {
        let temp = TempDir::new().unwrap();
        let (services, pkg) = setup(&temp);
        let def = conda_definition(&pkg);
        let mut ctx = BuildContext::new(&services, &def, Resolution::literal("1.0")).unwrap();
        std::fs::create_dir_all(ctx.wd().join("build")).unwrap();
        std::fs::write(ctx.wd().join("build/a.so"), "a").unwrap();
        std::fs::write(ctx.wd().join("build/b.so"), "b").unwrap();
        std::fs::write(ctx.wd().join("build/c.txt"), "c").unwrap();

        let cmd = Command::CopyGlob {
            src_dir: Some("build".to_string()),
            glob: "*.so".to_string(),
            dst: "lib".to_string(),
        };
        run(&mut ctx, &cmd).await.unwrap();
        assert!(ctx.wd().join("lib/a.so").is_file());
        assert!(ctx.wd().join("lib/b.so").is_file());
        assert!(!ctx.wd().join("lib/c.txt").exists());
    }

    #[tokio::test]
    async fn test_paths_cannot_escape() {
        let temp = TempDir::new().unwrap();
        let (services, pkg) = setup(&temp);
        let def = conda_definition(&pkg);
        let mut ctx = BuildContext::new(&services, &def, Resolution::literal("1.0")).unwrap();

        let cmd = Command::Mkdir {
            path: "../outside".to_string(),
        };
        assert!(matches!(
            run(&mut ctx, &cmd).await,
            Err(BuildError::Definition(_))
        ));
        let cmd = Command::Remove {
            path: "/etc".to_string(),
        };
        assert!(run(&mut ctx, &cmd).await.is_err());
    }

    // ============================================
    // Layout changes
    // ============================================

    #[tokio::test]
    async fn test_mkdir_is_idempotent_and_rename_moves_single_entry() {
        let temp = TempDir::new().unwrap();
        let (services, pkg) = setup(&temp);
        let def = conda_definition(&pkg);
        let mut ctx = BuildContext::new(&services, &def, Resolution::literal("1.0")).unwrap();

        let mkdir = Command::Mkdir {
            path: "payload".to_string(),
        };
        run(&mut ctx, &mkdir).await.unwrap();
        run(&mut ctx, &mkdir).await.unwrap();

        let rename = Command::Rename {
            path: "$DEST/data".to_string(),
        };
        run(&mut ctx, &rename).await.unwrap();
        assert!(ctx.wd().join("lib-1.0/data").is_dir());
        assert!(!ctx.wd().join("payload").exists());
    }

    #[tokio::test]
    async fn test_rename_requires_single_entry() {
        let temp = TempDir::new().unwrap();
        let (services, pkg) = setup(&temp);
        let def = conda_definition(&pkg);
        let mut ctx = BuildContext::new(&services, &def, Resolution::literal("1.0")).unwrap();
        std::fs::write(ctx.wd().join("a"), "").unwrap();
        std::fs::write(ctx.wd().join("b"), "").unwrap();

        let cmd = Command::Rename {
            path: "c".to_string(),
        };
        assert!(matches!(
            run(&mut ctx, &cmd).await,
            Err(BuildError::Filesystem(FilesystemError::Contents { .. }))
        ));
    }

    // ============================================
    // Extraction
    // ============================================

    #[tokio::test]
    async fn test_extract_in_temp_dir_removes_archive() {
        let temp = TempDir::new().unwrap();
        let (services, pkg) = setup(&temp);
        let def = conda_definition(&pkg);
        let mut ctx = BuildContext::new(&services, &def, Resolution::literal("1.0")).unwrap();
        let archive = ctx.wd().join("lib-1.0.tar.gz");
        tar_gz(&archive, &[("lib-1.0/README", b"hi")]);
        ctx.set_file(archive.clone());

        run(&mut ctx, &Command::Extract { glob: None }).await.unwrap();
        assert!(!archive.exists());
        assert!(ctx.wd().join("lib-1.0/README").is_file());
        assert_eq!(ctx.file.as_deref(), Some(ctx.wd().join("lib-1.0").as_path()));
    }

    #[tokio::test]
    async fn test_extract_in_tap_data_prefixes_entries() {
        let temp = TempDir::new().unwrap();
        let services = test_services(temp.path());
        let def = tap_definition();
        let mut ctx = BuildContext::new(&services, &def, Resolution::literal("2")).unwrap();
        let archive = ctx.wd().join("tool|2|brew|Tool.tar.gz");
        tar_gz(&archive, &[("Tool.app", b"bin")]);
        ctx.set_file(archive.clone());

        run(&mut ctx, &Command::Extract { glob: None }).await.unwrap();
        assert!(archive.exists());
        assert!(ctx.wd().join("tool|2|brew|Tool.app").is_file());
    }

    #[tokio::test]
    async fn test_extract_unknown_format() {
        let temp = TempDir::new().unwrap();
        let (services, pkg) = setup(&temp);
        let def = conda_definition(&pkg);
        let mut ctx = BuildContext::new(&services, &def, Resolution::literal("1.0")).unwrap();
        std::fs::write(ctx.wd().join("lib.rar"), "x").unwrap();

        let err = run(&mut ctx, &Command::Extract { glob: None }).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::FailureKind::UnsupportedArchive);
    }
}
