//! Chocolatey packager

use std::path::{Path, PathBuf};

use crate::core::context::BuildContext;
use crate::core::debian::publish;
use crate::core::layout::Ecosystem;
use crate::core::settings::Settings;
use crate::error::{BuildError, FilesystemError, PackagingError};
use crate::infra::filesystem;
use crate::infra::process::{self, ProcessSpec};
use crate::infra::scratch::ScratchDir;

/// Program and leading arguments used to run `choco`
///
/// An explicit setting wins, then `choco` on PATH, then the conda-packaged
/// `choco.exe` under mono.
pub fn choco_command(settings: &Settings) -> Result<Vec<String>, PackagingError> {
    if let Some(command) = &settings.choco.command {
        let parts: Vec<String> = command.split_whitespace().map(str::to_string).collect();
        if !parts.is_empty() {
            return Ok(parts);
        }
    }
    if process::is_available("choco") {
        return Ok(vec!["choco".to_string()]);
    }
    let prefix = std::env::var("CONDA_PREFIX").map_err(|_| PackagingError::Invalid {
        message: "choco not found: not on PATH and CONDA_PREFIX is unset".to_string(),
    })?;
    Ok(vec![
        "mono".to_string(),
        format!("{prefix}/opt/chocolatey/choco.exe"),
    ])
}

/// Move the single payload to `public/data/choco` and set `$CHOCO_FILE`
///
/// Returns whether there was a payload.
fn place_payload(ctx: &mut BuildContext<'_>) -> Result<bool, BuildError> {
    let mut files = filesystem::list_dir(ctx.wd())?;
    let file = match files.len() {
        0 => return Ok(false),
        1 => files.remove(0),
        n => {
            return Err(PackagingError::Invalid {
                message: format!("{n} payload files in the working directory, expected at most one"),
            }
            .into())
        }
    };

    let data = ctx.services.layout.data(Ecosystem::Choco);
    let target = data.join(format!("{}|{}", ctx.stem(), filesystem::file_name(&file)));
    if std::fs::symlink_metadata(&target).is_ok() {
        return Err(PackagingError::Invalid {
            message: format!("{} already exists", target.display()),
        }
        .into());
    }

    if file.is_symlink() {
        let resolved = std::fs::canonicalize(&file).map_err(|e| FilesystemError::ReadFile {
            path: file.clone(),
            error: e.to_string(),
        })?;
        filesystem::symlink(&resolved, &target)?;
    } else {
        publish(&file, &target)?;
    }

    if let Some(url) = ctx.services.public_url(&target) {
        ctx.scope.set_builtin("CHOCO_FILE", url);
    }
    Ok(true)
}

/// Substituted nuspec and tools, written next to the payload
fn write_sources(ctx: &BuildContext<'_>, pkg: &Path, has_payload: bool) -> Result<PathBuf, BuildError> {
    let name = &ctx.definition.name;
    let nuspec = ctx.wd().join(format!("{name}.nuspec"));
    let text = filesystem::read_file(&pkg.join(format!("{name}.nuspec")))?;
    filesystem::write_file(&nuspec, ctx.substitute(&text))?;

    let tools = ctx.wd().join("tools");
    filesystem::create_dir_all(&tools)?;
    for file in filesystem::list_dir(&pkg.join("tools"))? {
        let target = tools.join(filesystem::file_name(&file));
        if file.extension().is_some_and(|e| e == "ps1") {
            let text = filesystem::read_file(&file)?;
            if text.contains("$CHOCO_FILE") && !has_payload {
                return Err(PackagingError::Invalid {
                    message: format!(
                        "{} uses $CHOCO_FILE but there is no payload",
                        filesystem::file_name(&file)
                    ),
                }
                .into());
            }
            filesystem::write_file(&target, ctx.substitute(&text))?;
        } else if file.is_dir() {
            filesystem::copy_dir(&file, &target)?;
        } else {
            filesystem::copy_file(&file, &target)?;
        }
    }
    Ok(nuspec)
}

/// `CHOCO`: pack the package and publish `pkgs/choco/<stem>.nupkg`
pub async fn build(ctx: &mut BuildContext<'_>) -> Result<(), BuildError> {
    let pkg = ctx
        .definition
        .pkg_dir
        .clone()
        .ok_or_else(|| PackagingError::Invalid {
            message: "CHOCO needs a package directory".to_string(),
        })?;

    let has_payload = place_payload(ctx)?;
    let nuspec = write_sources(ctx, &pkg, has_payload)?;

    let command = choco_command(&ctx.services.settings)?;
    let (program, leading) = command.split_first().ok_or_else(|| PackagingError::Invalid {
        message: "empty choco command".to_string(),
    })?;

    let out = ScratchDir::new_in(ctx.services.layout.root(), ".pack-")?;
    ProcessSpec::new(program.clone())
        .args(leading.iter().cloned())
        .args(["pack".to_string(), "--allow-unofficial".to_string()])
        .arg(nuspec.to_string_lossy())
        .current_dir(out.path())
        .timeout(ctx.services.settings.process_timeout())
        .run()
        .await
        .map_err(PackagingError::from)?;

    let nupkg = filesystem::glob_in(out.path(), "*.nupkg")?
        .into_iter()
        .next()
        .ok_or_else(|| PackagingError::ArtifactMissing {
            dir: out.path().to_path_buf(),
            pattern: "*.nupkg".to_string(),
        })?;
    let target = ctx
        .services
        .layout
        .final_artifact(Ecosystem::Choco, ctx.stem());
    let published = publish(&nupkg, &target)?;
    out.close()?;
    ctx.set_file(published);
    Ok(())
}
