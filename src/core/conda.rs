//! Conda packager
//!
//! The recipe is copied into the build's temp dir, its `meta.yaml` gets
//! the package variables, and `conda-build` produces the archive. The
//! repository's own channel is added when it is already being served, so
//! recipes can depend on packages published earlier.

use std::path::{Path, PathBuf};

use crate::config::urls;
use crate::core::context::BuildContext;
use crate::core::debian::publish;
use crate::core::layout::Ecosystem;
use crate::error::{BuildError, PackagingError};
use crate::infra::filesystem;
use crate::infra::process::ProcessSpec;

/// `conda-build` arguments for a recipe in `wd`
pub fn build_args(extra_channel: Option<&str>) -> Vec<String> {
    let mut args = vec![
        "./recipe".to_string(),
        "-c".to_string(),
        urls::CONDA_FORGE_CHANNEL.to_string(),
    ];
    if let Some(channel) = extra_channel {
        args.push("-c".to_string());
        args.push(channel.to_string());
    }
    args.push("--output-folder".to_string());
    args.push("out".to_string());
    args
}

/// Substitute variables in `recipe/meta.yaml` in place
pub fn prepare_recipe(ctx: &BuildContext<'_>) -> Result<PathBuf, BuildError> {
    let meta = ctx.wd().join("recipe/meta.yaml");
    let text = filesystem::read_file(&meta)?;
    filesystem::write_file(&meta, ctx.substitute(&text))?;
    Ok(meta)
}

/// Built archive in `out/<platform>/`
fn find_archive(out: &Path, name: &str, version: &str) -> Result<PathBuf, BuildError> {
    let pattern = format!("{name}-{version}-*.tar.bz2");
    if out.is_dir() {
        for platform in filesystem::list_dir(out)? {
            if !platform.is_dir() {
                continue;
            }
            if let Some(found) = filesystem::glob_in(&platform, &pattern)?.into_iter().next() {
                return Ok(found);
            }
        }
    }
    Err(PackagingError::ArtifactMissing {
        dir: out.to_path_buf(),
        pattern: format!("*/{pattern}"),
    }
    .into())
}

/// `CONDA_BUILD`: run conda-build and publish `pkgs/conda/<stem>.tar.bz2`
pub async fn build(ctx: &mut BuildContext<'_>) -> Result<(), BuildError> {
    prepare_recipe(ctx)?;

    let own_channel = format!("{}/conda", ctx.services.domain);
    let extra = if ctx.services.downloads.probe(&own_channel).await {
        Some(own_channel.as_str())
    } else {
        tracing::debug!("{own_channel} not reachable, building against conda-forge only");
        None
    };

    ProcessSpec::new("conda-build")
        .args(build_args(extra))
        .current_dir(ctx.wd())
        .timeout(ctx.services.settings.process_timeout())
        .run()
        .await
        .map_err(PackagingError::from)?;

    let archive = find_archive(&ctx.wd().join("out"), &ctx.definition.name, ctx.version())?;
    let target = ctx
        .services
        .layout
        .final_artifact(Ecosystem::Conda, ctx.stem());
    let published = publish(&archive, &target)?;
    ctx.set_file(published);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::test_services;
    use crate::core::definition::{PackageDefinition, VersionSpec};
    use crate::core::layout::PackageKind;
    use crate::core::version::Resolution;
    use tempfile::TempDir;

    #[test]
    fn test_build_args() {
        assert_eq!(
            build_args(None),
            vec!["./recipe", "-c", "conda-forge", "--output-folder", "out"]
        );
        assert_eq!(
            build_args(Some("https://pkgs.example/conda")),
            vec![
                "./recipe",
                "-c",
                "conda-forge",
                "-c",
                "https://pkgs.example/conda",
                "--output-folder",
                "out"
            ]
        );
    }

    #[test]
    fn test_find_archive_by_platform() {
        let temp = TempDir::new().unwrap();
        let out = temp.path().join("out");
        std::fs::create_dir_all(out.join("noarch")).unwrap();
        std::fs::create_dir_all(out.join("linux-64")).unwrap();
        std::fs::write(out.join("channeldata.json"), "{}").unwrap();
        std::fs::write(out.join("linux-64/lib-1.0-h123_0.tar.bz2"), "").unwrap();

        let found = find_archive(&out, "lib", "1.0").unwrap();
        assert_eq!(found, out.join("linux-64/lib-1.0-h123_0.tar.bz2"));
        assert!(find_archive(&out, "lib", "2.0").is_err());
    }

    #[test]
    fn test_prepare_recipe_substitutes_meta() {
        let temp = TempDir::new().unwrap();
        let services = test_services(temp.path());
        let def = PackageDefinition {
            name: "lib".to_string(),
            ecosystem: Ecosystem::Conda,
            kind: PackageKind::CondaPackage,
            path: temp.path().join("configs/lib.conda/lib.conda"),
            pkg_dir: Some(temp.path().join("configs/lib.conda")),
            version: Some(VersionSpec::Literal("1.0".to_string())),
            commands: Vec::new(),
            sandboxed: false,
        };
        let ctx = BuildContext::new(&services, &def, Resolution::literal("1.0")).unwrap();
        std::fs::create_dir_all(ctx.wd().join("recipe")).unwrap();
        std::fs::write(
            ctx.wd().join("recipe/meta.yaml"),
            "package:\n  name: $NAME\n  version: $VERSION\nbuild:\n  script: echo $PREFIX\n",
        )
        .unwrap();

        let meta = prepare_recipe(&ctx).unwrap();
        assert_eq!(
            std::fs::read_to_string(meta).unwrap(),
            "package:\n  name: lib\n  version: 1.0\nbuild:\n  script: echo $PREFIX\n"
        );
    }
}
