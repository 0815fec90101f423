//! Homebrew cask packager

use crate::core::context::BuildContext;
use crate::core::layout::Ecosystem;
use crate::error::{BuildError, DefinitionError};
use crate::infra::filesystem;

/// `CASK <body>`: write `pkgs/brew/<stem>.rb`
///
/// `$TAP_FILE` is the public URL of the last download, which lives under
/// `public/data/brew`.
pub fn write_cask(ctx: &mut BuildContext<'_>, body: &str) -> Result<(), BuildError> {
    if body.contains("$TAP_FILE") {
        let url = ctx
            .file
            .as_deref()
            .and_then(|file| ctx.services.public_url(file))
            .ok_or_else(|| DefinitionError::Invalid {
                message: "$TAP_FILE used without a downloaded file".to_string(),
            })?;
        ctx.scope.set_builtin("TAP_FILE", url);
    }

    let mut cask = ctx.substitute(body);
    if !cask.ends_with('\n') {
        cask.push('\n');
    }

    let target = ctx
        .services
        .layout
        .final_artifact(Ecosystem::Brew, ctx.stem());
    let partial = filesystem::partial_path(&target);
    filesystem::write_file(&partial, cask)?;
    filesystem::rename(&partial, &target)?;
    tracing::info!("Wrote cask {}", target.display());
    ctx.set_file(target);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::test_services;
    use crate::core::definition::{PackageDefinition, VersionSpec};
    use crate::core::layout::PackageKind;
    use crate::core::version::Resolution;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn definition() -> PackageDefinition {
        PackageDefinition {
            name: "tool".to_string(),
            ecosystem: Ecosystem::Brew,
            kind: PackageKind::CaskTap,
            path: PathBuf::from("configs/tool.tap"),
            pkg_dir: None,
            version: Some(VersionSpec::Literal("2.1".to_string())),
            commands: Vec::new(),
            sandboxed: false,
        }
    }

    #[test]
    fn test_cask_references_public_payload() {
        let temp = TempDir::new().unwrap();
        let services = test_services(temp.path());
        let def = definition();
        let mut ctx = BuildContext::new(&services, &def, Resolution::literal("2.1")).unwrap();
        let payload = ctx.wd().join("tool|2.1|brew|Tool.dmg");
        std::fs::write(&payload, "dmg").unwrap();
        ctx.set_file(payload);

        let body = "cask \"$NAME\" do\n  version \"$VERSION\"\n  url \"$TAP_FILE\"\nend";
        write_cask(&mut ctx, body).unwrap();

        let written =
            std::fs::read_to_string(temp.path().join("pkgs/brew/tool|2.1|brew.rb")).unwrap();
        assert_eq!(
            written,
            "cask \"tool\" do\n  version \"2.1\"\n  url \"https://pkgs.example/data/brew/tool%7C2.1%7Cbrew%7CTool.dmg\"\nend\n"
        );
    }

    #[test]
    fn test_tap_file_without_download() {
        let temp = TempDir::new().unwrap();
        let services = test_services(temp.path());
        let def = definition();
        let mut ctx = BuildContext::new(&services, &def, Resolution::literal("2.1")).unwrap();

        let err = write_cask(&mut ctx, "url \"$TAP_FILE\"").unwrap_err();
        assert_eq!(err.kind(), crate::error::FailureKind::Definition);
        assert!(!temp.path().join("pkgs/brew/tool|2.1|brew.rb").exists());
    }
}
