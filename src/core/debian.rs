//! Debian-scratch builder
//!
//! `SANDBOX` → payload commands → `CREATE_DEB` → `BUILD_DEB`. The sandbox is
//! a scratch directory that lives as long as the [`BuildContext`]; it is
//! removed when the build finishes, whether it succeeded or not.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::config::defaults;
use crate::core::context::BuildContext;
use crate::core::layout::Ecosystem;
use crate::error::{BuildError, FilesystemError, PackagingError};
use crate::infra::filesystem;
use crate::infra::process::ProcessSpec;
use crate::infra::scratch::ScratchDir;

/// Progress of a Debian-scratch build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebianState {
    #[default]
    Idle,
    Sandboxed,
    Staged,
    Built,
}

impl fmt::Display for DebianState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Sandboxed => "sandboxed",
            Self::Staged => "staged",
            Self::Built => "built",
        };
        f.write_str(s)
    }
}

/// Debian-scratch state carried by a build context
#[derive(Debug, Default)]
pub struct DebianBuild {
    state: DebianState,
    sandbox: Option<ScratchDir>,
    deps: Vec<String>,
    native: bool,
    include_binaries: bool,
    disabled: Vec<String>,
}

impl DebianBuild {
    pub fn state(&self) -> DebianState {
        self.state
    }

    /// Sandbox directory, once entered
    pub fn sandbox(&self) -> Option<&Path> {
        self.sandbox.as_ref().map(ScratchDir::path)
    }

    /// Delete the sandbox if one was opened
    pub fn close_sandbox(&mut self) -> Result<(), FilesystemError> {
        match self.sandbox.take() {
            Some(dir) => dir.close(),
            None => Ok(()),
        }
    }

    fn expect_state(&self, command: &str, expected: DebianState) -> Result<(), PackagingError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(PackagingError::InvalidState {
                command: command.to_string(),
                state: self.state.to_string(),
            })
        }
    }
}

/// Split a `CREATE_DEB` dependency list
pub fn parse_deps(deps: &str) -> Vec<String> {
    deps.split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .collect()
}

/// `SANDBOX`: move the working directory into a fresh scratch dir
pub fn enter_sandbox(ctx: &mut BuildContext<'_>) -> Result<(), BuildError> {
    ctx.debian.expect_state("SANDBOX", DebianState::Idle)?;
    let dir = ScratchDir::new_in(ctx.services.layout.root(), ".sandbox-")?;
    tracing::debug!("Sandbox at {}", dir.path().display());
    ctx.set_wd(dir.path().to_path_buf());
    ctx.debian.sandbox = Some(dir);
    ctx.debian.state = DebianState::Sandboxed;
    Ok(())
}

/// `CREATE_DEB`: stage the source package around `$DEST`
pub fn create_deb(ctx: &mut BuildContext<'_>, deps: Option<&str>) -> Result<(), BuildError> {
    ctx.debian.expect_state("CREATE_DEB", DebianState::Sandboxed)?;
    let dest = ctx.wd().join(ctx.dest_name());
    if !dest.is_dir() {
        return Err(PackagingError::MissingDest { path: dest }.into());
    }

    ctx.debian.deps = deps.map(|d| parse_deps(&ctx.substitute(d))).unwrap_or_default();
    if !ctx.debian.native {
        write_orig_tarball(ctx, &dest)?;
    }
    write_debian_dir(ctx, &dest)?;
    ctx.debian.state = DebianState::Staged;
    tracing::info!("Staged Debian source {}", ctx.dest_name());
    Ok(())
}

/// `SET_NATIVE`
pub fn set_native(ctx: &mut BuildContext<'_>) -> Result<(), BuildError> {
    ctx.debian.native = true;
    refresh(ctx)
}

/// `INCLUDE_BINARIES`
pub fn include_binaries(ctx: &mut BuildContext<'_>) -> Result<(), BuildError> {
    ctx.debian.include_binaries = true;
    refresh(ctx)
}

/// `DH_DISABLE <helper>`
pub fn dh_disable(ctx: &mut BuildContext<'_>, helper: &str) -> Result<(), BuildError> {
    if !ctx.debian.disabled.iter().any(|h| h == helper) {
        ctx.debian.disabled.push(helper.to_string());
    }
    refresh(ctx)
}

/// Flags given after `CREATE_DEB` rewrite the staged files
fn refresh(ctx: &mut BuildContext<'_>) -> Result<(), BuildError> {
    if ctx.debian.state == DebianState::Staged {
        let dest = ctx.wd().join(ctx.dest_name());
        write_debian_dir(ctx, &dest)?;
    }
    Ok(())
}

/// `BUILD_DEB`: run the native build and publish the `.deb` to the pool
pub async fn build_deb(ctx: &mut BuildContext<'_>) -> Result<(), BuildError> {
    ctx.debian.expect_state("BUILD_DEB", DebianState::Staged)?;
    let dest = ctx.wd().join(ctx.dest_name());

    ProcessSpec::new("dpkg-buildpackage")
        .args(["-rfakeroot", "-us", "-uc"])
        .current_dir(&dest)
        .timeout(ctx.services.settings.process_timeout())
        .run()
        .await
        .map_err(PackagingError::from)?;

    let deb = filesystem::glob_in(ctx.wd(), "*.deb")?
        .into_iter()
        .next()
        .ok_or_else(|| PackagingError::ArtifactMissing {
            dir: ctx.wd().to_path_buf(),
            pattern: "*.deb".to_string(),
        })?;

    let artifact = publish(&deb, &ctx.services.layout.final_artifact(Ecosystem::Apt, ctx.stem()))?;
    ctx.set_file(artifact);
    ctx.debian.state = DebianState::Built;
    Ok(())
}

/// Copy under a hidden name, then rename into place
///
/// The rename is the commit point: the index never sees half a file.
pub(crate) fn publish(from: &Path, to: &Path) -> Result<PathBuf, FilesystemError> {
    let partial = filesystem::partial_path(to);
    filesystem::copy_file(from, &partial)?;
    filesystem::rename(&partial, to)?;
    tracing::info!("Published {}", to.display());
    Ok(to.to_path_buf())
}

fn write_orig_tarball(ctx: &BuildContext<'_>, dest: &Path) -> Result<(), BuildError> {
    let name = format!("{}_{}.orig.tar.gz", ctx.definition.name, ctx.version());
    let path = ctx.wd().join(name);
    let io_err = |e: std::io::Error| PackagingError::IoError {
        path: path.clone(),
        error: e.to_string(),
    };

    let file = std::fs::File::create(&path).map_err(io_err)?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    builder.follow_symlinks(false);
    builder
        .append_dir_all(ctx.dest_name(), dest)
        .map_err(io_err)?;
    builder
        .into_inner()
        .and_then(GzEncoder::finish)
        .map_err(io_err)?;
    Ok(())
}

/// Last modification of the definition file, or now
fn definition_time(path: &Path) -> DateTime<Utc> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}

fn control(ctx: &BuildContext<'_>) -> String {
    let name = &ctx.definition.name;
    let mut depends = ctx.debian.deps.clone();
    depends.push("${misc:Depends}".to_string());
    format!(
        "Source: {name}\n\
         Section: misc\n\
         Priority: optional\n\
         Maintainer: {maintainer}\n\
         Build-Depends: debhelper (>= {compat})\n\
         Standards-Version: 4.6.2\n\
         \n\
         Package: {name}\n\
         Architecture: all\n\
         Depends: {depends}\n\
         Description: {name}\n \
         Packaged by reposmith.\n",
        maintainer = ctx.services.settings.maintainer(),
        compat = defaults::DEBHELPER_COMPAT,
        depends = depends.join(", "),
    )
}

fn changelog(ctx: &BuildContext<'_>) -> String {
    let version = if ctx.debian.native {
        ctx.version().to_string()
    } else {
        format!("{}-1", ctx.version())
    };
    format!(
        "{name} ({version}) stable; urgency=medium\n\n  * Automated build.\n\n -- {maintainer}  {date}\n",
        name = ctx.definition.name,
        maintainer = ctx.services.settings.maintainer(),
        date = definition_time(&ctx.definition.path).to_rfc2822(),
    )
}

fn rules(disabled: &[String]) -> String {
    let mut rules = String::from("#!/usr/bin/make -f\n%:\n\tdh $@\n");
    for helper in disabled {
        rules.push_str(&format!("\noverride_{helper}:\n"));
    }
    rules
}

/// `install` maps every top-level payload entry under the install root
fn install(dest: &Path, root: &str) -> Result<String, FilesystemError> {
    let target = match root.trim_start_matches('/') {
        "" => "/".to_string(),
        rel => rel.to_string(),
    };
    let mut lines = String::new();
    for entry in filesystem::list_dir(dest)? {
        let name = filesystem::file_name(&entry);
        if name != "debian" {
            lines.push_str(&format!("{name} {target}\n"));
        }
    }
    Ok(lines)
}

fn write_debian_dir(ctx: &BuildContext<'_>, dest: &Path) -> Result<(), BuildError> {
    let debian = dest.join("debian");
    let install = install(dest, ctx.services.settings.install_root())?;
    filesystem::create_dir_all(&debian.join("source"))?;

    filesystem::write_file(&debian.join("control"), control(ctx))?;
    filesystem::write_file(&debian.join("changelog"), changelog(ctx))?;
    filesystem::write_file(&debian.join("compat"), format!("{}\n", defaults::DEBHELPER_COMPAT))?;
    filesystem::write_file(&debian.join("install"), install)?;

    let rules_path = debian.join("rules");
    filesystem::write_file(&rules_path, rules(&ctx.debian.disabled))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&rules_path, std::fs::Permissions::from_mode(0o755)).map_err(
            |e| PackagingError::IoError {
                path: rules_path.clone(),
                error: e.to_string(),
            },
        )?;
    }

    let format = if ctx.debian.native { "3.0 (native)" } else { "3.0 (quilt)" };
    filesystem::write_file(&debian.join("source/format"), format!("{format}\n"))?;
    let options = debian.join("source/options");
    if ctx.debian.include_binaries {
        filesystem::write_file(&options, "include-binaries\n")?;
    } else {
        filesystem::remove_path(&options)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::{test_services, BuildServices};
    use crate::core::definition::{PackageDefinition, VersionSpec};
    use crate::core::layout::PackageKind;
    use crate::core::version::Resolution;
    use crate::infra::process;
    use tempfile::TempDir;

    fn definition(root: &Path) -> PackageDefinition {
        let pkg_dir = root.join("configs/pkg.rep");
        std::fs::create_dir_all(&pkg_dir).unwrap();
        let path = pkg_dir.join("pkg.rep");
        std::fs::write(&path, "VERSION 1.0\nSANDBOX\n").unwrap();
        PackageDefinition {
            name: "pkg".to_string(),
            ecosystem: Ecosystem::Apt,
            kind: PackageKind::DebianScratch,
            path,
            pkg_dir: Some(pkg_dir),
            version: Some(VersionSpec::Literal("1.0".to_string())),
            commands: Vec::new(),
            sandboxed: true,
        }
    }

    fn stage_payload(ctx: &BuildContext<'_>) {
        let data = ctx.wd().join("pkg-1.0/data");
        std::fs::create_dir_all(&data).unwrap();
        std::fs::write(data.join("hello.txt"), "hello\n").unwrap();
    }

    fn setup(temp: &TempDir) -> (BuildServices, PackageDefinition) {
        let services = test_services(temp.path());
        let def = definition(temp.path());
        (services, def)
    }

    // ============================================
    // State machine
    // ============================================

    #[test]
    fn test_parse_deps() {
        assert_eq!(parse_deps("dep-a, dep-b"), vec!["dep-a", "dep-b"]);
        assert_eq!(parse_deps(" libc6 (>= 2.31) ,,"), vec!["libc6 (>= 2.31)"]);
        assert!(parse_deps("").is_empty());
    }

    #[test]
    fn test_sandbox_moves_working_directory() {
        let temp = TempDir::new().unwrap();
        let (services, def) = setup(&temp);
        let mut ctx = BuildContext::new(&services, &def, Resolution::literal("1.0")).unwrap();

        enter_sandbox(&mut ctx).unwrap();
        let sandbox = ctx.wd().to_path_buf();
        assert!(sandbox.is_dir());
        assert_eq!(ctx.debian.sandbox(), Some(sandbox.as_path()));
        assert_eq!(ctx.substitute("$DIR"), sandbox.to_string_lossy());
        assert_eq!(ctx.debian.state(), DebianState::Sandboxed);

        ctx.finish().unwrap();
        assert!(!sandbox.exists());
    }

    #[test]
    fn test_commands_out_of_order_are_rejected() {
        let temp = TempDir::new().unwrap();
        let (services, def) = setup(&temp);
        let mut ctx = BuildContext::new(&services, &def, Resolution::literal("1.0")).unwrap();

        let err = create_deb(&mut ctx, None).unwrap_err();
        assert!(matches!(
            err,
            BuildError::Packaging(PackagingError::InvalidState { .. })
        ));
        enter_sandbox(&mut ctx).unwrap();
        assert!(enter_sandbox(&mut ctx).is_err());
    }

    #[test]
    fn test_create_deb_requires_dest() {
        let temp = TempDir::new().unwrap();
        let (services, def) = setup(&temp);
        let mut ctx = BuildContext::new(&services, &def, Resolution::literal("1.0")).unwrap();
        enter_sandbox(&mut ctx).unwrap();

        let err = create_deb(&mut ctx, Some("dep-a")).unwrap_err();
        assert!(matches!(
            err,
            BuildError::Packaging(PackagingError::MissingDest { .. })
        ));
    }

    // ============================================
    // Staged files
    // ============================================

    #[test]
    fn test_create_deb_synthesizes_debian_dir() {
        let temp = TempDir::new().unwrap();
        let (services, def) = setup(&temp);
        let mut ctx = BuildContext::new(&services, &def, Resolution::literal("1.0")).unwrap();
        enter_sandbox(&mut ctx).unwrap();
        stage_payload(&ctx);

        create_deb(&mut ctx, Some("dep-a, dep-b")).unwrap();
        let debian = ctx.wd().join("pkg-1.0/debian");

        let control = std::fs::read_to_string(debian.join("control")).unwrap();
        assert!(control.contains("Depends: dep-a, dep-b, ${misc:Depends}\n"));
        assert!(control.contains("Package: pkg\n"));
        let changelog = std::fs::read_to_string(debian.join("changelog")).unwrap();
        assert!(changelog.starts_with("pkg (1.0-1) stable;"));
        assert_eq!(std::fs::read_to_string(debian.join("install")).unwrap(), "data /\n");
        assert_eq!(
            std::fs::read_to_string(debian.join("source/format")).unwrap(),
            "3.0 (quilt)\n"
        );
        assert!(ctx.wd().join("pkg_1.0.orig.tar.gz").is_file());
        assert_eq!(ctx.debian.state(), DebianState::Staged);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(debian.join("rules")).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[test]
    fn test_flags_after_create_deb_rewrite_files() {
        let temp = TempDir::new().unwrap();
        let (services, def) = setup(&temp);
        let mut ctx = BuildContext::new(&services, &def, Resolution::literal("1.0")).unwrap();
        enter_sandbox(&mut ctx).unwrap();
        stage_payload(&ctx);
        create_deb(&mut ctx, None).unwrap();

        set_native(&mut ctx).unwrap();
        include_binaries(&mut ctx).unwrap();
        dh_disable(&mut ctx, "dh_usrlocal").unwrap();
        dh_disable(&mut ctx, "dh_usrlocal").unwrap();

        let debian = ctx.wd().join("pkg-1.0/debian");
        assert_eq!(
            std::fs::read_to_string(debian.join("source/format")).unwrap(),
            "3.0 (native)\n"
        );
        assert_eq!(
            std::fs::read_to_string(debian.join("source/options")).unwrap(),
            "include-binaries\n"
        );
        let rules = std::fs::read_to_string(debian.join("rules")).unwrap();
        assert_eq!(rules.matches("override_dh_usrlocal:").count(), 1);
        let changelog = std::fs::read_to_string(debian.join("changelog")).unwrap();
        assert!(changelog.starts_with("pkg (1.0) stable;"));
    }

    #[test]
    fn test_install_root_mapping() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("debian")).unwrap();
        std::fs::create_dir_all(temp.path().join("opt")).unwrap();
        std::fs::write(temp.path().join("tool"), "").unwrap();
        assert_eq!(install(temp.path(), "/usr/local").unwrap(), "opt usr/local\ntool usr/local\n");
    }

    #[test]
    fn test_changelog_date_follows_definition() {
        let temp = TempDir::new().unwrap();
        let (services, def) = setup(&temp);
        let ctx = BuildContext::new(&services, &def, Resolution::literal("1.0")).unwrap();
        assert_eq!(changelog(&ctx), changelog(&ctx));
        assert!(changelog(&ctx).contains(&definition_time(&def.path).to_rfc2822()));
    }

    #[tokio::test]
    async fn test_build_deb_requires_staging() {
        let temp = TempDir::new().unwrap();
        let (services, def) = setup(&temp);
        let mut ctx = BuildContext::new(&services, &def, Resolution::literal("1.0")).unwrap();
        enter_sandbox(&mut ctx).unwrap();
        let err = build_deb(&mut ctx).await.unwrap_err();
        assert!(matches!(
            err,
            BuildError::Packaging(PackagingError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    #[ignore = "requires dpkg-buildpackage and fakeroot"]
    async fn test_full_scratch_build() {
        if !process::is_available("dpkg-buildpackage") {
            return;
        }
        let temp = TempDir::new().unwrap();
        let (services, def) = setup(&temp);
        let mut ctx = BuildContext::new(&services, &def, Resolution::literal("1.0")).unwrap();
        enter_sandbox(&mut ctx).unwrap();
        stage_payload(&ctx);
        create_deb(&mut ctx, Some("dep-a, dep-b")).unwrap();
        build_deb(&mut ctx).await.unwrap();

        let sandbox = ctx.wd().to_path_buf();
        ctx.finish().unwrap();
        assert!(!sandbox.exists());
        assert!(temp.path().join("pkgs/apt/pkg|1.0|apt.deb").is_file());
    }
}
