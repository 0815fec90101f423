//! Command interpreter
//!
//! Resolves the version, skips packages whose artifact already exists and
//! otherwise runs the definition's commands in file order against one
//! [`BuildContext`]. Temporary directories are released whatever the
//! outcome.

use std::path::PathBuf;

use serde::Serialize;

use crate::core::context::{BuildContext, BuildServices};
use crate::core::definition::{Command, PackageDefinition};
use crate::core::{cask, choco, conda, debian, fetch, layout, transform, version};
use crate::error::{BuildError, DefinitionError, FilesystemError};

/// What a successful run did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// The artifact was produced
    Built {
        version: String,
        artifact: Option<PathBuf>,
    },
    /// The artifact for this version already exists
    UpToDate { version: String },
}

/// Build one definition end to end
pub async fn build(
    services: &BuildServices,
    definition: &PackageDefinition,
) -> Result<Outcome, BuildError> {
    let resolution = version::resolve(services, definition).await?;
    let version = resolution.version.clone();
    let stem = layout::stem(&definition.name, &version, definition.ecosystem);

    let exists = services
        .layout
        .final_exists(definition.ecosystem, &stem)
        .map_err(|e| FilesystemError::Contents {
            path: services.layout.pkgs(definition.ecosystem),
            error: e.to_string(),
        })?;
    if exists {
        tracing::info!("{stem} is up to date");
        return Ok(Outcome::UpToDate { version });
    }

    let mut ctx = BuildContext::new(services, definition, resolution)?;
    let result = execute(&mut ctx).await;
    let artifact = ctx.file.clone();
    let cleanup = ctx.finish();

    result?;
    if let Err(e) = cleanup {
        tracing::warn!("Failed to clean up after {stem}: {e}");
    }
    Ok(Outcome::Built { version, artifact })
}

/// Run every command of the context's definition
pub async fn execute(ctx: &mut BuildContext<'_>) -> Result<(), BuildError> {
    let definition = ctx.definition;
    if definition.sandboxed {
        debian::enter_sandbox(ctx)?;
    }
    for command in &definition.commands {
        tracing::debug!("{}", command.name());
        step(ctx, command).await?;
    }
    Ok(())
}

/// Dispatch one command
pub async fn step(ctx: &mut BuildContext<'_>, command: &Command) -> Result<(), BuildError> {
    match command {
        Command::Set { key, value } => ctx.scope.apply_set(key, value).map_err(Into::into),

        Command::Download { .. }
        | Command::DownloadRemoteName { .. }
        | Command::DownloadGh { .. }
        | Command::DownloadBrowser { .. }
        | Command::CopySrc { .. }
        | Command::SymlinkSrc { .. } => fetch::run(ctx, command).await,

        Command::Extract { .. }
        | Command::Mkdir { .. }
        | Command::Rename { .. }
        | Command::Remove { .. }
        | Command::Copy { .. }
        | Command::CopyFix { .. }
        | Command::CopyDir { .. }
        | Command::CopyGlob { .. } => transform::run(ctx, command).await,

        Command::CreateDeb { deps } => debian::create_deb(ctx, deps.as_deref()),
        Command::BuildDeb => debian::build_deb(ctx).await,
        Command::DhDisable { helper } => debian::dh_disable(ctx, helper),
        Command::SetNative => debian::set_native(ctx),
        Command::IncludeBinaries => debian::include_binaries(ctx),

        Command::Cask { body } => cask::write_cask(ctx, body),
        Command::CondaBuild => conda::build(ctx).await,
        Command::Choco => choco::build(ctx).await,

        Command::Version(_) | Command::Sandbox | Command::Conda => Err(DefinitionError::Invalid {
            message: format!("{} cannot run as a step", command.name()),
        }
        .into()),
    }
}
