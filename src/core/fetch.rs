//! Download resolver
//!
//! Runs the download commands of a definition. Every variant ends with
//! `$FILE` pointing at the fetched file and the remote name recorded; the
//! local name depends on where the package is built (see
//! [`BuildContext::local_name`]).

use std::path::{Path, PathBuf};

use crate::core::context::{BuildContext, Placement};
use crate::core::definition::Command;
use crate::error::{BuildError, DefinitionError, DownloadError};
use crate::infra::browser::BrowserRequest;
use crate::infra::download::url_file_name;
use crate::infra::filesystem;
use crate::infra::scratch::ScratchDir;

/// Run one download command
pub async fn run(ctx: &mut BuildContext<'_>, command: &Command) -> Result<(), BuildError> {
    match command {
        Command::Download { url } => {
            let url = ctx.substitute(url);
            direct(ctx, &url, false).await
        }
        Command::DownloadRemoteName { url } => {
            let url = ctx.substitute(url);
            direct(ctx, &url, true).await
        }
        Command::DownloadGh { repo, .. } => github(ctx, repo).await,
        Command::DownloadBrowser { spec } => {
            let spec = ctx.substitute(spec);
            browser(ctx, &spec).await
        }
        Command::CopySrc { path } => {
            let path = ctx.substitute(path);
            copy_src(ctx, &path)
        }
        Command::SymlinkSrc { path } => {
            let path = ctx.substitute(path);
            symlink_src(ctx, &path)
        }
        other => Err(DefinitionError::Invalid {
            message: format!("{} is not a download command", other.name()),
        }
        .into()),
    }
}

fn local_path(ctx: &BuildContext<'_>, remote: &str) -> Result<PathBuf, DownloadError> {
    ctx.local_name(remote)
        .map(|name| ctx.wd().join(name))
        .ok_or_else(|| DownloadError::InvalidFileName {
            name: remote.to_string(),
        })
}

/// `DOWNLOAD` names by URL, `DOWNLOAD_REMOTE_NAME` by `Content-Disposition`
async fn direct(ctx: &mut BuildContext<'_>, url: &str, remote_named: bool) -> Result<(), BuildError> {
    let headers = reqwest::header::HeaderMap::new();
    let result = if remote_named {
        ctx.services
            .downloads
            .download_named(url, &headers, |remote| local_path(ctx, remote), None)
            .await?
    } else {
        let remote = url_file_name(url)?;
        let dest = local_path(ctx, &remote)?;
        let mut result = ctx.services.downloads.download(url, &dest, None).await?;
        result.remote_name = remote;
        result
    };

    tracing::info!("Downloaded {} to {}", url, result.path.display());
    ctx.remote_name = Some(result.remote_name);
    ctx.set_file(result.path);
    Ok(())
}

async fn github(ctx: &mut BuildContext<'_>, repo: &str) -> Result<(), BuildError> {
    let asset = ctx
        .release
        .as_ref()
        .filter(|r| r.repo == *repo)
        .and_then(|r| r.asset.clone())
        .ok_or_else(|| DownloadError::InvalidFileName {
            name: format!("no selected release asset for {repo}"),
        })?;

    let dest = match ctx.placement() {
        Placement::AptPool => ctx.wd().join(format!("{}.deb", ctx.stem())),
        _ => local_path(ctx, &asset.name)?,
    };
    let headers = ctx.services.releases.auth_headers();
    let target = dest.clone();
    let result = ctx
        .services
        .downloads
        .download_named(&asset.browser_download_url, &headers, move |_| Ok(target.clone()), None)
        .await?;

    tracing::info!("Downloaded release asset {} of {}", asset.name, repo);
    ctx.remote_name = Some(asset.name);
    ctx.set_file(result.path);
    Ok(())
}

/// Browser download, reusing the file fetched while resolving a `re:` version
async fn browser(ctx: &mut BuildContext<'_>, spec: &str) -> Result<(), BuildError> {
    let (file, staging) = match ctx.prefetched.take() {
        Some(file) => (file, None),
        None => {
            let staging = ScratchDir::new_in(ctx.services.layout.root(), ".browser-")?;
            let request = BrowserRequest::parse(spec);
            let file = ctx.services.browser.fetch(&request, staging.path()).await?;
            (file, Some(staging))
        }
    };

    let remote = filesystem::file_name(&file);
    let dest = local_path(ctx, &remote)?;
    filesystem::rename(&file, &dest)?;
    if let Some(staging) = staging {
        staging.close()?;
    }

    tracing::info!("Fetched {} through the browser", remote);
    ctx.remote_name = Some(remote);
    ctx.set_file(dest);
    Ok(())
}

/// Private-store source and its local name
fn private_source(ctx: &BuildContext<'_>, path: &str) -> Result<(PathBuf, PathBuf), BuildError> {
    let source = ctx.services.layout.private().join(path);
    if !source.exists() {
        return Err(DownloadError::SourceMissing { path: source }.into());
    }
    let name = filesystem::file_name(&source);
    let target = if ctx.placement().is_temporary() {
        ctx.wd().join(&name)
    } else {
        ctx.wd().join(format!("{}|{name}", ctx.stem()))
    };
    Ok((source, target))
}

fn copy_src(ctx: &mut BuildContext<'_>, path: &str) -> Result<(), BuildError> {
    let (source, target) = private_source(ctx, path)?;
    if target.exists() {
        tracing::warn!("{} already exists, keeping it", target.display());
    } else if source.is_dir() {
        filesystem::copy_dir(&source, &target)?;
    } else {
        let partial = filesystem::partial_path(&target);
        filesystem::copy_file(&source, &partial)?;
        filesystem::rename(&partial, &target)?;
    }
    ctx.remote_name = Some(filesystem::file_name(&source));
    ctx.set_file(target);
    Ok(())
}

fn symlink_src(ctx: &mut BuildContext<'_>, path: &str) -> Result<(), BuildError> {
    let (source, target) = private_source(ctx, path)?;
    match std::fs::symlink_metadata(&target) {
        Ok(meta) if meta.file_type().is_symlink() && points_to(&target, &source) => {
            tracing::warn!("{} already links to {}", target.display(), source.display());
        }
        Ok(_) => {
            return Err(DownloadError::SymlinkConflict {
                path: target,
                target: source,
            }
            .into())
        }
        Err(_) => filesystem::symlink(&source, &target)?,
    }
    ctx.remote_name = Some(filesystem::file_name(&source));
    ctx.set_file(target);
    Ok(())
}

fn points_to(link: &Path, target: &Path) -> bool {
    std::fs::read_link(link).is_ok_and(|current| current == target)
}
