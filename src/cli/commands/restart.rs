//! CLI implementation for `reposmith restart`

use std::path::Path;

use anyhow::{Context, Result};

use crate::cli::output::{status, OutputConfig};
use crate::core::layout::RepositoryLayout;
use crate::core::reload;
use crate::core::settings::Settings;

/// Execute the restart command
pub async fn execute(repo: &Path, output: OutputConfig) -> Result<()> {
    let layout = RepositoryLayout::new(repo);
    layout
        .verify()
        .with_context(|| format!("{} is not a repository", repo.display()))?;
    let settings = Settings::load(repo).with_context(|| "Failed to load repository settings")?;

    reload::hook_for(&settings)
        .reload(&layout)
        .await
        .with_context(|| "Failed to restart the Chocolatey feed")?;

    if !output.quiet && !output.json {
        println!("{} Feed restarted", status::SUCCESS);
    }
    Ok(())
}
