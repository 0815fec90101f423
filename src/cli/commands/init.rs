//! CLI implementation for `reposmith init`

use std::path::Path;

use anyhow::{Context, Result};

use crate::cli::output::{status, OutputConfig};
use crate::config::defaults;
use crate::core::layout::RepositoryLayout;

/// Commented settings file written by `init`
const SETTINGS_TEMPLATE: &str = r#"# reposmith repository settings

# [apt]
# origin = "Custom Repository"
# label = "Custom"

# [debian]
# maintainer = "Repository Maintainer <maintainer@localhost>"
# install_root = "/"

# [choco]
# port = 7996

# [build]
# jobs = 4
"#;

/// Execute the init command
pub async fn execute(repo: &Path, output: OutputConfig) -> Result<()> {
    let layout = RepositoryLayout::new(repo);
    layout
        .init()
        .with_context(|| format!("Failed to initialize repository at {}", repo.display()))?;

    let settings = repo.join(defaults::SETTINGS_FILE);
    if !settings.exists() {
        std::fs::write(&settings, SETTINGS_TEMPLATE)
            .with_context(|| format!("Failed to write {}", settings.display()))?;
    }

    if !output.quiet && !output.json {
        println!("{} Initialized repository at {}", status::SUCCESS, repo.display());
        println!("  Add package definitions under {}", layout.configs().display());
    }
    Ok(())
}
