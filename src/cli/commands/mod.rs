//! CLI command implementations
//!
//! Each command is implemented in its own submodule.

pub mod build;
pub mod init;
pub mod restart;

use std::path::PathBuf;

use anyhow::Result;
use clap::Subcommand;

use crate::cli::output::OutputConfig;

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build changed packages and reassemble the repository
    Build {
        /// Repository root
        repo: PathBuf,

        /// Signing key file (created if missing)
        #[arg(short, long)]
        key: Option<PathBuf>,

        /// Public base URL of the repository
        #[arg(short, long)]
        domain: String,

        /// File holding the GitHub token (defaults to $GH_TOKEN)
        #[arg(short, long)]
        github: Option<PathBuf>,

        /// User for authenticated downloads
        #[arg(short, long)]
        user: Option<String>,

        /// File holding the password (defaults to $REPO_PASSWD)
        #[arg(short, long)]
        passwd: Option<PathBuf>,

        /// Show the browser during browser-driven downloads
        #[arg(short = 'H', long)]
        headful: bool,

        /// Restart the Chocolatey feed afterwards
        #[arg(short, long)]
        restart: bool,

        /// Number of parallel package builds
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Build only the named package (repeatable)
        #[arg(long)]
        package: Vec<String>,
    },

    /// Create the repository directory tree
    Init {
        /// Repository root
        repo: PathBuf,
    },

    /// Restart the Chocolatey feed server
    Restart {
        /// Repository root
        repo: PathBuf,
    },
}

impl Commands {
    /// Execute the command
    pub async fn run(self, output: OutputConfig) -> Result<i32> {
        match self {
            Self::Build {
                repo,
                key,
                domain,
                github,
                user,
                passwd,
                headful,
                restart,
                jobs,
                package,
            } => {
                let options = build::BuildOptions {
                    key,
                    domain,
                    github,
                    user,
                    passwd,
                    headful,
                    restart,
                    jobs,
                    packages: package,
                };
                build::execute(&repo, options, output).await
            }
            Self::Init { repo } => init::execute(&repo, output).await.map(|()| 0),
            Self::Restart { repo } => restart::execute(&repo, output).await.map(|()| 0),
        }
    }
}
