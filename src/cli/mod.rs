//! Command-line interface module
//!
//! This module handles argument parsing and output formatting.
//! It contains no business logic - that belongs in the [`crate::core`] module.

pub mod commands;
pub mod output;

use anyhow::Result;
use clap::Parser;

use commands::Commands;
use output::OutputConfig;

/// Reposmith - private package repository builder
///
/// Builds apt, Homebrew Cask, Conda and Chocolatey packages from definition
/// files and assembles the signed indexes each client expects.
#[derive(Parser, Debug)]
#[command(name = "reposmith")]
#[command(author, version, about, long_about = None)]
#[command(long_version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("VERGEN_GIT_SHA"), ")"))]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output in JSON format for scripting
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn output(&self) -> OutputConfig {
        OutputConfig::new(self.quiet, self.json, self.verbose)
    }

    /// Execute the CLI command, returning the process exit code
    pub async fn run(self) -> Result<i32> {
        let output = self.output();
        self.command.run(output).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_build_flags() {
        let cli = Cli::try_parse_from([
            "reposmith",
            "-vv",
            "build",
            "/srv/repo",
            "-d",
            "https://pkgs.example",
            "-u",
            "ci",
            "-p",
            "/run/secrets/pw",
            "-H",
            "-r",
            "-j",
            "3",
            "--package",
            "tool",
            "--package",
            "lib",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        let Commands::Build {
            repo,
            domain,
            user,
            passwd,
            headful,
            restart,
            jobs,
            package,
            key,
            github,
        } = cli.command
        else {
            panic!("expected build");
        };
        assert_eq!(repo.to_str(), Some("/srv/repo"));
        assert_eq!(domain, "https://pkgs.example");
        assert_eq!(user.as_deref(), Some("ci"));
        assert!(passwd.is_some());
        assert!(headful && restart);
        assert_eq!(jobs, Some(3));
        assert_eq!(package, vec!["tool".to_string(), "lib".to_string()]);
        assert!(key.is_none() && github.is_none());
    }

    #[test]
    fn test_build_requires_domain() {
        assert!(Cli::try_parse_from(["reposmith", "build", "/srv/repo"]).is_err());
    }
}
