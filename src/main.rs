//! Reposmith CLI
//!
//! Entry point for the reposmith command-line application.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use reposmith::cli::output::display_error;
use reposmith::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = cli.output();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(output.level().into()))
        .with_writer(std::io::stderr)
        .init();

    match cli.run().await {
        Ok(0) => Ok(()),
        Ok(code) => std::process::exit(code),
        Err(e) => {
            display_error(&e);
            std::process::exit(1);
        }
    }
}
