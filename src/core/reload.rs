//! Feed server restart
//!
//! Restarting is the one operation that touches a running service, so it
//! sits behind [`ReloadHook`]. The default hook manages a local
//! `express-chocolatey-server` through a pid file in the feed directory; a
//! configured `reload_command` replaces it entirely.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::core::layout::{Ecosystem, RepositoryLayout};
use crate::core::settings::Settings;
use crate::error::FilesystemError;
use crate::infra::filesystem;
use crate::infra::process::{ProcessError, ProcessSpec};

/// Pid file of the feed server, hidden so reassembly keeps it
pub const PID_FILE: &str = ".server.pid";

#[derive(Error, Debug)]
pub enum ReloadError {
    #[error("Feed directory '{path}' does not exist")]
    MissingFeed { path: PathBuf },

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Filesystem(#[from] FilesystemError),
}

/// Brings served content up to date after assembly
#[async_trait]
pub trait ReloadHook: Send + Sync {
    async fn reload(&self, layout: &RepositoryLayout) -> Result<(), ReloadError>;
}

/// Hook selected by the repository settings
pub fn hook_for(settings: &Settings) -> Box<dyn ReloadHook> {
    match &settings.choco.reload_command {
        Some(command) => Box::new(CommandHook::new(command.clone())),
        None => Box::new(ChocoServerHook::new(settings.choco_port())),
    }
}

/// Runs a shell command from the repository root
#[derive(Debug, Clone)]
pub struct CommandHook {
    command: String,
}

impl CommandHook {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl ReloadHook for CommandHook {
    async fn reload(&self, layout: &RepositoryLayout) -> Result<(), ReloadError> {
        tracing::info!("Running reload command: {}", self.command);
        ProcessSpec::new("sh")
            .args(["-c", self.command.as_str()])
            .current_dir(layout.root())
            .run()
            .await?;
        Ok(())
    }
}

/// Stops the previous feed server and starts a new one over the feed
#[derive(Debug, Clone)]
pub struct ChocoServerHook {
    port: u16,
    program: Vec<String>,
}

impl ChocoServerHook {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            program: vec!["nohup".into(), "npx".into(), "express-chocolatey-server".into()],
        }
    }

    /// Replace the server command line, package paths are appended
    #[must_use]
    pub fn with_program(mut self, program: Vec<String>) -> Self {
        self.program = program;
        self
    }
}

/// Pid recorded in the feed directory, if any
pub fn read_pid(feed: &Path) -> Option<u32> {
    std::fs::read_to_string(feed.join(PID_FILE))
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

async fn stop(pid: u32) {
    tracing::info!("Stopping feed server {pid}");
    let result = ProcessSpec::new("kill")
        .arg(pid.to_string())
        .unchecked()
        .run()
        .await;
    if let Err(e) = result {
        tracing::warn!("Failed to stop feed server {pid}: {e}");
    }
}

#[async_trait]
impl ReloadHook for ChocoServerHook {
    async fn reload(&self, layout: &RepositoryLayout) -> Result<(), ReloadError> {
        let feed = layout.index_dir(Ecosystem::Choco);
        if !feed.is_dir() {
            return Err(ReloadError::MissingFeed { path: feed });
        }
        if let Some(pid) = read_pid(&feed) {
            stop(pid).await;
        }

        let Some((program, args)) = self.program.split_first() else {
            return Ok(());
        };
        let mut packages: Vec<String> = filesystem::glob_in(&feed, "*.nupkg")?
            .iter()
            .map(|p| filesystem::file_name(p))
            .collect();
        packages.sort();

        let pid = ProcessSpec::new(program.as_str())
            .args(args.iter().map(String::as_str))
            .args(packages)
            .env("PORT", self.port.to_string())
            .current_dir(&feed)
            .spawn_detached()?;
        filesystem::write_file(&feed.join(PID_FILE), pid.to_string())?;
        tracing::info!("Feed server started as {pid} on port {}", self.port);
        Ok(())
    }
}
