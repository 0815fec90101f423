//! External process execution
//!
//! Runs native tools (dpkg, conda, gpg, choco) with a bounded wall-clock
//! timeout. A process that exceeds its timeout is killed and reported as
//! [`ProcessError::TimedOut`]; it is never left running in the background.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

use crate::config::defaults;

/// Process execution errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    /// Program is not on PATH
    #[error("'{program}' not found in PATH")]
    NotFound { program: String },

    /// Spawning failed
    #[error("Failed to start '{program}': {error}")]
    SpawnFailed { program: String, error: String },

    /// Non-zero exit
    #[error("'{program}' exited with {}: {stderr}", code.map_or_else(|| "signal".to_string(), |c| format!("status {c}")))]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    /// Killed after the timeout
    #[error("'{program}' timed out after {seconds}s")]
    TimedOut { program: String, seconds: u64 },
}

/// Captured output of a finished process
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Standard output, lossily decoded
    pub stdout: String,
    /// Standard error, lossily decoded
    pub stderr: String,
}

/// A single external command invocation
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    env: BTreeMap<String, String>,
    timeout: Duration,
    check: bool,
}

impl ProcessSpec {
    /// Create a spec for `program` with the default timeout
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
            timeout: Duration::from_secs(defaults::PROCESS_TIMEOUT_SECS),
            check: true,
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run inside `dir`
    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    /// Set an environment variable for the child
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Override the timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Do not treat a non-zero exit as an error
    pub fn unchecked(mut self) -> Self {
        self.check = false;
        self
    }

    /// Program name
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments
    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Run to completion, capturing output
    pub async fn run(&self) -> Result<ProcessOutput, ProcessError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }

        tracing::debug!("Running {} {}", self.program, self.args.join(" "));

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ProcessError::NotFound {
                    program: self.program.clone(),
                }
            } else {
                ProcessError::SpawnFailed {
                    program: self.program.clone(),
                    error: e.to_string(),
                }
            }
        })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ProcessError::TimedOut {
                program: self.program.clone(),
                seconds: self.timeout.as_secs(),
            })?
            .map_err(|e| ProcessError::SpawnFailed {
                program: self.program.clone(),
                error: e.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if self.check && !output.status.success() {
            return Err(ProcessError::Failed {
                program: self.program.clone(),
                code: output.status.code(),
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(ProcessOutput { stdout, stderr })
    }

    /// Start in the background and return the pid
    ///
    /// The child outlives this process; no timeout applies.
    pub fn spawn_detached(&self) -> Result<u32, ProcessError> {
        let mut cmd = std::process::Command::new(&self.program);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }

        tracing::debug!("Spawning {} {}", self.program, self.args.join(" "));
        let child = cmd.spawn().map_err(|e| ProcessError::SpawnFailed {
            program: self.program.clone(),
            error: e.to_string(),
        })?;
        Ok(child.id())
    }
}

/// Check whether a program is available on PATH
pub fn is_available(program: &str) -> bool {
    which::which(program).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_spec_builder() {
        let spec = ProcessSpec::new("dpkg-scanpackages")
            .arg("-m")
            .args(["pool/"])
            .env("LC_ALL", "C");
        assert_eq!(spec.program(), "dpkg-scanpackages");
        assert_eq!(spec.arguments(), ["-m", "pool/"]);
    }

    #[tokio::test]
    async fn test_run_captures_stdout() {
        let out = ProcessSpec::new("sh")
            .args(["-c", "echo hello"])
            .run()
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_run_in_directory() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("marker"), "x").unwrap();
        let out = ProcessSpec::new("ls")
            .current_dir(temp.path())
            .run()
            .await
            .unwrap();
        assert!(out.stdout.contains("marker"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_error() {
        let err = ProcessSpec::new("sh")
            .args(["-c", "echo boom >&2; exit 3"])
            .run()
            .await
            .unwrap_err();
        match err {
            ProcessError::Failed { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "boom");
            }
            e => panic!("Expected Failed, got: {e:?}"),
        }
    }

    #[tokio::test]
    async fn test_unchecked_ignores_exit_status() {
        let out = ProcessSpec::new("sh")
            .args(["-c", "exit 1"])
            .unchecked()
            .run()
            .await;
        assert!(out.is_ok());
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let err = ProcessSpec::new("sleep")
            .arg("5")
            .timeout(Duration::from_millis(100))
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::TimedOut { .. }));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let err = ProcessSpec::new("definitely-not-a-real-program-xyz")
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::NotFound { .. }));
    }
}
