//! Output formatting and progress indicators
//!
//! Progress bars, status markers and the end-of-build summary.

use indicatif::{ProgressBar, ProgressStyle};
use tracing::Level;

use crate::core::builder::{BuildReport, PackageStatus};

/// Global output flags
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    /// Only errors
    pub quiet: bool,
    /// Machine-readable report on stdout
    pub json: bool,
    /// `-v` count
    pub verbose: u8,
}

impl OutputConfig {
    pub fn new(quiet: bool, json: bool, verbose: u8) -> Self {
        Self {
            quiet,
            json,
            verbose,
        }
    }

    /// Log level implied by the flags
    pub fn level(&self) -> Level {
        if self.quiet {
            return Level::ERROR;
        }
        match self.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            _ => Level::DEBUG,
        }
    }

    /// Whether interactive progress should be drawn
    pub fn show_progress(&self) -> bool {
        !self.quiet && !self.json
    }
}

/// Create a progress bar for package builds
pub fn create_build_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} packages ({msg})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░"),
    );
    pb
}

/// Status message prefixes
pub mod status {
    /// Success prefix (green checkmark)
    pub const SUCCESS: &str = "✓";

    /// Error prefix (red X)
    pub const ERROR: &str = "✗";

    /// Warning prefix (yellow triangle)
    pub const WARNING: &str = "⚠";

    /// Info prefix (blue circle)
    pub const INFO: &str = "ℹ";
}

/// Print an error and its causes to stderr
pub fn display_error(error: &anyhow::Error) {
    eprintln!("{} Error: {error}", status::ERROR);
    for cause in error.chain().skip(1) {
        eprintln!("  caused by: {cause}");
    }
}

/// Human-readable lines for a build report
pub fn summary_lines(report: &BuildReport) -> Vec<String> {
    let mut lines = Vec::new();
    for package in &report.packages {
        let eco = package
            .ecosystem
            .map_or_else(|| "?".to_string(), |e| e.to_string());
        let version = package.version.as_deref().unwrap_or("-");
        let line = match package.status {
            PackageStatus::Built => {
                format!("{} {} ({eco}) {version} built", status::SUCCESS, package.name)
            }
            PackageStatus::UpToDate => {
                format!("{} {} ({eco}) {version} up to date", status::INFO, package.name)
            }
            PackageStatus::Failed => format!(
                "{} {} ({eco}) failed [{}]: {}",
                status::ERROR,
                package.name,
                package.kind.map_or_else(String::new, |k| k.to_string()),
                package.error.as_deref().unwrap_or("")
            ),
        };
        lines.push(line);
    }
    for assembly in &report.assemblies {
        if let Some(error) = &assembly.error {
            lines.push(format!(
                "{} {} index failed: {error}",
                status::ERROR,
                assembly.ecosystem
            ));
        }
    }
    for path in &report.removed {
        lines.push(format!("{} removed {}", status::WARNING, path.display()));
    }
    lines.push(format!(
        "{} built, {} up to date, {} failed",
        report.count(PackageStatus::Built),
        report.count(PackageStatus::UpToDate),
        report.count(PackageStatus::Failed)
    ));
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::builder::PackageReport;
    use crate::core::layout::Ecosystem;
    use crate::error::FailureKind;
    use std::path::PathBuf;

    #[test]
    fn test_level_from_flags() {
        assert_eq!(OutputConfig::new(false, false, 0).level(), Level::WARN);
        assert_eq!(OutputConfig::new(false, false, 1).level(), Level::INFO);
        assert_eq!(OutputConfig::new(false, false, 3).level(), Level::DEBUG);
        assert_eq!(OutputConfig::new(true, false, 2).level(), Level::ERROR);
        assert!(!OutputConfig::new(false, true, 0).show_progress());
    }

    #[test]
    fn test_summary_lines() {
        let report = BuildReport {
            packages: vec![
                PackageReport {
                    name: "tool".to_string(),
                    ecosystem: Some(Ecosystem::Brew),
                    definition: PathBuf::from("configs/tool.tap"),
                    status: PackageStatus::Built,
                    version: Some("2.0".to_string()),
                    artifact: None,
                    kind: None,
                    error: None,
                },
                PackageReport {
                    name: "lib".to_string(),
                    ecosystem: Some(Ecosystem::Apt),
                    definition: PathBuf::from("configs/lib.rep"),
                    status: PackageStatus::Failed,
                    version: None,
                    artifact: None,
                    kind: Some(FailureKind::Download),
                    error: Some("404".to_string()),
                },
            ],
            ..BuildReport::default()
        };
        let lines = summary_lines(&report);
        assert_eq!(lines[0], "✓ tool (brew) 2.0 built");
        assert_eq!(lines[1], "✗ lib (apt) failed [download]: 404");
        assert_eq!(lines.last().unwrap(), "1 built, 0 up to date, 1 failed");
    }
}
