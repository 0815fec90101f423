//! Error types for reposmith
//!
//! Domain-specific error types using thiserror. Every failure that can abort
//! a single package build converges on [`BuildError`], whose [`FailureKind`]
//! is what the build report shows.

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

use crate::infra::process::ProcessError;

/// Malformed or illegal package definitions
///
/// Never retried; aborts only the package that owns the definition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    /// Command name is not part of the language
    #[error("line {line}: unknown command '{command}'")]
    UnknownCommand { line: usize, command: String },

    /// Wrong number of arguments
    #[error("line {line}: {command} expects {expected} argument(s), got {found}")]
    ArgumentCount {
        line: usize,
        command: String,
        expected: String,
        found: usize,
    },

    /// Line could not be tokenized
    #[error("line {line}: {error}")]
    Syntax { line: usize, error: String },

    /// `SET` targets a reserved built-in
    #[error("cannot SET reserved variable '{key}'")]
    ReservedVariable { key: String },

    /// `SET` used twice for the same key
    #[error("variable '{key}' is SET more than once")]
    DuplicateVariable { key: String },

    /// A unique command appears more than once
    #[error("{command} may appear only once")]
    DuplicateCommand { command: String },

    /// Command order violated
    #[error("{message}")]
    Ordering { message: String },

    /// Command not allowed for this kind of definition
    #[error("{command} is not allowed in a {kind} definition")]
    NotAllowed { command: String, kind: String },

    /// Required command missing
    #[error("missing required command {command}")]
    MissingCommand { command: String },

    /// Package directory layout is wrong
    #[error("invalid package layout at '{path}': {error}")]
    Structure { path: PathBuf, error: String },

    /// Two definitions share name and ecosystem
    #[error("package '{name}' is defined more than once for {ecosystem}")]
    DuplicatePackage { name: String, ecosystem: String },

    /// A variable reference that cannot be honoured
    #[error("invalid variable use in '{value}': {error}")]
    InvalidVariable { value: String, error: String },

    /// Definition file has an unrecognised suffix
    #[error("unknown definition type: '{path}'")]
    UnknownSuffix { path: PathBuf },

    /// IO error while reading a definition
    #[error("IO error for '{path}': {error}")]
    IoError { path: PathBuf, error: String },

    /// Anything else the validator rejects
    #[error("{message}")]
    Invalid { message: String },
}

/// Download errors
#[derive(Error, Debug)]
pub enum DownloadError {
    /// Network error
    #[error("Network error downloading '{url}': {error}")]
    NetworkError { url: String, error: String },

    /// Upstream kept answering with rate-limit responses
    #[error("Rate limited by '{url}' after {attempts} attempt(s)")]
    RateLimited { url: String, attempts: u32 },

    /// IO error
    #[error("IO error for '{path}': {error}")]
    IoError { path: PathBuf, error: String },

    /// Max retries exceeded
    #[error("Download failed after {retries} retries: {url}")]
    MaxRetriesExceeded { url: String, retries: u32 },

    /// File name carries an allowed extension before a disallowed one
    #[error("Unsupported file name '{name}'")]
    InvalidFileName { name: String },

    /// Private store source is missing
    #[error("Source '{path}' does not exist in the private store")]
    SourceMissing { path: PathBuf },

    /// Target exists and is not the expected symlink
    #[error("'{path}' already exists and does not point to '{target}'")]
    SymlinkConflict { path: PathBuf, target: PathBuf },

    /// No browser driver configured
    #[error("No browser driver configured for '{url}'")]
    BrowserUnavailable { url: String },

    /// Browser driver failed
    #[error("Browser download from '{url}' failed: {error}")]
    Browser { url: String, error: String },
}

/// Upstream release lookup errors
#[derive(Error, Debug)]
pub enum ReleaseError {
    /// No release within the lookback window has a matching asset
    #[error("No release of '{repo}' among the newest {searched} has an asset matching '{pattern}'")]
    NoMatchingAsset {
        repo: String,
        pattern: String,
        searched: usize,
    },

    /// More than one asset matches within the chosen release
    #[error("Release '{tag}' of '{repo}' has several assets matching: {}", matches.join(", "))]
    AmbiguousAsset {
        repo: String,
        tag: String,
        matches: Vec<String>,
    },

    /// Asset pattern is not a valid glob
    #[error("Invalid asset pattern '{pattern}': {error}")]
    InvalidPattern { pattern: String, error: String },

    /// Repository has no (non-prerelease) releases
    #[error("No release found for '{repo}'")]
    NoRelease { repo: String },

    /// Malformed API payload
    #[error("Unexpected response for '{repo}': {error}")]
    InvalidResponse { repo: String, error: String },

    /// Transport failure
    #[error(transparent)]
    Download(#[from] DownloadError),
}

/// Version resolution errors
#[derive(Error, Debug)]
pub enum VersionError {
    /// Pattern does not match the file name
    #[error("Version pattern '{pattern}' does not match '{filename}'")]
    NoMatch { pattern: String, filename: String },

    /// Pattern is not a valid regex
    #[error("Invalid version pattern '{pattern}': {error}")]
    InvalidPattern { pattern: String, error: String },

    /// Pattern matched but has no first group
    #[error("Version pattern '{pattern}' has no capture group")]
    MissingGroup { pattern: String },

    /// Resolved to nothing usable
    #[error("Could not derive a version from '{source_text}'")]
    Empty { source_text: String },

    /// Upstream lookup failed
    #[error(transparent)]
    Release(#[from] ReleaseError),
}

/// Archive errors
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// Format not recognised from the extension
    #[error("Unsupported archive format: '{path}'")]
    Unsupported { path: PathBuf },

    /// IO error while unpacking
    #[error("IO error for '{path}': {error}")]
    IoError { path: PathBuf, error: String },

    /// External unpacker failed
    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Filesystem errors
#[derive(Error, Debug)]
pub enum FilesystemError {
    /// Failed to create directory
    #[error("Failed to create directory '{path}': {error}")]
    CreateDir { path: PathBuf, error: String },

    /// Failed to remove a path
    #[error("Failed to remove '{path}': {error}")]
    Remove { path: PathBuf, error: String },

    /// Failed to write file
    #[error("Failed to write file '{path}': {error}")]
    WriteFile { path: PathBuf, error: String },

    /// Failed to read file
    #[error("Failed to read file '{path}': {error}")]
    ReadFile { path: PathBuf, error: String },

    /// Failed to copy
    #[error("Failed to copy '{from}' to '{to}': {error}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        error: String,
    },

    /// Failed to move
    #[error("Failed to move '{from}' to '{to}': {error}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        error: String,
    },

    /// Failed to create a symlink
    #[error("Failed to link '{link}' to '{target}': {error}")]
    Symlink {
        link: PathBuf,
        target: PathBuf,
        error: String,
    },

    /// Working directory does not hold what the command needs
    #[error("Unexpected contents in '{path}': {error}")]
    Contents { path: PathBuf, error: String },
}

/// Ecosystem packaging errors
#[derive(Error, Debug)]
pub enum PackagingError {
    /// Native tool failed or timed out
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// Tool finished but produced nothing
    #[error("No artifact matching '{pattern}' in '{dir}'")]
    ArtifactMissing { dir: PathBuf, pattern: String },

    /// Debian scratch command issued in the wrong state
    #[error("{command} is not valid in state {state}")]
    InvalidState { command: String, state: String },

    /// `$DEST` directory missing at `CREATE_DEB`
    #[error("Package payload directory '{path}' does not exist")]
    MissingDest { path: PathBuf },

    /// Anything else a packager rejects
    #[error("{message}")]
    Invalid { message: String },

    /// IO error
    #[error("IO error for '{path}': {error}")]
    IoError { path: PathBuf, error: String },
}

/// Repository index assembly errors
#[derive(Error, Debug)]
pub enum AssemblyError {
    /// Artifact store holds a file the ecosystem does not know
    #[error("Unexpected file in artifact store: '{path}'")]
    UnexpectedFile { path: PathBuf },

    /// Index tool failed
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// Signing failed
    #[error(transparent)]
    Signing(#[from] crate::infra::gpg::SigningError),

    /// Tap repository update failed
    #[error(transparent)]
    Git(#[from] crate::infra::git::GitError),

    /// Filesystem failure
    #[error(transparent)]
    Filesystem(#[from] FilesystemError),

    /// Metadata could not be serialized
    #[error("Failed to serialize '{path}': {error}")]
    Serialize { path: PathBuf, error: String },
}

/// Package-local build failure
#[derive(Error, Debug)]
pub enum BuildError {
    /// Definition error
    #[error("Definition error: {0}")]
    Definition(#[from] DefinitionError),

    /// Download error
    #[error("Download error: {0}")]
    Download(#[from] DownloadError),

    /// Release lookup error
    #[error("Release error: {0}")]
    Release(#[from] ReleaseError),

    /// Version resolution error
    #[error("Version resolution error: {0}")]
    Version(#[from] VersionError),

    /// Archive error
    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// Packaging error
    #[error("Packaging error: {0}")]
    Packaging(#[from] PackagingError),

    /// Filesystem error
    #[error("Filesystem error: {0}")]
    Filesystem(#[from] FilesystemError),
}

/// Failure classes shown in the build report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Definition,
    Download,
    NoMatchingAsset,
    VersionResolution,
    UnsupportedArchive,
    Packaging,
    Filesystem,
    Busy,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Definition => "definition",
            Self::Download => "download",
            Self::NoMatchingAsset => "no matching asset",
            Self::VersionResolution => "version resolution",
            Self::UnsupportedArchive => "unsupported archive",
            Self::Packaging => "packaging",
            Self::Filesystem => "filesystem",
            Self::Busy => "busy",
        };
        f.write_str(s)
    }
}

fn release_kind(error: &ReleaseError) -> FailureKind {
    match error {
        ReleaseError::NoMatchingAsset { .. }
        | ReleaseError::AmbiguousAsset { .. }
        | ReleaseError::NoRelease { .. } => FailureKind::NoMatchingAsset,
        ReleaseError::InvalidPattern { .. } => FailureKind::Definition,
        ReleaseError::InvalidResponse { .. } | ReleaseError::Download(_) => FailureKind::Download,
    }
}

impl BuildError {
    /// Classify the failure for reporting
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Definition(_) => FailureKind::Definition,
            Self::Download(_) => FailureKind::Download,
            Self::Release(e) => release_kind(e),
            Self::Version(VersionError::Release(e)) => match release_kind(e) {
                kind @ (FailureKind::Download | FailureKind::Definition) => kind,
                _ => FailureKind::VersionResolution,
            },
            Self::Version(_) => FailureKind::VersionResolution,
            Self::Archive(ArchiveError::Unsupported { .. }) => FailureKind::UnsupportedArchive,
            Self::Archive(_) | Self::Filesystem(_) => FailureKind::Filesystem,
            Self::Packaging(_) => FailureKind::Packaging,
        }
    }
}
