//! Package definitions
//!
//! A definition is a small line-oriented script. Each logical line is
//! `COMMAND arg arg ...`, split shell-style; indented lines that follow a
//! command form one extra multi-line argument (used for cask bodies).
//!
//! Loading a definition happens in three steps: the text is split into raw
//! lines, each line becomes a typed [`Command`], and the command list is
//! checked against the structure and kind rules of its ecosystem. A
//! definition that passes is immutable for the rest of the build.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::core::layout::{Ecosystem, PackageKind};
use crate::core::scope::RESERVED;
use crate::error::DefinitionError;

/// Helpers `DH_DISABLE` may switch off
pub const DISABLEABLE_HELPERS: &[&str] = &["dh_usrlocal"];

/// How the version is obtained
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSpec {
    /// The token is the version
    Literal(String),
    /// Regex applied to the remote file name; group 1 is the version
    Regex(String),
    /// Newest release of a GitHub repository
    GitHub {
        repo: String,
        pattern: Option<String>,
    },
}

impl VersionSpec {
    /// Parse the `VERSION` argument
    pub fn parse(token: &str) -> Result<Self, DefinitionError> {
        if let Some(rest) = token.strip_prefix("gh:") {
            let (repo, pattern) = match rest.split_once(':') {
                Some((repo, pattern)) => (repo, Some(pattern.to_string())),
                None => (rest, None),
            };
            validate_repo(repo)?;
            return Ok(Self::GitHub {
                repo: repo.to_string(),
                pattern: pattern.filter(|p| !p.is_empty()),
            });
        }
        if let Some(pattern) = token.strip_prefix("re:") {
            if pattern.is_empty() {
                return Err(DefinitionError::Invalid {
                    message: "empty VERSION pattern".to_string(),
                });
            }
            return Ok(Self::Regex(pattern.to_string()));
        }
        if token.is_empty() || token.contains(['|', '/', '$']) {
            return Err(DefinitionError::Invalid {
                message: format!("invalid literal VERSION '{token}'"),
            });
        }
        Ok(Self::Literal(token.to_string()))
    }
}

fn validate_repo(repo: &str) -> Result<(), DefinitionError> {
    let valid = repo
        .split_once('/')
        .is_some_and(|(owner, name)| !owner.is_empty() && !name.is_empty() && !name.contains('/'));
    if valid {
        Ok(())
    } else {
        Err(DefinitionError::Invalid {
            message: format!("'{repo}' is not a <user>/<repo> GitHub repository"),
        })
    }
}

/// One typed directive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Version(VersionSpec),
    Sandbox,
    Set { key: String, value: String },

    Download { url: String },
    DownloadRemoteName { url: String },
    DownloadGh {
        repo: String,
        pattern: String,
        tag: Option<String>,
    },
    DownloadBrowser { spec: String },
    CopySrc { path: String },
    SymlinkSrc { path: String },

    Extract { glob: Option<String> },
    Mkdir { path: String },
    Rename { path: String },
    Remove { path: String },
    Copy { src: String, dst: String },
    CopyFix { src: String, dst: String },
    CopyDir { src: String, dst: String },
    /// `<glob> <dst>` or `<srcdir> <dst> <glob>`
    CopyGlob {
        src_dir: Option<String>,
        dst: String,
        glob: String,
    },

    CreateDeb { deps: Option<String> },
    BuildDeb,
    DhDisable { helper: String },
    SetNative,
    IncludeBinaries,

    Cask { body: String },
    Conda,
    /// Internal: produced by rewriting `CONDA`
    CondaBuild,
    Choco,
}

impl Command {
    /// Keyword as written in definitions
    pub fn name(&self) -> &'static str {
        match self {
            Self::Version(_) => "VERSION",
            Self::Sandbox => "SANDBOX",
            Self::Set { .. } => "SET",
            Self::Download { .. } => "DOWNLOAD",
            Self::DownloadRemoteName { .. } => "DOWNLOAD_REMOTE_NAME",
            Self::DownloadGh { .. } => "DOWNLOAD_GH",
            Self::DownloadBrowser { .. } => "DOWNLOAD_BROWSER",
            Self::CopySrc { .. } => "COPY_SRC",
            Self::SymlinkSrc { .. } => "SYMLINK_SRC",
            Self::Extract { .. } => "EXTRACT",
            Self::Mkdir { .. } => "MKDIR",
            Self::Rename { .. } => "RENAME",
            Self::Remove { .. } => "REMOVE",
            Self::Copy { .. } => "COPY",
            Self::CopyFix { .. } => "COPY_FIX",
            Self::CopyDir { .. } => "COPY_DIR",
            Self::CopyGlob { .. } => "COPY_GLOB",
            Self::CreateDeb { .. } => "CREATE_DEB",
            Self::BuildDeb => "BUILD_DEB",
            Self::DhDisable { .. } => "DH_DISABLE",
            Self::SetNative => "SET_NATIVE",
            Self::IncludeBinaries => "INCLUDE_BINARIES",
            Self::Cask { .. } => "CASK",
            Self::Conda => "CONDA",
            Self::CondaBuild => "CONDA_BUILD",
            Self::Choco => "CHOCO",
        }
    }

    /// Fetches the package payload
    pub fn is_download(&self) -> bool {
        matches!(
            self,
            Self::Download { .. }
                | Self::DownloadRemoteName { .. }
                | Self::DownloadGh { .. }
                | Self::DownloadBrowser { .. }
                | Self::CopySrc { .. }
                | Self::SymlinkSrc { .. }
        )
    }

    fn is_unique(&self) -> bool {
        matches!(
            self,
            Self::Version(_)
                | Self::Sandbox
                | Self::CreateDeb { .. }
                | Self::BuildDeb
                | Self::Cask { .. }
                | Self::Conda
                | Self::Choco
        )
    }
}

/// A line before typing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
    /// 1-based line number of the command
    pub line: usize,
    pub command: String,
    pub args: Vec<String>,
}

// ============================================
// Tokenizing
// ============================================

/// Split a line shell-style
///
/// Whitespace separates words; single quotes are literal; double quotes
/// allow `\"` and `\\`; outside quotes a backslash escapes the next
/// character.
pub fn split_words(line: &str) -> Result<Vec<String>, String> {
    #[derive(PartialEq)]
    enum Quote {
        None,
        Single,
        Double,
    }

    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote = Quote::None;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match quote {
            Quote::Single => {
                if c == '\'' {
                    quote = Quote::None;
                } else {
                    current.push(c);
                }
            }
            Quote::Double => match c {
                '"' => quote = Quote::None,
                '\\' => match chars.next() {
                    Some(next @ ('"' | '\\')) => current.push(next),
                    Some(next) => {
                        current.push('\\');
                        current.push(next);
                    }
                    None => return Err("unterminated escape".to_string()),
                },
                _ => current.push(c),
            },
            Quote::None => match c {
                '\'' => {
                    quote = Quote::Single;
                    in_word = true;
                }
                '"' => {
                    quote = Quote::Double;
                    in_word = true;
                }
                '\\' => {
                    let next = chars.next().ok_or("unterminated escape")?;
                    current.push(next);
                    in_word = true;
                }
                c if c.is_whitespace() => {
                    if in_word {
                        words.push(std::mem::take(&mut current));
                        in_word = false;
                    }
                }
                c => {
                    current.push(c);
                    in_word = true;
                }
            },
        }
    }

    if quote != Quote::None {
        return Err("unterminated quote".to_string());
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

/// Split definition text into raw command lines
pub fn read_lines(text: &str) -> Result<Vec<RawLine>, DefinitionError> {
    let mut lines: Vec<RawLine> = Vec::new();
    let mut indent: Option<String> = None;

    for (idx, line) in text.lines().enumerate() {
        let number = idx + 1;
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }

        if line.starts_with([' ', '\t']) {
            let Some(last) = lines.last_mut() else {
                return Err(DefinitionError::Syntax {
                    line: number,
                    error: "first line must not be indented".to_string(),
                });
            };
            let prefix = indent.get_or_insert_with(|| {
                last.args.push(String::new());
                let width = line.len() - line.trim_start().len();
                line[..width].to_string()
            });
            let Some(content) = line.strip_prefix(prefix.as_str()) else {
                return Err(DefinitionError::Syntax {
                    line: number,
                    error: "less indentation than the first indented line".to_string(),
                });
            };
            if let Some(arg) = last.args.last_mut() {
                arg.push_str(content);
                arg.push('\n');
            }
            continue;
        }

        indent = None;
        let mut words = split_words(line).map_err(|error| DefinitionError::Syntax {
            line: number,
            error,
        })?;
        if words.is_empty() {
            continue;
        }
        let command = words.remove(0);
        lines.push(RawLine {
            line: number,
            command,
            args: words,
        });
    }
    Ok(lines)
}

// ============================================
// Typing
// ============================================

fn arg_count(raw: &RawLine, allowed: &[usize]) -> Result<(), DefinitionError> {
    if allowed.contains(&raw.args.len()) {
        return Ok(());
    }
    let expected = allowed
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" or ");
    Err(DefinitionError::ArgumentCount {
        line: raw.line,
        command: raw.command.clone(),
        expected,
        found: raw.args.len(),
    })
}

/// Type one raw line
pub fn parse_command(raw: &RawLine) -> Result<Command, DefinitionError> {
    let a = &raw.args;
    let arg = |i: usize| a[i].clone();

    let command = match raw.command.as_str() {
        "CHOCO" | "SANDBOX" | "BUILD_DEB" | "CONDA" | "INCLUDE_BINARIES" | "SET_NATIVE" => {
            arg_count(raw, &[0])?;
            match raw.command.as_str() {
                "CHOCO" => Command::Choco,
                "SANDBOX" => Command::Sandbox,
                "BUILD_DEB" => Command::BuildDeb,
                "CONDA" => Command::Conda,
                "INCLUDE_BINARIES" => Command::IncludeBinaries,
                _ => Command::SetNative,
            }
        }
        "VERSION" => {
            arg_count(raw, &[1])?;
            Command::Version(VersionSpec::parse(&a[0])?)
        }
        "DOWNLOAD" => {
            arg_count(raw, &[1])?;
            Command::Download { url: arg(0) }
        }
        "DOWNLOAD_REMOTE_NAME" => {
            arg_count(raw, &[1])?;
            Command::DownloadRemoteName { url: arg(0) }
        }
        "DOWNLOAD_BROWSER" => {
            arg_count(raw, &[1])?;
            Command::DownloadBrowser { spec: arg(0) }
        }
        "DOWNLOAD_GH" => {
            arg_count(raw, &[2, 3])?;
            validate_repo(&a[0])?;
            Command::DownloadGh {
                repo: arg(0),
                pattern: arg(1),
                tag: a.get(2).cloned(),
            }
        }
        "SYMLINK_SRC" => {
            arg_count(raw, &[1])?;
            Command::SymlinkSrc { path: arg(0) }
        }
        "COPY_SRC" => {
            arg_count(raw, &[1])?;
            Command::CopySrc { path: arg(0) }
        }
        "MKDIR" => {
            arg_count(raw, &[1])?;
            Command::Mkdir { path: arg(0) }
        }
        "RENAME" => {
            arg_count(raw, &[1])?;
            Command::Rename { path: arg(0) }
        }
        "REMOVE" => {
            arg_count(raw, &[1])?;
            Command::Remove { path: arg(0) }
        }
        "CASK" => {
            arg_count(raw, &[1])?;
            Command::Cask { body: arg(0) }
        }
        "DH_DISABLE" => {
            arg_count(raw, &[1])?;
            Command::DhDisable { helper: arg(0) }
        }
        "COPY" | "COPY_FIX" | "COPY_DIR" => {
            arg_count(raw, &[2])?;
            let (src, dst) = (arg(0), arg(1));
            match raw.command.as_str() {
                "COPY" => Command::Copy { src, dst },
                "COPY_FIX" => Command::CopyFix { src, dst },
                _ => Command::CopyDir { src, dst },
            }
        }
        "SET" => {
            arg_count(raw, &[2])?;
            Command::Set {
                key: arg(0),
                value: arg(1),
            }
        }
        "COPY_GLOB" => {
            arg_count(raw, &[2, 3])?;
            if a.len() == 2 {
                Command::CopyGlob {
                    src_dir: None,
                    glob: arg(0),
                    dst: arg(1),
                }
            } else {
                Command::CopyGlob {
                    src_dir: Some(arg(0)),
                    dst: arg(1),
                    glob: arg(2),
                }
            }
        }
        "EXTRACT" => {
            arg_count(raw, &[0, 1])?;
            Command::Extract {
                glob: a.first().cloned(),
            }
        }
        "CREATE_DEB" => {
            arg_count(raw, &[0, 1])?;
            Command::CreateDeb {
                deps: a.first().cloned(),
            }
        }
        "CONDA_BUILD" => {
            return Err(DefinitionError::Invalid {
                message: format!("line {}: CONDA_BUILD is internal, use CONDA", raw.line),
            })
        }
        other => {
            return Err(DefinitionError::UnknownCommand {
                line: raw.line,
                command: other.to_string(),
            })
        }
    };
    Ok(command)
}

/// Parse definition text into typed commands
pub fn parse_commands(text: &str) -> Result<Vec<Command>, DefinitionError> {
    read_lines(text)?.iter().map(parse_command).collect()
}

// ============================================
// Definitions
// ============================================

/// A loaded, validated definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageDefinition {
    pub name: String,
    pub ecosystem: Ecosystem,
    pub kind: PackageKind,
    /// The definition file
    pub path: PathBuf,
    /// Package directory (`$PKG`) for directory-form definitions
    pub pkg_dir: Option<PathBuf>,
    /// `None` only when `DOWNLOAD_GH` supplies the version
    pub version: Option<VersionSpec>,
    /// Commands after the `VERSION`/`SANDBOX` header, in file order
    pub commands: Vec<Command>,
    pub sandboxed: bool,
}

impl PackageDefinition {
    /// The definition's download command, if any
    pub fn download(&self) -> Option<&Command> {
        self.commands.iter().find(|c| c.is_download())
    }
}

/// `(name, ecosystem)` a definition path claims, without reading it
pub fn identity(path: &Path) -> Option<(String, Ecosystem)> {
    let name = path.file_stem()?.to_string_lossy().into_owned();
    let ext = path.extension()?.to_string_lossy().into_owned();
    Some((name, Ecosystem::from_extension(&ext)?))
}

/// Definition entries in `configs/`, hidden entries skipped
pub fn discover(configs: &Path) -> Result<Vec<PathBuf>, DefinitionError> {
    let read = std::fs::read_dir(configs).map_err(|e| DefinitionError::IoError {
        path: configs.to_path_buf(),
        error: e.to_string(),
    })?;
    let mut found: Vec<PathBuf> = read
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| {
            !p.file_name()
                .is_some_and(|n| n.to_string_lossy().starts_with('.'))
        })
        .collect();
    found.sort();
    Ok(found)
}

/// Names defined more than once for the same ecosystem
pub fn duplicates(identities: &[(String, Ecosystem)]) -> Vec<(String, Ecosystem)> {
    let mut counts: HashMap<&(String, Ecosystem), usize> = HashMap::new();
    for id in identities {
        *counts.entry(id).or_default() += 1;
    }
    let mut dups: Vec<_> = counts
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(id, _)| id.clone())
        .collect();
    dups.sort();
    dups
}

/// Load and validate the definition at `path` (file or package directory)
pub fn load(path: &Path) -> Result<PackageDefinition, DefinitionError> {
    let (name, ecosystem) = identity(path).ok_or_else(|| DefinitionError::UnknownSuffix {
        path: path.to_path_buf(),
    })?;

    let (file, pkg_dir) = if path.is_dir() {
        check_package_dir(&name, ecosystem, path)?;
        (path.join(filesystem_name(path)), Some(path.to_path_buf()))
    } else {
        (path.to_path_buf(), None)
    };

    let text = std::fs::read_to_string(&file).map_err(|e| DefinitionError::IoError {
        path: file.clone(),
        error: e.to_string(),
    })?;
    let commands = parse_commands(&text)?;
    validate(name, ecosystem, file, pkg_dir, commands)
}

fn filesystem_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Check header order and structure, then apply the ecosystem's kind rules
pub fn validate(
    name: String,
    ecosystem: Ecosystem,
    path: PathBuf,
    pkg_dir: Option<PathBuf>,
    commands: Vec<Command>,
) -> Result<PackageDefinition, DefinitionError> {
    check_unique(&commands)?;

    let downloads: Vec<&Command> = commands.iter().filter(|c| c.is_download()).collect();
    if downloads.len() > 1 {
        return Err(DefinitionError::Invalid {
            message: "more than one download command".to_string(),
        });
    }
    let download = downloads.first().copied().cloned();
    if ecosystem != Ecosystem::Apt && matches!(download, Some(Command::DownloadGh { .. })) {
        return Err(DefinitionError::NotAllowed {
            command: "DOWNLOAD_GH".to_string(),
            kind: ecosystem.to_string(),
        });
    }

    // Header: [VERSION] [SANDBOX]
    let mut rest = commands.as_slice();
    let mut version = None;
    if let Some(Command::Version(spec)) = rest.first() {
        version = Some(spec.clone());
        rest = &rest[1..];
    }
    let mut sandboxed = false;
    if let Some(Command::Sandbox) = rest.first() {
        sandboxed = true;
        rest = &rest[1..];
    }
    for command in rest {
        match command {
            Command::Version(_) => {
                return Err(ordering("VERSION must be the first command"));
            }
            Command::Sandbox => {
                return Err(ordering(
                    "SANDBOX must directly follow VERSION, or be first without VERSION",
                ));
            }
            _ => {}
        }
    }

    check_versioning(version.as_ref(), download.as_ref())?;
    check_sets(rest)?;

    if sandboxed && !rest.iter().any(|c| matches!(c, Command::BuildDeb)) {
        return Err(DefinitionError::MissingCommand {
            command: "BUILD_DEB".to_string(),
        });
    }
    if !sandboxed && rest.iter().any(|c| matches!(c, Command::Mkdir { .. })) {
        return Err(ordering("MKDIR is only allowed in sandboxed definitions"));
    }

    let mut definition = PackageDefinition {
        name,
        ecosystem,
        kind: PackageKind::DebianWebsite,
        path,
        pkg_dir,
        version,
        commands: rest.to_vec(),
        sandboxed,
    };

    match ecosystem {
        Ecosystem::Apt => apt_rules(&mut definition)?,
        Ecosystem::Brew => tap_rules(&mut definition)?,
        Ecosystem::Conda => conda_rules(&mut definition)?,
        Ecosystem::Choco => choco_rules(&mut definition)?,
    }
    Ok(definition)
}

fn ordering(message: &str) -> DefinitionError {
    DefinitionError::Ordering {
        message: message.to_string(),
    }
}

fn not_allowed(command: &Command, kind: PackageKind) -> DefinitionError {
    DefinitionError::NotAllowed {
        command: command.name().to_string(),
        kind: kind.to_string(),
    }
}

fn check_unique(commands: &[Command]) -> Result<(), DefinitionError> {
    let mut seen: Vec<&'static str> = Vec::new();
    for command in commands.iter().filter(|c| c.is_unique()) {
        if seen.contains(&command.name()) {
            return Err(DefinitionError::DuplicateCommand {
                command: command.name().to_string(),
            });
        }
        seen.push(command.name());
    }
    Ok(())
}

fn check_versioning(
    version: Option<&VersionSpec>,
    download: Option<&Command>,
) -> Result<(), DefinitionError> {
    match (version, download) {
        (None, Some(Command::DownloadGh { .. })) => Ok(()),
        (None, _) => Err(DefinitionError::MissingCommand {
            command: "VERSION".to_string(),
        }),
        (Some(VersionSpec::Regex(_)), Some(Command::DownloadRemoteName { .. } | Command::DownloadBrowser { .. })) => {
            Ok(())
        }
        (Some(VersionSpec::Regex(_)), _) => Err(DefinitionError::Invalid {
            message: "VERSION re: requires DOWNLOAD_REMOTE_NAME or DOWNLOAD_BROWSER".to_string(),
        }),
        (
            Some(VersionSpec::GitHub { repo, .. }),
            Some(Command::DownloadGh {
                repo: download_repo, ..
            }),
        ) if repo != download_repo => Err(DefinitionError::Invalid {
            message: format!(
                "VERSION gh:{repo} and DOWNLOAD_GH {download_repo} name different repositories"
            ),
        }),
        (Some(VersionSpec::Literal(_)), Some(Command::DownloadGh { .. })) => {
            Err(DefinitionError::Invalid {
                message: "DOWNLOAD_GH provides the version; drop the literal VERSION".to_string(),
            })
        }
        _ => Ok(()),
    }
}

/// `SET` lines come first after the header, with unique, unreserved keys
fn check_sets(rest: &[Command]) -> Result<(), DefinitionError> {
    let leading = rest
        .iter()
        .take_while(|c| matches!(c, Command::Set { .. }))
        .count();
    if rest[leading..]
        .iter()
        .any(|c| matches!(c, Command::Set { .. }))
    {
        return Err(ordering(
            "SET commands must directly follow VERSION and SANDBOX",
        ));
    }

    let mut keys: Vec<&str> = Vec::new();
    for command in &rest[..leading] {
        let Command::Set { key, .. } = command else {
            continue;
        };
        if RESERVED.contains(&key.as_str()) {
            return Err(DefinitionError::ReservedVariable { key: key.clone() });
        }
        let valid = key.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(DefinitionError::InvalidVariable {
                value: key.clone(),
                error: "variable names are letters, digits and underscores".to_string(),
            });
        }
        if keys.contains(&key.as_str()) {
            return Err(DefinitionError::DuplicateVariable { key: key.clone() });
        }
        keys.push(key);
    }
    Ok(())
}

/// Commands other than the leading `SET`s
fn body(commands: &[Command]) -> &[Command] {
    let leading = commands
        .iter()
        .take_while(|c| matches!(c, Command::Set { .. }))
        .count();
    &commands[leading..]
}

fn apt_rules(def: &mut PackageDefinition) -> Result<(), DefinitionError> {
    if def.download().is_none() {
        return Err(DefinitionError::MissingCommand {
            command: "a download command".to_string(),
        });
    }

    if def.pkg_dir.is_none() {
        def.kind = if matches!(def.download(), Some(Command::DownloadGh { .. })) {
            PackageKind::DebianGitHub
        } else {
            PackageKind::DebianWebsite
        };
        if def.sandboxed {
            return Err(not_allowed(&Command::Sandbox, def.kind));
        }
        if let Some(bad) = def.commands.iter().find(|c| {
            matches!(
                c,
                Command::CreateDeb { .. }
                    | Command::BuildDeb
                    | Command::DhDisable { .. }
                    | Command::SetNative
                    | Command::IncludeBinaries
                    | Command::Cask { .. }
                    | Command::Conda
                    | Command::Choco
            )
        }) {
            return Err(not_allowed(bad, def.kind));
        }
        return Ok(());
    }

    def.kind = PackageKind::DebianScratch;
    if let Some(bad) = def
        .commands
        .iter()
        .find(|c| matches!(c, Command::Cask { .. } | Command::Conda | Command::Choco))
    {
        return Err(not_allowed(bad, def.kind));
    }
    if !def.sandboxed {
        return Err(DefinitionError::MissingCommand {
            command: "SANDBOX".to_string(),
        });
    }
    if !def.commands.iter().any(|c| matches!(c, Command::CreateDeb { .. })) {
        return Err(DefinitionError::MissingCommand {
            command: "CREATE_DEB".to_string(),
        });
    }
    if !matches!(def.commands.last(), Some(Command::BuildDeb)) {
        return Err(ordering("BUILD_DEB must be the last command"));
    }

    // DH_DISABLE lines sit directly before BUILD_DEB
    let before_build = &def.commands[..def.commands.len() - 1];
    let trailing = before_build
        .iter()
        .rev()
        .take_while(|c| matches!(c, Command::DhDisable { .. }))
        .count();
    let total = before_build
        .iter()
        .filter(|c| matches!(c, Command::DhDisable { .. }))
        .count();
    if trailing != total {
        return Err(ordering(
            "DH_DISABLE commands must come directly before BUILD_DEB",
        ));
    }
    let mut helpers: Vec<&str> = Vec::new();
    for command in &before_build[before_build.len() - trailing..] {
        if let Command::DhDisable { helper } = command {
            if !DISABLEABLE_HELPERS.contains(&helper.as_str()) {
                return Err(DefinitionError::Invalid {
                    message: format!("unsupported debhelper '{helper}'"),
                });
            }
            if helpers.contains(&helper.as_str()) {
                return Err(DefinitionError::DuplicateCommand {
                    command: format!("DH_DISABLE {helper}"),
                });
            }
            helpers.push(helper);
        }
    }
    Ok(())
}

fn tap_rules(def: &mut PackageDefinition) -> Result<(), DefinitionError> {
    def.kind = PackageKind::CaskTap;
    if def.pkg_dir.is_some() {
        return Err(DefinitionError::Structure {
            path: def.path.clone(),
            error: "tap definitions are single files".to_string(),
        });
    }
    if let Some(bad) = body(&def.commands)
        .iter()
        .find(|c| !(c.is_download() || matches!(c, Command::Extract { .. } | Command::Cask { .. })))
    {
        return Err(not_allowed(bad, def.kind));
    }
    let Some(Command::Cask { body }) = def.commands.last() else {
        return Err(if def.commands.iter().any(|c| matches!(c, Command::Cask { .. })) {
            ordering("CASK must be the last command")
        } else {
            DefinitionError::MissingCommand {
                command: "CASK".to_string(),
            }
        });
    };
    if body.contains("$TAP_FILE") && def.download().is_none() {
        return Err(DefinitionError::InvalidVariable {
            value: "$TAP_FILE".to_string(),
            error: "used without a download command".to_string(),
        });
    }
    Ok(())
}

/// `[download] <final>` after the `SET` lines
fn short_form(def: &PackageDefinition, last: &Command) -> Result<(), DefinitionError> {
    if def.version.is_none() {
        return Err(DefinitionError::MissingCommand {
            command: "VERSION".to_string(),
        });
    }
    if def.pkg_dir.is_none() {
        return Err(DefinitionError::Structure {
            path: def.path.clone(),
            error: format!("{} definitions must be package directories", def.ecosystem),
        });
    }
    let body = body(&def.commands);
    match body {
        [only] if only == last => Ok(()),
        [first, second] if first.is_download() && second == last => Ok(()),
        [.., tail] if tail != last => Err(ordering(&format!(
            "{} must be the last command",
            last.name()
        ))),
        [] => Err(DefinitionError::MissingCommand {
            command: last.name().to_string(),
        }),
        _ => Err(DefinitionError::Invalid {
            message: format!(
                "a {} definition holds at most one download command before {}",
                def.ecosystem,
                last.name()
            ),
        }),
    }
}

fn conda_rules(def: &mut PackageDefinition) -> Result<(), DefinitionError> {
    def.kind = PackageKind::CondaPackage;
    short_form(def, &Command::Conda)?;
    def.commands.pop();
    def.commands.push(Command::CopyDir {
        src: "$PKG/recipe".to_string(),
        dst: "recipe".to_string(),
    });
    def.commands.push(Command::CondaBuild);
    Ok(())
}

fn choco_rules(def: &mut PackageDefinition) -> Result<(), DefinitionError> {
    def.kind = PackageKind::ChocoPackage;
    short_form(def, &Command::Choco)
}

// ============================================
// Package directories
// ============================================

struct DirRules {
    required_dirs: Vec<String>,
    required_files: Vec<String>,
    allowed_dirs: Vec<String>,
    allowed_files: Vec<String>,
}

fn dir_rules(name: &str, ecosystem: Ecosystem) -> Option<DirRules> {
    let s = |v: &[&str]| v.iter().map(|s| (*s).to_string()).collect::<Vec<_>>();
    match ecosystem {
        Ecosystem::Apt => Some(DirRules {
            required_dirs: Vec::new(),
            required_files: vec![format!("{name}.rep")],
            allowed_dirs: Vec::new(),
            allowed_files: s(&["*"]),
        }),
        Ecosystem::Conda => Some(DirRules {
            required_dirs: s(&["recipe"]),
            required_files: vec![format!("{name}.conda"), "recipe/meta.yaml".to_string()],
            allowed_dirs: s(&["recipe"]),
            allowed_files: vec![
                format!("{name}.conda"),
                "recipe/meta.yaml".to_string(),
                "recipe/build.sh".to_string(),
                "recipe/run_test.sh".to_string(),
            ],
        }),
        Ecosystem::Choco => Some(DirRules {
            required_dirs: s(&["tools"]),
            required_files: vec![
                format!("{name}.choco"),
                format!("{name}.nuspec"),
                "tools/chocolateyInstall.ps1".to_string(),
            ],
            allowed_dirs: s(&["tools"]),
            allowed_files: vec![
                format!("{name}.choco"),
                format!("{name}.nuspec"),
                "tools/*".to_string(),
            ],
        }),
        Ecosystem::Brew => None,
    }
}

/// Check the layout of a package directory
pub fn check_package_dir(name: &str, ecosystem: Ecosystem, dir: &Path) -> Result<(), DefinitionError> {
    let structure = |error: String| DefinitionError::Structure {
        path: dir.to_path_buf(),
        error,
    };
    let rules = dir_rules(name, ecosystem)
        .ok_or_else(|| structure(format!("{ecosystem} definitions cannot be directories")))?;

    for required in &rules.required_dirs {
        if !dir.join(required).is_dir() {
            return Err(structure(format!("missing directory '{required}'")));
        }
    }
    for required in &rules.required_files {
        if !dir.join(required).is_file() {
            return Err(structure(format!("missing file '{required}'")));
        }
    }

    let compile = |patterns: &[String]| -> Result<Vec<glob::Pattern>, DefinitionError> {
        patterns
            .iter()
            .map(|p| glob::Pattern::new(p).map_err(|e| structure(e.to_string())))
            .collect()
    };
    let allowed_dirs = compile(&rules.allowed_dirs)?;
    let allowed_files = compile(&rules.allowed_files)?;

    let mut invalid = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).into_iter().filter_map(Result::ok) {
        let Ok(rel) = entry.path().strip_prefix(dir) else {
            continue;
        };
        let rel = rel.to_string_lossy();
        let patterns = if entry.file_type().is_dir() {
            &allowed_dirs
        } else {
            &allowed_files
        };
        if !patterns.iter().any(|p| p.matches(&rel)) {
            invalid.push(rel.into_owned());
        }
    }
    if !invalid.is_empty() {
        return Err(structure(format!("unexpected entries: {}", invalid.join(", "))));
    }

    if ecosystem == Ecosystem::Apt {
        let extra_rep = std::fs::read_dir(dir)
            .map_err(|e| structure(e.to_string()))?
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .any(|n| n.ends_with(".rep") && n != format!("{name}.rep"));
        if extra_rep {
            return Err(structure("only one .rep file is allowed".to_string()));
        }
    }
    Ok(())
}
