//! Conda channel: `linux-64` symlinks and `conda index`

use std::path::{Path, PathBuf};

use serde::Serialize;
use walkdir::WalkDir;

use super::{link_all, reset_dir};
use crate::core::settings::Settings;
use crate::error::AssemblyError;
use crate::infra::filesystem;
use crate::infra::process::ProcessSpec;

/// Re-serialize JSON with four-space indentation
pub fn reindent(text: &str) -> Result<String, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    value.serialize(&mut serializer)?;
    Ok(String::from_utf8_lossy(&out).into_owned())
}

fn reindent_all(channel: &Path) -> Result<(), AssemblyError> {
    for entry in WalkDir::new(channel)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().is_some_and(|x| x == "json"))
    {
        let path = entry.path();
        let text = filesystem::read_file(path)?;
        let pretty = reindent(&text).map_err(|e| AssemblyError::Serialize {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        filesystem::write_file(path, pretty)?;
    }
    Ok(())
}

pub(super) async fn assemble(
    channel: &Path,
    archives: &[PathBuf],
    settings: &Settings,
) -> Result<(), AssemblyError> {
    reset_dir(channel, false)?;
    link_all(archives, &channel.join("linux-64"))?;

    ProcessSpec::new("conda")
        .arg("index")
        .arg(channel.to_string_lossy())
        .timeout(settings.process_timeout())
        .run()
        .await?;

    reindent_all(channel)
}
