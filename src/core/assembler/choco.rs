//! Chocolatey feed served by `express-chocolatey-server`

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::json;

use super::{link_all, reset_dir};
use crate::error::AssemblyError;
use crate::infra::filesystem;

#[derive(Serialize)]
struct AppYaml {
    runtime: &'static str,
    handlers: Vec<Handler>,
}

#[derive(Serialize)]
struct Handler {
    url: &'static str,
    secure: &'static str,
    redirect_http_response_code: u16,
    script: &'static str,
}

/// App Engine descriptor for the feed server
pub fn app_yaml() -> String {
    let app = AppYaml {
        runtime: "nodejs22",
        handlers: vec![Handler {
            url: "/.*",
            secure: "always",
            redirect_http_response_code: 301,
            script: "auto",
        }],
    };
    serde_yaml::to_string(&app).unwrap_or_default()
}

/// npm manifest starting the feed server over every package in the directory
pub fn packages_json() -> String {
    let manifest = json!({
        "dependencies": { "express-chocolatey-server": "^1.0.0" },
        "scripts": { "start": "express-chocolatey-server *.nupkg" },
        "engines": { "node": "22.x.x" },
    });
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    if manifest.serialize(&mut serializer).is_err() {
        return String::new();
    }
    String::from_utf8_lossy(&out).into_owned()
}

pub(super) fn assemble(feed: &Path, packages: &[PathBuf]) -> Result<(), AssemblyError> {
    // hidden entries carry the server pid and the artifact list
    reset_dir(feed, true)?;
    link_all(packages, feed)?;

    let yaml = feed.join("app.yaml");
    filesystem::write_file(&yaml, app_yaml())?;
    filesystem::write_file(&feed.join("packages.json"), packages_json())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_yaml() {
        let yaml: serde_yaml::Value = serde_yaml::from_str(&app_yaml()).unwrap();
        assert_eq!(yaml["runtime"].as_str(), Some("nodejs22"));
        let handler = &yaml["handlers"][0];
        assert_eq!(handler["url"].as_str(), Some("/.*"));
        assert_eq!(handler["secure"].as_str(), Some("always"));
        assert_eq!(handler["redirect_http_response_code"].as_u64(), Some(301));
        assert_eq!(handler["script"].as_str(), Some("auto"));
    }

    #[test]
    fn test_packages_json() {
        let text = packages_json();
        assert!(text.contains("\n    \"engines\": {\n        \"node\": \"22.x.x\"\n    }"));
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value["scripts"]["start"],
            "express-chocolatey-server *.nupkg"
        );
        assert_eq!(
            value["dependencies"]["express-chocolatey-server"],
            "^1.0.0"
        );
    }
}
