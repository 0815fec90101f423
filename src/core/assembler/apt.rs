//! APT index: pool symlinks, `Packages`, `Release` and signatures

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use flate2::{Compression, GzBuilder};
use sha2::{Digest, Sha256};

use super::{link_all, reset_dir};
use crate::core::settings::{ReleaseFields, Settings};
use crate::error::AssemblyError;
use crate::infra::filesystem;
use crate::infra::gpg::Signer;
use crate::infra::process::ProcessSpec;

const DIST: &str = "dists/stable";
const BINARY: &str = "main/binary-amd64";

/// Produces the `Packages` index of a pool
#[async_trait]
pub trait PackageScanner: Send + Sync {
    /// Scan `root/pool` and return the raw `Packages` text
    async fn scan(&self, root: &Path) -> Result<String, AssemblyError>;
}

/// `dpkg-scanpackages -m pool/`
#[derive(Debug, Clone)]
pub struct DpkgScanner {
    timeout: Duration,
}

impl DpkgScanner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl PackageScanner for DpkgScanner {
    async fn scan(&self, root: &Path) -> Result<String, AssemblyError> {
        let output = ProcessSpec::new("dpkg-scanpackages")
            .args(["-m", "pool/"])
            .current_dir(root)
            .timeout(self.timeout)
            .run()
            .await?;
        Ok(output.stdout)
    }
}

/// Sort the stanzas of a `Packages` file
pub fn sort_stanzas(packages: &str) -> String {
    let mut stanzas: Vec<&str> = packages
        .split("\n\n")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    stanzas.sort_unstable();
    stanzas
        .iter()
        .map(|s| format!("{s}\n\n"))
        .collect()
}

/// Gzip with a zeroed header timestamp
fn gzip(data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut encoder = GzBuilder::new()
        .mtime(0)
        .write(Vec::new(), Compression::best());
    encoder.write_all(data)?;
    encoder.finish()
}

fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hash_block(title: &str, hash: fn(&[u8]) -> String, files: &[(&str, &[u8])]) -> String {
    let mut block = format!("{title}:\n");
    for (rel, content) in files {
        let digest = hash(content);
        block.push_str(&format!(" {digest} {} {rel}\n", content.len()));
    }
    block
}

/// `Release` contents for the given index files, paths relative to the dist
pub fn release_file(fields: &ReleaseFields, date: &str, files: &[(&str, &[u8])]) -> String {
    let mut release = format!(
        "Origin: {}\nLabel: {}\nSuite: {}\nCodename: {}\nVersion: {}\nArchitectures: {}\nComponents: {}\nDescription: {}\nDate: {date}\n",
        fields.origin,
        fields.label,
        fields.suite,
        fields.codename,
        fields.version,
        fields.architectures,
        fields.components,
        fields.description,
    );
    release.push_str(&hash_block("MD5Sum", md5_hex, files));
    release.push_str(&hash_block("SHA256", sha256_hex, files));
    release
}

fn io_error(path: &Path) -> impl Fn(std::io::Error) -> AssemblyError + '_ {
    move |e| {
        AssemblyError::from(crate::error::FilesystemError::WriteFile {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
    }
}

pub(super) async fn assemble(
    index: &Path,
    debs: &[PathBuf],
    settings: &Settings,
    scanner: &dyn PackageScanner,
    signer: &dyn Signer,
) -> Result<(), AssemblyError> {
    reset_dir(index, false)?;
    link_all(debs, &index.join("pool/main"))?;

    let dist = index.join(DIST);
    let binary = dist.join(BINARY);
    filesystem::create_dir_all(&binary)?;

    let packages = sort_stanzas(&scanner.scan(index).await?);
    let packages_path = binary.join("Packages");
    filesystem::write_file(&packages_path, &packages)?;

    let gz_path = binary.join("Packages.gz");
    let gz = gzip(packages.as_bytes()).map_err(io_error(&gz_path))?;
    filesystem::write_file(&gz_path, &gz)?;

    let date = Utc::now().format("%a, %d %b %Y %H:%M:%S %z").to_string();
    let packages_rel = format!("{BINARY}/Packages");
    let gz_rel = format!("{BINARY}/Packages.gz");
    let files: [(&str, &[u8]); 2] = [
        (packages_rel.as_str(), packages.as_bytes()),
        (gz_rel.as_str(), gz.as_slice()),
    ];
    let release = release_file(&settings.release_fields(), &date, &files);
    let release_path = dist.join("Release");
    filesystem::write_file(&release_path, release)?;

    signer
        .detach_sign(&release_path, &dist.join("Release.gpg"))
        .await?;
    signer
        .clear_sign(&release_path, &dist.join("InRelease"))
        .await?;
    signer.export_public_key(&index.join("pub.gpg")).await?;
    tracing::info!("Signed {}", release_path.display());
    Ok(())
}
