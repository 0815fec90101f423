//! Repository signing
//!
//! Signing is a capability behind the [`Signer`] trait. [`GpgSigner`]
//! implements it with the `gpg` binary and a throwaway `GNUPGHOME`, so the
//! user's own keyring is never touched.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::infra::process::{ProcessError, ProcessSpec};
use crate::infra::scratch::ScratchDir;

/// Signing errors
#[derive(Error, Debug)]
pub enum SigningError {
    /// Key file missing or unreadable
    #[error("Signing key '{path}' is unusable: {error}")]
    InvalidKey { path: PathBuf, error: String },

    /// Key file already exists
    #[error("Key file '{path}' already exists")]
    KeyExists { path: PathBuf },

    /// Key generation produced nothing
    #[error("Key creation failed: {error}")]
    CreationFailed { error: String },

    /// gpg failed
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// IO error
    #[error("IO error for '{path}': {error}")]
    IoError { path: PathBuf, error: String },
}

/// Produces signatures over repository metadata
#[async_trait]
pub trait Signer: Send + Sync {
    /// Write an armored detached signature of `input` to `output`
    async fn detach_sign(&self, input: &Path, output: &Path) -> Result<(), SigningError>;

    /// Write a clear-signed copy of `input` to `output`
    async fn clear_sign(&self, input: &Path, output: &Path) -> Result<(), SigningError>;

    /// Write the binary public key to `output`
    async fn export_public_key(&self, output: &Path) -> Result<(), SigningError>;
}

/// User id used for freshly created keys
#[derive(Debug, Clone)]
pub struct KeyIdentity {
    /// Real name
    pub name: String,
    /// Email address
    pub email: String,
}

impl Default for KeyIdentity {
    fn default() -> Self {
        Self {
            name: "reposmith".to_string(),
            email: "reposmith@localhost".to_string(),
        }
    }
}

/// gpg-backed signer with an imported repository key
#[derive(Debug)]
pub struct GpgSigner {
    home: ScratchDir,
    fingerprint: String,
}

fn gpg(home: &Path) -> ProcessSpec {
    ProcessSpec::new("gpg")
        .env("GNUPGHOME", home.to_string_lossy())
        .args(["--batch", "--yes", "--pinentry-mode", "loopback"])
}

fn new_home() -> Result<ScratchDir, SigningError> {
    let home = ScratchDir::new("reposmith-gpg-").map_err(|e| SigningError::IoError {
        path: std::env::temp_dir(),
        error: e.to_string(),
    })?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(home.path(), std::fs::Permissions::from_mode(0o700)).map_err(
            |e| SigningError::IoError {
                path: home.path().to_path_buf(),
                error: e.to_string(),
            },
        )?;
    }
    Ok(home)
}

/// First secret-key fingerprint in `--with-colons` output
fn parse_fingerprint(colons: &str) -> Option<String> {
    let mut in_secret = false;
    for line in colons.lines() {
        let fields: Vec<&str> = line.split(':').collect();
        match fields.first().copied() {
            Some("sec") => in_secret = true,
            Some("pub") => in_secret = false,
            Some("fpr") if in_secret => {
                return fields.get(9).filter(|f| !f.is_empty()).map(|f| (*f).to_string());
            }
            _ => {}
        }
    }
    None
}

impl GpgSigner {
    /// Import `key_file` into a private keyring
    pub async fn load(key_file: &Path) -> Result<Self, SigningError> {
        if !key_file.is_file() {
            return Err(SigningError::InvalidKey {
                path: key_file.to_path_buf(),
                error: "file does not exist".to_string(),
            });
        }

        let home = new_home()?;
        gpg(home.path())
            .arg("--import")
            .arg(key_file.to_string_lossy())
            .run()
            .await?;

        let listing = gpg(home.path())
            .args(["--with-colons", "--list-secret-keys"])
            .run()
            .await?;
        let fingerprint =
            parse_fingerprint(&listing.stdout).ok_or_else(|| SigningError::InvalidKey {
                path: key_file.to_path_buf(),
                error: "no secret key found".to_string(),
            })?;

        tracing::debug!("Loaded signing key {}", fingerprint);
        Ok(Self { home, fingerprint })
    }

    /// Generate a new key and export the secret key to `key_file`
    ///
    /// RSA 4096, no passphrase, no expiry.
    pub async fn create_key(key_file: &Path, identity: &KeyIdentity) -> Result<(), SigningError> {
        if key_file.exists() {
            return Err(SigningError::KeyExists {
                path: key_file.to_path_buf(),
            });
        }
        if let Some(parent) = key_file.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SigningError::IoError {
                path: parent.to_path_buf(),
                error: e.to_string(),
            })?;
        }

        let home = new_home()?;
        gpg(home.path())
            .args(["--passphrase", "", "--quick-generate-key"])
            .arg(format!("{} <{}>", identity.name, identity.email))
            .args(["rsa4096", "default", "0"])
            .run()
            .await?;

        let listing = gpg(home.path())
            .args(["--with-colons", "--list-secret-keys"])
            .run()
            .await?;
        let fingerprint =
            parse_fingerprint(&listing.stdout).ok_or_else(|| SigningError::CreationFailed {
                error: "gpg did not report a new key".to_string(),
            })?;

        gpg(home.path())
            .arg("--output")
            .arg(key_file.to_string_lossy())
            .arg("--export-secret-keys")
            .arg(&fingerprint)
            .run()
            .await?;

        let size = std::fs::metadata(key_file).map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            let _ = std::fs::remove_file(key_file);
            return Err(SigningError::CreationFailed {
                error: format!("'{}' is empty", key_file.display()),
            });
        }

        tracing::warn!("Created key file at {}", key_file.display());
        Ok(())
    }

    /// Fingerprint of the imported key
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

#[async_trait]
impl Signer for GpgSigner {
    async fn detach_sign(&self, input: &Path, output: &Path) -> Result<(), SigningError> {
        gpg(self.home.path())
            .args(["--local-user", self.fingerprint.as_str(), "--armor", "--detach-sign", "--output"])
            .arg(output.to_string_lossy())
            .arg(input.to_string_lossy())
            .run()
            .await?;
        Ok(())
    }

    async fn clear_sign(&self, input: &Path, output: &Path) -> Result<(), SigningError> {
        gpg(self.home.path())
            .args(["--local-user", self.fingerprint.as_str(), "--clearsign", "--output"])
            .arg(output.to_string_lossy())
            .arg(input.to_string_lossy())
            .run()
            .await?;
        Ok(())
    }

    async fn export_public_key(&self, output: &Path) -> Result<(), SigningError> {
        gpg(self.home.path())
            .arg("--output")
            .arg(output.to_string_lossy())
            .arg("--export")
            .arg(&self.fingerprint)
            .run()
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_fingerprint_takes_secret_key() {
        let listing = "\
sec:u:4096:1:AAAA:1700000000:::u:::scESC:::+:::23::0:
fpr:::::::::0123456789ABCDEF0123456789ABCDEF01234567:
uid:u::::1700000000::HASH::reposmith <reposmith@localhost>::::::::::0:
ssb:u:4096:1:BBBB:1700000000::::::e:::+:::23:
fpr:::::::::FEDCBA9876543210FEDCBA9876543210FEDCBA98:
";
        assert_eq!(
            parse_fingerprint(listing).as_deref(),
            Some("0123456789ABCDEF0123456789ABCDEF01234567")
        );
    }

    #[test]
    fn test_parse_fingerprint_empty() {
        assert_eq!(parse_fingerprint(""), None);
    }

    #[tokio::test]
    async fn test_load_missing_key() {
        let temp = TempDir::new().unwrap();
        let err = GpgSigner::load(&temp.path().join("missing.key"))
            .await
            .unwrap_err();
        assert!(matches!(err, SigningError::InvalidKey { .. }));
    }

    #[tokio::test]
    async fn test_create_refuses_existing_file() {
        let temp = TempDir::new().unwrap();
        let key = temp.path().join("key");
        std::fs::write(&key, "x").unwrap();
        let err = GpgSigner::create_key(&key, &KeyIdentity::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SigningError::KeyExists { .. }));
    }

    #[tokio::test]
    #[ignore = "requires gpg"]
    async fn test_create_load_and_sign() {
        let temp = TempDir::new().unwrap();
        let key = temp.path().join("signing.key");
        GpgSigner::create_key(&key, &KeyIdentity::default())
            .await
            .unwrap();

        let signer = GpgSigner::load(&key).await.unwrap();
        let release = temp.path().join("Release");
        std::fs::write(&release, "Origin: test\n").unwrap();

        signer
            .detach_sign(&release, &temp.path().join("Release.gpg"))
            .await
            .unwrap();
        signer
            .clear_sign(&release, &temp.path().join("InRelease"))
            .await
            .unwrap();
        signer
            .export_public_key(&temp.path().join("pub.gpg"))
            .await
            .unwrap();

        let armored = std::fs::read_to_string(temp.path().join("Release.gpg")).unwrap();
        assert!(armored.contains("BEGIN PGP SIGNATURE"));
        let inline = std::fs::read_to_string(temp.path().join("InRelease")).unwrap();
        assert!(inline.contains("Origin: test"));
        assert!(std::fs::metadata(temp.path().join("pub.gpg")).unwrap().len() > 0);
    }
}
