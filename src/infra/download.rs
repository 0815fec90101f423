//! HTTP download functionality
//!
//! Streams files to disk with retry and exponential backoff. The local file
//! name can be decided after the response headers arrive, which is how
//! server-supplied names (`Content-Disposition`) are honoured. Bodies are
//! streamed into a hidden `.partial-` sibling and renamed into place once
//! complete, so an interrupted transfer never leaves a file under the
//! final name.

use futures::StreamExt;
use reqwest::header::{HeaderMap, CONTENT_DISPOSITION};
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::config::defaults;
use crate::error::DownloadError;
use crate::infra::filesystem::partial_path;

/// Progress callback type for download progress reporting
pub type ProgressCallback = Box<dyn Fn(u64, u64) + Send + Sync>;

/// Download result containing file path and metadata
#[derive(Debug, Clone)]
pub struct DownloadResult {
    /// Path to the downloaded file
    pub path: PathBuf,
    /// Name the server (or URL) gave the file
    pub remote_name: String,
    /// Size in bytes
    pub size: u64,
    /// SHA256 checksum of the downloaded content
    pub checksum: String,
}

/// Download manager for fetching files with retry support
#[derive(Debug, Clone)]
pub struct DownloadManager {
    /// HTTP client
    client: reqwest::Client,
    /// Maximum attempts per file
    max_retries: u32,
    /// Base delay for exponential backoff (in milliseconds)
    base_delay_ms: u64,
}

fn build_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(defaults::HTTP_TIMEOUT_SECS))
        .connect_timeout(Duration::from_secs(defaults::HTTP_CONNECT_TIMEOUT_SECS))
        .user_agent(concat!("reposmith/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Outcome of a single attempt
enum Attempt {
    Done(DownloadResult),
    /// Worth retrying (transport error, 5xx)
    Transient(DownloadError, Option<PathBuf>),
    /// Retrying would not help (4xx, local IO, naming)
    Fatal(DownloadError, Option<PathBuf>),
}

impl DownloadManager {
    /// Create a new download manager
    pub fn new() -> Self {
        Self::with_config(
            defaults::MAX_DOWNLOAD_RETRIES,
            defaults::DOWNLOAD_RETRY_DELAY_MS,
        )
    }

    /// Create a download manager with custom settings
    pub fn with_config(max_retries: u32, base_delay_ms: u64) -> Self {
        Self {
            client: build_client(),
            max_retries: max_retries.max(1),
            base_delay_ms,
        }
    }

    /// Get the HTTP client
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Get max retries
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Download `url` to a fixed destination path
    pub async fn download(
        &self,
        url: &str,
        dest: &Path,
        progress: Option<ProgressCallback>,
    ) -> Result<DownloadResult, DownloadError> {
        let dest = dest.to_path_buf();
        self.download_named(url, &HeaderMap::new(), |_| Ok(dest.clone()), progress)
            .await
    }

    /// Download `url`, choosing the destination from the remote file name
    ///
    /// `naming` receives the name taken from `Content-Disposition` (or the
    /// URL's last segment when the server sends none) and returns the path
    /// to write to.
    pub async fn download_named<F>(
        &self,
        url: &str,
        headers: &HeaderMap,
        naming: F,
        progress: Option<ProgressCallback>,
    ) -> Result<DownloadResult, DownloadError>
    where
        F: Fn(&str) -> Result<PathBuf, DownloadError>,
    {
        let mut attempts = 0;
        let mut delay_ms = self.base_delay_ms;

        loop {
            attempts += 1;

            let (error, partial) =
                match self.download_once(url, headers, &naming, progress.as_ref()).await {
                    Attempt::Done(result) => return Ok(result),
                    Attempt::Fatal(e, partial) => {
                        remove_partial(partial.as_deref()).await;
                        return Err(e);
                    }
                    Attempt::Transient(e, partial) => (e, partial),
                };

            remove_partial(partial.as_deref()).await;

            if attempts >= self.max_retries {
                tracing::warn!("Giving up on {} after {} attempt(s): {}", url, attempts, error);
                return Err(if self.max_retries > 1 {
                    DownloadError::MaxRetriesExceeded {
                        url: url.to_string(),
                        retries: self.max_retries,
                    }
                } else {
                    error
                });
            }

            tracing::debug!("Retrying {} in {}ms: {}", url, delay_ms, error);
            // Exponential backoff with cap at 30 seconds
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            delay_ms = (delay_ms * 2).min(30_000);
        }
    }

    /// Single download attempt without retry
    async fn download_once<F>(
        &self,
        url: &str,
        headers: &HeaderMap,
        naming: &F,
        progress: Option<&ProgressCallback>,
    ) -> Attempt
    where
        F: Fn(&str) -> Result<PathBuf, DownloadError>,
    {
        let network = |error: String| DownloadError::NetworkError {
            url: url.to_string(),
            error,
        };

        let response = match self.client.get(url).headers(headers.clone()).send().await {
            Ok(r) => r,
            Err(e) => return Attempt::Transient(network(e.to_string()), None),
        };

        let status = response.status();
        if !status.is_success() {
            let err = network(format!("HTTP {status}"));
            return if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                Attempt::Transient(err, None)
            } else {
                Attempt::Fatal(err, None)
            };
        }

        let remote_name = match remote_file_name(response.headers(), response.url().as_str()) {
            Ok(n) => n,
            Err(e) => return Attempt::Fatal(e, None),
        };
        let dest = match naming(&remote_name) {
            Ok(p) => p,
            Err(e) => return Attempt::Fatal(e, None),
        };

        let total_size = response.content_length().unwrap_or(0);

        if let Some(parent) = dest.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return Attempt::Fatal(
                    DownloadError::IoError {
                        path: parent.to_path_buf(),
                        error: e.to_string(),
                    },
                    None,
                );
            }
        }

        let partial = partial_path(&dest);
        let io_error = |e: std::io::Error| DownloadError::IoError {
            path: dest.clone(),
            error: e.to_string(),
        };

        let mut file = match File::create(&partial).await {
            Ok(f) => f,
            Err(e) => return Attempt::Fatal(io_error(e), None),
        };

        let mut hasher = Sha256::new();
        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk_result) = stream.next().await {
            let chunk = match chunk_result {
                Ok(c) => c,
                Err(e) => return Attempt::Transient(network(e.to_string()), Some(partial)),
            };

            if let Err(e) = file.write_all(&chunk).await {
                return Attempt::Fatal(io_error(e), Some(partial));
            }

            hasher.update(&chunk);
            downloaded += chunk.len() as u64;

            if let Some(cb) = progress {
                cb(downloaded, total_size);
            }
        }

        if let Err(e) = file.sync_all().await {
            return Attempt::Fatal(io_error(e), Some(partial));
        }
        drop(file);
        if let Err(e) = tokio::fs::rename(&partial, &dest).await {
            return Attempt::Fatal(io_error(e), Some(partial));
        }

        Attempt::Done(DownloadResult {
            path: dest,
            remote_name,
            size: downloaded,
            checksum: hex::encode(hasher.finalize()),
        })
    }

    /// Name the server gives `url`, without reading the body
    pub async fn remote_name(&self, url: &str) -> Result<String, DownloadError> {
        let network = |error: String| DownloadError::NetworkError {
            url: url.to_string(),
            error,
        };
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(network(format!("HTTP {}", response.status())));
        }
        remote_file_name(response.headers(), response.url().as_str())
    }

    /// Check whether `url` answers with a success status
    pub async fn probe(&self, url: &str) -> bool {
        match self.client.get(url).send().await {
            Ok(r) => r.status().is_success(),
            Err(e) => {
                tracing::debug!("Probe of {} failed: {}", url, e);
                false
            }
        }
    }
}

impl Default for DownloadManager {
    fn default() -> Self {
        Self::new()
    }
}

async fn remove_partial(path: Option<&Path>) {
    if let Some(p) = path {
        let _ = tokio::fs::remove_file(p).await;
    }
}

/// Name of the remote file: `Content-Disposition` first, URL segment second
pub fn remote_file_name(headers: &HeaderMap, url: &str) -> Result<String, DownloadError> {
    headers
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(content_disposition_name)
        .map_or_else(|| url_file_name(url), Ok)
}

/// Extract the file name from a `Content-Disposition` header value
///
/// `filename*=UTF-8''...` wins over a plain `filename=`.
pub fn content_disposition_name(value: &str) -> Option<String> {
    let mut plain = None;
    for part in value.split(';').map(str::trim) {
        let Some((key, raw)) = part.split_once('=') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "filename*" => {
                let encoded = raw.trim().splitn(3, '\'').nth(2)?;
                let name = percent_decode(encoded);
                return sanitize_name(&name);
            }
            "filename" => {
                plain = sanitize_name(raw.trim().trim_matches('"'));
            }
            _ => {}
        }
    }
    plain
}

/// Last non-empty path segment of a URL, percent-decoded
pub fn url_file_name(url: &str) -> Result<String, DownloadError> {
    let parsed = reqwest::Url::parse(url).map_err(|e| DownloadError::NetworkError {
        url: url.to_string(),
        error: e.to_string(),
    })?;
    parsed
        .path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .and_then(|s| sanitize_name(&percent_decode(s)))
        .ok_or_else(|| DownloadError::InvalidFileName {
            name: url.to_string(),
        })
}

fn sanitize_name(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name).trim();
    if base.is_empty() || base == "." || base == ".." {
        None
    } else {
        Some(base.to_string())
    }
}

/// Decode `%XX` escapes, leaving malformed ones untouched
pub fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hi = (bytes[i + 1] as char).to_digit(16);
            let lo = (bytes[i + 2] as char).to_digit(16);
            if let (Some(hi), Some(lo)) = (hi, lo) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Percent-encode a URL path, keeping `/` and unreserved characters
pub fn percent_quote(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for b in path.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-' | b'~' | b'/') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    // ============================================
    // Unit Tests - Remote names
    // ============================================

    #[test]
    fn test_content_disposition_plain() {
        assert_eq!(
            content_disposition_name("attachment; filename=\"tool-1.2.tar.gz\""),
            Some("tool-1.2.tar.gz".to_string())
        );
    }

    #[test]
    fn test_content_disposition_extended_wins() {
        assert_eq!(
            content_disposition_name(
                "attachment; filename=\"fallback.zip\"; filename*=UTF-8''real%20name.zip"
            ),
            Some("real name.zip".to_string())
        );
    }

    #[test]
    fn test_content_disposition_strips_directories() {
        assert_eq!(
            content_disposition_name("attachment; filename=\"../../etc/passwd\""),
            Some("passwd".to_string())
        );
    }

    #[test]
    fn test_content_disposition_missing() {
        assert_eq!(content_disposition_name("inline"), None);
    }

    #[test]
    fn test_url_file_name() {
        assert_eq!(
            url_file_name("https://example.com/dl/tool_1.0_amd64.deb?x=1").unwrap(),
            "tool_1.0_amd64.deb"
        );
        assert_eq!(
            url_file_name("https://example.com/a/b%20c.zip").unwrap(),
            "b c.zip"
        );
    }

    #[test]
    fn test_url_without_segment_is_error() {
        assert!(matches!(
            url_file_name("https://example.com/"),
            Err(DownloadError::InvalidFileName { .. })
        ));
    }

    #[test]
    fn test_percent_quote_pipe() {
        assert_eq!(
            percent_quote("data/brew/tool|1.0|brew|tool.zip"),
            "data/brew/tool%7C1.0%7Cbrew%7Ctool.zip"
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_quote_then_decode_is_identity(s in "[ -~]{0,40}") {
            prop_assert_eq!(percent_decode(&percent_quote(&s)), s);
        }

        #[test]
        fn prop_quoted_has_no_reserved_chars(s in "[ -~]{0,40}") {
            let q = percent_quote(&s);
            prop_assert!(!q.contains(' ') && !q.contains('|') && !q.contains('?'));
        }
    }

    // ============================================
    // Unit Tests - Download manager creation
    // ============================================

    #[test]
    fn test_download_manager_default() {
        let manager = DownloadManager::new();
        assert_eq!(manager.max_retries(), 3);
    }

    #[test]
    fn test_download_manager_with_config() {
        let manager = DownloadManager::with_config(5, 500);
        assert_eq!(manager.max_retries(), 5);
    }

    // ============================================
    // Async Tests - Download functionality
    // ============================================

    #[tokio::test]
    async fn test_download_success() {
        let mock_server = MockServer::start().await;
        let content = b"test file content";

        Mock::given(method("GET"))
            .and(path("/test.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(content.to_vec()))
            .mount(&mock_server)
            .await;

        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("downloaded.txt");
        let manager = DownloadManager::new();

        let result = manager
            .download(&format!("{}/test.txt", mock_server.uri()), &dest, None)
            .await
            .unwrap();

        assert_eq!(result.remote_name, "test.txt");
        assert_eq!(result.size, content.len() as u64);
        assert_eq!(std::fs::read(&dest).unwrap(), content);
    }

    #[tokio::test]
    async fn test_download_uses_content_disposition() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/latest"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-disposition", "attachment; filename=\"app-2.4.1.zip\"")
                    .set_body_bytes(b"zip".to_vec()),
            )
            .mount(&mock_server)
            .await;

        let temp = TempDir::new().unwrap();
        let dir = temp.path().to_path_buf();
        let manager = DownloadManager::new();

        let result = manager
            .download_named(
                &format!("{}/latest", mock_server.uri()),
                &HeaderMap::new(),
                |name| Ok(dir.join(name)),
                None,
            )
            .await
            .unwrap();

        assert_eq!(result.remote_name, "app-2.4.1.zip");
        assert!(temp.path().join("app-2.4.1.zip").exists());
    }

    #[tokio::test]
    async fn test_naming_error_is_not_retried() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/file.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"x".to_vec()))
            .expect(1)
            .mount(&mock_server)
            .await;

        let manager = DownloadManager::with_config(3, 10);
        let result = manager
            .download_named(
                &format!("{}/file.bin", mock_server.uri()),
                &HeaderMap::new(),
                |name| {
                    Err(DownloadError::InvalidFileName {
                        name: name.to_string(),
                    })
                },
                None,
            )
            .await;

        assert!(matches!(result, Err(DownloadError::InvalidFileName { .. })));
    }

    #[tokio::test]
    async fn test_download_with_progress_callback() {
        let mock_server = MockServer::start().await;
        let content = b"test file content for progress";

        Mock::given(method("GET"))
            .and(path("/progress.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(content.to_vec()))
            .mount(&mock_server)
            .await;

        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("progress.txt");
        let manager = DownloadManager::new();

        let progress_called = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let progress_called_clone = progress_called.clone();

        let progress: ProgressCallback = Box::new(move |downloaded, _total| {
            if downloaded > 0 {
                progress_called_clone.store(true, std::sync::atomic::Ordering::SeqCst);
            }
        });

        let result = manager
            .download(
                &format!("{}/progress.txt", mock_server.uri()),
                &dest,
                Some(progress),
            )
            .await;

        assert!(result.is_ok());
        assert!(progress_called.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_download_retry_on_server_error() {
        let mock_server = MockServer::start().await;
        let content = b"retry content";

        // First two requests fail, third succeeds
        Mock::given(method("GET"))
            .and(path("/retry.txt"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/retry.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(content.to_vec()))
            .mount(&mock_server)
            .await;

        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("retry.txt");
        let manager = DownloadManager::with_config(3, 10);

        let result = manager
            .download(&format!("{}/retry.txt", mock_server.uri()), &dest, None)
            .await;

        assert!(result.is_ok());
        assert_eq!(std::fs::read(&dest).unwrap(), content);
    }

    #[tokio::test]
    async fn test_not_found_fails_without_retry() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/missing.txt"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&mock_server)
            .await;

        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("missing.txt");
        let manager = DownloadManager::with_config(3, 10);

        let result = manager
            .download(&format!("{}/missing.txt", mock_server.uri()), &dest, None)
            .await;

        assert!(matches!(result, Err(DownloadError::NetworkError { .. })));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_download_max_retries_exceeded() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/fail.txt"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("fail.txt");
        let manager = DownloadManager::with_config(3, 10);

        let result = manager
            .download(&format!("{}/fail.txt", mock_server.uri()), &dest, None)
            .await;

        match result {
            Err(DownloadError::MaxRetriesExceeded { retries, .. }) => assert_eq!(retries, 3),
            other => panic!("Expected MaxRetriesExceeded, got: {other:?}"),
        }
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_interrupted_download_leaves_no_file() {
        use tokio::io::AsyncReadExt;

        // Announces 100000 bytes, sends a few, then stalls
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100000\r\n\r\ntruncated payload")
                .await
                .unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("tool|1.0|apt.deb");
        let manager = DownloadManager::with_config(1, 0);
        let url = format!("http://{addr}/tool.deb");

        let result = tokio::time::timeout(
            Duration::from_millis(700),
            manager.download(&url, &dest, None),
        )
        .await;
        server.abort();

        assert!(result.is_err());
        assert!(!dest.exists());
        let visible: Vec<_> = std::fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| !n.starts_with('.'))
            .collect();
        assert!(visible.is_empty(), "unexpected files: {visible:?}");
    }

    #[tokio::test]
    async fn test_completed_download_drops_partial() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tool.deb"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"deb".to_vec()))
            .mount(&mock_server)
            .await;

        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("tool.deb");
        std::fs::write(partial_path(&dest), "stale").unwrap();

        DownloadManager::new()
            .download(&format!("{}/tool.deb", mock_server.uri()), &dest, None)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"deb");
        assert!(!partial_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_probe() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/conda"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let manager = DownloadManager::new();
        assert!(manager.probe(&format!("{}/conda", mock_server.uri())).await);
        assert!(!manager.probe(&format!("{}/nothing", mock_server.uri())).await);
    }

    #[tokio::test]
    async fn test_remote_name_from_headers() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/latest"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-disposition", "attachment; filename=\"tool-2.4.1.tar.gz\"")
                    .set_body_bytes(vec![0u8; 64]),
            )
            .mount(&mock_server)
            .await;

        let manager = DownloadManager::new();
        let name = manager
            .remote_name(&format!("{}/latest", mock_server.uri()))
            .await
            .unwrap();
        assert_eq!(name, "tool-2.4.1.tar.gz");
        assert!(manager
            .remote_name(&format!("{}/missing", mock_server.uri()))
            .await
            .is_err());
    }
}
