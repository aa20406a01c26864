//! Archive download manager with caching and checksum verification.
//!
//! Downloads are streamed to a unique temporary file in the cache directory,
//! verified against the manifest SHA-256, then atomically renamed into their
//! content-addressed cache slot:
//!
//! ```text
//! <root>/cache/
//!   1a2b3c4d_tool-1.0.0_linux-x86_64.tar.gz
//!   99eeff00_tool.zip
//! ```
//!
//! The cache key prefixes the basename with the first 8 hex characters of
//! `sha256(url)`, so two URLs sharing a filename never collide while names
//! stay legible. A cached entry is never trusted without re-hashing it.
//!
//! Concurrent requests for the same URL collapse to a single in-flight
//! transfer through a keyed lock on the cache path. `file://` URLs are
//! served by a local copy instead of HTTP.

use crate::cancel::CancelToken;
use crate::error::{PoksError, Result};
use crate::progress::Reporter;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const READ_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Derive the deterministic cache file path for a URL.
pub fn cache_path_for(url: &str, cache_dir: &Path) -> PathBuf {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let basename = without_query
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or("download");
    let url_hash = format!("{:x}", Sha256::digest(url.as_bytes()));
    cache_dir.join(format!("{}_{basename}", &url_hash[..8]))
}

/// SHA-256 of a file as lowercase hex, streamed over a 64 KiB buffer.
pub async fn compute_sha256(path: &Path) -> Result<String> {
    use tokio::io::AsyncReadExt;

    let mut file = fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0; 65536];
    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Delete every entry in the cache directory.
pub fn clear(cache_dir: &Path) -> Result<()> {
    if cache_dir.exists() {
        for entry in std::fs::read_dir(cache_dir)? {
            let path = entry?.path();
            if path.is_dir() {
                std::fs::remove_dir_all(&path)?;
            } else {
                std::fs::remove_file(&path)?;
            }
        }
    }
    Ok(())
}

/// Total size in bytes of all cached files.
pub fn size(cache_dir: &Path) -> Result<u64> {
    let mut total = 0u64;
    if cache_dir.exists() {
        for entry in walkdir::WalkDir::new(cache_dir)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.file_type().is_file() {
                total += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }
    }
    Ok(total)
}

fn is_transient(err: &PoksError) -> bool {
    // HTTP status errors never retry; connection and body failures do.
    matches!(err, PoksError::Request(_))
}

/// Shared download manager holding the HTTP client and the per-cache-path
/// single-flight locks.
pub struct Downloader {
    client: reqwest::Client,
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl Downloader {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(READ_TIMEOUT)
            .user_agent(format!("poks/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Return a verified cached copy of the archive, downloading if needed.
    ///
    /// A cached file with the wrong hash is discarded and re-downloaded.
    /// Transient network failures retry with exponential backoff; HTTP
    /// status errors surface immediately.
    pub async fn get_cached_or_download(
        &self,
        url: &str,
        sha256: &str,
        cache_dir: &Path,
        app_name: &str,
        reporter: &Reporter,
        cancel: &CancelToken,
    ) -> Result<PathBuf> {
        let cache_path = cache_path_for(url, cache_dir);
        let expected = sha256.to_ascii_lowercase();

        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(cache_path.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = lock.lock().await;

        if fs::try_exists(&cache_path).await? {
            if compute_sha256(&cache_path).await? == expected {
                tracing::debug!("cache hit: {}", cache_path.display());
                return Ok(cache_path);
            }
            tracing::warn!("corrupt cache entry {}, re-downloading", cache_path.display());
            fs::remove_file(&cache_path).await?;
        }

        cancel.check()?;
        fs::create_dir_all(cache_dir).await?;

        // Unique temp sibling; dropped (and deleted) on any failure path.
        let tmp = tempfile::Builder::new()
            .prefix(".poks-")
            .suffix(".part")
            .tempfile_in(cache_dir)?;

        if let Some(local) = url.strip_prefix("file://") {
            fs::copy(Path::new(local), tmp.path()).await?;
        } else {
            self.download_with_retries(url, tmp.path(), app_name, reporter, cancel)
                .await?;
        }

        let actual = compute_sha256(tmp.path()).await?;
        if actual != expected {
            return Err(PoksError::ChecksumMismatch {
                expected,
                actual,
                url: url.to_string(),
            });
        }

        tmp.persist(&cache_path)
            .map_err(|e| PoksError::Io(e.error))?;
        Ok(cache_path)
    }

    async fn download_with_retries(
        &self,
        url: &str,
        dest: &Path,
        app_name: &str,
        reporter: &Reporter,
        cancel: &CancelToken,
    ) -> Result<()> {
        let mut attempt = 0;
        loop {
            match self.download_once(url, dest, app_name, reporter, cancel).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt + 1 < MAX_ATTEMPTS && is_transient(&err) => {
                    let delay = RETRY_BASE_DELAY * 2u32.pow(attempt);
                    tracing::warn!("download of {url} failed ({err}), retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn download_once(
        &self,
        url: &str,
        dest: &Path,
        app_name: &str,
        reporter: &Reporter,
        cancel: &CancelToken,
    ) -> Result<()> {
        cancel.check()?;
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PoksError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let pb = reporter.download_bar(app_name, response.content_length());
        let mut file = fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;

        while let Some(chunk) = stream.next().await {
            cancel.check()?;
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            if let Some(pb) = &pb {
                pb.set_position(downloaded);
            }
        }

        file.flush().await?;
        reporter.finish_download(pb, app_name);
        Ok(())
    }
}
