use crate::config::HTTP_CLIENT;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::StreamExt;
use log::{debug, info, warn};
use reqwest::header::LOCATION;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use url::Url;

pub const MAX_REDIRECTS: u32 = 5;

/// What the catalog resolved for one download request.
#[derive(Debug, Clone, Deserialize)]
pub struct ResolvedDownload {
    pub archive_name: String,
    pub download_url: String,
    pub byte_size: Option<u64>,
    pub effective_file_id: i64,
    pub mod_name: String,
}

/// Presentation and scoring metadata the catalog knows about a mod.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogModMetadata {
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    pub last_updated: Option<DateTime<Utc>>,
    pub latest_file_display_name: Option<String>,
    #[serde(default)]
    pub download_count: u64,
    #[serde(default)]
    pub is_trending: bool,
    #[serde(default)]
    pub creator_warned_count: u32,
    pub creator_id: Option<i64>,
    pub creator_name: Option<String>,
}

/// Byte-level progress callback: (downloaded, total-if-known).
pub type FetchProgress = dyn Fn(u64, Option<u64>) + Send + Sync;

/// Narrow interface to the remote catalog. The installer only ever talks to
/// this trait; tests substitute a scripted implementation.
#[async_trait]
pub trait CatalogDownloader: Send + Sync {
    /// Resolves mod + optional file id into a concrete download. `None`
    /// means "latest file".
    async fn resolve_download(
        &self,
        remote_mod_id: i64,
        file_id: Option<i64>,
    ) -> Result<ResolvedDownload>;

    async fn get_mod_metadata(&self, remote_mod_id: i64) -> Result<CatalogModMetadata>;

    /// Streams `url` into `dest`, following redirects per the bounded
    /// policy and enforcing the stall watchdog.
    async fn fetch_to_file(
        &self,
        url: &str,
        dest: &Path,
        stall_timeout: Duration,
        progress: &FetchProgress,
        cancel: &CancellationToken,
    ) -> Result<()>;
}

/// Resolves a `Location` header against the URL that produced it. Relative
/// locations are joined; absolute ones replace the base.
pub fn resolve_location(current: &Url, location: &str) -> Result<Url> {
    current
        .join(location)
        .map_err(|e| AppError::DownloadFailed(format!("invalid redirect location {:?}: {}", location, e)))
}

/// Streams a URL to a file with manual redirect handling (up to
/// `MAX_REDIRECTS`, relative `Location` rewritten against the current URL)
/// and a no-progress watchdog around every chunk.
pub async fn http_fetch_streaming(
    url: &str,
    dest: &Path,
    stall_timeout: Duration,
    progress: &FetchProgress,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut current =
        Url::parse(url).map_err(|e| AppError::DownloadFailed(format!("invalid URL {:?}: {}", url, e)))?;
    let mut redirects = 0u32;

    let response = loop {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        let response = HTTP_CLIENT
            .get(current.clone())
            .send()
            .await
            .map_err(|e| AppError::DownloadFailed(format!("request to {} failed: {}", current, e)))?;

        let status = response.status();
        if status.is_redirection() {
            redirects += 1;
            if redirects > MAX_REDIRECTS {
                return Err(AppError::TooManyRedirects(MAX_REDIRECTS));
            }
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| {
                    AppError::DownloadFailed(format!("{} redirected without a Location header", current))
                })?;
            let next = resolve_location(&current, location)?;
            debug!("Redirect {}/{}: {} -> {}", redirects, MAX_REDIRECTS, current, next);
            current = next;
            continue;
        }

        if !status.is_success() {
            return Err(AppError::DownloadFailed(format!(
                "{} returned status {} ({})",
                current,
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }
        break response;
    };

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).await?;
    }

    let content_length = response.content_length();
    let mut file = fs::File::create(dest).await?;
    let mut stream = response.bytes_stream();
    let mut downloaded = 0u64;

    loop {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        let chunk = match tokio::time::timeout(stall_timeout, stream.next()).await {
            Ok(Some(Ok(chunk))) => chunk,
            Ok(Some(Err(e))) => {
                return Err(AppError::DownloadFailed(format!("stream error: {}", e)));
            }
            Ok(None) => break,
            Err(_) => {
                return Err(AppError::DownloadStalled(stall_timeout.as_secs()));
            }
        };

        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;
        progress(downloaded, content_length);
    }

    // Make sure every byte hit the disk before the digest runs over it.
    file.sync_all().await?;
    drop(file);

    info!("Downloaded {} bytes from {} to {:?}", downloaded, url, dest);
    Ok(())
}

/// The reqwest-backed catalog client used in production.
pub struct CatalogClient {
    base_url: String,
    api_key: Option<String>,
}

impl CatalogClient {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self { base_url, api_key }
    }

    fn request(&self, url: String) -> reqwest::RequestBuilder {
        let mut builder = HTTP_CLIENT.get(url);
        if let Some(key) = &self.api_key {
            builder = builder.header("x-api-key", key);
        }
        builder
    }
}

#[async_trait]
impl CatalogDownloader for CatalogClient {
    async fn resolve_download(
        &self,
        remote_mod_id: i64,
        file_id: Option<i64>,
    ) -> Result<ResolvedDownload> {
        let url = match file_id {
            Some(file_id) => format!("{}/mods/{}/files/{}", self.base_url, remote_mod_id, file_id),
            None => format!("{}/mods/{}/files/latest", self.base_url, remote_mod_id),
        };
        debug!("Resolving download for mod {} via {}", remote_mod_id, url);

        let response = self.request(url).send().await.map_err(|e| {
            warn!("Resolve request for mod {} failed: {}", remote_mod_id, e);
            AppError::ResolveFailed(remote_mod_id)
        })?;
        if !response.status().is_success() {
            warn!(
                "Resolve for mod {} returned status {}",
                remote_mod_id,
                response.status()
            );
            return Err(AppError::ResolveFailed(remote_mod_id));
        }
        response
            .json::<ResolvedDownload>()
            .await
            .map_err(|_| AppError::ResolveFailed(remote_mod_id))
    }

    async fn get_mod_metadata(&self, remote_mod_id: i64) -> Result<CatalogModMetadata> {
        let url = format!("{}/mods/{}", self.base_url, remote_mod_id);
        let response = self.request(url).send().await?;
        if !response.status().is_success() {
            // Metadata is presentation + scoring input only; degrade to
            // defaults rather than failing the install.
            warn!(
                "Metadata request for mod {} returned status {}; using defaults",
                remote_mod_id,
                response.status()
            );
            return Ok(CatalogModMetadata::default());
        }
        Ok(response.json::<CatalogModMetadata>().await.unwrap_or_default())
    }

    async fn fetch_to_file(
        &self,
        url: &str,
        dest: &Path,
        stall_timeout: Duration,
        progress: &FetchProgress,
        cancel: &CancellationToken,
    ) -> Result<()> {
        http_fetch_streaming(url, dest, stall_timeout, progress, cancel).await
    }
}
