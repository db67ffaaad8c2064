//! Conditional download pipeline
//!
//! The [`Downloader`] fetches a URL into the [`CacheFileStore`], using the
//! entry's metadata record to avoid re-downloading unchanged content and to
//! resume interrupted transfers:
//!
//! 1. Validate the URL
//! 2. Ensure the entry directory exists
//! 3. Plan the request: full fetch, revalidation of a complete copy, or
//!    resumption of a partial one
//! 4. Send it through the injected [`NetworkTransport`]
//! 5. Stream the body into a partial file, rename it complete and persist
//!    fresh metadata
//!
//! Every failure resolves to a [`DownloadStatus`]; nothing is retried
//! internally. Concurrent downloads of the same key are not serialized.

pub mod transport;

pub use transport::{
    BodyStream, NetworkRequest, NetworkResponse, NetworkTransport, ReqwestTransport,
};

use crate::cache::metadata::{HEADER_IF_MODIFIED_SINCE, HEADER_IF_RANGE, HEADER_RANGE};
use crate::cache::{CacheFile, CacheFileStore, MetadataKey, MetadataProvider, MetadataRecord};
use crate::config::{Config, NetworkConfig, RetryPolicy};
use crate::error::Result;
use crate::retry::RetryExecutor;
use crate::types::{DownloadResult, DownloadStatus};
use crate::utils::{parse_http_date, validate_url};
use futures::StreamExt;
use std::collections::HashMap;
use std::convert::Infallible;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;

const HEADER_IF_NONE_MATCH: &str = "If-None-Match";

/// How the request for a key is conditioned
#[derive(Debug)]
enum RequestPlan {
    /// Nothing usable on disk
    Full,
    /// A complete copy exists; ask whether it changed
    Revalidate {
        file: CacheFile,
        headers: HashMap<String, String>,
    },
    /// A partial copy exists; ask for the remaining bytes
    Resume {
        file: CacheFile,
        record: MetadataRecord,
        headers: HashMap<String, String>,
    },
}

/// Body copy failure, with the number of bytes that did reach the file
struct CopyFailure {
    written: u64,
    error: std::io::Error,
}

/// Fetches remote content into the cache
pub struct Downloader {
    store: CacheFileStore,
    metadata: MetadataProvider,
    transport: Arc<dyn NetworkTransport>,
    network: NetworkConfig,
}

impl Downloader {
    /// Create a downloader over `store` using `transport`
    pub fn new(store: CacheFileStore, transport: Arc<dyn NetworkTransport>) -> Self {
        Self {
            store,
            metadata: MetadataProvider::new(),
            transport,
            network: NetworkConfig::default(),
        }
    }

    /// Create a downloader with a `reqwest` transport from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let transport = ReqwestTransport::new(&config.network)?;
        Ok(Self::new(CacheFileStore::new(&config.cache.root_dir), Arc::new(transport))
            .with_network_config(config.network.clone()))
    }

    /// Override the timeouts placed on each request
    #[must_use]
    pub fn with_network_config(mut self, network: NetworkConfig) -> Self {
        self.network = network;
        self
    }

    /// The cache store downloads are written to
    pub fn store(&self) -> &CacheFileStore {
        &self.store
    }

    /// Cached copy of `url`, complete files only
    pub fn cached_file(&self, url: &str, sub_dir: Option<&str>) -> Option<CacheFile> {
        let url = validate_url(url).ok()?;
        self.store.get_file(url.as_str(), sub_dir, false)
    }

    /// Delete the cached copy of `url` and its metadata
    pub fn delete(&self, url: &str, sub_dir: Option<&str>) -> bool {
        match validate_url(url) {
            Ok(url) => self.store.delete(url.as_str(), sub_dir),
            Err(_) => false,
        }
    }

    /// Download `url` into the cache, optionally under `sub_dir`
    ///
    /// Never fails across this boundary; see [`DownloadStatus`] for the
    /// possible outcomes.
    pub async fn download(&self, url: &str, sub_dir: Option<&str>) -> DownloadResult {
        let url = match validate_url(url) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(error = %e, "Rejecting download of invalid URL");
                return DownloadResult::failed(DownloadStatus::InvalidUrl);
            }
        };
        let key = url.as_str();

        let entry_dir = match self.store.ensure_entry_dir(key, sub_dir) {
            Ok(dir) => dir,
            Err(e) => {
                tracing::error!(url = %url, error = %e, "Cache directory is not writable");
                return DownloadResult::failed(DownloadStatus::CannotWriteToCacheDir);
            }
        };

        let mut plan = self.plan_request(key, sub_dir, &entry_dir);
        loop {
            let headers = match &plan {
                RequestPlan::Full => HashMap::new(),
                RequestPlan::Revalidate { headers, .. } | RequestPlan::Resume { headers, .. } => {
                    headers.clone()
                }
            };
            tracing::debug!(url = %url, plan = plan_name(&plan), "Requesting resource");

            let request = NetworkRequest {
                url: url.clone(),
                headers,
                connect_timeout: self.network.connect_timeout,
                read_timeout: self.network.read_timeout,
            };
            let response = match self.transport.connect(request).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "Request failed");
                    return DownloadResult::failed(DownloadStatus::NoData);
                }
            };

            return match (response.status, plan) {
                (304, RequestPlan::Resume { .. }) => {
                    // Only a complete copy can be reported as not modified
                    tracing::warn!(url = %url, "Resume request answered with 304, fetching in full");
                    plan = RequestPlan::Full;
                    continue;
                }
                (304, RequestPlan::Revalidate { file, .. }) => {
                    tracing::debug!(url = %url, "Cached copy is current");
                    DownloadResult::with_file(DownloadStatus::NotModified, file)
                }
                (304, RequestPlan::Full) => DownloadResult::failed(DownloadStatus::NotModified),
                (206, RequestPlan::Resume { file, record, .. }) => {
                    self.resume_transfer(key, &entry_dir, file, record, response)
                        .await
                }
                (206, _) => {
                    tracing::warn!(url = %url, "Unrequested partial content");
                    DownloadResult::failed(DownloadStatus::ResponseProcessingFailed)
                }
                (200..=299, _) => self.full_transfer(key, sub_dir, &entry_dir, response).await,
                (416, RequestPlan::Resume { .. }) => {
                    tracing::warn!(url = %url, "Resume range rejected, discarding partial download");
                    self.store.delete(key, sub_dir);
                    DownloadResult::failed(DownloadStatus::NoData)
                }
                (status, _) => {
                    tracing::warn!(url = %url, status, "Unexpected response status");
                    DownloadResult::failed(DownloadStatus::NoData)
                }
            };
        }
    }

    /// Download `url`, retrying `NoData` and `ResponseProcessingFailed`
    ///
    /// Resumable partial transfers pick up where the previous attempt
    /// stopped. Returns the last attempt's result.
    pub async fn download_with_retry(
        &self,
        url: &str,
        sub_dir: Option<&str>,
        policy: &RetryPolicy,
    ) -> DownloadResult {
        let executor = RetryExecutor::<DownloadResult, Infallible>::new(policy.clone())
            .retry_on_result(|result| result.status.is_retryable());
        let last_status = Mutex::new(None);
        let last = &last_status;

        let result = executor
            .execute(move |attempt| async move {
                tracing::debug!(url, attempt, "Download attempt");
                let result = self.download(url, sub_dir).await;
                if let Ok(mut status) = last.lock() {
                    *status = Some(result.status);
                }
                Ok::<_, Infallible>(result)
            })
            .await;

        result.unwrap_or_else(|| {
            let status = last_status
                .into_inner()
                .ok()
                .flatten()
                .unwrap_or(DownloadStatus::NoData);
            DownloadResult::failed(status)
        })
    }

    /// Decide how to condition the request from what is on disk
    fn plan_request(&self, key: &str, sub_dir: Option<&str>, entry_dir: &Path) -> RequestPlan {
        let Some(file) = self.store.get_file(key, sub_dir, true) else {
            return RequestPlan::Full;
        };
        let Some(record) = self.metadata.read_record(Some(entry_dir)) else {
            tracing::debug!(key, "No usable metadata for cached copy, fetching in full");
            return RequestPlan::Full;
        };

        let mut headers = record.conditional_headers();
        if file.is_complete() {
            headers.remove(HEADER_IF_RANGE);
            headers.remove(HEADER_RANGE);
            if let Some(etag) = file.etag() {
                headers.insert(HEADER_IF_NONE_MATCH.to_string(), etag.to_string());
            }
            if headers.is_empty() {
                return RequestPlan::Full;
            }
            return RequestPlan::Revalidate { file, headers };
        }

        // Resuming needs a validator so the server cannot append a newer version
        let on_disk = file.len().unwrap_or(0);
        if record.size == 0 || record.size != on_disk || !headers.contains_key(HEADER_IF_RANGE) {
            tracing::debug!(
                key,
                recorded = record.size,
                on_disk,
                "Partial download cannot be resumed, fetching in full"
            );
            return RequestPlan::Full;
        }
        // If-Modified-Since would let the server answer 304 for the missing bytes
        headers.remove(HEADER_IF_MODIFIED_SINCE);
        RequestPlan::Resume {
            file,
            record,
            headers,
        }
    }

    /// Write a complete (200) response from scratch
    async fn full_transfer(
        &self,
        key: &str,
        sub_dir: Option<&str>,
        entry_dir: &Path,
        response: NetworkResponse,
    ) -> DownloadResult {
        let last_modified = response
            .header("last-modified")
            .and_then(parse_http_date)
            .unwrap_or(0);

        let mut typed = HashMap::new();
        if let Some(etag) = response.header("etag") {
            typed.insert(MetadataKey::ETag, etag.to_string());
        }
        if last_modified > 0 {
            typed.insert(MetadataKey::LastModifiedEpoch, last_modified.to_string());
        }

        // A complete copy stays readable until the new body replaces it
        let previous = self.store.get_file(key, sub_dir, false);
        let file = match self.store.create_file(key, sub_dir, typed) {
            Ok(file) => file,
            Err(e) => {
                tracing::error!(key, error = %e, "Cannot create cache file");
                return DownloadResult::failed(DownloadStatus::CannotWriteToCacheDir);
            }
        };
        if previous.is_none() {
            self.metadata.delete_metadata(Some(entry_dir));
        }

        match copy_body(&file, response.body, false).await {
            Ok(0) => {
                tracing::warn!(key, "Response carried no data");
                discard_partial(&file);
                DownloadResult::failed(DownloadStatus::NoData)
            }
            Ok(written) => self.finish(entry_dir, &file, written, last_modified),
            Err(failure) if previous.is_some() => {
                tracing::warn!(
                    key,
                    bytes = failure.written,
                    error = %failure.error,
                    "Refresh failed, keeping the previous cached copy"
                );
                discard_partial(&file);
                DownloadResult::failed(DownloadStatus::ResponseProcessingFailed)
            }
            Err(failure) => self.abort_transfer(key, entry_dir, failure, last_modified),
        }
    }

    /// Append a partial-content (206) response to the existing partial file
    async fn resume_transfer(
        &self,
        key: &str,
        entry_dir: &Path,
        file: CacheFile,
        record: MetadataRecord,
        response: NetworkResponse,
    ) -> DownloadResult {
        let start = response.header("content-range").and_then(content_range_start);
        if start != Some(record.size) {
            tracing::warn!(
                key,
                expected = record.size,
                start = ?start,
                "Partial content does not continue the cached bytes, discarding"
            );
            discard_partial(&file);
            self.metadata.delete_metadata(Some(entry_dir));
            return DownloadResult::failed(DownloadStatus::ResponseProcessingFailed);
        }

        match copy_body(&file, response.body, true).await {
            Ok(0) => {
                tracing::warn!(key, "Partial content response carried no data");
                DownloadResult::failed(DownloadStatus::NoData)
            }
            Ok(written) => self.finish(
                entry_dir,
                &file,
                record.size + written,
                record.last_modified_epoch,
            ),
            Err(failure) => self.abort_transfer(
                key,
                entry_dir,
                CopyFailure {
                    written: record.size + failure.written,
                    error: failure.error,
                },
                record.last_modified_epoch,
            ),
        }
    }

    fn finish(&self, entry_dir: &Path, file: &CacheFile, size: u64, last_modified: i64) -> DownloadResult {
        let complete = match self.store.mark_complete(file) {
            Ok(complete) => complete,
            Err(e) => {
                tracing::error!(error = %e, "Failed to finalize cache file");
                return DownloadResult::failed(DownloadStatus::ResponseProcessingFailed);
            }
        };
        if !self.metadata.create_metadata(Some(entry_dir), size, last_modified) {
            tracing::warn!(
                path = %complete.path().display(),
                "Download cached but metadata could not be persisted"
            );
        }
        tracing::info!(path = %complete.path().display(), bytes = size, "Download complete");
        DownloadResult::with_file(DownloadStatus::Success, complete)
    }

    /// Keep what was written so the next attempt can resume
    fn abort_transfer(
        &self,
        key: &str,
        entry_dir: &Path,
        failure: CopyFailure,
        last_modified: i64,
    ) -> DownloadResult {
        tracing::warn!(
            key,
            bytes = failure.written,
            error = %failure.error,
            "Response processing failed, keeping partial download"
        );
        self.metadata
            .create_metadata(Some(entry_dir), failure.written, last_modified);
        DownloadResult::failed(DownloadStatus::ResponseProcessingFailed)
    }
}

fn discard_partial(file: &CacheFile) {
    if let Err(e) = std::fs::remove_file(file.path()) {
        tracing::warn!(path = %file.path().display(), error = %e, "Failed to remove partial cache file");
    }
}

fn plan_name(plan: &RequestPlan) -> &'static str {
    match plan {
        RequestPlan::Full => "full",
        RequestPlan::Revalidate { .. } => "revalidate",
        RequestPlan::Resume { .. } => "resume",
    }
}

/// Stream `body` into `file`, returning the number of bytes written
async fn copy_body(file: &CacheFile, mut body: BodyStream, append: bool) -> std::result::Result<u64, CopyFailure> {
    let mut out = tokio::fs::OpenOptions::new()
        .write(true)
        .append(append)
        .truncate(!append)
        .open(file.path())
        .await
        .map_err(|error| CopyFailure { written: 0, error })?;

    let mut written = 0u64;
    while let Some(chunk) = body.next().await {
        let result = match chunk {
            Ok(bytes) => out.write_all(&bytes).await.map(|()| bytes.len() as u64),
            Err(error) => Err(error),
        };
        match result {
            Ok(len) => written += len,
            Err(error) => {
                let _ = out.flush().await;
                return Err(CopyFailure { written, error });
            }
        }
    }

    out.flush()
        .await
        .map_err(|error| CopyFailure { written, error })?;
    Ok(written)
}

/// First byte position of a `Content-Range: bytes <start>-<end>/<total>` header
fn content_range_start(value: &str) -> Option<u64> {
    value
        .trim()
        .strip_prefix("bytes ")?
        .split('-')
        .next()?
        .trim()
        .parse()
        .ok()
}
