//! Core types shared by the dispatcher and the download pipeline

use crate::cache::CacheFile;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a [`SerialWorkDispatcher`](crate::dispatcher::SerialWorkDispatcher)
///
/// The only forward transitions are `Created → Active` and
/// `Created | Active → Shutdown`. A shut-down dispatcher never restarts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatcherState {
    /// Built but not started; offered items are queued, not processed
    Created,
    /// Started; items are drained whenever the gate allows it
    Active,
    /// Terminal; offers are rejected
    Shutdown,
}

impl fmt::Display for DispatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DispatcherState::Created => "created",
            DispatcherState::Active => "active",
            DispatcherState::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// Outcome tag of a single download attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    /// Full body written, marked complete and metadata persisted
    Success,
    /// The server reported the cached copy as current
    NotModified,
    /// The URL failed syntactic validation
    InvalidUrl,
    /// No usable body: transport failure, error status or empty response
    NoData,
    /// The cache directory could not be created or written
    CannotWriteToCacheDir,
    /// Copying or finalizing the response body failed
    ResponseProcessingFailed,
}

impl DownloadStatus {
    /// Whether a later attempt could plausibly produce a different outcome
    ///
    /// Used when composing the download pipeline with the retry executor.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            DownloadStatus::NoData | DownloadStatus::ResponseProcessingFailed
        )
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DownloadStatus::Success => "success",
            DownloadStatus::NotModified => "not_modified",
            DownloadStatus::InvalidUrl => "invalid_url",
            DownloadStatus::NoData => "no_data",
            DownloadStatus::CannotWriteToCacheDir => "cannot_write_to_cache_dir",
            DownloadStatus::ResponseProcessingFailed => "response_processing_failed",
        };
        f.write_str(s)
    }
}

/// Result of [`Downloader::download`](crate::download::Downloader::download)
///
/// `file` is set for [`DownloadStatus::Success`], and for
/// [`DownloadStatus::NotModified`] when a cached copy exists (the reused,
/// unchanged file). It is `None` for every failure.
#[must_use]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadResult {
    /// Outcome tag
    pub status: DownloadStatus,
    /// Handle to the resulting cache file
    pub file: Option<CacheFile>,
}

impl DownloadResult {
    /// A result carrying a cache file
    pub fn with_file(status: DownloadStatus, file: CacheFile) -> Self {
        Self {
            status,
            file: Some(file),
        }
    }

    /// A failure (or file-less not-modified) result
    pub fn failed(status: DownloadStatus) -> Self {
        Self { status, file: None }
    }

    /// True for `Success` and `NotModified`
    pub fn is_usable(&self) -> bool {
        matches!(
            self.status,
            DownloadStatus::Success | DownloadStatus::NotModified
        )
    }
}
