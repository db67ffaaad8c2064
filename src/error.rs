//! Error types for sdk-relay
//!
//! This module provides the error handling used across the crate:
//! - A crate-wide [`Error`] with `From` conversions for the underlying I/O,
//!   HTTP and serialization errors
//! - Usage errors raised by the [`SerialWorkDispatcher`](crate::dispatcher::SerialWorkDispatcher)
//! - Cache store errors surfaced by [`CacheFileStore`](crate::cache::CacheFileStore)
//!
//! The download pipeline itself never returns these across its public
//! boundary; every failure there resolves to a tagged
//! [`DownloadResult`](crate::types::DownloadResult).

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for sdk-relay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for sdk-relay
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "cache.root_dir")
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error raised by the HTTP client
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Transport-level failure not covered by the HTTP client error type
    #[error("transport error: {0}")]
    Transport(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// URL failed syntactic validation
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// Cache store error
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// Dispatcher usage error
    #[error("dispatcher error: {0}")]
    Dispatcher(#[from] DispatcherError),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Invalid state transitions on a work dispatcher
///
/// These are usage errors: they are fatal for the offending call only and
/// never affect items already queued on a healthy dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatcherError {
    /// `start()` was called on a dispatcher that has been shut down
    #[error("dispatcher '{name}' was shut down and cannot be restarted")]
    StartAfterShutdown {
        /// Name of the dispatcher
        name: String,
    },

    /// `start()` was called outside of a tokio runtime
    #[error("dispatcher '{name}' must be started from within a tokio runtime")]
    NoRuntime {
        /// Name of the dispatcher
        name: String,
    },
}

/// Errors raised by the cache file store
#[derive(Debug, Error)]
pub enum CacheError {
    /// A cache directory could not be created or written
    #[error("cannot write to cache directory {path}: {source}")]
    DirectoryNotWritable {
        /// The directory that could not be created
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A cache file could not be created
    #[error("cannot create cache file {path}: {source}")]
    FileCreateFailed {
        /// The file that could not be created
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A partial cache file could not be promoted to complete
    #[error("cannot mark {path} complete: {source}")]
    MarkCompleteFailed {
        /// The partial file being promoted
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The file handed to the store is not a partial cache file
    #[error("{path} is not a partial cache file")]
    NotPartial {
        /// The offending path
        path: PathBuf,
    },
}
