//! # sdk-relay
//!
//! Background delivery plumbing for client-side SDKs.
//!
//! The crate bundles three independent building blocks:
//!
//! - **[`SerialWorkDispatcher`]** - a single-consumer, gated, strictly
//!   ordered work queue. Items are handed to a [`WorkHandler`] one at a
//!   time, and processing pauses whenever the gate closes.
//! - **[`RetryExecutor`]** - runs an async operation with bounded attempts,
//!   configurable backoff, jitter and a per-attempt timeout.
//! - **[`Downloader`]** - fetches remote content into a file cache,
//!   revalidating unchanged copies and resuming interrupted transfers.
//!
//! ## Quick Start
//!
//! ```no_run
//! use sdk_relay::{Config, Downloader, SerialWorkDispatcher};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let downloader = Arc::new(Downloader::from_config(&config)?);
//!     let policy = config.retry.clone();
//!
//!     let fetcher = downloader.clone();
//!     let dispatcher = SerialWorkDispatcher::new("assets", move |url: String| {
//!         let downloader = fetcher.clone();
//!         let policy = policy.clone();
//!         async move {
//!             let result = downloader.download_with_retry(&url, Some("assets"), &policy).await;
//!             result.is_usable()
//!         }
//!     });
//!
//!     dispatcher.start()?;
//!     dispatcher.offer("https://cdn.example.com/rules.json".to_string());
//!
//!     // ...
//!
//!     dispatcher.shutdown();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// File-backed content cache and resume metadata
pub mod cache;
/// Configuration types
pub mod config;
/// Serial work dispatcher
pub mod dispatcher;
/// Conditional download pipeline
pub mod download;
/// Error types
pub mod error;
/// Retry logic with configurable backoff
pub mod retry;
/// Core types
pub mod types;
/// Helper functions
pub mod utils;

// Re-export commonly used types
pub use cache::{CacheFile, CacheFileStore, MetadataKey, MetadataProvider, MetadataRecord};
pub use config::{CacheConfig, Config, IntervalFunction, NetworkConfig, RetryPolicy};
pub use dispatcher::{SerialWorkDispatcher, WorkHandler};
pub use download::{Downloader, NetworkRequest, NetworkResponse, NetworkTransport, ReqwestTransport};
pub use error::{CacheError, DispatcherError, Error, Result};
pub use retry::{Fault, IsRetryable, RetryExecutor, with_retry};
pub use types::{DispatcherState, DownloadResult, DownloadStatus};
