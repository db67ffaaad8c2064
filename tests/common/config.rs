//! Test configuration helpers

use sdk_relay::{Config, IntervalFunction, RetryPolicy};
use std::time::Duration;
use tempfile::TempDir;

/// Retry policy with millisecond delays for tests
pub fn fast_retry_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        initial_interval: Duration::from_millis(2),
        max_interval: Duration::from_millis(20),
        max_attempts: Some(max_attempts),
        interval_function: IntervalFunction::Exponential,
        use_jitter: false,
        execution_timeout: Duration::from_secs(5),
    }
}

/// Configuration rooted in a fresh temporary cache directory
///
/// The returned `TempDir` must be kept alive for the duration of the test.
pub fn test_config() -> (Config, TempDir) {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let mut config = Config::default();
    config.cache.root_dir = temp_dir.path().join("cache");
    config.network.connect_timeout = Duration::from_secs(2);
    config.network.read_timeout = Duration::from_secs(5);
    config.network.user_agent = Some("sdk-relay-tests/1.0".to_string());
    config.retry = fast_retry_policy(4);
    (config, temp_dir)
}
