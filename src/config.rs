//! Configuration types for sdk-relay

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::Path, path::PathBuf, time::Duration};

/// Top-level configuration
///
/// Every section has sensible defaults, so an empty JSON object is a valid
/// configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Cache location for the conditional download pipeline
    #[serde(default)]
    pub cache: CacheConfig,

    /// Network transport settings
    #[serde(default)]
    pub network: NetworkConfig,

    /// Default retry policy for callers composing the retry executor
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Config {
    /// Parse a configuration from a JSON string and validate it
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a configuration file (JSON) and validate it
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Check cross-field constraints that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.cache.root_dir.as_os_str().is_empty() {
            return Err(Error::Config {
                message: "cache root directory must not be empty".to_string(),
                key: Some("cache.root_dir".to_string()),
            });
        }
        if self.network.connect_timeout.is_zero() {
            return Err(Error::Config {
                message: "connect timeout must be greater than zero".to_string(),
                key: Some("network.connect_timeout".to_string()),
            });
        }
        self.retry.validate()
    }
}

/// Cache configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Root directory under which cache sub-directories are created (default: "./cache")
    #[serde(default = "default_cache_root")]
    pub root_dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root_dir: default_cache_root(),
        }
    }
}

/// Network transport configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Connection timeout (default: 5 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_ms_serde")]
    pub connect_timeout: Duration,

    /// Timeout for the whole request including the body (default: 10 seconds)
    #[serde(default = "default_read_timeout", with = "duration_ms_serde")]
    pub read_timeout: Duration,

    /// User-Agent header sent with every request
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            read_timeout: default_read_timeout(),
            user_agent: None,
        }
    }
}

/// How the next retry interval is derived from the previous one
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalFunction {
    /// Always wait `initial_interval`
    Fixed,
    /// Double the interval on every attempt (default)
    #[default]
    Exponential,
    /// Grow the interval by `initial_interval` on every attempt
    Linear,
    /// Scale `initial_interval` by the Fibonacci sequence (1, 1, 2, 3, 5, ...)
    Fibonacci,
}

/// Retry policy for the [`RetryExecutor`](crate::retry::RetryExecutor)
///
/// Immutable once handed to an executor. The effective delay between two
/// attempts never exceeds `max_interval`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Interval before the first retry (default: 1 second)
    #[serde(default = "default_initial_interval", with = "duration_ms_serde")]
    pub initial_interval: Duration,

    /// Upper bound for any delay between attempts (default: 60 seconds)
    #[serde(default = "default_max_interval", with = "duration_ms_serde")]
    pub max_interval: Duration,

    /// Total number of attempts including the first one (None = unbounded, default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: Option<u32>,

    /// Backoff curve (default: exponential)
    #[serde(default)]
    pub interval_function: IntervalFunction,

    /// Randomize each delay within ±50% (default: true)
    #[serde(default = "default_true")]
    pub use_jitter: bool,

    /// Time budget of a single attempt (default: 30 seconds)
    #[serde(default = "default_execution_timeout", with = "duration_ms_serde")]
    pub execution_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: default_initial_interval(),
            max_interval: default_max_interval(),
            max_attempts: default_max_attempts(),
            interval_function: IntervalFunction::default(),
            use_jitter: true,
            execution_timeout: default_execution_timeout(),
        }
    }
}

impl RetryPolicy {
    /// Check the policy for values that would make the executor misbehave
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == Some(0) {
            return Err(Error::Config {
                message: "max_attempts must be at least 1 (use null for unbounded)".to_string(),
                key: Some("retry.max_attempts".to_string()),
            });
        }
        if self.initial_interval > self.max_interval {
            return Err(Error::Config {
                message: format!(
                    "initial_interval ({:?}) exceeds max_interval ({:?})",
                    self.initial_interval, self.max_interval
                ),
                key: Some("retry.initial_interval".to_string()),
            });
        }
        if self.execution_timeout.is_zero() {
            return Err(Error::Config {
                message: "execution_timeout must be greater than zero".to_string(),
                key: Some("retry.execution_timeout".to_string()),
            });
        }
        Ok(())
    }
}

fn default_cache_root() -> PathBuf {
    PathBuf::from("./cache")
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_true() -> bool {
    true
}

fn default_initial_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_max_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_max_attempts() -> Option<u32> {
    Some(5)
}

fn default_execution_timeout() -> Duration {
    Duration::from_secs(30)
}

// Duration serialization helper (integer milliseconds)
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
