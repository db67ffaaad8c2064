//! Loading configuration files and building components from them

use sdk_relay::{Config, Downloader, Error, IntervalFunction};
use std::time::Duration;

#[test]
fn config_file_drives_all_sections() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("relay.json");
    let cache_root = temp_dir.path().join("cache");
    std::fs::write(
        &path,
        serde_json::json!({
            "cache": { "root_dir": cache_root },
            "network": {
                "connect_timeout": 1500,
                "read_timeout": 4000,
                "user_agent": "relay/2.0"
            },
            "retry": {
                "initial_interval": 250,
                "max_interval": 8000,
                "max_attempts": null,
                "interval_function": "linear",
                "use_jitter": false,
                "execution_timeout": 2000
            }
        })
        .to_string(),
    )
    .unwrap();

    let config = Config::from_json_file(&path).unwrap();

    assert_eq!(config.cache.root_dir, cache_root);
    assert_eq!(config.network.connect_timeout, Duration::from_millis(1500));
    assert_eq!(config.network.read_timeout, Duration::from_secs(4));
    assert_eq!(config.network.user_agent.as_deref(), Some("relay/2.0"));
    assert_eq!(config.retry.initial_interval, Duration::from_millis(250));
    assert_eq!(config.retry.max_attempts, None);
    assert_eq!(config.retry.interval_function, IntervalFunction::Linear);
    assert!(!config.retry.use_jitter);

    let downloader = Downloader::from_config(&config).unwrap();
    assert_eq!(downloader.store().root(), cache_root.as_path());
}

#[test]
fn missing_file_is_an_io_error() {
    let temp_dir = tempfile::tempdir().unwrap();

    let result = Config::from_json_file(&temp_dir.path().join("absent.json"));

    assert!(matches!(result, Err(Error::Io(_))));
}

#[test]
fn invalid_policy_names_the_offending_key() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("relay.json");
    std::fs::write(&path, r#"{"retry": {"initial_interval": 5000, "max_interval": 1000}}"#)
        .unwrap();

    match Config::from_json_file(&path) {
        Err(Error::Config { key, .. }) => {
            assert_eq!(key.as_deref(), Some("retry.initial_interval"));
        }
        other => panic!("expected a configuration error, got {other:?}"),
    }
}

#[test]
fn malformed_json_is_a_serialization_error() {
    assert!(matches!(
        Config::from_json_str("{ not json"),
        Err(Error::Serialization(_))
    ));
}
