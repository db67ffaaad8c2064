//! Custom test assertions for integration tests

use std::path::Path;
use std::time::Duration;

/// Poll `condition` until it holds or `timeout` elapses
///
/// Returns true if the condition was reached.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    tokio::time::timeout(timeout, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}

/// Assert that `path` holds exactly `expected`
pub fn assert_file_contents(path: &Path, expected: &[u8]) {
    let actual = std::fs::read(path)
        .unwrap_or_else(|e| panic!("cannot read {}: {e}", path.display()));
    assert_eq!(
        actual,
        expected,
        "unexpected contents in {}",
        path.display()
    );
}

/// Assert that the metadata record next to `content` reads `expected`
pub fn assert_metadata_record(content: &Path, expected: &str) {
    let record = content
        .parent()
        .map(|dir| dir.join(sdk_relay::cache::metadata::METADATA_FILE_NAME))
        .expect("cache file has an entry directory");
    let actual = std::fs::read_to_string(&record)
        .unwrap_or_else(|e| panic!("cannot read {}: {e}", record.display()));
    assert_eq!(actual, expected);
}
