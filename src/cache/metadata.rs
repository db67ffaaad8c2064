//! Persisted download metadata and conditional request headers
//!
//! Each cache entry directory may hold a `meta.txt` record of the form
//! `<lastModifiedEpochMillis>|<byteSize>|`. The record tells the
//! downloader how many bytes are already on disk and which version of the
//! resource they belong to, from which it builds `If-Modified-Since`,
//! `If-Range` and `Range` headers.
//!
//! A record that is absent, empty or malformed is treated exactly like no
//! record at all: the caller performs a full fetch.

use crate::utils::format_http_date;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Name of the record file inside a cache entry directory
pub const METADATA_FILE_NAME: &str = "meta.txt";

/// `If-Modified-Since` request header
pub const HEADER_IF_MODIFIED_SINCE: &str = "If-Modified-Since";
/// `If-Range` request header
pub const HEADER_IF_RANGE: &str = "If-Range";
/// `Range` request header
pub const HEADER_RANGE: &str = "Range";

const FIELD_SEPARATOR: char = '|';

/// Parsed content of a metadata record
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MetadataRecord {
    /// Last-modified time of the remote resource (epoch millis, 0 = unknown)
    pub last_modified_epoch: i64,
    /// Number of bytes already retrieved
    pub size: u64,
}

impl MetadataRecord {
    /// Parse `<lastModified>|<size>|`, rejecting any deviation
    pub fn parse(contents: &str) -> Option<Self> {
        let contents = contents.trim_end_matches(['\r', '\n']);
        let mut fields = contents.split(FIELD_SEPARATOR);
        let (Some(last_modified), Some(size), Some(""), None) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return None;
        };

        let last_modified_epoch: i64 = last_modified.parse().ok()?;
        if last_modified_epoch < 0 {
            return None;
        }
        // A timestamp chrono cannot represent is as unusable as a non-numeric one
        format_http_date(last_modified_epoch)?;
        let size: u64 = size.parse().ok()?;

        Some(Self {
            last_modified_epoch,
            size,
        })
    }

    /// Serialized record, including the trailing separator
    pub fn to_record_string(&self) -> String {
        format!(
            "{}{FIELD_SEPARATOR}{}{FIELD_SEPARATOR}",
            self.last_modified_epoch, self.size
        )
    }

    /// Conditional headers derived from this record
    ///
    /// The validators are omitted when the timestamp is unknown (0) and
    /// `Range` is omitted when nothing has been retrieved yet, so the map
    /// may be empty.
    pub fn conditional_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        if self.last_modified_epoch > 0
            && let Some(date) = format_http_date(self.last_modified_epoch)
        {
            headers.insert(HEADER_IF_MODIFIED_SINCE.to_string(), date.clone());
            headers.insert(HEADER_IF_RANGE.to_string(), date);
        }
        if self.size > 0 {
            headers.insert(HEADER_RANGE.to_string(), format!("bytes={}-", self.size));
        }
        headers
    }
}

/// Reads and writes the per-entry metadata record
#[derive(Clone, Copy, Debug, Default)]
pub struct MetadataProvider;

impl MetadataProvider {
    /// Create a provider
    pub fn new() -> Self {
        Self
    }

    /// Parsed record of `directory`, or `None` when absent or malformed
    pub fn read_record(&self, directory: Option<&Path>) -> Option<MetadataRecord> {
        let path = directory?.join(METADATA_FILE_NAME);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read cache metadata");
                return None;
            }
        };

        let record = MetadataRecord::parse(&contents);
        if record.is_none() {
            tracing::debug!(
                path = %path.display(),
                "Ignoring malformed cache metadata, a full fetch will be performed"
            );
        }
        record
    }

    /// Conditional request headers for the entry in `directory`
    ///
    /// Returns `None` when there is no usable record. An empty map means a
    /// record exists but carries nothing to condition on.
    pub fn get_metadata(&self, directory: Option<&Path>) -> Option<HashMap<String, String>> {
        self.read_record(directory)
            .map(|record| record.conditional_headers())
    }

    /// Persist `size` and `last_modified_epoch` for the entry in `directory`
    ///
    /// The record is written to a temporary file and renamed into place, so
    /// readers see either the old or the new record. A missing or invalid
    /// directory fails silently (returns false); no record exists afterwards.
    pub fn create_metadata(
        &self,
        directory: Option<&Path>,
        size: u64,
        last_modified_epoch: i64,
    ) -> bool {
        let Some(directory) = directory.filter(|d| d.is_dir()) else {
            tracing::debug!("No valid cache directory, skipping metadata write");
            return false;
        };

        let record = MetadataRecord {
            last_modified_epoch: last_modified_epoch.max(0),
            size,
        };
        let path = directory.join(METADATA_FILE_NAME);
        let tmp_path = directory.join(format!("{METADATA_FILE_NAME}.tmp"));

        let written = fs::write(&tmp_path, record.to_record_string())
            .and_then(|()| fs::rename(&tmp_path, &path));
        match written {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to write cache metadata");
                let _ = fs::remove_file(&tmp_path);
                false
            }
        }
    }

    /// Remove the record of `directory`; true if a record was deleted
    pub fn delete_metadata(&self, directory: Option<&Path>) -> bool {
        directory
            .map(|d| fs::remove_file(d.join(METADATA_FILE_NAME)).is_ok())
            .unwrap_or(false)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_record(dir: &TempDir, contents: &str) {
        fs::write(dir.path().join(METADATA_FILE_NAME), contents).unwrap();
    }

    #[test]
    fn created_metadata_yields_all_three_headers() {
        let dir = tempfile::tempdir().unwrap();
        let provider = MetadataProvider::new();
        let last_modified = 1_700_000_000_000;

        assert!(provider.create_metadata(Some(dir.path()), 1234, last_modified));
        let headers = provider.get_metadata(Some(dir.path())).unwrap();

        let expected_date = "Tue, 14 Nov 2023 22:13:20 GMT";
        assert_eq!(headers.len(), 3);
        assert_eq!(headers[HEADER_IF_MODIFIED_SINCE], expected_date);
        assert_eq!(headers[HEADER_IF_RANGE], expected_date);
        assert_eq!(headers[HEADER_RANGE], "bytes=1234-");
    }

    #[test]
    fn record_is_stored_in_pipe_format() {
        let dir = tempfile::tempdir().unwrap();
        MetadataProvider::new().create_metadata(Some(dir.path()), 1234, 213123);

        let contents = fs::read_to_string(dir.path().join(METADATA_FILE_NAME)).unwrap();
        assert_eq!(contents, "213123|1234|");
        assert!(
            !dir.path().join("meta.txt.tmp").exists(),
            "temporary record should be renamed away"
        );
    }

    #[test]
    fn invalid_date_yields_no_metadata() {
        let dir = tempfile::tempdir().unwrap();
        write_record(&dir, "NotAValidDate|1234|");
        assert_eq!(MetadataProvider::new().get_metadata(Some(dir.path())), None);
    }

    #[test]
    fn invalid_size_yields_no_metadata() {
        let dir = tempfile::tempdir().unwrap();
        write_record(&dir, "213123|NotAValidSize|");
        assert_eq!(MetadataProvider::new().get_metadata(Some(dir.path())), None);
    }

    #[test]
    fn empty_record_yields_no_metadata() {
        let dir = tempfile::tempdir().unwrap();
        write_record(&dir, "");
        assert_eq!(MetadataProvider::new().get_metadata(Some(dir.path())), None);
    }

    #[test]
    fn absent_record_yields_no_metadata() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(MetadataProvider::new().get_metadata(Some(dir.path())), None);
        assert_eq!(MetadataProvider::new().get_metadata(None), None);
    }

    #[test]
    fn wrong_segment_count_yields_no_metadata() {
        for contents in ["213123|1234", "213123|1234|extra|", "213123", "|1234|", "213123||"] {
            let dir = tempfile::tempdir().unwrap();
            write_record(&dir, contents);
            assert_eq!(
                MetadataProvider::new().get_metadata(Some(dir.path())),
                None,
                "{contents:?} should be rejected"
            );
        }
    }

    #[test]
    fn negative_or_unrepresentable_timestamp_is_rejected() {
        assert_eq!(MetadataRecord::parse("-5|10|"), None);
        assert_eq!(MetadataRecord::parse(&format!("{}|10|", i64::MAX)), None);
    }

    #[test]
    fn trailing_newline_is_tolerated() {
        assert_eq!(
            MetadataRecord::parse("213123|1234|\n"),
            Some(MetadataRecord {
                last_modified_epoch: 213123,
                size: 1234
            })
        );
    }

    #[test]
    fn unknown_timestamp_and_zero_size_give_empty_map() {
        let dir = tempfile::tempdir().unwrap();
        let provider = MetadataProvider::new();
        provider.create_metadata(Some(dir.path()), 0, 0);

        let headers = provider.get_metadata(Some(dir.path())).unwrap();
        assert!(headers.is_empty());
    }

    #[test]
    fn unknown_timestamp_still_requests_range() {
        let record = MetadataRecord {
            last_modified_epoch: 0,
            size: 99,
        };
        let headers = record.conditional_headers();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[HEADER_RANGE], "bytes=99-");
    }

    #[test]
    fn create_metadata_tolerates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        let provider = MetadataProvider::new();

        assert!(!provider.create_metadata(None, 10, 10));
        assert!(!provider.create_metadata(Some(&missing), 10, 10));
        assert_eq!(provider.get_metadata(Some(&missing)), None);
    }

    #[test]
    fn create_metadata_rejects_file_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain-file");
        fs::write(&file, b"x").unwrap();

        assert!(!MetadataProvider::new().create_metadata(Some(&file), 10, 10));
    }

    #[test]
    fn delete_metadata_removes_record() {
        let dir = tempfile::tempdir().unwrap();
        let provider = MetadataProvider::new();
        provider.create_metadata(Some(dir.path()), 5, 5);

        assert!(provider.delete_metadata(Some(dir.path())));
        assert_eq!(provider.get_metadata(Some(dir.path())), None);
        assert!(!provider.delete_metadata(Some(dir.path())));
    }
}
