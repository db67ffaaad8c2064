//! Utility functions for HTTP dates, cache naming and URL validation

use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sha2::{Digest, Sha256};
use url::Url;

/// HTTP-date layout (the RFC 2822 form mandated for HTTP headers, always GMT)
const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Format epoch milliseconds as an HTTP date, e.g. `Tue, 14 Nov 2023 22:13:20 GMT`
///
/// Returns `None` when the timestamp is outside chrono's representable range.
///
/// # Examples
///
/// ```
/// use sdk_relay::utils::format_http_date;
///
/// assert_eq!(
///     format_http_date(0).as_deref(),
///     Some("Thu, 01 Jan 1970 00:00:00 GMT")
/// );
/// ```
pub fn format_http_date(epoch_millis: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp_millis(epoch_millis)
        .map(|dt| dt.format(HTTP_DATE_FORMAT).to_string())
}

/// Parse an HTTP `Last-Modified` style date into epoch milliseconds
///
/// Accepts the GMT HTTP-date layout and any RFC 2822 date with a numeric
/// offset.
pub fn parse_http_date(value: &str) -> Option<i64> {
    let value = value.trim();
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, HTTP_DATE_FORMAT) {
        return Some(naive.and_utc().timestamp_millis());
    }
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

/// Lowercase hex SHA-256 of a cache key, used as the entry's directory name
pub fn hash_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Basic syntactic URL validation for the download pipeline
///
/// The URL must parse, use `http` or `https`, and name a host.
///
/// # Examples
///
/// ```
/// use sdk_relay::utils::validate_url;
///
/// assert!(validate_url("https://assets.example.com/rules.zip").is_ok());
/// assert!(validate_url("not a url").is_err());
/// assert!(validate_url("file:///etc/passwd").is_err());
/// ```
pub fn validate_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim()).map_err(|e| Error::InvalidUrl(format!("{raw}: {e}")))?;
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(Error::InvalidUrl(format!(
                "{raw}: unsupported scheme '{other}'"
            )));
        }
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(Error::InvalidUrl(format!("{raw}: missing host")));
    }
    Ok(url)
}
