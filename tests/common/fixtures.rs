//! Shared HTTP fixtures

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Last-Modified value served by the fixtures
pub const LAST_MODIFIED: &str = "Tue, 14 Nov 2023 22:13:20 GMT";

/// Epoch millis of [`LAST_MODIFIED`]
pub const LAST_MODIFIED_MS: i64 = 1_700_000_000_000;

/// Serve `body` at `route` with a fixed Last-Modified and the given ETag
pub async fn mount_asset(server: &MockServer, route: &str, body: &[u8], etag: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Last-Modified", LAST_MODIFIED)
                .insert_header("ETag", etag)
                .set_body_bytes(body.to_vec()),
        )
        .mount(server)
        .await;
}

/// Fail the first `failures` requests to `route` with `status`
///
/// Mount before the asset itself so the failures take precedence.
pub async fn mount_failures(server: &MockServer, route: &str, status: u16, failures: u64) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(status))
        .up_to_n_times(failures)
        .mount(server)
        .await;
}
