//! "Still building" page served until the bundle is ready.

use std::time::Duration;

use axum::http::header;
use axum::response::{Html, IntoResponse, Response};

/// Minimal HTML that reloads itself after `delay`.
pub fn placeholder_html(delay: Duration) -> String {
    format!(
        "<h1>Building application...</h1><script>setTimeout(() => location.reload(), {})</script>",
        delay.as_millis()
    )
}

/// 200 response carrying the placeholder; never cached.
pub fn placeholder_response(body: &str) -> Response {
    (
        [(header::CACHE_CONTROL, "no-store")],
        Html(body.to_owned()),
    )
        .into_response()
}
