//! Per-request bookkeeping at the edge of the router.
//!
//! # Responsibilities
//! - Open the tracing span every request runs in, keyed by its request id
//! - Record request count and latency, labelled by the upstream that served it
//!
//! Request ids themselves are assigned by `SetRequestIdLayer` before these
//! run and copied onto the response by `PropagateRequestIdLayer`.

use std::time::Instant;

use axum::body::Body;
use axum::extract::Request;
use axum::http;
use axum::middleware::Next;
use axum::response::Response;
use tracing::Span;

use crate::http::headers::X_REQUEST_ID;
use crate::http::proxy::RouteLabel;
use crate::observability::metrics;

/// Label for responses produced by the gateway itself.
const LOCAL_ROUTE: &str = "local";

/// Request id assigned to `request`, or `-` before one was set.
pub fn request_id<B>(request: &http::Request<B>) -> &str {
    request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
}

/// Span factory for `TraceLayer`.
pub fn make_span(request: &http::Request<Body>) -> Span {
    tracing::info_span!(
        "request",
        request_id = %request_id(request),
        method = %request.method(),
        path = %request.uri().path(),
    )
}

/// Record request metrics once the response head is ready.
pub async fn track_request(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();

    let response = next.run(request).await;

    let route = response
        .extensions()
        .get::<RouteLabel>()
        .map(|label| label.0.as_str())
        .unwrap_or(LOCAL_ROUTE);
    let status = response.status().as_u16();
    metrics::record_request(&method, route, status, start);
    if status >= 500 {
        tracing::warn!(status = status, route = %route, "Request failed");
    }
    response
}
