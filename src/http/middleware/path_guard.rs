use axum::extract::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::GatewayError;
use crate::routing::has_dot_segment;

/// Reject paths with `.`/`..` segments before any stage matches on them.
pub async fn reject_dot_segments(request: Request, next: Next) -> Response {
    let path = request.uri().path();
    if has_dot_segment(path) {
        tracing::warn!(method = %request.method(), path = %path, "Rejected path with dot segments");
        return GatewayError::bad_request("Request path must not contain '.' or '..' segments").into_response();
    }
    next.run(request).await
}
