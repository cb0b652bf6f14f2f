//! Server-sent-event relay.
//!
//! # Responsibilities
//! - Relay upstream bytes to the client as they arrive, in order
//! - Inject `: ping` comments while the upstream is idle
//! - Bound each upstream read by the read timeout
//! - End a failed stream with one `data:` error event instead of a reset
//!
//! # Chunking
//! ```text
//! plain mode   upstream chunk split into pieces of at most `chunk_size`
//! token mode   upstream chunk relayed exactly as received
//! ```
//! Chunks are never merged, so event framing produced by the upstream is
//! preserved byte for byte.
//!
//! Dropping the response body (client disconnect) drops the upstream body
//! stream and the in-flight permit with it.

use std::convert::Infallible;
use std::time::{Duration, Instant};

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;
use serde_json::json;
use tokio::sync::OwnedSemaphorePermit;
use tokio::time::MissedTickBehavior;

use crate::error::GatewayError;
use crate::observability::metrics;

const KEEPALIVE_COMMENT: &[u8] = b": ping\n\n";

/// Settings for one relayed stream.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// `None` relays chunks as received (token mode).
    pub chunk_size: Option<usize>,
    pub keepalive: Duration,
    pub read_timeout: Duration,
}

/// Upstream status observed by the proxy, read by the breaker stage.
///
/// Streaming responses always answer 200, so the breaker cannot rely on the
/// response status alone. `None` means the call failed before any status
/// arrived.
#[derive(Debug, Clone, Copy)]
pub struct UpstreamOutcome {
    pub status: Option<StatusCode>,
}

impl UpstreamOutcome {
    pub fn is_failure(&self) -> bool {
        self.status.map_or(true, |s| s.is_server_error())
    }
}

/// A single SSE `data:` event carrying `{"error": message}`.
pub fn error_event(message: &str) -> Bytes {
    Bytes::from(format!("data: {}\n\n", json!({ "error": message })))
}

fn sse_headers(response: &mut Response, token_mode: bool) {
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
    if token_mode {
        headers.insert("x-stream-tokens", HeaderValue::from_static("true"));
    }
}

/// Stream consisting of exactly one event.
pub fn single_event(event: Bytes, token_mode: bool, outcome: UpstreamOutcome) -> Response {
    let mut response = Body::from(event).into_response();
    sse_headers(&mut response, token_mode);
    response.extensions_mut().insert(outcome);
    response
}

/// Message for a transport failure during an open stream.
pub fn failure_message(error: &GatewayError) -> String {
    match error {
        GatewayError::Timeout { service, .. } => {
            format!("{} request timed out. Please try again.", service)
        }
        GatewayError::Upstream { service, .. } => {
            format!("Connection to {} failed. Please try again.", service)
        }
        other => format!("Streaming failed: {}", other),
    }
}

enum Next {
    Upstream(Result<Option<Result<Bytes, reqwest::Error>>, tokio::time::error::Elapsed>),
    Idle,
}

/// Logs the end of a stream however it ends.
struct StreamGuard {
    service: String,
    started: Instant,
    chunks: u64,
    bytes: u64,
    finished: bool,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        let duration_ms = self.started.elapsed().as_millis() as u64;
        if !self.finished {
            tracing::info!(
                upstream = %self.service,
                chunks = self.chunks,
                bytes = self.bytes,
                duration_ms = duration_ms,
                "Stream cancelled by client"
            );
        } else if self.chunks == 0 {
            tracing::warn!(upstream = %self.service, duration_ms = duration_ms, "Streaming completed with no data");
        } else {
            tracing::info!(
                upstream = %self.service,
                chunks = self.chunks,
                bytes = self.bytes,
                duration_ms = duration_ms,
                "Streaming completed"
            );
        }
    }
}

fn split(chunk: Bytes, size: Option<usize>) -> Vec<Bytes> {
    match size {
        Some(size) if size > 0 && chunk.len() > size => {
            let mut pieces = Vec::with_capacity(chunk.len() / size + 1);
            let mut rest = chunk;
            while rest.len() > size {
                pieces.push(rest.split_to(size));
            }
            pieces.push(rest);
            pieces
        }
        _ => vec![chunk],
    }
}

/// Relay an upstream response as an SSE stream.
///
/// `permit` is held until the stream ends or the client goes away.
pub async fn relay(
    service: String,
    upstream: reqwest::Response,
    settings: StreamSettings,
    permit: OwnedSemaphorePermit,
) -> Response {
    let token_mode = settings.chunk_size.is_none();
    let status = upstream.status();

    if status.as_u16() >= 400 {
        tracing::error!(upstream = %service, status = status.as_u16(), "Upstream streaming error");
        let text = match tokio::time::timeout(settings.read_timeout, upstream.text()).await {
            Ok(Ok(text)) => text,
            _ => status.canonical_reason().unwrap_or("Upstream error").to_string(),
        };
        drop(permit);
        return single_event(
            Bytes::from(format!("data: {}\n\n", text)),
            token_mode,
            UpstreamOutcome { status: Some(status) },
        );
    }

    tracing::info!(
        upstream = %service,
        token_mode = token_mode,
        content_type = ?upstream.headers().get(header::CONTENT_TYPE),
        "Starting stream forwarding"
    );

    let stream = async_stream::stream! {
        let _permit = permit;
        let mut guard = StreamGuard {
            service,
            started: Instant::now(),
            chunks: 0,
            bytes: 0,
            finished: false,
        };
        let mut body = upstream.bytes_stream();
        let start = tokio::time::Instant::now();
        let mut keepalive = tokio::time::interval_at(start + settings.keepalive, settings.keepalive);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut deadline = start + settings.read_timeout;

        loop {
            let next = tokio::select! {
                item = tokio::time::timeout_at(deadline, body.next()) => Next::Upstream(item),
                _ = keepalive.tick() => Next::Idle,
            };

            match next {
                Next::Idle => {
                    yield Ok::<Bytes, Infallible>(Bytes::from_static(KEEPALIVE_COMMENT));
                }
                Next::Upstream(Ok(Some(Ok(chunk)))) => {
                    deadline = tokio::time::Instant::now() + settings.read_timeout;
                    keepalive.reset();
                    if chunk.is_empty() {
                        continue;
                    }
                    for piece in split(chunk, settings.chunk_size) {
                        guard.chunks += 1;
                        guard.bytes += piece.len() as u64;
                        metrics::record_stream_chunk(&guard.service, piece.len());
                        yield Ok(piece);
                    }
                }
                Next::Upstream(Ok(None)) => break,
                Next::Upstream(Ok(Some(Err(e)))) => {
                    tracing::error!(upstream = %guard.service, error = %e, "Upstream stream failed");
                    let message = if e.is_timeout() {
                        format!("{} request timed out. Please try again.", guard.service)
                    } else {
                        format!("Streaming failed: {}", e)
                    };
                    yield Ok(error_event(&message));
                    break;
                }
                Next::Upstream(Err(_)) => {
                    tracing::error!(
                        upstream = %guard.service,
                        timeout_secs = settings.read_timeout.as_secs(),
                        "Upstream stream read timed out"
                    );
                    let message = format!("{} request timed out. Please try again.", guard.service);
                    yield Ok(error_event(&message));
                    break;
                }
            }
        }
        guard.finished = true;
    };

    let mut response = Body::from_stream(stream).into_response();
    sse_headers(&mut response, token_mode);
    response.extensions_mut().insert(UpstreamOutcome { status: Some(status) });
    response
}
