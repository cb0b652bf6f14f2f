//! Terminal pipeline stage: forward to the upstream and relay the answer.
//!
//! # Flow
//! ```text
//! resolve mount → rewrite path → denylist check (403, no network call)
//!     → buffer body → detect streaming flag → inject flag / billing
//!     → acquire pool slot → send
//!     → streaming:     SSE relay (status 200, failures in-band)
//!     → non-streaming: status, filtered headers and body verbatim
//! ```

use std::time::Instant;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};

use crate::config::StreamFlagMode;
use crate::error::GatewayError;
use crate::http::body::{query_flag, ForwardBody};
use crate::http::headers::{filter_response_headers, forward_request_headers};
use crate::http::server::AppState;
use crate::http::streaming::{self, error_event, StreamSettings, UpstreamOutcome};
use crate::observability::metrics;
use crate::routing::Route;
use crate::security::auth::Principal;
use crate::store::unix_now;

/// Name of the upstream that served a response, for request metrics.
#[derive(Debug, Clone)]
pub struct RouteLabel(pub String);

/// How the request will be relayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Buffered,
    Stream,
    TokenStream,
}

pub async fn proxy_handler(State(state): State<AppState>, request: Request) -> Response {
    let path = request.uri().path().to_string();
    let Some(route) = state.routes.resolve(&path) else {
        tracing::debug!(path = %path, "No upstream mounted for path");
        return GatewayError::NotFound(format!("No route for {}", path)).into_response();
    };

    let label = RouteLabel(route.upstream.name.clone());
    let mut response = match forward(&state, route, request).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    };
    response.extensions_mut().insert(label);
    response
}

async fn forward(state: &AppState, route: Route, request: Request) -> Result<Response, GatewayError> {
    let upstream = route.upstream.clone();
    let method = request.method().clone();

    if upstream.is_denied(&route.upstream_path) {
        tracing::warn!(
            upstream = %upstream.name,
            method = %method,
            path = %route.upstream_path,
            "Blocked denylisted operation"
        );
        return Err(GatewayError::Authorization(format!(
            "Operation not allowed: {} {}",
            method, route.upstream_path
        )));
    }

    let client = state
        .clients
        .get(&upstream.name)
        .cloned()
        .ok_or_else(|| GatewayError::Internal(format!("no client for upstream {}", upstream.name)))?;

    let principal = request.extensions().get::<Principal>().cloned();
    let query = request.uri().query().map(str::to_string);
    let (parts, mut body) = ForwardBody::read(request, state.config.security.max_body_bytes).await?;

    let flagged = match &upstream.stream_flag {
        Some(flag) => {
            let set = body.flag(flag) || query_flag(query.as_deref(), flag);
            if set {
                body.set_flag(flag);
            }
            set
        }
        None => false,
    };
    let mode = match (upstream.is_streaming_path(&route.upstream_path), flagged, upstream.stream_flag_mode) {
        (true, true, StreamFlagMode::TokenLevel) => Mode::TokenStream,
        (true, _, _) => Mode::Stream,
        (false, true, StreamFlagMode::Enables) => Mode::Stream,
        _ => Mode::Buffered,
    };

    if upstream.inject_billing {
        if let Some(principal) = &principal {
            body.inject_billing(principal, unix_now());
        }
    }

    let mut headers = forward_request_headers(&parts.headers, principal.as_ref(), upstream.api_key.as_deref());
    if matches!(body, ForwardBody::Multipart(_)) {
        headers.remove(header::CONTENT_TYPE);
    }
    if mode != Mode::Buffered {
        headers.insert(header::ACCEPT, HeaderValue::from_static("text/event-stream"));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    }
    if mode == Mode::TokenStream {
        headers.insert("x-stream-tokens", HeaderValue::from_static("true"));
    }

    tracing::info!(
        upstream = %upstream.name,
        method = %method,
        path = %route.upstream_path,
        user_id = principal.as_ref().map(|p| p.identity.as_str()).unwrap_or("-"),
        body = body.kind(),
        mode = ?mode,
        "Proxying request"
    );

    let url = upstream.url_for(&route.upstream_path, query.as_deref());
    let permit = client.acquire().await?;
    let builder = body.attach(client.request(method, url).headers(headers))?;
    let started = Instant::now();

    if mode != Mode::Buffered {
        let token_mode = mode == Mode::TokenStream;
        let settings = StreamSettings {
            chunk_size: if token_mode {
                None
            } else {
                Some(state.config.streaming.chunk_size)
            },
            keepalive: std::time::Duration::from_secs(state.config.streaming.keepalive_interval_secs),
            read_timeout: upstream.timeout,
        };
        return Ok(match client.send(builder).await {
            Ok(response) => {
                metrics::record_upstream(&upstream.name, outcome_label(response.status().is_server_error()), started);
                streaming::relay(upstream.name.clone(), response, settings, permit).await
            }
            Err(e) => {
                tracing::error!(upstream = %upstream.name, error = %e, "Failed to open upstream stream");
                metrics::record_upstream(&upstream.name, failure_label(&e), started);
                streaming::single_event(
                    error_event(&streaming::failure_message(&e)),
                    token_mode,
                    UpstreamOutcome { status: None },
                )
            }
        });
    }

    let result = async {
        let response = client.send(builder).await?;
        let status = response.status();
        let headers = filter_response_headers(response.headers());
        let bytes = match tokio::time::timeout(upstream.timeout, response.bytes()).await {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => return Err(client.classify(&e)),
            Err(_) => {
                return Err(GatewayError::Timeout {
                    service: upstream.name.clone(),
                    after: upstream.timeout,
                })
            }
        };
        Ok::<_, GatewayError>((status, headers, bytes))
    }
    .await;
    drop(permit);

    match result {
        Ok((status, headers, bytes)) => {
            metrics::record_upstream(&upstream.name, outcome_label(status.is_server_error()), started);
            tracing::debug!(
                upstream = %upstream.name,
                status = status.as_u16(),
                bytes = bytes.len(),
                duration_ms = started.elapsed().as_millis() as u64,
                "Upstream responded"
            );
            let mut response = (status, headers, Body::from(bytes)).into_response();
            response.extensions_mut().insert(UpstreamOutcome { status: Some(status) });
            Ok(response)
        }
        Err(e) => {
            tracing::error!(upstream = %upstream.name, error = %e, "Upstream request failed");
            metrics::record_upstream(&upstream.name, failure_label(&e), started);
            let mut response = e.into_response();
            response.extensions_mut().insert(UpstreamOutcome { status: None });
            Ok(response)
        }
    }
}

fn outcome_label(server_error: bool) -> &'static str {
    if server_error {
        "failure"
    } else {
        "success"
    }
}

fn failure_label(error: &GatewayError) -> &'static str {
    match error {
        GatewayError::Timeout { .. } => "timeout",
        _ => "failure",
    }
}
