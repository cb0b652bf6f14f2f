//! Header filtering between client, gateway and upstream.
//!
//! # Request direction
//! - Drop hop-by-hop headers and any header named by `Connection`
//! - Drop client credentials, `Host`, `Content-Length` and any client-supplied `X-User-Id`
//! - Inject `X-User-Id` from the principal and the upstream API key as a bearer
//!
//! # Response direction
//! - Drop framing headers the gateway recomputes and the echoed identity headers

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};

use crate::security::auth::Principal;

pub const X_USER_ID: &str = "x-user-id";
pub const X_REQUEST_ID: &str = "x-request-id";

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Headers listed as connection options are hop-by-hop too.
fn connection_options(headers: &HeaderMap) -> Vec<HeaderName> {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect()
}

/// Build the header set sent upstream.
pub fn forward_request_headers(
    incoming: &HeaderMap,
    principal: Option<&Principal>,
    api_key: Option<&str>,
) -> HeaderMap {
    let options = connection_options(incoming);
    let mut out = HeaderMap::with_capacity(incoming.len() + 2);
    for (name, value) in incoming {
        if is_hop_by_hop(name)
            || options.contains(name)
            || name == header::AUTHORIZATION
            || name == header::HOST
            || name == header::CONTENT_LENGTH
            || name.as_str() == X_USER_ID
        {
            continue;
        }
        out.append(name.clone(), value.clone());
    }

    if let Some(principal) = principal {
        if let Ok(value) = HeaderValue::from_str(&principal.identity) {
            out.insert(X_USER_ID, value);
        }
    }
    if let Some(key) = api_key {
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", key)) {
            out.insert(header::AUTHORIZATION, value);
        }
    }
    out
}

/// Strip upstream response headers that conflict with the gateway's framing.
pub fn filter_response_headers(upstream: &HeaderMap) -> HeaderMap {
    let options = connection_options(upstream);
    let mut out = HeaderMap::with_capacity(upstream.len());
    for (name, value) in upstream {
        if is_hop_by_hop(name)
            || options.contains(name)
            || name == header::CONTENT_LENGTH
            || name.as_str() == X_USER_ID
            || name.as_str() == X_REQUEST_ID
        {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::auth::AuthScheme;
    use std::collections::BTreeMap;

    fn principal() -> Principal {
        Principal {
            identity: "user-9".to_string(),
            scheme: AuthScheme::Token,
            attributes: BTreeMap::new(),
        }
    }

    #[test]
    fn test_request_headers_are_scrubbed() {
        let mut incoming = HeaderMap::new();
        incoming.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer client-token"));
        incoming.insert(header::HOST, HeaderValue::from_static("gateway.local"));
        incoming.insert(header::CONTENT_LENGTH, HeaderValue::from_static("12"));
        incoming.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-trace-hop"));
        incoming.insert("x-trace-hop", HeaderValue::from_static("1"));
        incoming.insert(X_USER_ID, HeaderValue::from_static("spoofed"));
        incoming.insert("idempotency-key", HeaderValue::from_static("abc-123"));
        incoming.insert(X_REQUEST_ID, HeaderValue::from_static("req-1"));

        let out = forward_request_headers(&incoming, Some(&principal()), None);
        assert!(out.get(header::AUTHORIZATION).is_none());
        assert!(out.get(header::HOST).is_none());
        assert!(out.get(header::CONTENT_LENGTH).is_none());
        assert!(out.get(header::CONNECTION).is_none());
        assert!(out.get("x-trace-hop").is_none());
        assert_eq!(out[X_USER_ID], "user-9");
        assert_eq!(out["idempotency-key"], "abc-123");
        assert_eq!(out[X_REQUEST_ID], "req-1");
    }

    #[test]
    fn test_api_key_injected() {
        let out = forward_request_headers(&HeaderMap::new(), None, Some("sk-upstream"));
        assert_eq!(out[header::AUTHORIZATION], "Bearer sk-upstream");
        assert!(out.get(X_USER_ID).is_none());
    }

    #[test]
    fn test_response_headers_filtered() {
        let mut upstream = HeaderMap::new();
        upstream.insert(header::CONTENT_LENGTH, HeaderValue::from_static("5"));
        upstream.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        upstream.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        upstream.insert(X_REQUEST_ID, HeaderValue::from_static("upstream-id"));
        upstream.insert("x-upstream-version", HeaderValue::from_static("2"));

        let out = filter_response_headers(&upstream);
        assert!(out.get(header::CONTENT_LENGTH).is_none());
        assert!(out.get(header::TRANSFER_ENCODING).is_none());
        assert!(out.get(X_REQUEST_ID).is_none());
        assert_eq!(out[header::CONTENT_TYPE], "application/json");
        assert_eq!(out["x-upstream-version"], "2");
    }
}
