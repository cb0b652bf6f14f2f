//! Request body capture and rewriting.
//!
//! Bodies are buffered (bounded by the configured body limit) and classified
//! by content type:
//!
//! ```text
//! application/json      → Json(Value)       parsed, may be mutated
//! multipart/form-data   → Multipart(parts)  fields and files, re-encoded upstream
//! anything else         → Raw(bytes)        passed through untouched
//! zero length           → Empty
//! ```

use axum::body::{Body, Bytes};
use axum::extract::{FromRequest, Multipart};
use axum::http::{header, request::Parts, HeaderMap, Request, StatusCode};
use serde_json::{Map, Value};

use crate::error::GatewayError;
use crate::security::auth::Principal;

/// One multipart field; files carry a filename.
#[derive(Debug, Clone)]
pub struct FormPart {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

#[derive(Debug, Clone)]
pub enum ForwardBody {
    Empty,
    Json(Value),
    Multipart(Vec<FormPart>),
    Raw(Bytes),
}

fn content_type(headers: &HeaderMap) -> &str {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

fn is_json(content_type: &str) -> bool {
    let mime = content_type.split(';').next().unwrap_or("").trim();
    mime == "application/json" || mime.ends_with("+json")
}

/// `true` for `name=true` (any case) or `name=1` in a query string.
pub fn query_flag(query: Option<&str>, name: &str) -> bool {
    query
        .unwrap_or("")
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .any(|(key, value)| key == name && (value.eq_ignore_ascii_case("true") || value == "1"))
}

impl ForwardBody {
    /// Buffer and classify the body of `request`.
    pub async fn read(request: Request<Body>, limit: usize) -> Result<(Parts, Self), GatewayError> {
        let (parts, body) = request.into_parts();
        let probe = Request::from_parts(parts.clone(), body);
        let bytes = Bytes::from_request(probe, &()).await.map_err(|rejection| {
            if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
                GatewayError::PayloadTooLarge { limit }
            } else {
                GatewayError::bad_request(rejection.body_text())
            }
        })?;

        if bytes.is_empty() {
            return Ok((parts, Self::Empty));
        }

        let ct = content_type(&parts.headers).to_string();
        let body = if is_json(&ct) {
            let value = serde_json::from_slice(&bytes)
                .map_err(|e| GatewayError::bad_request(format!("Invalid JSON in request body: {}", e)))?;
            Self::Json(value)
        } else if ct.starts_with("multipart/form-data") {
            Self::Multipart(Self::read_multipart(&parts, bytes).await?)
        } else {
            Self::Raw(bytes)
        };
        Ok((parts, body))
    }

    async fn read_multipart(parts: &Parts, bytes: Bytes) -> Result<Vec<FormPart>, GatewayError> {
        let request = Request::from_parts(parts.clone(), Body::from(bytes));
        let mut multipart = Multipart::from_request(request, &())
            .await
            .map_err(|rejection| GatewayError::bad_request(rejection.body_text()))?;

        let mut fields = Vec::new();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| GatewayError::bad_request(format!("Invalid multipart body: {}", e)))?
        {
            let name = field.name().unwrap_or_default().to_string();
            let filename = field.file_name().map(str::to_string);
            let content_type = field.content_type().map(str::to_string);
            let data = field
                .bytes()
                .await
                .map_err(|e| GatewayError::bad_request(format!("Invalid multipart body: {}", e)))?;
            fields.push(FormPart {
                name,
                filename,
                content_type,
                data,
            });
        }
        Ok(fields)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Json(_) => "json",
            Self::Multipart(_) => "multipart",
            Self::Raw(_) => "raw",
        }
    }

    /// Whether a boolean flag is set in a JSON body or as a multipart field.
    pub fn flag(&self, name: &str) -> bool {
        match self {
            Self::Json(value) => value.get(name).and_then(Value::as_bool).unwrap_or(false),
            Self::Multipart(fields) => fields
                .iter()
                .any(|f| f.filename.is_none() && f.name == name && f.data.eq_ignore_ascii_case(b"true")),
            _ => false,
        }
    }

    /// Set a boolean flag; an empty body becomes a JSON object holding it.
    pub fn set_flag(&mut self, name: &str) {
        match self {
            Self::Json(Value::Object(map)) => {
                map.insert(name.to_string(), Value::Bool(true));
            }
            Self::Empty => {
                let mut map = Map::new();
                map.insert(name.to_string(), Value::Bool(true));
                *self = Self::Json(Value::Object(map));
            }
            _ => {}
        }
    }

    /// Attribute the request to `principal` for upstream billing.
    pub fn inject_billing(&mut self, principal: &Principal, now: f64) {
        let Self::Json(Value::Object(map)) = self else {
            return;
        };
        map.insert("user".to_string(), Value::String(principal.identity.clone()));

        let metadata = map
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        if !metadata.is_object() {
            *metadata = Value::Object(Map::new());
        }
        if let Value::Object(metadata) = metadata {
            metadata.insert("user_id".to_string(), Value::String(principal.identity.clone()));
            metadata.insert(
                "gateway_version".to_string(),
                Value::String(env!("CARGO_PKG_VERSION").to_string()),
            );
            metadata.insert("request_timestamp".to_string(), Value::from(now));
        }
    }

    /// Attach this body to an upstream request.
    pub fn attach(self, builder: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder, GatewayError> {
        Ok(match self {
            Self::Empty => builder,
            Self::Json(value) => builder.json(&value),
            Self::Raw(bytes) => builder.body(bytes),
            Self::Multipart(fields) => {
                let mut form = reqwest::multipart::Form::new();
                for field in fields {
                    let mut part = reqwest::multipart::Part::bytes(field.data.to_vec());
                    if let Some(filename) = field.filename {
                        part = part.file_name(filename);
                    }
                    if let Some(ct) = field.content_type {
                        part = part
                            .mime_str(&ct)
                            .map_err(|_| GatewayError::bad_request(format!("Invalid content type '{}'", ct)))?;
                    }
                    form = form.part(field.name, part);
                }
                builder.multipart(form)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::auth::AuthScheme;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn request(content_type: &str, body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/x")
            .header(header::CONTENT_TYPE, content_type)
            .body(body.into())
            .unwrap()
    }

    #[tokio::test]
    async fn test_json_body() {
        let (_, body) = ForwardBody::read(request("application/json", r#"{"stream":true}"#), 1024)
            .await
            .unwrap();
        assert_eq!(body.kind(), "json");
        assert!(body.flag("stream"));
        assert!(!body.flag("stream_tokens"));
    }

    #[tokio::test]
    async fn test_invalid_json_is_400() {
        let err = ForwardBody::read(request("application/json", "{nope"), 1024)
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_raw_and_empty() {
        let (_, raw) = ForwardBody::read(request("text/plain", "hello"), 1024).await.unwrap();
        assert!(matches!(raw, ForwardBody::Raw(ref b) if b.as_ref() == b"hello"));

        let (_, empty) = ForwardBody::read(request("application/json", ""), 1024).await.unwrap();
        assert_eq!(empty.kind(), "empty");
    }

    #[tokio::test]
    async fn test_multipart_fields_and_files() {
        let payload = "--XYZ\r\n\
            Content-Disposition: form-data; name=\"purpose\"\r\n\r\n\
            assistants\r\n\
            --XYZ\r\n\
            Content-Disposition: form-data; name=\"file\"; filename=\"notes.txt\"\r\n\
            Content-Type: text/plain\r\n\r\n\
            some notes\r\n\
            --XYZ--\r\n";
        let (_, body) = ForwardBody::read(request("multipart/form-data; boundary=XYZ", payload), 4096)
            .await
            .unwrap();
        let ForwardBody::Multipart(fields) = body else {
            panic!("expected multipart");
        };
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].name, "purpose");
        assert_eq!(fields[0].data.as_ref(), b"assistants");
        assert_eq!(fields[1].filename.as_deref(), Some("notes.txt"));
        assert_eq!(fields[1].content_type.as_deref(), Some("text/plain"));
        assert_eq!(fields[1].data.as_ref(), b"some notes");
    }

    #[test]
    fn test_query_flag() {
        assert!(query_flag(Some("a=1&stream_tokens=TRUE"), "stream_tokens"));
        assert!(query_flag(Some("stream=1"), "stream"));
        assert!(!query_flag(Some("stream=false"), "stream"));
        assert!(!query_flag(None, "stream"));
    }

    #[test]
    fn test_set_flag_creates_body() {
        let mut body = ForwardBody::Empty;
        body.set_flag("stream_tokens");
        assert!(body.flag("stream_tokens"));

        let mut raw = ForwardBody::Raw(Bytes::from_static(b"x"));
        raw.set_flag("stream");
        assert!(!raw.flag("stream"));
    }

    #[test]
    fn test_billing_injection() {
        let principal = Principal {
            identity: "u-1".to_string(),
            scheme: AuthScheme::SharedSecret,
            attributes: BTreeMap::new(),
        };
        let mut body = ForwardBody::Json(json!({
            "model": "gpt-4o",
            "metadata": {"trace": "t1"}
        }));
        body.inject_billing(&principal, 1700000000.5);

        let ForwardBody::Json(value) = body else { unreachable!() };
        assert_eq!(value["user"], "u-1");
        assert_eq!(value["metadata"]["trace"], "t1");
        assert_eq!(value["metadata"]["user_id"], "u-1");
        assert_eq!(value["metadata"]["request_timestamp"], 1700000000.5);
        assert_eq!(value["metadata"]["gateway_version"], env!("CARGO_PKG_VERSION"));
    }
}
