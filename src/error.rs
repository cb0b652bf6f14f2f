//! Gateway error taxonomy and its HTTP rendering.
//!
//! Every pipeline stage short-circuits with a [`GatewayError`]; the response
//! body is always the same envelope:
//!
//! ```text
//! {"status":"error","message":"…","timestamp":"…",
//!  "error":{"code":"RATE_LIMIT_EXCEEDED","message":"…","field":null,"context":{…}}}
//! ```

use std::time::Duration;

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::resilience::CircuitState;
use crate::security::rate_limit::RateLimitDecision;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Missing, malformed, expired or invalid credential.
    #[error("{0}")]
    Authentication(String),

    /// Valid credential that may not perform this request.
    #[error("{0}")]
    Authorization(String),

    #[error("Rate limit exceeded for {category}")]
    RateLimited {
        category: String,
        decision: RateLimitDecision,
    },

    #[error("Service {service} is temporarily unavailable")]
    CircuitOpen {
        service: String,
        state: CircuitState,
        failure_count: u32,
    },

    /// Upstream unreachable or failed before a response could be relayed.
    #[error("{message}")]
    Upstream {
        service: String,
        message: String,
        status: StatusCode,
    },

    #[error("Request to {service} timed out")]
    Timeout { service: String, after: Duration },

    #[error("{0}")]
    NotFound(String),

    #[error("{message}")]
    Validation {
        message: String,
        field: Option<String>,
        /// 400 for unparseable input, 422 for semantically invalid input.
        status: StatusCode,
    },

    #[error("Request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    /// Unexpected failure; the detail is logged, never returned.
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorDetail<'a> {
    code: &'static str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<Map<String, Value>>,
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    status: &'static str,
    message: &'a str,
    timestamp: String,
    error: ErrorDetail<'a>,
}

impl GatewayError {
    pub fn upstream(service: &str, message: impl Into<String>) -> Self {
        Self::Upstream {
            service: service.to_string(),
            message: message.into(),
            status: StatusCode::BAD_GATEWAY,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
            status: StatusCode::BAD_REQUEST,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Authentication(_) => StatusCode::UNAUTHORIZED,
            Self::Authorization(_) => StatusCode::FORBIDDEN,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Upstream { status, .. } => *status,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Validation { status, .. } => *status,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "AUTHENTICATION_ERROR",
            Self::Authorization(_) => "AUTHORIZATION_ERROR",
            Self::RateLimited { .. } => "RATE_LIMIT_EXCEEDED",
            Self::CircuitOpen { .. } => "CIRCUIT_BREAKER_OPEN",
            Self::Upstream { .. } => "UPSTREAM_ERROR",
            Self::Timeout { .. } => "TIMEOUT",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            Self::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    fn public_message(&self) -> String {
        match self {
            Self::Internal(_) => "An internal error occurred".to_string(),
            other => other.to_string(),
        }
    }

    fn context(&self) -> Option<Map<String, Value>> {
        let value = match self {
            Self::RateLimited { category, decision } => json!({
                "category": category,
                "limit": decision.limit,
                "retry_after": decision.retry_after,
            }),
            Self::CircuitOpen {
                service,
                state,
                failure_count,
            } => json!({
                "service": service,
                "state": state,
                "failure_count": failure_count,
            }),
            Self::Upstream { service, .. } => json!({ "service": service }),
            Self::Timeout { service, after } => json!({
                "service": service,
                "timeout_secs": after.as_secs_f64(),
            }),
            Self::PayloadTooLarge { limit } => json!({ "limit": limit }),
            _ => return None,
        };
        match value {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let Self::Internal(detail) = &self {
            tracing::error!(error = %detail, "Internal gateway error");
        }

        let message = self.public_message();
        let field = match &self {
            Self::Validation { field, .. } => field.as_deref(),
            _ => None,
        };
        let body = ErrorBody {
            status: "error",
            message: &message,
            timestamp: crate::observability::timestamp(),
            error: ErrorDetail {
                code: self.code(),
                message: &message,
                field,
                context: self.context(),
            },
        };

        let mut response = (status, Json(body)).into_response();
        if let Self::RateLimited { decision, .. } = &self {
            decision.apply_headers(response.headers_mut());
            if let Some(retry_after) = decision.retry_after {
                response
                    .headers_mut()
                    .insert("retry-after", HeaderValue::from(retry_after));
            }
        }
        response
    }
}
