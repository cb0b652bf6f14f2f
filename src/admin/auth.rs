use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use subtle::ConstantTimeEq;

use crate::error::GatewayError;
use crate::http::server::AppState;

/// Admit requests bearing the admin key; an empty key admits nobody.
pub async fn require_admin(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let expected = state.config.admin.api_key.as_bytes();
    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    match presented {
        Some(key) if !expected.is_empty() && bool::from(key.as_bytes().ct_eq(expected)) => {
            next.run(request).await
        }
        _ => {
            tracing::warn!(path = %request.uri().path(), "Rejected admin request");
            GatewayError::Authentication("Invalid admin credentials".to_string()).into_response()
        }
    }
}
