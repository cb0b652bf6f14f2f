use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::GatewayError;
use crate::http::server::AppState;
use crate::security::auth::Principal;

/// Rate-limit identity: the principal, else the client address.
fn identity(request: &Request) -> String {
    if let Some(principal) = request.extensions().get::<Principal>() {
        return principal.identity.clone();
    }
    match request.extensions().get::<ConnectInfo<SocketAddr>>() {
        Some(ConnectInfo(addr)) => format!("ip:{}", addr.ip()),
        None => "ip:unknown".to_string(),
    }
}

/// Count the request against its category window; attach usage headers.
pub async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let path = request.uri().path();
    if !state.limiter.is_enabled() || state.limiter.is_exempt(path) {
        return next.run(request).await;
    }

    let category = state.limiter.category_for(path).to_string();
    let identity = identity(&request);
    let decision = state.limiter.check(&identity, &category).await;

    if !decision.allowed {
        tracing::warn!(
            identity = %identity,
            category = %category,
            limit = decision.limit,
            retry_after = decision.retry_after,
            "Rate limit exceeded"
        );
        return GatewayError::RateLimited { category, decision }.into_response();
    }

    let mut response = next.run(request).await;
    decision.apply_headers(response.headers_mut());
    response
}
