//! Breaker admission and outcome recording.
//!
//! Only responses carrying an [`UpstreamOutcome`] are recorded. Answers the
//! gateway produced on its own (rate limits, denylist, bad bodies, pool
//! exhaustion) say nothing about the upstream and leave the breaker as is.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::GatewayError;
use crate::http::server::AppState;
use crate::http::streaming::UpstreamOutcome;

pub async fn circuit_breaker(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(breaker) = state.breakers.for_path(request.uri().path()) else {
        return next.run(request).await;
    };

    let admission = breaker.admit().await;
    if !admission.allowed {
        return GatewayError::CircuitOpen {
            service: breaker.service().to_string(),
            state: admission.state,
            failure_count: admission.failure_count,
        }
        .into_response();
    }

    let response = next.run(request).await;
    match response.extensions().get::<UpstreamOutcome>() {
        Some(outcome) if outcome.is_failure() => breaker.record_failure().await,
        Some(_) => breaker.record_success().await,
        None => {}
    }
    response
}
