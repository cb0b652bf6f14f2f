use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::http::server::AppState;
use crate::security::auth::AuthOutcome;

/// Attach the authenticated [`Principal`](crate::security::auth::Principal)
/// to the request, or reject it.
pub async fn authenticate(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let outcome = state
        .authenticator
        .authenticate(request.method(), request.uri().path(), request.headers())
        .await;

    match outcome {
        Ok(AuthOutcome::Authenticated(principal)) => {
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Ok(AuthOutcome::Bypass) => next.run(request).await,
        Err(e) => e.into_response(),
    }
}
