//! Admin API for breaker and rate-limit operations.
//!
//! Every route requires `Authorization: Bearer {admin.api_key}`. The router
//! is only mounted when `admin.enabled` is set.

pub mod auth;
pub mod handlers;

use axum::routing::{get, post, put};
use axum::{middleware, Router};

use self::auth::require_admin;
use self::handlers::*;
use crate::http::server::AppState;

pub fn admin_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/circuit-breakers", get(list_breakers))
        .route("/admin/circuit-breakers/{service}", get(get_breaker))
        .route("/admin/circuit-breakers/{service}/reset", post(reset_breaker))
        .route(
            "/admin/rate-limits/{category}/{identity}",
            get(get_usage).delete(reset_usage),
        )
        .route("/admin/rate-limits/{category}/{identity}/custom", put(set_custom_limit))
        .route_layer(middleware::from_fn_with_state(state, require_admin))
}
