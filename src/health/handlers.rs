//! Handlers for `/`, `/ping`, `/health` and `/metrics`.

use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::GatewayError;
use crate::health::checks::{self, HealthReport};
use crate::http::server::AppState;
use crate::observability::timestamp;

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    message: String,
    timestamp: String,
    #[serde(flatten)]
    report: HealthReport,
}

/// Service banner with the mounted upstreams.
pub async fn root(State(state): State<AppState>) -> Json<Value> {
    let mounts: Vec<Value> = state
        .config
        .upstreams
        .iter()
        .map(|u| json!({ "name": u.name, "path": u.mount }))
        .collect();
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "description": "API gateway for the agent platform services",
        "endpoints": [
            { "path": "/health", "description": "System health check" },
            { "path": "/ping", "description": "Liveness probe" },
            { "path": "/metrics", "description": "Prometheus metrics" },
        ],
        "upstreams": mounts,
    }))
}

pub async fn ping() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn health(State(state): State<AppState>) -> Json<impl Serialize> {
    let report = checks::report(&state).await;
    Json(HealthBody {
        status: "success",
        message: format!("System is {}", report.overall_status),
        timestamp: timestamp(),
        report,
    })
}

/// Prometheus text exposition.
pub async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => GatewayError::NotFound("Metrics are disabled".to_string()).into_response(),
    }
}
