use std::time::Duration;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::GatewayError;
use crate::http::server::AppState;
use crate::resilience::BreakerStatus;
use crate::security::rate_limit::UsageReport;
use crate::store::StoreError;

#[derive(Debug, Deserialize)]
pub struct CustomLimitRequest {
    pub limit: u64,
    pub duration_secs: u64,
}

fn store_failure(e: StoreError) -> GatewayError {
    GatewayError::Internal(e.to_string())
}

fn known_category(state: &AppState, category: &str) -> Result<(), GatewayError> {
    if state.limiter.has_category(category) {
        Ok(())
    } else {
        Err(GatewayError::NotFound(format!("Unknown rate limit category '{}'", category)))
    }
}

pub async fn list_breakers(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "circuit_breakers": state.breakers.statuses().await }))
}

pub async fn get_breaker(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> Result<Json<BreakerStatus>, GatewayError> {
    let breaker = state
        .breakers
        .get(&service)
        .ok_or_else(|| GatewayError::NotFound(format!("Unknown service '{}'", service)))?;
    Ok(Json(breaker.status().await))
}

pub async fn reset_breaker(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> Result<Json<Value>, GatewayError> {
    if !state.breakers.reset(&service).await {
        return Err(GatewayError::NotFound(format!("Unknown service '{}'", service)));
    }
    tracing::info!(service = %service, "Circuit breaker reset via admin API");
    Ok(Json(json!({
        "message": format!("Circuit breaker for {} has been reset", service),
    })))
}

pub async fn get_usage(
    State(state): State<AppState>,
    Path((category, identity)): Path<(String, String)>,
) -> Result<Json<UsageReport>, GatewayError> {
    known_category(&state, &category)?;
    let report = state
        .limiter
        .usage(&identity, &category)
        .await
        .map_err(store_failure)?;
    Ok(Json(report))
}

pub async fn reset_usage(
    State(state): State<AppState>,
    Path((category, identity)): Path<(String, String)>,
) -> Result<Json<Value>, GatewayError> {
    known_category(&state, &category)?;
    state
        .limiter
        .reset(&identity, &category)
        .await
        .map_err(store_failure)?;
    Ok(Json(json!({
        "message": format!("Rate limit for {} in {} has been reset", identity, category),
    })))
}

pub async fn set_custom_limit(
    State(state): State<AppState>,
    Path((category, identity)): Path<(String, String)>,
    Json(request): Json<CustomLimitRequest>,
) -> Result<Json<Value>, GatewayError> {
    known_category(&state, &category)?;
    for (field, value) in [("limit", request.limit), ("duration_secs", request.duration_secs)] {
        if value == 0 {
            return Err(GatewayError::Validation {
                message: format!("{} must be greater than zero", field),
                field: Some(field.to_string()),
                status: axum::http::StatusCode::UNPROCESSABLE_ENTITY,
            });
        }
    }
    state
        .limiter
        .set_custom_limit(
            &identity,
            &category,
            request.limit,
            Duration::from_secs(request.duration_secs),
        )
        .await
        .map_err(store_failure)?;
    Ok(Json(json!({
        "identity": identity,
        "category": category,
        "limit": request.limit,
        "duration_secs": request.duration_secs,
    })))
}

#[cfg(test)]
mod tests {
    use crate::config::GatewayConfig;
    use crate::http::server::HttpServer;
    use crate::store::MemoryStore;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use axum::Router;
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    const ADMIN_KEY: &str = "admin-key";

    fn app() -> Router {
        let mut config = GatewayConfig {
            upstreams: GatewayConfig::default_upstreams(),
            ..Default::default()
        };
        config.auth.jwt_secret = "test-secret".to_string();
        config.admin.enabled = true;
        config.admin.api_key = ADMIN_KEY.to_string();
        HttpServer::new(config, Arc::new(MemoryStore::new()), None)
            .unwrap()
            .router()
    }

    fn admin(method: &str, uri: &str, body: Option<&str>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", ADMIN_KEY));
        match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_admin_requires_key() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/admin/circuit-breakers")
                    .header(header::AUTHORIZATION, "Bearer wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_breaker_listing_and_reset() {
        let app = app();
        let response = app.clone().oneshot(admin("GET", "/admin/circuit-breakers", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["circuit_breakers"].as_array().unwrap().len(), 3);

        let response = app
            .clone()
            .oneshot(admin("POST", "/admin/circuit-breakers/letta/reset", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(admin("GET", "/admin/circuit-breakers/nope", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_custom_limit_reflected_in_usage() {
        let app = app();
        let response = app
            .clone()
            .oneshot(admin(
                "PUT",
                "/admin/rate-limits/llm/user-1/custom",
                Some(r#"{"limit": 7, "duration_secs": 60}"#),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(admin("GET", "/admin/rate-limits/llm/user-1", None))
            .await
            .unwrap();
        let body = json(response).await;
        assert_eq!(body["limit"], 7);
        assert_eq!(body["custom_limit"], 7);
        assert_eq!(body["used"], 0);

        let response = app
            .clone()
            .oneshot(admin(
                "PUT",
                "/admin/rate-limits/llm/user-1/custom",
                Some(r#"{"limit": 0, "duration_secs": 60}"#),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let response = app.oneshot(admin("DELETE", "/admin/rate-limits/bogus/user-1", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
