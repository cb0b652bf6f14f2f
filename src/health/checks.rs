use std::time::Instant;

use axum::http::StatusCode;
use futures_util::future::join_all;
use serde::Serialize;

use crate::http::client::UpstreamClient;
use crate::http::server::AppState;
use crate::resilience::{BreakerStatus, CircuitState};
use crate::store::ResilienceStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl ServiceStatus {
    /// 200 is healthy, other non-5xx answers are degraded.
    pub fn from_status(status: StatusCode) -> Self {
        match status.as_u16() {
            200 => Self::Healthy,
            201..=499 => Self::Degraded,
            _ => Self::Unhealthy,
        }
    }
}

/// Result of probing one dependency.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    pub name: String,
    pub status: ServiceStatus,
    pub url: String,
    pub response_time_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub overall_status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub services: Vec<ServiceHealth>,
    pub circuit_breakers: Vec<BreakerStatus>,
}

fn elapsed_ms(start: Instant) -> f64 {
    (start.elapsed().as_secs_f64() * 100_000.0).round() / 100.0
}

async fn check_upstream(client: &UpstreamClient) -> ServiceHealth {
    let upstream = client.upstream();
    let url = upstream.url_for(&upstream.health_path, None).to_string();
    let start = Instant::now();
    let (status, error) = match client.probe().await {
        Ok(code) => {
            let status = ServiceStatus::from_status(code);
            let error = (status != ServiceStatus::Healthy).then(|| format!("HTTP {}", code.as_u16()));
            (status, error)
        }
        Err(e) => (ServiceStatus::Unhealthy, Some(e)),
    };
    ServiceHealth {
        name: upstream.name.clone(),
        status,
        url,
        response_time_ms: elapsed_ms(start),
        error,
    }
}

async fn check_store(store: &dyn ResilienceStore) -> ServiceHealth {
    let start = Instant::now();
    let result = store.ping().await;
    ServiceHealth {
        name: "store".to_string(),
        status: if result.is_ok() {
            ServiceStatus::Healthy
        } else {
            ServiceStatus::Unhealthy
        },
        url: store.backend().to_string(),
        response_time_ms: elapsed_ms(start),
        error: result.err().map(|e| e.to_string()),
    }
}

/// Overall verdict from dependency checks and breaker states.
pub fn overall(services: &[ServiceHealth], breakers: &[BreakerStatus]) -> &'static str {
    let all_healthy = services.iter().all(|s| s.status == ServiceStatus::Healthy);
    let any_open = breakers.iter().any(|b| b.state == CircuitState::Open);
    if all_healthy && !any_open {
        "healthy"
    } else {
        "degraded"
    }
}

/// Run every check concurrently.
pub async fn report(state: &AppState) -> HealthReport {
    let start = Instant::now();
    let upstreams = join_all(state.clients.iter().map(|client| check_upstream(client)));
    let (mut services, store, circuit_breakers) = tokio::join!(
        upstreams,
        check_store(state.store.as_ref()),
        state.breakers.statuses()
    );
    services.sort_by(|a, b| a.name.cmp(&b.name));
    services.push(store);

    let overall_status = overall(&services, &circuit_breakers);
    tracing::info!(
        overall_status = overall_status,
        response_time_ms = elapsed_ms(start),
        services_count = services.len(),
        "Health check completed"
    );

    HealthReport {
        overall_status,
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        services,
        circuit_breakers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::FlakyStore;

    fn service(status: ServiceStatus) -> ServiceHealth {
        ServiceHealth {
            name: "ams".to_string(),
            status,
            url: "http://ams/health".to_string(),
            response_time_ms: 1.0,
            error: None,
        }
    }

    fn breaker(state: CircuitState) -> BreakerStatus {
        BreakerStatus {
            service: "letta".to_string(),
            state,
            failure_count: 0,
            success_count: 0,
            failure_rate: 0.0,
            window_requests: 0,
            last_failure_time: None,
            state_change_time: None,
            would_admit: state != CircuitState::Open,
        }
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(ServiceStatus::from_status(StatusCode::OK), ServiceStatus::Healthy);
        assert_eq!(ServiceStatus::from_status(StatusCode::NO_CONTENT), ServiceStatus::Degraded);
        assert_eq!(ServiceStatus::from_status(StatusCode::NOT_FOUND), ServiceStatus::Degraded);
        assert_eq!(ServiceStatus::from_status(StatusCode::BAD_GATEWAY), ServiceStatus::Unhealthy);
    }

    #[test]
    fn test_overall_verdict() {
        let healthy = vec![service(ServiceStatus::Healthy)];
        assert_eq!(overall(&healthy, &[breaker(CircuitState::Closed)]), "healthy");
        assert_eq!(overall(&healthy, &[breaker(CircuitState::HalfOpen)]), "healthy");
        assert_eq!(overall(&healthy, &[breaker(CircuitState::Open)]), "degraded");
        assert_eq!(overall(&[service(ServiceStatus::Degraded)], &[]), "degraded");
    }

    #[tokio::test]
    async fn test_store_outage_is_unhealthy() {
        let store = FlakyStore::down();
        let health = check_store(&store).await;
        assert_eq!(health.status, ServiceStatus::Unhealthy);
        assert!(health.error.is_some());

        store.set_down(false);
        assert_eq!(check_store(&store).await.status, ServiceStatus::Healthy);
    }
}
