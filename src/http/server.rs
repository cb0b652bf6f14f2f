//! HTTP server setup and composition.
//!
//! # Responsibilities
//! - Build every shared component once and inject it through [`AppState`]
//! - Compose the pipeline: path guard → auth → circuit breaker → rate limit → proxy
//! - Mount operational and admin endpoints beside the pipeline
//! - Wire edge layers (request id, tracing, CORS, body limit, metrics)
//! - Serve until the shutdown signal fires
//!
//! # Layer Stack (outermost first)
//! ```text
//! SetRequestId → PropagateRequestId → Trace → CORS → track_request → body limit
//!     → /, /ping, /health, /metrics, /admin/*
//!     → /{*path}: reject_dot_segments → authenticate → circuit_breaker → rate_limit → proxy_handler
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderName, HeaderValue};
use axum::middleware;
use axum::routing::{any, get};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::config::GatewayConfig;
use crate::health;
use crate::http::client::UpstreamClients;
use crate::http::headers::X_REQUEST_ID;
use crate::http::middleware::{authenticate, circuit_breaker, rate_limit, reject_dot_segments};
use crate::http::proxy::proxy_handler;
use crate::http::request::{make_span, track_request};
use crate::resilience::BreakerRegistry;
use crate::routing::{RouteError, Router as ProxyRouter};
use crate::security::auth::Authenticator;
use crate::security::rate_limit::RateLimiter;
use crate::store::SharedStore;

/// Application state injected into handlers and middleware.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub store: SharedStore,
    pub authenticator: Arc<Authenticator>,
    pub breakers: Arc<BreakerRegistry>,
    pub limiter: Arc<RateLimiter>,
    pub routes: Arc<ProxyRouter>,
    pub clients: Arc<UpstreamClients>,
    pub metrics: Option<PrometheusHandle>,
    pub started_at: Instant,
}

/// Failure to assemble the server from a validated config.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("invalid token settings: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error(transparent)]
    Routes(#[from] RouteError),

    #[error("failed to build upstream client: {0}")]
    Client(#[from] reqwest::Error),
}

/// HTTP server for the gateway.
pub struct HttpServer {
    state: AppState,
}

impl HttpServer {
    /// Build all components from `config` around the given store.
    pub fn new(
        config: GatewayConfig,
        store: SharedStore,
        metrics: Option<PrometheusHandle>,
    ) -> Result<Self, BuildError> {
        let routes = ProxyRouter::from_config(&config.upstreams, &config.http_client)?;
        let clients = UpstreamClients::from_router(&routes, &config.http_client)?;
        let authenticator = Authenticator::from_config(&config.auth, store.clone())?;
        let breakers = BreakerRegistry::from_config(&config.circuit_breaker, store.clone());
        let limiter = RateLimiter::from_config(&config.rate_limit, store.clone());

        let state = AppState {
            config: Arc::new(config),
            store,
            authenticator: Arc::new(authenticator),
            breakers: Arc::new(breakers),
            limiter: Arc::new(limiter),
            routes: Arc::new(routes),
            clients: Arc::new(clients),
            metrics,
            started_at: Instant::now(),
        };
        Ok(Self { state })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// The fully layered router.
    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Serve on `listener` until `shutdown` fires.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            upstreams = self.state.routes.upstreams().count(),
            store = self.state.store.backend(),
            admin = self.state.config.admin.enabled,
            "HTTP server starting"
        );

        let app = self.router().into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

fn build_router(state: AppState) -> Router {
    let config = state.config.clone();

    // Layers run bottom-up: the last one added sees the request first.
    let pipeline = Router::new()
        .route("/{*path}", any(proxy_handler))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .layer(middleware::from_fn_with_state(state.clone(), circuit_breaker))
        .layer(middleware::from_fn_with_state(state.clone(), authenticate))
        .layer(middleware::from_fn(reject_dot_segments));

    let mut app = Router::new()
        .route("/", get(health::handlers::root))
        .route("/ping", get(health::handlers::ping))
        .route("/health", get(health::handlers::health))
        .route("/metrics", get(health::handlers::metrics))
        .merge(pipeline);

    if config.admin.enabled {
        app = app.merge(crate::admin::admin_router(state.clone()));
    }

    let request_id = HeaderName::from_static(X_REQUEST_ID);
    app.with_state(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
            .layer(PropagateRequestIdLayer::new(request_id))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(cors_layer(&config.security.cors_allowed_origins))
            .layer(middleware::from_fn(track_request))
            .layer(DefaultBodyLimit::max(config.security.max_body_bytes)),
    )
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o).ok())
                .collect::<Vec<_>>(),
        )
    };
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([
            HeaderName::from_static(X_REQUEST_ID),
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderName::from_static("x-ratelimit-remaining"),
            HeaderName::from_static("x-ratelimit-reset"),
            HeaderName::from_static("retry-after"),
        ])
}
