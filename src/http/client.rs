//! Pooled upstream clients.
//!
//! One `reqwest::Client` per upstream, built once at startup and injected
//! into the proxy. Each client owns its own connection pool (idle limit and
//! expiry) plus a semaphore that caps in-flight requests; waiting for a slot
//! is bounded by the pool timeout.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::HttpClientConfig;
use crate::error::GatewayError;
use crate::routing::{Router, Upstream};

/// Timeout for health probes.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Client bound to a single upstream.
#[derive(Debug)]
pub struct UpstreamClient {
    upstream: Arc<Upstream>,
    http: reqwest::Client,
    permits: Arc<Semaphore>,
    pool_timeout: Duration,
    write_timeout: Duration,
}

impl UpstreamClient {
    pub fn new(upstream: Arc<Upstream>, config: &HttpClientConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .pool_max_idle_per_host(config.max_keepalive)
            .pool_idle_timeout(Duration::from_secs(config.keepalive_expiry_secs))
            .user_agent(concat!("agent-gateway/", env!("CARGO_PKG_VERSION")))
            .no_proxy()
            .build()?;
        Ok(Self {
            upstream,
            http,
            permits: Arc::new(Semaphore::new(config.max_connections)),
            pool_timeout: Duration::from_secs(config.pool_timeout_secs),
            write_timeout: Duration::from_secs(config.write_timeout_secs),
        })
    }

    pub fn upstream(&self) -> &Arc<Upstream> {
        &self.upstream
    }

    pub fn request(&self, method: reqwest::Method, url: url::Url) -> reqwest::RequestBuilder {
        self.http.request(method, url)
    }

    /// Reserve an in-flight slot, waiting at most the pool timeout.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, GatewayError> {
        match tokio::time::timeout(self.pool_timeout, self.permits.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(GatewayError::Internal(format!(
                "connection pool for {} is closed",
                self.upstream.name
            ))),
            Err(_) => {
                tracing::warn!(upstream = %self.upstream.name, "Upstream connection pool exhausted");
                Err(GatewayError::Timeout {
                    service: self.upstream.name.clone(),
                    after: self.pool_timeout,
                })
            }
        }
    }

    /// Send a request and wait for the response head.
    ///
    /// The head must arrive within the write timeout plus the upstream's read
    /// timeout. Body reads are bounded separately by the caller.
    pub async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, GatewayError> {
        let budget = self.write_timeout + self.upstream.timeout;
        match tokio::time::timeout(budget, builder.send()).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(self.classify(&e)),
            Err(_) => Err(GatewayError::Timeout {
                service: self.upstream.name.clone(),
                after: budget,
            }),
        }
    }

    /// Map a transport error onto the gateway taxonomy.
    pub fn classify(&self, error: &reqwest::Error) -> GatewayError {
        let service = &self.upstream.name;
        if error.is_timeout() {
            GatewayError::Timeout {
                service: service.clone(),
                after: self.upstream.timeout,
            }
        } else if error.is_connect() {
            GatewayError::upstream(service, format!("{} service unavailable - connection failed", service))
        } else {
            GatewayError::upstream(service, format!("{} service unavailable", service))
        }
    }

    /// GET the upstream's health path.
    pub async fn probe(&self) -> Result<StatusCode, String> {
        let url = self.upstream.url_for(&self.upstream.health_path, None);
        match self.http.get(url).timeout(PROBE_TIMEOUT).send().await {
            Ok(response) => Ok(response.status()),
            Err(e) if e.is_timeout() => Err("timeout".to_string()),
            Err(e) => Err(e.to_string()),
        }
    }
}

/// All upstream clients, keyed by upstream name.
#[derive(Debug, Default)]
pub struct UpstreamClients {
    clients: HashMap<String, Arc<UpstreamClient>>,
}

impl UpstreamClients {
    pub fn from_router(router: &Router, config: &HttpClientConfig) -> Result<Self, reqwest::Error> {
        let mut clients = HashMap::new();
        for upstream in router.upstreams() {
            let client = UpstreamClient::new(upstream.clone(), config)?;
            clients.insert(upstream.name.clone(), Arc::new(client));
        }
        Ok(Self { clients })
    }

    pub fn get(&self, name: &str) -> Option<&Arc<UpstreamClient>> {
        self.clients.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<UpstreamClient>> {
        self.clients.values()
    }
}
