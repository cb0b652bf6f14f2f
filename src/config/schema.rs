//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files, and
//! every section carries defaults matching the reference deployment so a
//! minimal file only needs to supply secrets.

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Connection pool and timeout settings shared by all upstream clients.
    pub http_client: HttpClientConfig,

    /// SSE relay settings.
    pub streaming: StreamingConfig,

    /// Upstream services and the mount prefixes routed to them.
    pub upstreams: Vec<UpstreamConfig>,

    /// Shared resilience store backend.
    pub store: StoreConfig,

    /// Credential verification.
    pub auth: AuthConfig,

    /// Per-service circuit breakers.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Sliding-window rate limiting.
    pub rate_limit: RateLimitConfig,

    /// Request limits and CORS.
    pub security: SecurityConfig,

    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,

    /// Administrative API.
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8000").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8000".to_string(),
        }
    }
}

/// Upstream connection pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpClientConfig {
    /// Maximum in-flight requests per upstream.
    pub max_connections: usize,

    /// Idle connections kept per upstream host.
    pub max_keepalive: usize,

    /// How long an idle pooled connection is kept.
    pub keepalive_expiry_secs: u64,

    /// TCP connect timeout.
    pub connect_timeout_secs: u64,

    /// Response read timeout (whole body when buffered, per chunk when streaming).
    pub read_timeout_secs: u64,

    /// Budget for sending the request before the response head arrives.
    pub write_timeout_secs: u64,

    /// Wait for a free slot in the upstream pool.
    pub pool_timeout_secs: u64,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            max_connections: 200,
            max_keepalive: 50,
            keepalive_expiry_secs: 30,
            connect_timeout_secs: 5,
            read_timeout_secs: 30,
            write_timeout_secs: 5,
            pool_timeout_secs: 10,
        }
    }
}

/// SSE relay configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Maximum bytes per relayed chunk in plain streaming mode.
    pub chunk_size: usize,

    /// Idle interval after which a `: ping` comment is injected.
    pub keepalive_interval_secs: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            keepalive_interval_secs: 30,
        }
    }
}

/// How a request flag affects streaming for an upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamFlagMode {
    /// The flag alone switches the request to streaming mode.
    Enables,
    /// The flag selects token-level relay (chunks forwarded as received).
    TokenLevel,
}

impl Default for StreamFlagMode {
    fn default() -> Self {
        Self::Enables
    }
}

/// A single upstream service and its mount.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    /// Service name, shared with breaker and metrics labels.
    pub name: String,

    /// Base URL (e.g., "http://localhost:8283").
    pub base_url: String,

    /// Gateway-facing mount pattern. `{name}` and `*` match one segment.
    pub mount: String,

    /// Root substituted for the mount when rewriting.
    #[serde(default)]
    pub rewrite_root: String,

    /// Every request under the mount goes to this upstream path.
    #[serde(default)]
    pub fixed_path: Option<String>,

    /// Injected as `Authorization: Bearer` on upstream calls.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Overrides `http_client.read_timeout_secs` for this upstream.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Path probed by the health aggregator.
    #[serde(default = "default_health_path")]
    pub health_path: String,

    /// Regexes over the rewritten path that are refused with 403.
    #[serde(default)]
    pub deny_patterns: Vec<String>,

    /// Regexes over the rewritten path that select streaming mode.
    #[serde(default)]
    pub stream_patterns: Vec<String>,

    /// Boolean request flag read from the JSON body or query string.
    #[serde(default)]
    pub stream_flag: Option<String>,

    #[serde(default)]
    pub stream_flag_mode: StreamFlagMode,

    /// Inject `user` and billing metadata into JSON bodies.
    #[serde(default)]
    pub inject_billing: bool,
}

fn default_health_path() -> String {
    "/health".to_string()
}

impl UpstreamConfig {
    fn base(name: &str, base_url: &str, mount: &str) -> Self {
        Self {
            name: name.to_string(),
            base_url: base_url.to_string(),
            mount: mount.to_string(),
            rewrite_root: String::new(),
            fixed_path: None,
            api_key: None,
            timeout_secs: None,
            health_path: default_health_path(),
            deny_patterns: Vec::new(),
            stream_patterns: Vec::new(),
            stream_flag: None,
            stream_flag_mode: StreamFlagMode::Enables,
            inject_billing: false,
        }
    }

    /// Agent-management service.
    pub fn ams(base_url: &str) -> Self {
        Self::base("ams", base_url, "/api/v1/ams")
    }

    /// Conversational-agent service.
    pub fn letta(base_url: &str) -> Self {
        Self {
            rewrite_root: "/v1".to_string(),
            timeout_secs: Some(60),
            health_path: "/v1/health".to_string(),
            deny_patterns: vec![
                r"^/v1/agents$".to_string(),
                r"^/v1/agents/[^/]+$".to_string(),
                r"^/admin/.*$".to_string(),
                r"^/users/.*$".to_string(),
            ],
            stream_patterns: vec![
                r"^/v1/agents/[^/]+/messages/stream".to_string(),
                r"^/v1/agents/[^/]+/runs/[^/]+/stream".to_string(),
            ],
            stream_flag: Some("stream_tokens".to_string()),
            stream_flag_mode: StreamFlagMode::TokenLevel,
            ..Self::base("letta", base_url, "/api/v1/letta")
        }
    }

    /// LLM completions proxy.
    pub fn litellm(base_url: &str) -> Self {
        Self {
            fixed_path: Some("/chat/completions".to_string()),
            stream_flag: Some("stream".to_string()),
            stream_flag_mode: StreamFlagMode::Enables,
            inject_billing: true,
            ..Self::base("litellm", base_url, "/api/v1/agents/{user_id}/proxy")
        }
    }
}

/// Shared store backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Memory,
    Redis,
}

/// Shared resilience store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// Redis connection URL.
    pub redis_url: String,

    /// Redis pool size.
    pub max_connections: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            redis_url: "redis://localhost:6379".to_string(),
            max_connections: 16,
        }
    }
}

/// Credential verification configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC secret for signed tokens.
    pub jwt_secret: String,

    pub jwt_algorithm: String,

    /// Required `aud` claim; unset disables the audience check.
    pub jwt_audience: Option<String>,

    /// Required `iss` claim; unset disables the issuer check.
    pub jwt_issuer: Option<String>,

    /// Master secret for the agent scheme.
    pub agent_secret_master_key: Option<String>,

    /// Prefix of operator-issued agent tokens.
    pub agent_secret_prefix: String,

    /// Minimum length of a prefixed agent token.
    pub agent_secret_min_length: usize,

    pub ownership_cache_ttl_secs: u64,

    /// Additional ownership attempts after a transient failure.
    pub ownership_retries: u32,

    pub ownership_retry_delay_ms: u64,

    /// Exact paths that skip authentication.
    pub public_paths: Vec<String>,

    /// Path templates authenticated with the agent scheme.
    pub shared_secret_paths: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            jwt_algorithm: "HS256".to_string(),
            jwt_audience: Some("authenticated".to_string()),
            jwt_issuer: None,
            agent_secret_master_key: None,
            agent_secret_prefix: "sk-".to_string(),
            agent_secret_min_length: 20,
            ownership_cache_ttl_secs: 600,
            ownership_retries: 2,
            ownership_retry_delay_ms: 100,
            public_paths: [
                "/", "/health", "/ping", "/docs", "/redoc", "/openapi.json", "/metrics", "/status",
            ]
            .iter()
            .map(|p| p.to_string())
            .collect(),
            shared_secret_paths: vec![
                "/api/v1/agents/{user_id}/proxy".to_string(),
                "/api/v1/agents/{user_id}/proxy/chat/completions".to_string(),
            ],
        }
    }
}

/// Path patterns guarded by one named breaker.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BreakerServiceConfig {
    pub name: String,
    pub patterns: Vec<String>,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,

    /// Failures in CLOSED that open the circuit.
    pub failure_threshold: u32,

    /// Time in OPEN before a probe is admitted.
    pub recovery_timeout_secs: u64,

    /// Successes in HALF_OPEN that close the circuit.
    pub success_threshold: u32,

    /// Maximum entries kept in the rolling window.
    pub sliding_window_size: usize,

    /// Window entries needed before the failure rate is considered.
    pub minimum_requests: usize,

    pub failure_rate_threshold: f64,

    /// Age bound of the rolling window.
    pub window_secs: u64,

    /// Expiry of the persisted state, refreshed on every write.
    pub state_ttl_secs: u64,

    pub services: Vec<BreakerServiceConfig>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            recovery_timeout_secs: 60,
            success_threshold: 3,
            sliding_window_size: 100,
            minimum_requests: 10,
            failure_rate_threshold: 0.5,
            window_secs: 60,
            state_ttl_secs: 3600,
            services: vec![
                BreakerServiceConfig {
                    name: "ams".to_string(),
                    patterns: vec!["/api/v1/ams".to_string()],
                },
                BreakerServiceConfig {
                    name: "letta".to_string(),
                    patterns: vec!["/api/v1/letta".to_string()],
                },
                BreakerServiceConfig {
                    name: "litellm".to_string(),
                    patterns: vec!["/api/v1/agents/*/proxy".to_string()],
                },
            ],
        }
    }
}

/// A rate-limit category: ceiling and the paths it covers.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateCategoryConfig {
    pub name: String,

    /// Requests admitted per window.
    pub limit: u64,

    #[serde(default)]
    pub patterns: Vec<String>,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,

    pub window_secs: u64,

    /// Category used when no pattern matches.
    pub default_category: String,

    pub categories: Vec<RateCategoryConfig>,

    /// Exact paths that bypass rate limiting.
    pub exempt_paths: Vec<String>,

    /// Read administrative per-identity ceilings on the hot path.
    pub honor_custom_limits: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_secs: 3600,
            default_category: "general".to_string(),
            categories: vec![
                RateCategoryConfig {
                    name: "general".to_string(),
                    limit: 1000,
                    patterns: vec![
                        "/api/v1/me".to_string(),
                        "/api/v1/agents".to_string(),
                        "/api/v1/templates".to_string(),
                        "/api/v1/ams".to_string(),
                    ],
                },
                RateCategoryConfig {
                    name: "llm".to_string(),
                    limit: 100,
                    patterns: vec![
                        "/api/v1/letta".to_string(),
                        "/api/v1/agents/*/messages".to_string(),
                    ],
                },
                RateCategoryConfig {
                    name: "proxy".to_string(),
                    limit: 500,
                    patterns: vec!["/api/v1/agents/*/proxy".to_string()],
                },
            ],
            exempt_paths: [
                "/", "/health", "/ping", "/docs", "/redoc", "/openapi.json", "/metrics",
            ]
            .iter()
            .map(|p| p.to_string())
            .collect(),
            honor_custom_limits: true,
        }
    }
}

/// Request limits and CORS.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Maximum buffered request body.
    pub max_body_bytes: usize,

    /// Allowed CORS origins; `*` allows any.
    pub cors_allowed_origins: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 10 * 1024 * 1024,
            cors_allowed_origins: vec!["*".to_string()],
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Install the Prometheus recorder and serve `/metrics`.
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    pub enabled: bool,
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
        }
    }
}

impl GatewayConfig {
    /// Upstreams of the reference deployment on their default local ports.
    pub fn default_upstreams() -> Vec<UpstreamConfig> {
        vec![
            UpstreamConfig::ams("http://localhost:8001"),
            UpstreamConfig::letta("http://localhost:8283"),
            UpstreamConfig::litellm("http://localhost:4000"),
        ]
    }
}
