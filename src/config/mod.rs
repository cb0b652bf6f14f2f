//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML) + GATEWAY_* env secrets
//!     → loader.rs (parse, env overrides, reference upstreams)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_config_str, ConfigError};
pub use schema::{
    AdminConfig, AuthConfig, BreakerServiceConfig, CircuitBreakerConfig, GatewayConfig,
    HttpClientConfig, ListenerConfig, LogFormat, ObservabilityConfig, RateCategoryConfig,
    RateLimitConfig, SecurityConfig, StoreBackend, StoreConfig, StreamFlagMode, StreamingConfig,
    UpstreamConfig,
};
