//! API gateway for an agent platform.
//!
//! Authenticates callers, guards each upstream with a circuit breaker,
//! enforces sliding-window rate limits and forwards requests (including
//! server-sent-event streams) to the upstream services.

pub mod admin;
pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod routing;
pub mod security;
pub mod store;

pub use config::schema::GatewayConfig;
pub use error::GatewayError;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
