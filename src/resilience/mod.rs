//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to upstream:
//!     → registry.rs (pick the breaker for the path)
//!     → circuit_breaker.rs (admit / reject, then record the outcome)
//!     → per-call deadlines live in http::client
//! ```
//!
//! # Design Decisions
//! - Circuit breaker prevents cascading failures
//! - One breaker abstraction serves the middleware and direct call sites
//! - Breaker state is shared through the resilience store
//! - No automatic upstream retries; retry policy belongs to clients

pub mod circuit_breaker;
pub mod registry;

pub use circuit_breaker::{Admission, BreakerSettings, BreakerStatus, CallError, CircuitBreaker, CircuitState};
pub use registry::BreakerRegistry;
