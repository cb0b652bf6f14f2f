//! Health and operational endpoints.
//!
//! # Data Flow
//! ```text
//! GET /health
//!     → checks.rs: probe every upstream's health path concurrently
//!                  + ping the resilience store
//!                  + read every breaker's state
//!     → overall "healthy", or "degraded" when any check is not healthy
//!       or any breaker is open
//! ```
//!
//! # Design Decisions
//! - The health endpoint always answers 200; the verdict is in the body
//! - Probes bypass breakers and rate limits

pub mod checks;
pub mod handlers;

pub use checks::{HealthReport, ServiceHealth, ServiceStatus};
