//! Request pipeline stages.
//!
//! # Order
//! ```text
//! path_guard → auth → circuit_breaker → rate_limit → proxy
//! ```
//! `path_guard` refuses dot segments so every later stage and the upstream
//! see the same path.
//! Each stage either calls the next one or answers with a [`GatewayError`]
//! before any upstream call is made.
//!
//! [`GatewayError`]: crate::error::GatewayError

pub mod auth;
pub mod circuit_breaker;
pub mod path_guard;
pub mod rate_limit;

pub use auth::authenticate;
pub use circuit_breaker::circuit_breaker;
pub use path_guard::reject_dot_segments;
pub use rate_limit::rate_limit;
