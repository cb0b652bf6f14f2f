//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → auth.rs (pick scheme by path, produce a Principal)
//!         → token.rs (signed bearer token)
//!         → agent_secret.rs (shared secret + ownership of {user_id})
//!     → rate_limit.rs (sliding window per principal or client address)
//!     → Pass to breaker and proxy
//! ```
//!
//! # Design Decisions
//! - Credential failures fail closed; limiter store failures fail open
//! - Secrets never appear in logs beyond a short prefix
//! - No trust in client-supplied identity headers

pub mod agent_secret;
pub mod auth;
pub mod rate_limit;
pub mod token;

pub use auth::{AuthOutcome, AuthScheme, Authenticator, Principal};
pub use rate_limit::{RateLimitDecision, RateLimiter, UsageReport};
