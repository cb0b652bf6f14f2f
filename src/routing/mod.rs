//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (path)
//!     → router.rs (mount lookup, path rewrite)
//!     → matcher.rs (segment-wise pattern evaluation)
//!     → Return: Route { upstream, upstream_path } or NoMatch
//!
//! Route Compilation (at startup):
//!     UpstreamConfig[]
//!     → Compile mount patterns and deny/stream regexes
//!     → Freeze as immutable Router
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - Deterministic: same input always matches same route
//! - Most specific mount wins
//! - `PatternTable` is shared with the breaker and rate-limit tables
//! - Paths with dot segments never reach matching; the pipeline rejects them

pub mod matcher;
pub mod router;

pub use matcher::{has_dot_segment, PathPattern, PatternTable};
pub use router::{Route, RouteError, Router, Upstream};
