//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, edge layers, request id)
//!     → middleware/ (authenticate, circuit breaker, rate limit)
//!     → proxy.rs (resolve upstream, rewrite, denylist)
//!     → body.rs + headers.rs (capture body, rewrite headers)
//!     → client.rs (pooled upstream call)
//!     → streaming.rs (SSE relay) or buffered response
//!     → Send to client
//! ```

pub mod body;
pub mod client;
pub mod headers;
pub mod middleware;
pub mod proxy;
pub mod request;
pub mod server;
pub mod streaming;

pub use headers::X_REQUEST_ID;
pub use server::{AppState, BuildError, HttpServer};
