//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! auth, breaker, limiter, proxy, streaming
//!     → logging.rs (structured events via `tracing`)
//!     → metrics.rs (counters, gauges, histograms via `metrics`)
//!
//! Consumers:
//!     → stdout (pretty or JSON lines)
//!     → GET /metrics (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through every log line of a request via the trace span
//! - Metric updates are plain facade calls; with no recorder installed they are no-ops
//! - Secrets never appear in fields; only redacted prefixes

pub mod logging;
pub mod metrics;

use chrono::{SecondsFormat, Utc};

/// Current time as an RFC 3339 string with millisecond precision.
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
