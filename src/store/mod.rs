//! Shared resilience store.
//!
//! # Responsibilities
//! - Hold the only cross-request mutable state (breaker hashes, rate windows,
//!   ownership cache entries)
//! - Expose the handful of primitives those components need, nothing more
//! - Execute the rate window prune/count/add/expire sequence atomically
//!
//! # Data Flow
//! ```text
//! CircuitBreaker  ──▶ hash_get_all / hash_set_ex   ─┐
//! RateLimiter     ──▶ window_hit / window_count     ├─▶ ResilienceStore
//! AgentSecrets    ──▶ get / set_ex                  ─┘     ├─ MemoryStore (single process)
//!                                                          └─ RedisStore  (shared)
//! ```
//!
//! # Design Decisions
//! - One trait object injected at the composition root; components never
//!   construct their own store
//! - Callers own their key families; the store knows nothing about them
//! - Errors are surfaced, never swallowed; fail-open policy lives in callers

pub mod memory;
pub mod redis;
#[cfg(test)]
pub mod testing;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{StoreBackend, StoreConfig};

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Errors raised by a store backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be reached (pool exhausted, connection refused).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The backend rejected or failed a command.
    #[error("store command failed: {0}")]
    Command(String),

    /// A stored value could not be interpreted.
    #[error("malformed value at {key}: {reason}")]
    Malformed { key: String, reason: String },
}

/// Result of one atomic sliding-window hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowHit {
    /// Live entries before this request was considered.
    pub count: u64,
    /// Whether the request was recorded (count was below the limit).
    pub admitted: bool,
    /// Timestamp of the oldest live entry after the hit.
    pub oldest: Option<f64>,
}

/// Key-value substrate shared by the breaker, limiter and ownership cache.
#[async_trait]
pub trait ResilienceStore: Send + Sync + 'static {
    /// Backend name for logs and health output.
    fn backend(&self) -> &'static str;

    async fn ping(&self) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// All fields of a hash; empty when the key is absent.
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    /// Write hash fields and refresh the key's expiry in one step.
    async fn hash_set_ex(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Duration,
    ) -> Result<(), StoreError>;

    /// Atomically prune entries at or before `now - window`, count the rest,
    /// record `member` at `now` when the count is below `limit`, and refresh
    /// the expiry.
    async fn window_hit(
        &self,
        key: &str,
        now: f64,
        window: Duration,
        limit: u64,
        member: &str,
        ttl: Duration,
    ) -> Result<WindowHit, StoreError>;

    /// Prune and count without recording.
    async fn window_count(&self, key: &str, now: f64, window: Duration) -> Result<u64, StoreError>;
}

impl std::fmt::Debug for dyn ResilienceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ResilienceStore({})", self.backend())
    }
}

/// Shared handle to the configured store.
pub type SharedStore = Arc<dyn ResilienceStore>;

/// Build the store selected by configuration.
pub fn connect(config: &StoreConfig) -> Result<SharedStore, StoreError> {
    match config.backend {
        StoreBackend::Memory => {
            tracing::info!("Using in-memory resilience store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Redis => {
            let store = RedisStore::connect(&config.redis_url, config.max_connections)?;
            tracing::info!(max_connections = config.max_connections, "Using Redis resilience store");
            Ok(Arc::new(store))
        }
    }
}

/// Seconds since the Unix epoch as a float, the timestamp unit of every key family.
pub fn unix_now() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
