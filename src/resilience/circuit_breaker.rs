//! Circuit breaker for upstream protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: upstream assumed down, requests fail fast
//! - Half-Open: probing whether the upstream recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure rate ≥ threshold over ≥ minimum_requests,
//!                or failure_count ≥ failure_threshold
//! Open → Half-Open: first admission check after recovery_timeout
//! Half-Open → Closed: success_threshold successes
//! Half-Open → Open: any failure
//! ```
//!
//! # Persistence
//! State lives in the shared store under `circuit_breaker:{service}:state`
//! (hash, expiry refreshed on every write). Every operation reloads, decides,
//! then writes back. The sequence is not atomic across processes; counts may
//! race under concurrency and thresholds are advisory.
//!
//! When the store cannot be read, the breaker decides on its last in-memory
//! snapshot (initially CLOSED).

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;
use crate::store::{unix_now, SharedStore};

/// Minimum spacing between rejection log lines for one service.
const REJECTION_LOG_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Gauge encoding: 0 closed, 1 half-open, 2 open.
    pub fn as_gauge(self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::HalfOpen => 1.0,
            Self::Open => 2.0,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

impl FromStr for CircuitState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "closed" => Ok(Self::Closed),
            "open" => Ok(Self::Open),
            "half_open" => Ok(Self::HalfOpen),
            other => Err(format!("unknown circuit state '{}'", other)),
        }
    }
}

/// Tunables for one breaker.
#[derive(Debug, Clone)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub success_threshold: u32,
    pub window_size: usize,
    pub window_age: Duration,
    pub minimum_requests: usize,
    pub failure_rate_threshold: f64,
    pub state_ttl: Duration,
}

impl From<&CircuitBreakerConfig> for BreakerSettings {
    fn from(config: &CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            recovery_timeout: Duration::from_secs(config.recovery_timeout_secs),
            success_threshold: config.success_threshold,
            window_size: config.sliding_window_size,
            window_age: Duration::from_secs(config.window_secs),
            minimum_requests: config.minimum_requests,
            failure_rate_threshold: config.failure_rate_threshold,
            state_ttl: Duration::from_secs(config.state_ttl_secs),
        }
    }
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self::from(&CircuitBreakerConfig::default())
    }
}

/// One outcome in the rolling window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub at: f64,
    pub success: bool,
}

/// Breaker state as persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_time: f64,
    pub state_change_time: f64,
    pub window: VecDeque<Outcome>,
}

impl Default for BreakerSnapshot {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_time: 0.0,
            state_change_time: 0.0,
            window: VecDeque::new(),
        }
    }
}

impl BreakerSnapshot {
    fn to_fields(&self) -> Vec<(String, String)> {
        let window = serde_json::to_string(&self.window).unwrap_or_else(|_| "[]".to_string());
        vec![
            ("state".to_string(), self.state.to_string()),
            ("failure_count".to_string(), self.failure_count.to_string()),
            ("success_count".to_string(), self.success_count.to_string()),
            ("last_failure_time".to_string(), self.last_failure_time.to_string()),
            ("state_change_time".to_string(), self.state_change_time.to_string()),
            ("request_window".to_string(), window),
        ]
    }

    fn from_fields(fields: &HashMap<String, String>) -> Result<Self, String> {
        fn field<T: FromStr>(fields: &HashMap<String, String>, name: &str) -> Result<T, String> {
            fields
                .get(name)
                .ok_or_else(|| format!("missing field '{}'", name))?
                .parse()
                .map_err(|_| format!("invalid field '{}'", name))
        }

        let window = match fields.get("request_window") {
            Some(raw) => serde_json::from_str(raw).map_err(|e| format!("invalid request_window: {}", e))?,
            None => VecDeque::new(),
        };
        Ok(Self {
            state: field(fields, "state")?,
            failure_count: field(fields, "failure_count")?,
            success_count: field(fields, "success_count")?,
            last_failure_time: field(fields, "last_failure_time")?,
            state_change_time: field(fields, "state_change_time")?,
            window,
        })
    }

    /// Failure share of the window, 0.0 when empty.
    pub fn failure_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let failures = self.window.iter().filter(|o| !o.success).count();
        failures as f64 / self.window.len() as f64
    }
}

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Admission {
    pub allowed: bool,
    /// State after the check.
    pub state: CircuitState,
    pub failure_count: u32,
}

/// Read-only view for status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub service: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub failure_rate: f64,
    pub window_requests: usize,
    pub last_failure_time: Option<f64>,
    pub state_change_time: Option<f64>,
    /// Whether a request arriving now would be admitted.
    pub would_admit: bool,
}

/// Error returned by [`CircuitBreaker::call`].
#[derive(Debug, thiserror::Error)]
pub enum CallError<E> {
    #[error("circuit for {service} is {state}")]
    Rejected { service: String, state: CircuitState },
    #[error(transparent)]
    Inner(E),
}

/// Per-service circuit breaker.
pub struct CircuitBreaker {
    service: String,
    settings: BreakerSettings,
    store: SharedStore,
    last_known: Mutex<BreakerSnapshot>,
    last_rejection_log: Mutex<Option<Instant>>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("service", &self.service)
            .field("settings", &self.settings)
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, settings: BreakerSettings, store: SharedStore) -> Self {
        Self {
            service: service.into(),
            settings,
            store,
            last_known: Mutex::new(BreakerSnapshot::default()),
            last_rejection_log: Mutex::new(None),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    fn key(&self) -> String {
        format!("circuit_breaker:{}:state", self.service)
    }

    fn remember(&self, snapshot: &BreakerSnapshot) {
        let mut last = self.last_known.lock().expect("breaker snapshot mutex poisoned");
        *last = snapshot.clone();
    }

    fn last_known(&self) -> BreakerSnapshot {
        self.last_known.lock().expect("breaker snapshot mutex poisoned").clone()
    }

    /// Reload from the store, falling back to the in-memory snapshot.
    async fn load(&self) -> BreakerSnapshot {
        let key = self.key();
        match self.store.hash_get_all(&key).await {
            Ok(fields) if fields.is_empty() => self.last_known(),
            Ok(fields) => match BreakerSnapshot::from_fields(&fields) {
                Ok(snapshot) => {
                    self.remember(&snapshot);
                    snapshot
                }
                Err(reason) => {
                    tracing::warn!(service = %self.service, reason = %reason, "Discarding malformed breaker state");
                    self.last_known()
                }
            },
            Err(e) => {
                tracing::warn!(service = %self.service, error = %e, "Breaker state unavailable, using last known state");
                self.last_known()
            }
        }
    }

    async fn save(&self, snapshot: &BreakerSnapshot) {
        self.remember(snapshot);
        if let Err(e) = self
            .store
            .hash_set_ex(&self.key(), &snapshot.to_fields(), self.settings.state_ttl)
            .await
        {
            tracing::warn!(service = %self.service, error = %e, "Failed to persist breaker state");
        }
    }

    fn transition(&self, snapshot: &mut BreakerSnapshot, to: CircuitState, now: f64) {
        let from = snapshot.state;
        snapshot.state = to;
        snapshot.state_change_time = now;
        snapshot.failure_count = 0;
        snapshot.success_count = 0;

        match to {
            CircuitState::Open => tracing::warn!(
                service = %self.service,
                from = %from,
                to = %to,
                failure_rate = snapshot.failure_rate(),
                "Circuit breaker opened"
            ),
            _ => tracing::info!(service = %self.service, from = %from, to = %to, "Circuit breaker state change"),
        }
        metrics::record_breaker_transition(&self.service, from, to);
    }

    fn push_outcome(&self, snapshot: &mut BreakerSnapshot, now: f64, success: bool) {
        snapshot.window.push_back(Outcome { at: now, success });
        let cutoff = now - self.settings.window_age.as_secs_f64();
        while snapshot.window.front().map(|o| o.at <= cutoff).unwrap_or(false) {
            snapshot.window.pop_front();
        }
        while snapshot.window.len() > self.settings.window_size {
            snapshot.window.pop_front();
        }
    }

    fn recovery_due(&self, snapshot: &BreakerSnapshot, now: f64) -> bool {
        now - snapshot.last_failure_time >= self.settings.recovery_timeout.as_secs_f64()
    }

    /// Decide whether a request may proceed now.
    pub async fn admit(&self) -> Admission {
        self.admit_at(unix_now()).await
    }

    pub async fn admit_at(&self, now: f64) -> Admission {
        let mut snapshot = self.load().await;
        let allowed = match snapshot.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open if self.recovery_due(&snapshot, now) => {
                self.transition(&mut snapshot, CircuitState::HalfOpen, now);
                self.save(&snapshot).await;
                true
            }
            CircuitState::Open => false,
        };

        if !allowed {
            metrics::record_breaker_rejection(&self.service);
            if self.should_log_rejection() {
                tracing::warn!(
                    service = %self.service,
                    retry_in_secs = (snapshot.last_failure_time + self.settings.recovery_timeout.as_secs_f64() - now).max(0.0),
                    "Circuit breaker rejecting requests"
                );
            }
        }

        Admission {
            allowed,
            state: snapshot.state,
            failure_count: snapshot.failure_count,
        }
    }

    pub async fn record_success(&self) {
        self.record_success_at(unix_now()).await
    }

    pub async fn record_success_at(&self, now: f64) {
        let mut snapshot = self.load().await;
        self.push_outcome(&mut snapshot, now, true);
        match snapshot.state {
            CircuitState::HalfOpen => {
                snapshot.success_count += 1;
                if snapshot.success_count >= self.settings.success_threshold {
                    self.transition(&mut snapshot, CircuitState::Closed, now);
                }
            }
            CircuitState::Closed => snapshot.failure_count = 0,
            CircuitState::Open => {}
        }
        self.save(&snapshot).await;
    }

    pub async fn record_failure(&self) {
        self.record_failure_at(unix_now()).await
    }

    pub async fn record_failure_at(&self, now: f64) {
        let mut snapshot = self.load().await;
        self.push_outcome(&mut snapshot, now, false);
        snapshot.failure_count += 1;
        snapshot.last_failure_time = now;

        match snapshot.state {
            CircuitState::Closed => {
                let rate_tripped = snapshot.window.len() >= self.settings.minimum_requests
                    && snapshot.failure_rate() >= self.settings.failure_rate_threshold;
                if rate_tripped || snapshot.failure_count >= self.settings.failure_threshold {
                    self.transition(&mut snapshot, CircuitState::Open, now);
                }
            }
            CircuitState::HalfOpen => self.transition(&mut snapshot, CircuitState::Open, now),
            CircuitState::Open => {}
        }
        self.save(&snapshot).await;
    }

    /// Current state without side effects.
    pub async fn status(&self) -> BreakerStatus {
        self.status_at(unix_now()).await
    }

    pub async fn status_at(&self, now: f64) -> BreakerStatus {
        let snapshot = self.load().await;
        let would_admit = match snapshot.state {
            CircuitState::Open => self.recovery_due(&snapshot, now),
            _ => true,
        };
        let nonzero = |t: f64| if t > 0.0 { Some(t) } else { None };
        BreakerStatus {
            service: self.service.clone(),
            state: snapshot.state,
            failure_count: snapshot.failure_count,
            success_count: snapshot.success_count,
            failure_rate: snapshot.failure_rate(),
            window_requests: snapshot.window.len(),
            last_failure_time: nonzero(snapshot.last_failure_time),
            state_change_time: nonzero(snapshot.state_change_time),
            would_admit,
        }
    }

    /// Force the breaker closed and clear its window.
    pub async fn reset(&self) {
        let now = unix_now();
        let mut snapshot = self.load().await;
        let from = snapshot.state;
        if from != CircuitState::Closed {
            self.transition(&mut snapshot, CircuitState::Closed, now);
        }
        snapshot.failure_count = 0;
        snapshot.success_count = 0;
        snapshot.window.clear();
        self.save(&snapshot).await;
        tracing::info!(service = %self.service, from = %from, "Circuit breaker reset");
    }

    /// Run `op` under this breaker. Errors count as failures.
    pub async fn call<F, T, E>(&self, op: F) -> Result<T, CallError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        let admission = self.admit().await;
        if !admission.allowed {
            return Err(CallError::Rejected {
                service: self.service.clone(),
                state: admission.state,
            });
        }
        match op.await {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            }
            Err(e) => {
                self.record_failure().await;
                Err(CallError::Inner(e))
            }
        }
    }

    fn should_log_rejection(&self) -> bool {
        let mut last = self.last_rejection_log.lock().expect("rejection log mutex poisoned");
        let now = Instant::now();
        match *last {
            Some(at) if now.duration_since(at) < REJECTION_LOG_INTERVAL => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::FlakyStore;
    use crate::store::{MemoryStore, ResilienceStore};
    use std::sync::Arc;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new("letta", BreakerSettings::default(), Arc::new(MemoryStore::new()))
    }

    async fn open(cb: &CircuitBreaker, at: f64) {
        for i in 0..5 {
            cb.record_failure_at(at + i as f64 * 0.1).await;
        }
    }

    #[tokio::test]
    async fn test_opens_after_failure_threshold() {
        let cb = breaker();
        assert!(cb.admit_at(100.0).await.allowed);

        for i in 0..4 {
            cb.record_failure_at(100.0 + i as f64).await;
            assert_eq!(cb.status_at(104.0).await.state, CircuitState::Closed);
        }
        cb.record_failure_at(104.0).await;

        let admission = cb.admit_at(105.0).await;
        assert!(!admission.allowed);
        assert_eq!(admission.state, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_success_resets_failures_in_closed() {
        let cb = breaker();
        for i in 0..4 {
            cb.record_failure_at(100.0 + i as f64).await;
        }
        cb.record_success_at(105.0).await;
        assert_eq!(cb.status_at(105.0).await.failure_count, 0);

        cb.record_failure_at(106.0).await;
        assert_eq!(cb.status_at(106.0).await.state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_failure_rate_opens_with_minimum_requests() {
        let cb = breaker();
        // Alternate so failure_count never reaches 5 but the rate hits 50%.
        for i in 0..9 {
            let t = 100.0 + i as f64;
            if i % 2 == 0 {
                cb.record_success_at(t).await;
            } else {
                cb.record_failure_at(t).await;
            }
        }
        assert_eq!(cb.status_at(109.0).await.state, CircuitState::Closed);

        cb.record_failure_at(109.0).await;
        assert_eq!(cb.status_at(110.0).await.state, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_recovery_admits_probe_then_closes() {
        let cb = breaker();
        open(&cb, 100.0).await;
        assert!(!cb.admit_at(150.0).await.allowed);

        let probe = cb.admit_at(161.0).await;
        assert!(probe.allowed);
        assert_eq!(probe.state, CircuitState::HalfOpen);

        for i in 0..3 {
            cb.record_success_at(162.0 + i as f64).await;
        }
        let status = cb.status_at(170.0).await;
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.failure_count, 0);
        assert_eq!(status.success_count, 0);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let cb = breaker();
        open(&cb, 100.0).await;
        assert!(cb.admit_at(161.0).await.allowed);

        cb.record_failure_at(162.0).await;
        let admission = cb.admit_at(163.0).await;
        assert!(!admission.allowed);
        assert_eq!(admission.state, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_window_is_bounded() {
        let settings = BreakerSettings {
            window_size: 4,
            failure_threshold: 100,
            ..BreakerSettings::default()
        };
        let cb = CircuitBreaker::new("ams", settings, Arc::new(MemoryStore::new()));
        for i in 0..10 {
            cb.record_success_at(100.0 + i as f64).await;
        }
        assert_eq!(cb.status_at(110.0).await.window_requests, 4);

        cb.record_success_at(200.0).await;
        assert_eq!(cb.status_at(200.0).await.window_requests, 1);
    }

    #[tokio::test]
    async fn test_state_is_shared_through_store() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let a = CircuitBreaker::new("litellm", BreakerSettings::default(), store.clone());
        let b = CircuitBreaker::new("litellm", BreakerSettings::default(), store.clone());

        open(&a, 100.0).await;
        assert!(!b.admit_at(101.0).await.allowed);

        let fields = store.hash_get_all("circuit_breaker:litellm:state").await.unwrap();
        assert_eq!(fields.get("state").map(String::as_str), Some("open"));
    }

    #[tokio::test]
    async fn test_reset_closes() {
        let cb = breaker();
        open(&cb, unix_now()).await;
        cb.reset().await;
        let status = cb.status().await;
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.window_requests, 0);
    }

    #[tokio::test]
    async fn test_call_wraps_operations() {
        let cb = breaker();
        let ok: Result<u32, CallError<&str>> = cb.call(async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        for _ in 0..5 {
            let _ = cb.call(async { Err::<u32, _>("boom") }).await;
        }
        let rejected = cb.call(async { Ok::<u32, &str>(1) }).await;
        assert!(matches!(rejected, Err(CallError::Rejected { state: CircuitState::Open, .. })));
    }

    #[tokio::test]
    async fn test_store_outage_uses_last_known_state() {
        let store = Arc::new(FlakyStore::down());
        let cb = CircuitBreaker::new("letta", BreakerSettings::default(), store.clone());
        assert!(cb.admit_at(100.0).await.allowed, "no prior state means CLOSED");

        store.set_down(false);
        open(&cb, 100.0).await;

        store.set_down(true);
        let admission = cb.admit_at(101.0).await;
        assert!(!admission.allowed);
        assert_eq!(admission.state, CircuitState::Open);
    }
}
