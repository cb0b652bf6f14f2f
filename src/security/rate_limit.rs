//! Sliding-window rate limiting per (category, identity).
//!
//! Each pair owns a sorted set `rate_limit:{category}:{identity}` of request
//! timestamps. One atomic store call prunes entries older than the window,
//! counts the survivors and records the current request when it fits. The
//! count taken *before* recording decides the outcome, so a ceiling of N
//! admits exactly N requests per window. Rejected requests are not recorded.
//!
//! Store failures fail open: the request is admitted and a warning logged.

use std::collections::HashMap;
use std::time::Duration;

use axum::http::{HeaderMap, HeaderValue};
use serde::Serialize;

use crate::config::RateLimitConfig;
use crate::observability::metrics;
use crate::routing::{PathPattern, PatternTable};
use crate::store::{unix_now, SharedStore, StoreError};

/// Fallback `Retry-After` when the oldest entry is unknown.
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Extra lifetime of a window key beyond the window itself.
const KEY_GRACE: Duration = Duration::from_secs(60);

/// Outcome of one rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// Unix seconds at which a full window has elapsed from now.
    pub reset_at: u64,
    /// Seconds until the oldest counted request leaves the window.
    pub retry_after: Option<u64>,
}

impl RateLimitDecision {
    fn unlimited(limit: u64, reset_at: u64) -> Self {
        Self {
            allowed: true,
            limit,
            remaining: limit,
            reset_at,
            retry_after: None,
        }
    }

    /// Attach `X-RateLimit-*` headers.
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        headers.insert("x-ratelimit-limit", HeaderValue::from(self.limit));
        headers.insert("x-ratelimit-remaining", HeaderValue::from(self.remaining));
        headers.insert("x-ratelimit-reset", HeaderValue::from(self.reset_at));
    }
}

/// Administrative view of one window.
#[derive(Debug, Clone, Serialize)]
pub struct UsageReport {
    pub identity: String,
    pub category: String,
    pub limit: u64,
    pub used: u64,
    pub remaining: u64,
    pub window_secs: u64,
    pub reset_at: u64,
    pub custom_limit: Option<u64>,
}

/// The limiter shared by all request tasks.
#[derive(Debug)]
pub struct RateLimiter {
    enabled: bool,
    store: SharedStore,
    window: Duration,
    categories: PatternTable<String>,
    limits: HashMap<String, u64>,
    default_category: String,
    exempt: Vec<PathPattern>,
    honor_custom_limits: bool,
}

impl RateLimiter {
    pub fn from_config(config: &RateLimitConfig, store: SharedStore) -> Self {
        let mut categories = PatternTable::new();
        let mut limits = HashMap::new();
        for category in &config.categories {
            limits.insert(category.name.clone(), category.limit);
            for pattern in &category.patterns {
                categories.insert(PathPattern::prefix(pattern), category.name.clone());
            }
        }
        Self {
            enabled: config.enabled,
            store,
            window: Duration::from_secs(config.window_secs),
            categories,
            limits,
            default_category: config.default_category.clone(),
            exempt: config.exempt_paths.iter().map(|p| PathPattern::exact(p)).collect(),
            honor_custom_limits: config.honor_custom_limits,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_exempt(&self, path: &str) -> bool {
        self.exempt.iter().any(|p| p.matches(path))
    }

    pub fn has_category(&self, category: &str) -> bool {
        self.limits.contains_key(category)
    }

    /// Category owning `path`, or the default category.
    pub fn category_for(&self, path: &str) -> &str {
        self.categories
            .best_match(path)
            .map(|(_, name)| name.as_str())
            .unwrap_or(&self.default_category)
    }

    /// Configured ceiling; unknown categories use the default category's.
    pub fn limit_for(&self, category: &str) -> u64 {
        self.limits
            .get(category)
            .or_else(|| self.limits.get(&self.default_category))
            .copied()
            .unwrap_or(0)
    }

    fn key(category: &str, identity: &str) -> String {
        format!("rate_limit:{}:{}", category, identity)
    }

    fn custom_key(category: &str, identity: &str) -> String {
        format!("rate_limit_custom:{}:{}", category, identity)
    }

    async fn custom_limit(&self, identity: &str, category: &str) -> Result<Option<u64>, StoreError> {
        let key = Self::custom_key(category, identity);
        match self.store.get(&key).await? {
            Some(raw) => raw.parse().map(Some).map_err(|_| StoreError::Malformed {
                key,
                reason: format!("'{}' is not a limit", raw),
            }),
            None => Ok(None),
        }
    }

    async fn effective_limit(&self, identity: &str, category: &str) -> u64 {
        let configured = self.limit_for(category);
        if !self.honor_custom_limits {
            return configured;
        }
        match self.custom_limit(identity, category).await {
            Ok(Some(custom)) => custom,
            Ok(None) => configured,
            Err(e) => {
                tracing::warn!(category = %category, error = %e, "Custom limit lookup failed, using configured limit");
                configured
            }
        }
    }

    pub async fn check(&self, identity: &str, category: &str) -> RateLimitDecision {
        self.check_at(identity, category, unix_now()).await
    }

    /// Count this request against the window ending at `now`.
    pub async fn check_at(&self, identity: &str, category: &str, now: f64) -> RateLimitDecision {
        let limit = self.effective_limit(identity, category).await;
        let window = self.window.as_secs_f64();
        let reset_at = (now + window) as u64;
        let member = format!("{:.6}:{}", now, uuid::Uuid::new_v4().simple());

        let hit = match self
            .store
            .window_hit(
                &Self::key(category, identity),
                now,
                self.window,
                limit,
                &member,
                self.window + KEY_GRACE,
            )
            .await
        {
            Ok(hit) => hit,
            Err(e) => {
                tracing::warn!(
                    category = %category,
                    backend = self.store.backend(),
                    error = %e,
                    "Rate limit store unavailable, allowing request"
                );
                return RateLimitDecision::unlimited(limit, reset_at);
            }
        };

        let remaining = limit.saturating_sub(hit.count + 1);
        if hit.admitted {
            return RateLimitDecision {
                allowed: true,
                limit,
                remaining,
                reset_at,
                retry_after: None,
            };
        }

        let retry_after = hit
            .oldest
            .map(|oldest| ((oldest + window - now) as i64 + 1).max(1) as u64)
            .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
        metrics::record_rate_limited(category);
        RateLimitDecision {
            allowed: false,
            limit,
            remaining: 0,
            reset_at,
            retry_after: Some(retry_after),
        }
    }

    /// Current usage without recording a request.
    pub async fn usage(&self, identity: &str, category: &str) -> Result<UsageReport, StoreError> {
        let now = unix_now();
        let used = self
            .store
            .window_count(&Self::key(category, identity), now, self.window)
            .await?;
        let custom_limit = self.custom_limit(identity, category).await?;
        let limit = custom_limit.unwrap_or_else(|| self.limit_for(category));
        Ok(UsageReport {
            identity: identity.to_string(),
            category: category.to_string(),
            limit,
            used,
            remaining: limit.saturating_sub(used),
            window_secs: self.window.as_secs(),
            reset_at: (now + self.window.as_secs_f64()) as u64,
            custom_limit,
        })
    }

    /// Forget every recorded request for the pair.
    pub async fn reset(&self, identity: &str, category: &str) -> Result<(), StoreError> {
        self.store.delete(&Self::key(category, identity)).await?;
        tracing::info!(category = %category, "Rate limit window reset");
        Ok(())
    }

    /// Override the ceiling for one identity for `duration`.
    pub async fn set_custom_limit(
        &self,
        identity: &str,
        category: &str,
        limit: u64,
        duration: Duration,
    ) -> Result<(), StoreError> {
        self.store
            .set_ex(&Self::custom_key(category, identity), &limit.to_string(), duration)
            .await?;
        tracing::info!(
            category = %category,
            limit = limit,
            duration_secs = duration.as_secs(),
            "Custom rate limit set"
        );
        Ok(())
    }
}
