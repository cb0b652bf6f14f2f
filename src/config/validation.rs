//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (default category exists, names are unique)
//! - Validate value ranges (timeouts > 0, thresholds > 0)
//! - Compile-check every regex before it reaches the hot path
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;

use crate::config::schema::{GatewayConfig, StoreBackend};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a configuration, collecting every error.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<std::net::SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    let client = &config.http_client;
    for (field, value) in [
        ("http_client.max_connections", client.max_connections as u64),
        ("http_client.connect_timeout_secs", client.connect_timeout_secs),
        ("http_client.read_timeout_secs", client.read_timeout_secs),
        ("http_client.write_timeout_secs", client.write_timeout_secs),
        ("http_client.pool_timeout_secs", client.pool_timeout_secs),
        ("streaming.chunk_size", config.streaming.chunk_size as u64),
        ("streaming.keepalive_interval_secs", config.streaming.keepalive_interval_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than zero"));
        }
    }

    let mut names = HashSet::new();
    for (i, upstream) in config.upstreams.iter().enumerate() {
        let prefix = format!("upstreams[{}]", i);
        if !names.insert(upstream.name.as_str()) {
            errors.push(ValidationError::new(
                format!("{}.name", prefix),
                format!("duplicate upstream '{}'", upstream.name),
            ));
        }
        match url::Url::parse(&upstream.base_url) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            _ => errors.push(ValidationError::new(
                format!("{}.base_url", prefix),
                format!("'{}' is not an http(s) URL", upstream.base_url),
            )),
        }
        if !upstream.mount.starts_with('/') {
            errors.push(ValidationError::new(
                format!("{}.mount", prefix),
                "must start with '/'",
            ));
        }
        for (kind, patterns) in [
            ("deny_patterns", &upstream.deny_patterns),
            ("stream_patterns", &upstream.stream_patterns),
        ] {
            for pattern in patterns {
                if let Err(e) = regex::Regex::new(pattern) {
                    errors.push(ValidationError::new(
                        format!("{}.{}", prefix, kind),
                        format!("invalid regex '{}': {}", pattern, e),
                    ));
                }
            }
        }
    }

    if config.store.backend == StoreBackend::Redis && config.store.redis_url.is_empty() {
        errors.push(ValidationError::new(
            "store.redis_url",
            "required for the redis backend",
        ));
    }

    if config.auth.jwt_secret.is_empty() {
        errors.push(ValidationError::new("auth.jwt_secret", "must be set"));
    }
    if config.auth.jwt_algorithm.parse::<jsonwebtoken::Algorithm>().is_err() {
        errors.push(ValidationError::new(
            "auth.jwt_algorithm",
            format!("unknown algorithm '{}'", config.auth.jwt_algorithm),
        ));
    }

    let breaker = &config.circuit_breaker;
    for (field, value) in [
        ("circuit_breaker.failure_threshold", breaker.failure_threshold as u64),
        ("circuit_breaker.success_threshold", breaker.success_threshold as u64),
        ("circuit_breaker.sliding_window_size", breaker.sliding_window_size as u64),
        ("circuit_breaker.window_secs", breaker.window_secs),
        ("circuit_breaker.state_ttl_secs", breaker.state_ttl_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than zero"));
        }
    }
    if !(breaker.failure_rate_threshold > 0.0 && breaker.failure_rate_threshold <= 1.0) {
        errors.push(ValidationError::new(
            "circuit_breaker.failure_rate_threshold",
            "must be in (0, 1]",
        ));
    }

    let limits = &config.rate_limit;
    if limits.window_secs == 0 {
        errors.push(ValidationError::new("rate_limit.window_secs", "must be greater than zero"));
    }
    for (i, category) in limits.categories.iter().enumerate() {
        if category.limit == 0 {
            errors.push(ValidationError::new(
                format!("rate_limit.categories[{}].limit", i),
                "must be greater than zero",
            ));
        }
    }
    if !limits.categories.iter().any(|c| c.name == limits.default_category) {
        errors.push(ValidationError::new(
            "rate_limit.default_category",
            format!("'{}' is not a configured category", limits.default_category),
        ));
    }

    if config.admin.enabled && config.admin.api_key.is_empty() {
        errors.push(ValidationError::new(
            "admin.api_key",
            "must be set when the admin API is enabled",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.auth.jwt_secret = "secret".to_string();
        config.upstreams = GatewayConfig::default_upstreams();
        config
    }

    #[test]
    fn test_default_config_with_secret_is_valid() {
        assert_eq!(validate_config(&valid()), Ok(()));
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = valid();
        config.auth.jwt_secret.clear();
        config.rate_limit.default_category = "missing".to_string();
        config.upstreams[0].deny_patterns.push("(".to_string());

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"auth.jwt_secret"));
        assert!(fields.contains(&"rate_limit.default_category"));
        assert!(fields.contains(&"upstreams[0].deny_patterns"));
    }

    #[test]
    fn test_duplicate_upstream_and_bad_url() {
        let mut config = valid();
        let mut dup = config.upstreams[0].clone();
        dup.base_url = "ftp://nope".to_string();
        config.upstreams.push(dup);

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].field, "upstreams[3].name");
        assert_eq!(errors[1].field, "upstreams[3].base_url");
    }

    #[test]
    fn test_admin_requires_key() {
        let mut config = valid();
        config.admin.enabled = true;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "admin.api_key");
    }
}
