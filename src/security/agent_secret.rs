//! Shared-secret ("agent") credential scheme.
//!
//! Accepted secret shapes:
//! - the configured master secret itself
//! - an operator-issued prefixed token (`sk-` + `[A-Za-z0-9_-]`, minimum
//!   length), accepted only when a master secret is configured
//! - a generated secret: 64 lowercase hex chars equal to
//!   `sha256("{user_id}:{master}")`
//!
//! Ownership binds the secret to the `{user_id}` path segment. Results are
//! cached under `agent_secret_ownership:{hash}` where the hash covers both the
//! secret and the user id, so the cache never stores a secret in clear.
//!
//! Prefixed tokens are accepted for any user once a master secret exists.
//! They are not checked against an identity source.

use std::collections::BTreeMap;
use std::time::Duration;

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::config::AuthConfig;
use crate::error::GatewayError;
use crate::security::auth::{AuthScheme, Principal};
use crate::store::{SharedStore, StoreError};

/// Length of secret prefixes that may appear in logs.
const LOG_PREFIX_LEN: usize = 8;

/// Recognised secret shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretShape {
    Master,
    Prefixed,
    Generated,
}

impl SecretShape {
    fn as_str(self) -> &'static str {
        match self {
            Self::Master => "master",
            Self::Prefixed => "prefixed",
            Self::Generated => "generated",
        }
    }
}

/// Safe-to-log prefix of a secret.
pub fn redact(secret: &str) -> &str {
    let end = secret
        .char_indices()
        .nth(LOG_PREFIX_LEN)
        .map(|(i, _)| i)
        .unwrap_or(secret.len());
    &secret[..end]
}

/// Deterministic per-user secret derived from the master secret.
pub fn generate_secret(user_id: &str, master: &str) -> String {
    hex::encode(Sha256::digest(format!("{}:{}", user_id, master).as_bytes()))
}

fn ct_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Strip `Bearer ` or `AgentSecret ` from an Authorization value.
pub fn extract_secret(header: &str) -> &str {
    let header = header.trim();
    header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("AgentSecret "))
        .unwrap_or(header)
        .trim()
}

/// Verifies agent secrets and their ownership.
#[derive(Debug)]
pub struct AgentSecretVerifier {
    master: Option<String>,
    prefix: String,
    min_length: usize,
    store: SharedStore,
    cache_ttl: Duration,
    retries: u32,
    retry_delay: Duration,
}

impl AgentSecretVerifier {
    pub fn from_config(config: &AuthConfig, store: SharedStore) -> Self {
        Self {
            master: config.agent_secret_master_key.clone().filter(|m| !m.is_empty()),
            prefix: config.agent_secret_prefix.clone(),
            min_length: config.agent_secret_min_length,
            store,
            cache_ttl: Duration::from_secs(config.ownership_cache_ttl_secs),
            retries: config.ownership_retries,
            retry_delay: Duration::from_millis(config.ownership_retry_delay_ms),
        }
    }

    /// Shape of `secret`, or `None` when it matches none of them.
    pub fn classify(&self, secret: &str) -> Option<SecretShape> {
        if let Some(master) = &self.master {
            if ct_eq(secret, master) {
                return Some(SecretShape::Master);
            }
        }
        if let Some(rest) = secret.strip_prefix(self.prefix.as_str()) {
            let charset_ok = !rest.is_empty()
                && rest.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
            if charset_ok && secret.len() >= self.min_length && self.master.is_some() {
                return Some(SecretShape::Prefixed);
            }
            return None;
        }
        if secret.len() == 64 && secret.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')) {
            return Some(SecretShape::Generated);
        }
        None
    }

    fn cache_key(secret: &str, user_id: &str) -> String {
        let digest = hex::encode(Sha256::digest(
            format!("agent_secret_ownership:{}:{}", secret, user_id).as_bytes(),
        ));
        format!("agent_secret_ownership:{}", &digest[..32])
    }

    /// Ownership decision without the cache.
    pub fn owns(&self, shape: SecretShape, secret: &str, user_id: &str) -> bool {
        match (shape, &self.master) {
            (SecretShape::Master, Some(_)) => true,
            (SecretShape::Prefixed, Some(_)) => true,
            (SecretShape::Generated, Some(master)) => ct_eq(secret, &generate_secret(user_id, master)),
            (_, None) => false,
        }
    }

    async fn lookup(&self, shape: SecretShape, secret: &str, user_id: &str) -> Result<bool, StoreError> {
        let key = Self::cache_key(secret, user_id);
        if let Some(cached) = self.store.get(&key).await? {
            return Ok(cached == "1");
        }

        let owned = self.owns(shape, secret, user_id);
        if let Err(e) = self
            .store
            .set_ex(&key, if owned { "1" } else { "0" }, self.cache_ttl)
            .await
        {
            tracing::warn!(error = %e, "Failed to cache ownership result");
        }
        Ok(owned)
    }

    async fn verify_ownership(&self, shape: SecretShape, secret: &str, user_id: &str) -> Result<bool, GatewayError> {
        let mut attempt = 0;
        loop {
            match self.lookup(shape, secret, user_id).await {
                Ok(owned) => return Ok(owned),
                Err(e) if attempt < self.retries => {
                    attempt += 1;
                    tracing::debug!(attempt = attempt, error = %e, "Retrying ownership verification");
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => {
                    tracing::error!(
                        key_prefix = %redact(secret),
                        error = %e,
                        "Ownership verification failed after retries"
                    );
                    return Err(GatewayError::Authorization(
                        "Agent secret key validation failed".to_string(),
                    ));
                }
            }
        }
    }

    /// Authenticate `secret` for the request owned by `user_id`.
    pub async fn verify(&self, secret: &str, user_id: &str) -> Result<Principal, GatewayError> {
        if secret.is_empty() {
            return Err(GatewayError::Authentication("Missing agent secret key".to_string()));
        }
        let shape = self.classify(secret).ok_or_else(|| {
            tracing::warn!(key_prefix = %redact(secret), "Invalid agent secret key format");
            GatewayError::Authentication("Invalid agent secret key format".to_string())
        })?;

        if !self.verify_ownership(shape, secret, user_id).await? {
            tracing::warn!(key_prefix = %redact(secret), "Agent secret key not valid for user");
            return Err(GatewayError::Authorization(
                "Agent secret key is not valid for this user".to_string(),
            ));
        }

        tracing::debug!(key_prefix = %redact(secret), shape = shape.as_str(), "Agent secret accepted");
        let mut attributes = BTreeMap::new();
        attributes.insert("key_prefix".to_string(), redact(secret).to_string());
        attributes.insert("secret_shape".to_string(), shape.as_str().to_string());
        Ok(Principal {
            identity: user_id.to_string(),
            scheme: AuthScheme::SharedSecret,
            attributes,
        })
    }
}
