//! Request authentication.
//!
//! # Scheme Selection
//! ```text
//! OPTIONS or public path       → Bypass
//! path in shared-secret list   → agent secret + ownership of {user_id}
//! anything else                → signed bearer token
//! ```
//!
//! Both lists match exact paths (with `{name}` placeholders), never prefixes,
//! so `/` being public does not make everything public.

use std::collections::BTreeMap;

use axum::http::{header, HeaderMap, Method};
use serde::Serialize;

use crate::config::AuthConfig;
use crate::error::GatewayError;
use crate::observability::metrics;
use crate::routing::PathPattern;
use crate::security::agent_secret::{extract_secret, AgentSecretVerifier};
use crate::security::token::TokenVerifier;
use crate::store::SharedStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthScheme {
    Token,
    SharedSecret,
}

impl AuthScheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Token => "token",
            Self::SharedSecret => "shared-secret",
        }
    }
}

/// Authenticated caller, attached to the request for later stages.
#[derive(Debug, Clone, Serialize)]
pub struct Principal {
    pub identity: String,
    pub scheme: AuthScheme,
    pub attributes: BTreeMap<String, String>,
}

impl Principal {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// Result of [`Authenticator::authenticate`].
#[derive(Debug, Clone)]
pub enum AuthOutcome {
    /// Request does not need credentials.
    Bypass,
    Authenticated(Principal),
}

#[derive(Debug)]
pub struct Authenticator {
    public: Vec<PathPattern>,
    shared_secret: Vec<PathPattern>,
    tokens: TokenVerifier,
    secrets: AgentSecretVerifier,
}

impl Authenticator {
    pub fn from_config(config: &AuthConfig, store: SharedStore) -> Result<Self, jsonwebtoken::errors::Error> {
        Ok(Self {
            public: config.public_paths.iter().map(|p| PathPattern::exact(p)).collect(),
            shared_secret: config
                .shared_secret_paths
                .iter()
                .map(|p| PathPattern::exact(p))
                .collect(),
            tokens: TokenVerifier::from_config(config)?,
            secrets: AgentSecretVerifier::from_config(config, store),
        })
    }

    pub fn is_public(&self, path: &str) -> bool {
        self.public.iter().any(|p| p.matches(path))
    }

    fn shared_secret_pattern(&self, path: &str) -> Option<&PathPattern> {
        self.shared_secret.iter().find(|p| p.matches(path))
    }

    pub fn scheme_for(&self, path: &str) -> AuthScheme {
        if self.shared_secret_pattern(path).is_some() {
            AuthScheme::SharedSecret
        } else {
            AuthScheme::Token
        }
    }

    pub async fn authenticate(
        &self,
        method: &Method,
        path: &str,
        headers: &HeaderMap,
    ) -> Result<AuthOutcome, GatewayError> {
        if method == Method::OPTIONS || self.is_public(path) {
            return Ok(AuthOutcome::Bypass);
        }

        let scheme = self.scheme_for(path);
        let result = match scheme {
            AuthScheme::Token => self.authenticate_token(headers),
            AuthScheme::SharedSecret => self.authenticate_secret(path, headers).await,
        };

        match result {
            Ok(principal) => {
                tracing::debug!(
                    identity = %principal.identity,
                    scheme = scheme.as_str(),
                    path = %path,
                    "Request authenticated"
                );
                Ok(AuthOutcome::Authenticated(principal))
            }
            Err(e) => {
                tracing::warn!(scheme = scheme.as_str(), path = %path, error = %e, "Authentication failed");
                metrics::record_auth_failure(scheme.as_str(), e.code());
                Err(e)
            }
        }
    }

    fn authenticate_token(&self, headers: &HeaderMap) -> Result<Principal, GatewayError> {
        let value = authorization(headers)?;
        let token = value
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| GatewayError::Authentication("Invalid authorization header format".to_string()))?;
        self.tokens.verify(token)
    }

    async fn authenticate_secret(&self, path: &str, headers: &HeaderMap) -> Result<Principal, GatewayError> {
        let user_id = self
            .shared_secret_pattern(path)
            .and_then(|p| p.capture(path, "user_id"))
            .or_else(|| segment_after(path, "agents"))
            .ok_or_else(|| GatewayError::Authentication("Missing user ID in request path".to_string()))?;

        let secret = extract_secret(authorization(headers)?);
        self.secrets.verify(secret, user_id).await
    }
}

fn authorization(headers: &HeaderMap) -> Result<&str, GatewayError> {
    headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| GatewayError::Authentication("Missing authorization header".to_string()))?
        .to_str()
        .map_err(|_| GatewayError::Authentication("Invalid authorization header format".to_string()))
}

/// Path segment following the first `marker` segment.
pub fn segment_after<'a>(path: &'a str, marker: &str) -> Option<&'a str> {
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    segments.find(|s| *s == marker)?;
    segments.next()
}
