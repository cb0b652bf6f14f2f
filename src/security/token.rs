//! Signed-token verification.

use std::collections::BTreeMap;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::config::AuthConfig;
use crate::error::GatewayError;
use crate::security::auth::{AuthScheme, Principal};

#[derive(Debug, Deserialize)]
struct Claims {
    sub: Option<String>,
    email: Option<String>,
    role: Option<String>,
    #[serde(default)]
    user_metadata: Map<String, Value>,
    #[serde(default)]
    app_metadata: Map<String, Value>,
}

/// Verifies bearer tokens against the configured secret and claims.
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("algorithms", &self.validation.algorithms)
            .finish()
    }
}

impl TokenVerifier {
    pub fn from_config(config: &AuthConfig) -> Result<Self, jsonwebtoken::errors::Error> {
        let algorithm: Algorithm = config.jwt_algorithm.parse()?;
        let mut validation = Validation::new(algorithm);
        validation.validate_exp = true;
        match &config.jwt_audience {
            Some(audience) => validation.set_audience(&[audience.as_str()]),
            None => validation.validate_aud = false,
        }
        if let Some(issuer) = &config.jwt_issuer {
            validation.set_issuer(&[issuer.as_str()]);
        }
        Ok(Self {
            key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
        })
    }

    /// Verify a raw token and build its principal.
    pub fn verify(&self, token: &str) -> Result<Principal, GatewayError> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => GatewayError::Authentication("Token has expired".to_string()),
            ErrorKind::InvalidAudience => GatewayError::Authentication("Invalid token audience".to_string()),
            ErrorKind::InvalidIssuer => GatewayError::Authentication("Invalid token issuer".to_string()),
            _ => GatewayError::Authentication(format!("Invalid token: {}", e)),
        })?;
        let claims = data.claims;

        let identity = claims
            .sub
            .filter(|s| !s.is_empty())
            .ok_or_else(|| GatewayError::Authentication("Invalid token: missing user ID".to_string()))?;

        let mut attributes = BTreeMap::new();
        for (key, value) in claims.user_metadata.into_iter().chain(claims.app_metadata) {
            let value = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            attributes.insert(key, value);
        }
        if let Some(email) = claims.email {
            attributes.insert("email".to_string(), email);
        }
        attributes.insert(
            "role".to_string(),
            claims.role.unwrap_or_else(|| "authenticated".to_string()),
        );

        Ok(Principal {
            identity,
            scheme: AuthScheme::Token,
            attributes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const SECRET: &str = "test-jwt-secret";

    fn verifier() -> TokenVerifier {
        let config = AuthConfig {
            jwt_secret: SECRET.to_string(),
            ..AuthConfig::default()
        };
        TokenVerifier::from_config(&config).unwrap()
    }

    fn now() -> i64 {
        crate::store::unix_now() as i64
    }

    fn sign(claims: Value) -> String {
        encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
    }

    #[test]
    fn test_valid_token_builds_principal() {
        let token = sign(json!({
            "sub": "user-42",
            "aud": "authenticated",
            "exp": now() + 3600,
            "email": "u@example.com",
            "user_metadata": {"plan": "pro", "seats": 3},
            "app_metadata": {"plan": "enterprise"},
        }));

        let principal = verifier().verify(&token).unwrap();
        assert_eq!(principal.identity, "user-42");
        assert_eq!(principal.scheme, AuthScheme::Token);
        assert_eq!(principal.attributes["email"], "u@example.com");
        assert_eq!(principal.attributes["role"], "authenticated");
        assert_eq!(principal.attributes["plan"], "enterprise");
        assert_eq!(principal.attributes["seats"], "3");
    }

    #[test]
    fn test_expired_token() {
        let token = sign(json!({"sub": "u", "aud": "authenticated", "exp": now() - 3600}));
        let err = verifier().verify(&token).unwrap_err();
        assert_eq!(err.to_string(), "Token has expired");
    }

    #[test]
    fn test_missing_subject() {
        let token = sign(json!({"aud": "authenticated", "exp": now() + 3600}));
        let err = verifier().verify(&token).unwrap_err();
        assert!(matches!(err, GatewayError::Authentication(ref m) if m.contains("missing user ID")));
    }

    #[test]
    fn test_wrong_audience_and_signature() {
        let token = sign(json!({"sub": "u", "aud": "other", "exp": now() + 3600}));
        assert_eq!(verifier().verify(&token).unwrap_err().to_string(), "Invalid token audience");

        let forged = encode(
            &Header::default(),
            &json!({"sub": "u", "aud": "authenticated", "exp": now() + 3600}),
            &EncodingKey::from_secret(b"other-secret"),
        )
        .unwrap();
        assert!(verifier().verify(&forged).is_err());
        assert!(verifier().verify("not-a-jwt").is_err());
    }
}
