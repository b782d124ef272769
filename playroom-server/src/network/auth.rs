//! Authentication
//!
//! Binds a connection to an [`Identity`]. Tokens come from the account
//! service; this crate only checks them. HS256 with a shared secret or RS256
//! with the provider's public key.

use jsonwebtoken::{decode, Algorithm, DecodingKey, TokenData, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::room::Identity;

/// Authentication configuration.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// Expected issuer claim ("iss"). If None, any issuer accepted.
    pub issuer: Option<String>,
    /// Expected audience claim ("aud"). If None, any audience accepted.
    pub audience: Option<String>,
    /// RS256 public key in PEM format (preferred for external providers).
    pub public_key_pem: Option<String>,
    /// HS256 secret (fallback for simple setups).
    pub secret: Option<String>,
    /// Whether to skip expiry validation (for testing only).
    pub skip_expiry: bool,
}

impl AuthConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            issuer: non_empty_var("AUTH_ISSUER"),
            audience: non_empty_var("AUTH_AUDIENCE"),
            public_key_pem: non_empty_var("AUTH_PUBLIC_KEY_PEM"),
            secret: non_empty_var("AUTH_SECRET"),
            skip_expiry: std::env::var("AUTH_SKIP_EXPIRY")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }

    /// Check if authentication is configured.
    pub fn is_configured(&self) -> bool {
        self.public_key_pem.is_some() || self.secret.is_some()
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Claims we read from account-service tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject - usually the user ID from the auth provider.
    pub sub: String,
    /// Display name, when the provider includes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Expiry timestamp (Unix seconds).
    #[serde(default)]
    pub exp: u64,
    /// Issued at timestamp.
    #[serde(default)]
    pub iat: u64,
    /// Issuer (auth provider).
    #[serde(default)]
    pub iss: Option<String>,
    /// Audience.
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
}

impl TokenClaims {
    /// Room identity for these claims: the display name, else the subject.
    pub fn identity(&self) -> Option<Identity> {
        self.username
            .as_deref()
            .and_then(|name| Identity::new(name))
            .or_else(|| Identity::new(self.sub.as_str()))
    }
}

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No authentication configured on server.
    #[error("authentication not configured")]
    NotConfigured,
    /// Token format is invalid.
    #[error("invalid token format")]
    InvalidFormat,
    /// Token signature verification failed.
    #[error("invalid signature")]
    InvalidSignature,
    /// Token has expired.
    #[error("token expired")]
    Expired,
    /// Issuer claim doesn't match expected value.
    #[error("invalid issuer")]
    InvalidIssuer,
    /// Audience claim doesn't match expected value.
    #[error("invalid audience")]
    InvalidAudience,
    /// Required claim is missing.
    #[error("missing required claim: {0}")]
    MissingClaim(String),
    /// JWT decoding error.
    #[error("decode error: {0}")]
    DecodeError(String),
}

/// Turns a client credential into an identity.
pub trait Authenticator: Send + Sync {
    /// Validate `credential` and return who it belongs to.
    fn authenticate(&self, credential: &str) -> Result<Identity, AuthError>;
}

/// Bearer-token authenticator backed by [`validate_token`].
#[derive(Clone, Debug)]
pub struct JwtAuthenticator {
    config: AuthConfig,
}

impl JwtAuthenticator {
    /// Create an authenticator.
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Validation settings in use.
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }
}

impl Authenticator for JwtAuthenticator {
    fn authenticate(&self, credential: &str) -> Result<Identity, AuthError> {
        let token = credential.trim();
        let token = token.strip_prefix("Bearer ").unwrap_or(token).trim();
        if token.is_empty() {
            return Err(AuthError::InvalidFormat);
        }

        let claims = validate_token(token, &self.config)?;
        claims
            .identity()
            .ok_or_else(|| AuthError::MissingClaim("sub".into()))
    }
}

/// Validate a JWT token and extract claims.
pub fn validate_token(token: &str, config: &AuthConfig) -> Result<TokenClaims, AuthError> {
    if !config.is_configured() {
        return Err(AuthError::NotConfigured);
    }

    let algorithm = if config.public_key_pem.is_some() {
        Algorithm::RS256
    } else {
        Algorithm::HS256
    };

    let mut validation = Validation::new(algorithm);
    validation.required_spec_claims = std::collections::HashSet::new();

    if let Some(ref issuer) = config.issuer {
        validation.set_issuer(&[issuer]);
    }

    if let Some(ref audience) = config.audience {
        validation.set_audience(&[audience]);
    } else {
        validation.validate_aud = false;
    }

    if config.skip_expiry {
        validation.validate_exp = false;
    }

    let token_data: TokenData<TokenClaims> = if let Some(ref pem) = config.public_key_pem {
        let key = DecodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| AuthError::DecodeError(format!("invalid public key: {}", e)))?;
        decode(token, &key, &validation).map_err(map_jwt_error)?
    } else if let Some(ref secret) = config.secret {
        let key = DecodingKey::from_secret(secret.as_bytes());
        decode(token, &key, &validation).map_err(map_jwt_error)?
    } else {
        return Err(AuthError::NotConfigured);
    };

    let claims = token_data.claims;

    if claims.sub.trim().is_empty() {
        return Err(AuthError::MissingClaim("sub".into()));
    }

    // Manual expiry check (the library allows a small leeway)
    if !config.skip_expiry && claims.exp > 0 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        if now > claims.exp {
            return Err(AuthError::Expired);
        }
    }

    Ok(claims)
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AuthError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
        ErrorKind::InvalidAudience => AuthError::InvalidAudience,
        ErrorKind::InvalidToken | ErrorKind::Base64(_) => AuthError::InvalidFormat,
        _ => AuthError::DecodeError(err.to_string()),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "playroom-test-secret";

    fn now() -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
    }

    fn sign(claims: &TokenClaims, secret: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn test_claims() -> TokenClaims {
        TokenClaims {
            sub: "user123".into(),
            username: Some("alice".into()),
            exp: now() + 3600,
            iat: now(),
            iss: Some("accounts.playroom".into()),
            aud: Some(serde_json::json!("playroom")),
        }
    }

    fn secret_config() -> AuthConfig {
        AuthConfig {
            secret: Some(SECRET.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_accepts_signed_token() {
        let claims = validate_token(&sign(&test_claims(), SECRET), &secret_config()).unwrap();
        assert_eq!(claims.sub, "user123");
        assert_eq!(claims.username.as_deref(), Some("alice"));
    }

    #[test]
    fn test_rejects_foreign_signature() {
        let token = sign(&test_claims(), "someone-elses-secret");
        assert!(matches!(
            validate_token(&token, &secret_config()),
            Err(AuthError::InvalidSignature)
        ));
    }

    #[test]
    fn test_expiry_unless_skipped() {
        let stale = TokenClaims {
            exp: now() - 600,
            ..test_claims()
        };
        let token = sign(&stale, SECRET);
        assert!(matches!(validate_token(&token, &secret_config()), Err(AuthError::Expired)));

        let lenient = AuthConfig {
            skip_expiry: true,
            ..secret_config()
        };
        assert!(validate_token(&token, &lenient).is_ok());
    }

    #[test]
    fn test_issuer_and_audience_checked_when_configured() {
        let token = sign(&test_claims(), SECRET);

        let matching = AuthConfig {
            issuer: Some("accounts.playroom".into()),
            audience: Some("playroom".into()),
            ..secret_config()
        };
        assert!(validate_token(&token, &matching).is_ok());

        let other_issuer = AuthConfig {
            issuer: Some("accounts.elsewhere".into()),
            ..secret_config()
        };
        assert!(matches!(validate_token(&token, &other_issuer), Err(AuthError::InvalidIssuer)));

        let other_audience = AuthConfig {
            audience: Some("arcade".into()),
            ..secret_config()
        };
        assert!(matches!(validate_token(&token, &other_audience), Err(AuthError::InvalidAudience)));
    }

    #[test]
    fn test_unconfigured_rejects_everything() {
        let auth = JwtAuthenticator::new(AuthConfig::default());
        let token = sign(&test_claims(), SECRET);
        assert!(matches!(auth.authenticate(&token), Err(AuthError::NotConfigured)));
    }

    #[test]
    fn test_identity_prefers_username() {
        let claims = test_claims();
        assert_eq!(claims.identity().unwrap().as_str(), "alice");

        let anonymous = TokenClaims {
            username: Some("   ".into()),
            ..claims
        };
        assert_eq!(anonymous.identity().unwrap().as_str(), "user123");
    }

    #[test]
    fn test_authenticator_accepts_bearer_prefix() {
        let auth = JwtAuthenticator::new(secret_config());
        let token = sign(&test_claims(), SECRET);

        let bare = auth.authenticate(&token).unwrap();
        let bearer = auth.authenticate(&format!("Bearer {}", token)).unwrap();
        assert_eq!(bare, bearer);
        assert_eq!(bare.as_str(), "alice");
    }

    #[test]
    fn test_authenticator_rejects_blank_credential() {
        let auth = JwtAuthenticator::new(secret_config());
        assert!(matches!(auth.authenticate("Bearer  "), Err(AuthError::InvalidFormat)));
        assert!(matches!(auth.authenticate("not-a-jwt"), Err(AuthError::InvalidFormat)));
    }
}
