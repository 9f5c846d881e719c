//! Token Authentication
//!
//! Validates access tokens issued by the external HTTP/auth layer. The game
//! server never issues tokens; it only checks the signature and claims
//! before an engine is constructed. A failed validation closes the channel
//! with an auth error and nothing else happens.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Settings;

/// Claims carried by a game access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Player identity.
    pub sub: String,
    /// Display name.
    #[serde(default)]
    pub username: String,
    /// Entrance tier used for major assignment (TIER_1..TIER_4).
    #[serde(default)]
    pub tier: String,
    /// Expiry timestamp (Unix seconds).
    #[serde(default)]
    pub exp: u64,
}

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No secret configured on the server.
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
    /// Required claim is missing.
    #[error("missing required claim: {0}")]
    MissingClaim(String),
    /// Other decoding error.
    #[error("decode error: {0}")]
    DecodeError(String),
}

/// Validate a token and extract its claims.
pub fn validate_token(token: &str, settings: &Settings) -> Result<TokenClaims, AuthError> {
    if !settings.auth_configured() {
        return Err(AuthError::NotConfigured);
    }

    let mut validation = Validation::new(Algorithm::HS256);
    validation.required_spec_claims = std::collections::HashSet::new();
    if settings.auth_skip_expiry {
        validation.validate_exp = false;
    }

    let key = DecodingKey::from_secret(settings.auth_secret.as_bytes());
    let data =
        decode::<TokenClaims>(token, &key, &validation).map_err(map_jwt_error)?;

    let claims = data.claims;
    if claims.sub.is_empty() {
        return Err(AuthError::MissingClaim("sub".into()));
    }
    Ok(claims)
}

/// Map JWT library errors to our error type.
fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AuthError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        ErrorKind::InvalidToken | ErrorKind::Base64(_) => AuthError::InvalidFormat,
        _ => AuthError::DecodeError(err.to_string()),
    }
}
