//! Bearer-token identity
//!
//! Access tokens are HS256 JWTs whose `sub` is the numeric user id. Every
//! protected handler resolves the caller through [`TokenVerifier::authenticate`]
//! and then checks ownership of the addressed resource.

use axum::http::{header::AUTHORIZATION, HeaderMap};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{LiftError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// User id as a decimal string
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Clone)]
pub struct TokenVerifier {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier").finish_non_exhaustive()
    }
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Sign an access token for `user_id`
    pub fn issue(&self, user_id: i64, issued_at: DateTime<Utc>, ttl: Duration) -> Result<String> {
        let claims = Claims {
            sub: user_id.to_string(),
            iat: issued_at.timestamp(),
            exp: (issued_at + ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| LiftError::Internal(format!("failed to sign token: {e}")))
    }

    /// Verify a raw token and return the user id it was issued to
    pub fn verify(&self, token: &str) -> Result<i64> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|e| LiftError::Auth(format!("invalid token: {e}")))?;
        data.claims
            .sub
            .parse::<i64>()
            .map_err(|_| LiftError::Auth("token subject is not a user id".to_string()))
    }

    /// Resolve the caller from an `Authorization: Bearer …` header
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<i64> {
        let value = headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| LiftError::Auth("missing authorization header".to_string()))?;
        let token = value
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| LiftError::Auth("expected a bearer token".to_string()))?;
        self.verify(token)
    }
}

/// The caller may only address their own user id
pub fn ensure_owner(caller: i64, owner: i64) -> Result<()> {
    if caller == owner {
        Ok(())
    } else {
        Err(LiftError::Forbidden(format!(
            "user {caller} may not access resources of user {owner}"
        )))
    }
}
