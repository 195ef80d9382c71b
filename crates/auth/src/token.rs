//! Signed access tokens (HS256 JWT).

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use thiserror::Error;

use crate::claims::{TokenClaims, TokenValidationError, validate_claims};
use crate::Role;

/// HS256 keys shorter than this are rejected at construction.
pub const MIN_SECRET_KEY_SIZE: usize = 32;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("invalid key size: must be at least 32 bytes")]
    KeyTooShort,

    #[error("invalid token")]
    Invalid,

    #[error(transparent)]
    Claims(#[from] TokenValidationError),

    #[error("failed to sign token: {0}")]
    Signing(String),
}

/// Issues and verifies access tokens.
pub trait TokenMaker: Send + Sync {
    /// Create a token for `username` valid for `ttl` starting at `now`.
    fn create_token(
        &self,
        username: &str,
        role: Role,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<(String, TokenClaims), TokenError>;

    /// Verify signature and claims; returns the claims when valid at `now`.
    fn verify_token(&self, token: &str, now: DateTime<Utc>) -> Result<TokenClaims, TokenError>;
}

/// Symmetric-key JWT maker.
pub struct Hs256TokenMaker {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl Hs256TokenMaker {
    pub fn new(secret: &[u8]) -> Result<Self, TokenError> {
        if secret.len() < MIN_SECRET_KEY_SIZE {
            return Err(TokenError::KeyTooShort);
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        })
    }

    fn validation() -> Validation {
        // Time checks are done by `validate_claims` against the caller's clock.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        validation
    }
}

impl core::fmt::Debug for Hs256TokenMaker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Hs256TokenMaker").finish_non_exhaustive()
    }
}

impl TokenMaker for Hs256TokenMaker {
    fn create_token(
        &self,
        username: &str,
        role: Role,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<(String, TokenClaims), TokenError> {
        let claims = TokenClaims::new(username, role, now, ttl);
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))?;
        Ok((token, claims))
    }

    fn verify_token(&self, token: &str, now: DateTime<Utc>) -> Result<TokenClaims, TokenError> {
        let data = decode::<TokenClaims>(token, &self.decoding, &Self::validation()).map_err(|e| {
            tracing::debug!(error = %e, "token rejected");
            TokenError::Invalid
        })?;
        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}
