//! Refresh-token sessions.
//!
//! Login stores one session per refresh token. Renewing an access token
//! requires the stored session to agree with the presented token.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::claims::TokenClaims;

/// A stored session. `id` is the id of the refresh token's claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: Uuid,
    pub username: String,
    pub refresh_token: String,
    pub user_agent: String,
    pub client_ip: String,
    pub is_blocked: bool,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
    pub id: Uuid,
    pub username: String,
    pub refresh_token: String,
    pub user_agent: String,
    pub client_ip: String,
    pub is_blocked: bool,
    pub expires_at: DateTime<Utc>,
}

impl NewSession {
    /// Session for a freshly minted refresh token.
    pub fn for_refresh_token(
        claims: &TokenClaims,
        refresh_token: impl Into<String>,
        user_agent: impl Into<String>,
        client_ip: impl Into<String>,
    ) -> Self {
        Self {
            id: claims.id,
            username: claims.username.clone(),
            refresh_token: refresh_token.into(),
            user_agent: user_agent.into(),
            client_ip: client_ip.into(),
            is_blocked: false,
            expires_at: claims.expires_at,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("session is blocked")]
    Blocked,

    #[error("invalid session user")]
    WrongUser,

    #[error("invalid session token")]
    TokenMismatch,

    #[error("expired session")]
    Expired,
}

impl Session {
    /// Check that this session may renew access for the bearer of
    /// `presented` (whose verified claims are `claims`) at `now`.
    pub fn check_renewal(&self, claims: &TokenClaims, presented: &str, now: DateTime<Utc>) -> Result<(), SessionError> {
        if self.is_blocked {
            return Err(SessionError::Blocked);
        }
        if self.username != claims.username {
            return Err(SessionError::WrongUser);
        }
        if self.refresh_token != presented {
            return Err(SessionError::TokenMismatch);
        }
        if now > self.expires_at {
            return Err(SessionError::Expired);
        }
        Ok(())
    }
}
