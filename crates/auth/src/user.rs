//! User records for identity management.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Role;

/// A stored user.
///
/// `hashed_password` never leaves the server: it is skipped on serialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub role: Role,
    #[serde(skip_serializing, default)]
    pub hashed_password: String,
    pub full_name: String,
    pub email: String,
    pub password_changed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Parameters for inserting a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub username: String,
    pub role: Role,
    pub hashed_password: String,
    pub full_name: String,
    pub email: String,
}

/// Partial update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateUser {
    pub username: String,
    pub hashed_password: Option<String>,
    pub full_name: Option<String>,
    pub email: Option<String>,
}

impl UpdateUser {
    /// Apply to an in-memory copy, bumping `password_changed_at` on password change.
    pub fn apply_to(&self, user: &mut User, now: DateTime<Utc>) {
        if let Some(h) = &self.hashed_password {
            user.hashed_password = h.clone();
            user.password_changed_at = now;
        }
        if let Some(name) = &self.full_name {
            user.full_name = name.clone();
        }
        if let Some(email) = &self.email {
            user.email = email.clone();
        }
    }
}
