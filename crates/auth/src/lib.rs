//! `ferrobank-auth`: authentication/authorization boundary.
//!
//! This crate is intentionally decoupled from HTTP and storage.

pub mod authorize;
pub mod claims;
pub mod password;
pub mod roles;
pub mod session;
pub mod token;
pub mod user;

pub use authorize::{AuthzError, Principal, authorize, ensure_owner, ensure_owner_or_banker};
pub use claims::{TokenClaims, TokenValidationError, validate_claims};
pub use password::{PasswordError, check_password, hash_password};
pub use roles::Role;
pub use session::{NewSession, Session, SessionError};
pub use token::{Hs256TokenMaker, TokenError, TokenMaker};
pub use user::{NewUser, UpdateUser, User};
