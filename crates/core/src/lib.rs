//! `ferrobank-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod currency;
pub mod error;
pub mod id;
pub mod validation;

pub use currency::Currency;
pub use error::{DomainError, DomainResult};
pub use id::{AccountId, EntryId, TransferId};
pub use validation::{FieldViolation, Violations};
