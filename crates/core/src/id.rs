//! Strongly-typed identifiers used across the domain.
//!
//! Rows are keyed by database-assigned `BIGSERIAL` values, so identifiers wrap
//! an `i64`. They are totally ordered: the transfer engine relies on that order
//! to lock account rows consistently.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Identifier of an account row.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(i64);

/// Identifier of a ledger entry row.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(i64);

/// Identifier of a transfer row.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(i64);

macro_rules! impl_i64_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Wrap a raw identifier. Caller is responsible for positivity;
            /// use [`Self::parse_positive`] for untrusted input.
            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }

            /// Validate that a client-supplied identifier is positive.
            pub fn parse_positive(raw: i64) -> Result<Self, DomainError> {
                if raw <= 0 {
                    return Err(DomainError::invalid_id(format!(
                        "{}: must be a positive integer (got {})",
                        $name, raw
                    )));
                }
                Ok(Self(raw))
            }

            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<$t> for i64 {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let raw = i64::from_str(s)
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Self::parse_positive(raw)
            }
        }
    };
}

impl_i64_newtype!(AccountId, "AccountId");
impl_i64_newtype!(EntryId, "EntryId");
impl_i64_newtype!(TransferId, "TransferId");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_positive_ids() {
        let id: AccountId = "42".parse().unwrap();
        assert_eq!(id.get(), 42);
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn rejects_zero_and_negative() {
        assert!(matches!("0".parse::<AccountId>(), Err(DomainError::InvalidId(_))));
        assert!(matches!(TransferId::parse_positive(-3), Err(DomainError::InvalidId(_))));
    }

    #[test]
    fn rejects_garbage() {
        let err = "abc".parse::<EntryId>().unwrap_err();
        assert!(err.to_string().contains("EntryId"));
    }

    #[test]
    fn ordering_follows_raw_value() {
        assert!(AccountId::new(1) < AccountId::new(2));
        assert_eq!(AccountId::new(7).max(AccountId::new(3)), AccountId::new(7));
    }

    #[test]
    fn serializes_transparently() {
        let json = serde_json::to_string(&AccountId::new(9)).unwrap();
        assert_eq!(json, "9");
        let back: AccountId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, AccountId::new(9));
    }
}
