use core::str::FromStr;

use serde::{Deserialize, Serialize};

/// Role identifier used for RBAC.
///
/// Depositors own accounts and move their own money. Bankers can act on
/// other users' accounts (listing, deleting, balance adjustments).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Depositor,
    Banker,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Depositor => "depositor",
            Role::Banker => "banker",
        }
    }

    pub fn is_banker(&self) -> bool {
        matches!(self, Role::Banker)
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "depositor" => Ok(Role::Depositor),
            "banker" => Ok(Role::Banker),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}
