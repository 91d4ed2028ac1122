//! Role model and the role hierarchy

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Portal role, totally ordered from least to most privileged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Guest,
    Client,
    Employee,
    Admin,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Guest, Role::Client, Role::Employee, Role::Admin];

    /// Position in the hierarchy: guest(0) < client(1) < employee(2) < admin(3)
    pub fn level(self) -> u8 {
        match self {
            Role::Guest => 0,
            Role::Client => 1,
            Role::Employee => 2,
            Role::Admin => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Guest => "guest",
            Role::Client => "client",
            Role::Employee => "employee",
            Role::Admin => "admin",
        }
    }

    /// True when this role ranks at or above `minimum`
    pub fn at_least(self, minimum: Role) -> bool {
        self.level() >= minimum.level()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned for role names outside the hierarchy
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "guest" => Ok(Role::Guest),
            "client" => Ok(Role::Client),
            "employee" => Ok(Role::Employee),
            "admin" => Ok(Role::Admin),
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hierarchy_is_totally_ordered() {
        let levels: Vec<u8> = Role::ALL.iter().map(|r| r.level()).collect();
        assert_eq!(levels, vec![0, 1, 2, 3]);
        assert!(Role::Admin.at_least(Role::Employee));
        assert!(Role::Client.at_least(Role::Client));
        assert!(!Role::Guest.at_least(Role::Client));
    }

    #[test]
    fn test_parse_is_case_insensitive_and_strict() {
        assert_eq!("Admin".parse::<Role>(), Ok(Role::Admin));
        assert_eq!(" client ".parse::<Role>(), Ok(Role::Client));
        assert!("superuser".parse::<Role>().is_err());
        assert!("".parse::<Role>().is_err());
    }
}
