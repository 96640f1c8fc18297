//! User roles.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A user's role.
///
/// Only the two admin tiers carry meaning for access decisions; every other
/// role is kept by name for display.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    SuperAdmin,
    Admin,
    Named(String),
}

impl Role {
    /// Whether this role belongs to the admin tier (`ADMIN` or `SUPER_ADMIN`).
    pub fn is_admin_tier(&self) -> bool {
        matches!(self, Role::SuperAdmin | Role::Admin)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Role::SuperAdmin => "SUPER_ADMIN",
            Role::Admin => "ADMIN",
            Role::Named(name) => name,
        }
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        let normalized = value.trim().to_uppercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "SUPER_ADMIN" | "SUPERADMIN" => Role::SuperAdmin,
            "ADMIN" => Role::Admin,
            _ => Role::Named(value),
        }
    }
}

impl From<&str> for Role {
    fn from(value: &str) -> Self {
        Role::from(value.to_string())
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
