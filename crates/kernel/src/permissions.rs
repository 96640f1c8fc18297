//! Capability resolution.
//!
//! The single place that decides whether a user may enter a module. Role
//! bypass is never implicit: an admin-tier role only substitutes for the
//! permission string on modules that declare [`ModuleKey::admin_bypass`].

use serde::Serialize;

use crate::models::{AuthUser, ModuleKey};

/// How an access decision was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    /// The user holds the module's permission string.
    Permission,
    /// The module allows admin-tier roles and the user has one.
    RoleBypass,
    Denied,
}

impl Access {
    pub fn is_granted(self) -> bool {
        !matches!(self, Access::Denied)
    }
}

/// Decide whether `user` may access `module`.
pub fn resolve_access(user: &AuthUser, module: ModuleKey) -> Access {
    if user.has_permission(module.permission()) {
        Access::Permission
    } else if module.admin_bypass() && user.role.is_admin_tier() {
        Access::RoleBypass
    } else {
        Access::Denied
    }
}

/// Every module `user` may enter, for navigation menus.
pub fn accessible_modules(user: &AuthUser) -> Vec<ModuleKey> {
    ModuleKey::ALL
        .into_iter()
        .filter(|m| resolve_access(user, *m).is_granted())
        .collect()
}
