//! Panel modules that access checks are keyed on.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

/// A panel module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModuleKey {
    Beneficiaries,
    Donations,
    Scholarships,
    Meetings,
    Tasks,
    Messages,
    Finance,
    Reports,
    Users,
    Audit,
    Settings,
    Branding,
    UserBatch,
    #[serde(rename = "whatsapp-admin")]
    WhatsAppAdmin,
}

impl ModuleKey {
    pub const ALL: [ModuleKey; 14] = [
        ModuleKey::Beneficiaries,
        ModuleKey::Donations,
        ModuleKey::Scholarships,
        ModuleKey::Meetings,
        ModuleKey::Tasks,
        ModuleKey::Messages,
        ModuleKey::Finance,
        ModuleKey::Reports,
        ModuleKey::Users,
        ModuleKey::Audit,
        ModuleKey::Settings,
        ModuleKey::Branding,
        ModuleKey::UserBatch,
        ModuleKey::WhatsAppAdmin,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ModuleKey::Beneficiaries => "beneficiaries",
            ModuleKey::Donations => "donations",
            ModuleKey::Scholarships => "scholarships",
            ModuleKey::Meetings => "meetings",
            ModuleKey::Tasks => "tasks",
            ModuleKey::Messages => "messages",
            ModuleKey::Finance => "finance",
            ModuleKey::Reports => "reports",
            ModuleKey::Users => "users",
            ModuleKey::Audit => "audit",
            ModuleKey::Settings => "settings",
            ModuleKey::Branding => "branding",
            ModuleKey::UserBatch => "user-batch",
            ModuleKey::WhatsAppAdmin => "whatsapp-admin",
        }
    }

    /// Permission string a user needs for this module.
    pub fn permission(self) -> &'static str {
        match self {
            ModuleKey::Beneficiaries => "beneficiaries:access",
            ModuleKey::Donations => "donations:access",
            ModuleKey::Scholarships => "scholarships:access",
            ModuleKey::Meetings => "meetings:access",
            ModuleKey::Tasks => "tasks:access",
            ModuleKey::Messages => "messages:access",
            ModuleKey::Finance => "finance:access",
            ModuleKey::Reports => "reports:access",
            ModuleKey::Users => "users:manage",
            ModuleKey::Audit => "audit:view",
            ModuleKey::Settings => "settings:manage",
            ModuleKey::Branding => "branding:manage",
            ModuleKey::UserBatch => "users:batch",
            ModuleKey::WhatsAppAdmin => "whatsapp:admin",
        }
    }

    /// Modules an admin-tier role may enter without the exact permission.
    pub fn admin_bypass(self) -> bool {
        matches!(
            self,
            ModuleKey::Audit
                | ModuleKey::Settings
                | ModuleKey::Branding
                | ModuleKey::UserBatch
                | ModuleKey::WhatsAppAdmin
        )
    }
}

impl fmt::Display for ModuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown module '{0}'")]
pub struct UnknownModule(pub String);

impl FromStr for ModuleKey {
    type Err = UnknownModule;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase();
        ModuleKey::ALL
            .into_iter()
            .find(|m| m.as_str() == key)
            .ok_or_else(|| UnknownModule(s.to_string()))
    }
}
