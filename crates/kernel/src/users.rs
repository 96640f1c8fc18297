//! User directory.
//!
//! The gate only needs to look users up by id (per request) and by email (at
//! login). [`UserDirectory`] is that seam; the backing store is whatever the
//! deployment provides. [`MemoryUserDirectory`] is loaded from a TOML file:
//!
//! ```toml
//! [[users]]
//! id = "0193e1c2-7a51-7c0b-9d1e-5f8a2b3c4d5e"
//! email = "admin@kafkasder.org"
//! name = "Panel Admin"
//! role = "SUPER_ADMIN"
//! permissions = ["beneficiaries:access", "donations:access"]
//! password_hash = "$argon2id$v=19$..."
//! ```

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{info, warn};

use crate::models::UserRecord;

/// Lookup interface over the user store.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Find a user by ID.
    async fn find_by_id(&self, id: &str) -> Result<Option<UserRecord>>;

    /// Find a user by email, case-insensitively.
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>>;

    /// Number of known users (for health reporting).
    async fn count(&self) -> Result<usize>;
}

#[derive(Debug, Deserialize)]
struct UsersFile {
    #[serde(default)]
    users: Vec<UserRecord>,
}

/// In-memory user directory.
#[derive(Debug, Default)]
pub struct MemoryUserDirectory {
    users: RwLock<HashMap<String, UserRecord>>,
}

impl MemoryUserDirectory {
    /// Create a directory from records. Fails on duplicate ids or emails.
    pub fn new(records: Vec<UserRecord>) -> Result<Self> {
        let directory = Self::default();
        for record in records {
            directory.insert(record)?;
        }
        Ok(directory)
    }

    /// Parse a directory from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: UsersFile = toml::from_str(text).context("failed to parse users file")?;
        Self::new(file.users)
    }

    /// Load the directory from a TOML file.
    ///
    /// A missing file yields an empty directory so the server can still start
    /// (nobody will be able to log in).
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "users file not found; user directory is empty");
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read users file {}", path.display()))?;
        let directory = Self::from_toml_str(&text)
            .with_context(|| format!("invalid users file {}", path.display()))?;

        info!(path = %path.display(), users = directory.len(), "user directory loaded");
        Ok(directory)
    }

    /// Add a user.
    pub fn insert(&self, record: UserRecord) -> Result<()> {
        let mut users = self.users.write();
        if users.contains_key(&record.id) {
            bail!("duplicate user id '{}'", record.id);
        }
        if users
            .values()
            .any(|u| u.email.eq_ignore_ascii_case(&record.email))
        {
            bail!("duplicate user email '{}'", record.email);
        }
        users.insert(record.id.clone(), record);
        Ok(())
    }

    /// Activate or deactivate a user. Returns false if the id is unknown.
    pub fn set_active(&self, id: &str, active: bool) -> bool {
        match self.users.write().get_mut(id) {
            Some(user) => {
                user.is_active = active;
                true
            }
            None => false,
        }
    }

    /// Remove a user. Returns false if the id is unknown.
    pub fn remove(&self, id: &str) -> bool {
        self.users.write().remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn find_by_id(&self, id: &str) -> Result<Option<UserRecord>> {
        Ok(self.users.read().get(id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let email = email.trim();
        Ok(self
            .users
            .read()
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.len())
    }
}
