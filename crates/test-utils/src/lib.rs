//! KafkasDer test utilities.
//!
//! Helpers for integration testing: user fixtures and assertion utilities
//! for the JSON envelopes the kernel returns.

use serde_json::{Value as JsonValue, json};
use uuid::Uuid;

/// Password every fixture user gets unless overridden.
pub const DEFAULT_PASSWORD: &str = "correct horse battery staple";

/// Create an active test user holding `permissions`.
pub fn test_user(permissions: &[&str]) -> TestUser {
    let id = Uuid::now_v7();
    TestUser {
        id,
        email: format!("user-{}@kafkasder.org", id.simple()),
        name: "Test User".to_string(),
        role: "MEMBER".to_string(),
        permissions: permissions.iter().map(|s| s.to_string()).collect(),
        is_active: true,
        password: DEFAULT_PASSWORD.to_string(),
    }
}

/// Create an admin test user with no explicit permissions.
pub fn admin_user() -> TestUser {
    test_user(&[]).with_role("ADMIN").with_name("Panel Admin")
}

/// A test user builder.
#[derive(Debug, Clone)]
pub struct TestUser {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: String,
    pub permissions: Vec<String>,
    pub is_active: bool,
    /// Plaintext password; the kernel test harness hashes it.
    pub password: String,
}

impl TestUser {
    /// Set a custom ID.
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn with_email(mut self, email: &str) -> Self {
        self.email = email.to_string();
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_role(mut self, role: &str) -> Self {
        self.role = role.to_string();
        self
    }

    /// Add a permission.
    pub fn with_permission(mut self, perm: &str) -> Self {
        self.permissions.push(perm.to_string());
        self
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.password = password.to_string();
        self
    }

    /// Mark the account as deactivated.
    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Check if user has permission.
    pub fn has_permission(&self, perm: &str) -> bool {
        self.permissions.iter().any(|p| p == perm)
    }

    /// The users-file record for this user, with the given password hash.
    pub fn to_record_json(&self, password_hash: &str) -> JsonValue {
        json!({
            "id": self.id.to_string(),
            "email": self.email,
            "name": self.name,
            "role": self.role,
            "permissions": self.permissions,
            "is_active": self.is_active,
            "password_hash": password_hash,
        })
    }

    /// Login request body with this user's credentials.
    pub fn login_body(&self) -> JsonValue {
        json!({ "email": self.email, "password": self.password })
    }
}

/// Assertion helpers for JSON envelopes.
pub mod assert {
    use serde_json::Value;

    /// Assert that a JSON value has a specific key.
    pub fn has_key(value: &Value, key: &str) {
        assert!(
            value.get(key).is_some(),
            "Expected JSON to have key '{key}', got: {value}"
        );
    }

    /// Assert a success envelope: `{success: true, ...}`.
    pub fn success(value: &Value) {
        assert_eq!(
            value.get("success"),
            Some(&Value::Bool(true)),
            "Expected success envelope, got: {value:#}"
        );
    }

    /// Assert an error envelope: `{success: false, error}`.
    pub fn failure(value: &Value) {
        assert_eq!(
            value.get("success"),
            Some(&Value::Bool(false)),
            "Expected error envelope, got: {value:#}"
        );
        has_key(value, "error");
    }

    /// Assert that a string contains a substring.
    pub fn contains(haystack: &str, needle: &str) {
        assert!(
            haystack.contains(needle),
            "Expected string to contain '{needle}'\nActual: {haystack}"
        );
    }
}
