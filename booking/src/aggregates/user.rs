//! User accounts.

use crate::error::DomainError;
use crate::types::{UserId, UserRole, require};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An account that can log in.
///
/// The password is only ever held as an Argon2 PHC string.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub(crate) id: UserId,
    pub(crate) username: String,
    pub(crate) email: String,
    pub(crate) display_name: String,
    pub(crate) password_hash: String,
    pub(crate) role: UserRole,
    pub(crate) is_active: bool,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) last_login_at: Option<DateTime<Utc>>,
}

impl User {
    /// Create an active account.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] for a blank username, email,
    /// display name or password hash.
    pub fn new(
        username: &str,
        email: &str,
        display_name: &str,
        password_hash: String,
        role: UserRole,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        require("Username", username)?;
        require("Email", email)?;
        require("Display name", display_name)?;
        require("Password hash", &password_hash)?;
        Ok(Self {
            id: UserId::new(),
            username: username.trim().to_string(),
            email: email.trim().to_lowercase(),
            display_name: display_name.trim().to_string(),
            password_hash,
            role,
            is_active: true,
            created_at: now,
            last_login_at: None,
        })
    }

    /// Stamp a successful login.
    pub fn record_login(&mut self, now: DateTime<Utc>) {
        self.last_login_at = Some(now);
    }

    /// Block logins.
    pub fn deactivate(&mut self) {
        self.is_active = false;
    }

    /// Identifier
    #[must_use]
    pub const fn id(&self) -> UserId {
        self.id
    }

    /// Login name
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Email (lower-case)
    #[must_use]
    pub fn email(&self) -> &str {
        &self.email
    }

    /// Name shown in the UI
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Argon2 PHC string
    #[must_use]
    pub fn password_hash(&self) -> &str {
        &self.password_hash
    }

    /// Role
    #[must_use]
    pub const fn role(&self) -> UserRole {
        self.role
    }

    /// Whether the account may log in
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.is_active
    }

    /// When created
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Last successful login
    #[must_use]
    pub const fn last_login_at(&self) -> Option<DateTime<Utc>> {
        self.last_login_at
    }
}
