//! Login and the bootstrap admin account.

use super::password::{hash_password, verify_password};
use super::{AuthError, IssuedToken, JwtIssuer};
use crate::aggregates::User;
use crate::infra::RateLimiter;
use crate::repository::{RepositoryError, UserRepository};
use crate::types::{UserId, UserRole};
use chrono::{DateTime, Utc};
use flight_booking_core::environment::Clock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Public view of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserSummary {
    /// Identifier
    pub id: UserId,
    /// Login name
    pub username: String,
    /// Email
    pub email: String,
    /// Display name
    pub display_name: String,
    /// Role name
    pub role: String,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id(),
            username: user.username().to_string(),
            email: user.email().to_string(),
            display_name: user.display_name().to_string(),
            role: user.role().as_str().to_string(),
        }
    }
}

/// Successful login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginResponse {
    /// Signed JWT
    pub access_token: String,
    /// Always `Bearer`
    pub token_type: String,
    /// Lifetime in seconds
    pub expires_in: i64,
    /// Expiry instant
    pub expires_at: DateTime<Utc>,
    /// The logged-in user
    pub user: UserSummary,
}

/// Login attempts allowed per username and window.
#[derive(Debug, Clone, Copy)]
pub struct LoginRateLimit {
    /// Attempts per window
    pub limit: u32,
    /// Window length
    pub window: Duration,
}

impl Default for LoginRateLimit {
    fn default() -> Self {
        Self {
            limit: 10,
            window: Duration::from_secs(60),
        }
    }
}

/// Authenticates users and issues tokens.
#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserRepository>,
    issuer: Arc<JwtIssuer>,
    rate_limiter: Arc<dyn RateLimiter>,
    rate_limit: LoginRateLimit,
    clock: Arc<dyn Clock>,
}

impl AuthService {
    /// Service with the default login rate limit.
    #[must_use]
    pub fn new(
        users: Arc<dyn UserRepository>,
        issuer: Arc<JwtIssuer>,
        rate_limiter: Arc<dyn RateLimiter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            users,
            issuer,
            rate_limiter,
            rate_limit: LoginRateLimit::default(),
            clock,
        }
    }

    /// Override the login rate limit.
    #[must_use]
    pub const fn with_rate_limit(mut self, rate_limit: LoginRateLimit) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// Token verifier shared with the extractors.
    #[must_use]
    pub fn issuer(&self) -> Arc<JwtIssuer> {
        Arc::clone(&self.issuer)
    }

    /// Log in by username or email.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Validation`] for blank input
    /// - [`AuthError::RateLimited`] after too many attempts for this login
    /// - [`AuthError::InvalidCredentials`] for an unknown user or wrong password
    /// - [`AuthError::AccountDisabled`] for an inactive account
    #[tracing::instrument(skip(self, password), fields(login = %login.trim()))]
    pub async fn login(&self, login: &str, password: &str) -> Result<LoginResponse, AuthError> {
        let login = login.trim();
        if login.is_empty() || password.is_empty() {
            return Err(AuthError::Validation(
                "Username and password are required".to_string(),
            ));
        }

        let rate_key = format!("login:{}", login.to_lowercase());
        if !self
            .rate_limiter
            .is_allowed(&rate_key, self.rate_limit.limit, self.rate_limit.window)
            .await?
        {
            warn!("Login rate limited");
            return Err(AuthError::RateLimited);
        }

        let Some(mut user) = self.users.find_by_login(login).await? else {
            warn!("Login for unknown user");
            return Err(AuthError::InvalidCredentials);
        };
        if !verify_password(password, user.password_hash()) {
            warn!(user_id = %user.id(), "Login with wrong password");
            return Err(AuthError::InvalidCredentials);
        }
        if !user.is_active() {
            warn!(user_id = %user.id(), "Login to disabled account");
            return Err(AuthError::AccountDisabled);
        }

        let now = self.clock.now();
        user.record_login(now);
        self.users.update(&user).await?;

        let IssuedToken {
            token,
            expires_at,
            expires_in,
        } = self.issuer.issue(&user, now)?;
        info!(user_id = %user.id(), role = user.role().as_str(), "User logged in");

        Ok(LoginResponse {
            access_token: token,
            token_type: "Bearer".to_string(),
            expires_in,
            expires_at,
            user: UserSummary::from(&user),
        })
    }

    /// Create a user account with a hashed password.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Domain`] for blank fields and
    /// [`AuthError::Repository`] for a taken username or email.
    pub async fn register_user(
        &self,
        username: &str,
        email: &str,
        display_name: &str,
        password: &str,
        role: UserRole,
    ) -> Result<User, AuthError> {
        if password.len() < 8 {
            return Err(AuthError::Validation(
                "Password must be at least 8 characters".to_string(),
            ));
        }
        let user = User::new(
            username,
            email,
            display_name,
            hash_password(password)?,
            role,
            self.clock.now(),
        )?;
        self.users.insert(&user).await?;
        info!(user_id = %user.id(), role = role.as_str(), "User registered");
        Ok(user)
    }

    /// Seed the bootstrap admin unless an admin already exists.
    /// Returns whether an account was created.
    ///
    /// # Errors
    ///
    /// Same as [`Self::register_user`]; a concurrent seed that loses the
    /// race is not an error.
    pub async fn ensure_admin(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<bool, AuthError> {
        if self.users.any_admin().await? {
            return Ok(false);
        }
        match self
            .register_user(username, email, "Administrator", password, UserRole::Admin)
            .await
        {
            Ok(_) => Ok(true),
            Err(AuthError::Repository(RepositoryError::Duplicate(_))) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
