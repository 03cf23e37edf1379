//! Authentication: password hashing, JWT issuance and the axum extractors
//! that guard the API.

pub mod jwt;
pub mod middleware;
pub mod password;
pub mod service;

pub use jwt::{Claims, IssuedToken, JwtIssuer, JwtSettings};
pub use middleware::{AuthUser, RequireAdmin, TokenVerifier};
pub use service::{AuthService, LoginRateLimit, LoginResponse, UserSummary};

use crate::error::DomainError;
use crate::infra::CacheError;
use crate::repository::RepositoryError;
use thiserror::Error;

/// Authentication and authorisation failures.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Blank or malformed input.
    #[error("{0}")]
    Validation(String),

    /// Unknown user or wrong password; deliberately not told apart.
    #[error("Invalid username or password")]
    InvalidCredentials,

    /// The account exists but may not log in.
    #[error("Account is disabled")]
    AccountDisabled,

    /// Too many login attempts for this user.
    #[error("Too many login attempts, try again later")]
    RateLimited,

    /// Missing, malformed, expired or forged token.
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Authenticated but not allowed.
    #[error("Insufficient permissions")]
    Forbidden,

    /// Password hashing or token signing failed.
    #[error("Credential processing failed: {0}")]
    Crypto(String),

    /// The user store failed.
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// The rate limiter backend failed.
    #[error(transparent)]
    RateLimiter(#[from] CacheError),

    /// A user record could not be created.
    #[error(transparent)]
    Domain(#[from] DomainError),
}
