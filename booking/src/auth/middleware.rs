//! Axum extractors for authenticated routes.
//!
//! ```ignore
//! async fn confirm(user: AuthUser, Path(reference): Path<String>) -> WebResult<...>
//! async fn add_flight(admin: RequireAdmin, Json(body): Json<NewFlightRequest>) -> WebResult<...>
//! ```
//!
//! Both read the verifier from the router state through [`FromRef`].

use super::{AuthError, JwtIssuer};
use crate::types::{UserId, UserRole};
use axum::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use flight_booking_core::environment::Clock;
use flight_booking_web::{AppError, BearerToken};
use std::sync::Arc;

/// Verifies bearer tokens against the issuer and clock.
#[derive(Clone)]
pub struct TokenVerifier {
    issuer: Arc<JwtIssuer>,
    clock: Arc<dyn Clock>,
}

impl TokenVerifier {
    /// Verifier for tokens signed by `issuer`.
    #[must_use]
    pub fn new(issuer: Arc<JwtIssuer>, clock: Arc<dyn Clock>) -> Self {
        Self { issuer, clock }
    }

    /// Resolve a token to the user it was issued for.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidToken`] if the token does not verify.
    pub fn authenticate(&self, token: &str) -> Result<AuthUser, AuthError> {
        let claims = self.issuer.verify(token, self.clock.now())?;
        Ok(AuthUser {
            user_id: claims.user_id()?,
            role: claims.role()?,
            username: claims.unique_name,
            email: claims.email,
        })
    }
}

/// The caller of an authenticated route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    /// Account id
    pub user_id: UserId,
    /// Login name
    pub username: String,
    /// Email
    pub email: String,
    /// Role
    pub role: UserRole,
}

impl AuthUser {
    /// Whether the caller is an admin.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    TokenVerifier: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let BearerToken(token) = BearerToken::from_request_parts(parts, state).await?;
        TokenVerifier::from_ref(state)
            .authenticate(&token)
            .map_err(|e| {
                tracing::debug!(error = %e, "Rejected bearer token");
                AppError::unauthorized("Invalid or expired token")
            })
    }
}

/// An authenticated caller with the `Admin` role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequireAdmin(pub AuthUser);

#[async_trait]
impl<S> FromRequestParts<S> for RequireAdmin
where
    S: Send + Sync,
    TokenVerifier: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            tracing::warn!(user_id = %user.user_id, "Admin route refused");
            return Err(AppError::forbidden("Admin role required"));
        }
        Ok(Self(user))
    }
}
