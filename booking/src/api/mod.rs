//! HTTP API handlers, grouped by resource:
//! - Auth: login
//! - Airports: public listing, admin maintenance
//! - Flights: search and lookup, admin scheduling, status and price
//! - Bookings: lifecycle commands and queries
//! - Passengers: registration, profile updates, a passenger's bookings
//!
//! Service errors are turned into [`AppError`] here so every handler can use
//! `?` on a service call.

pub mod airports;
pub mod auth;
pub mod bookings;
pub mod flights;
pub mod passengers;

use crate::auth::{AuthError, AuthUser};
use crate::error::{DomainError, ServiceError};
use crate::events::EventContext;
use crate::repository::RepositoryError;
use crate::types::Money;
use flight_booking_web::{AppError, CorrelationId};

/// Error code of a booking that asks for more seats than are left.
pub const CAPACITY_EXCEEDED: &str = "CAPACITY_EXCEEDED";

impl From<DomainError> for AppError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(message) => Self::validation(message),
            DomainError::NotFound { resource, id } => Self::not_found(resource, id),
            DomainError::StateConflict(message) => Self::conflict(message),
            capacity @ DomainError::Capacity { .. } => {
                Self::conflict(capacity.to_string()).with_code(CAPACITY_EXCEEDED)
            }
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Domain(e) => e.into(),
            ServiceError::Repository(RepositoryError::Duplicate(key)) => {
                Self::conflict(format!("Duplicate {key}"))
            }
            ServiceError::Repository(RepositoryError::NotFound { resource, id }) => {
                Self::not_found(resource, id)
            }
            other => Self::internal("Internal server error").with_source(anyhow::Error::new(other)),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Validation(message) => Self::validation(message),
            AuthError::InvalidCredentials | AuthError::InvalidToken(_) => {
                Self::unauthorized(err.to_string())
            }
            AuthError::AccountDisabled | AuthError::Forbidden => Self::forbidden(err.to_string()),
            AuthError::RateLimited => Self::too_many_requests(err.to_string()),
            AuthError::Domain(e) => e.into(),
            AuthError::Repository(RepositoryError::Duplicate(key)) => {
                Self::conflict(format!("Duplicate {key}"))
            }
            other => Self::internal("Internal server error").with_source(anyhow::Error::new(other)),
        }
    }
}

/// Event context for a command issued by `user` in request `correlation_id`.
pub(crate) fn context(correlation_id: CorrelationId, user: &AuthUser) -> EventContext {
    EventContext::correlated(correlation_id.0.to_string()).with_user(user.user_id.to_string())
}

/// Convert a decimal amount from a request body.
pub(crate) fn money(field: &str, amount: f64) -> Result<Money, AppError> {
    Money::try_from_decimal(amount).map_err(|e| AppError::validation(format!("{field}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn domain_errors_map_to_statuses() {
        let cases = [
            (DomainError::validation("bad"), StatusCode::UNPROCESSABLE_ENTITY),
            (DomainError::not_found("Flight", "x"), StatusCode::NOT_FOUND),
            (DomainError::conflict("no"), StatusCode::CONFLICT),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status(), status);
        }
    }

    #[test]
    fn capacity_has_its_own_code() {
        let err = AppError::from(DomainError::Capacity {
            requested: 3,
            available: 1,
        });
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.code(), CAPACITY_EXCEEDED);
    }

    #[test]
    fn store_failures_are_internal() {
        let err = AppError::from(ServiceError::Repository(RepositoryError::Database(
            "connection reset".to_string(),
        )));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.message().contains("connection reset"));
    }

    #[test]
    fn auth_errors_map_to_statuses() {
        assert_eq!(AppError::from(AuthError::InvalidCredentials).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::from(AuthError::Forbidden).status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::from(AuthError::RateLimited).status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
