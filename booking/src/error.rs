//! Business-rule violations raised by the domain, and the errors of the
//! application services built on it.
//!
//! [`DomainError`]s are never transient: retrying the same operation against
//! the same state fails the same way. [`ServiceError`] adds the
//! infrastructure failures that may be.

use crate::repository::RepositoryError;
use flight_booking_core::event::EventError;
use flight_booking_core::event_bus::EventBusError;
use thiserror::Error;

/// Errors raised by aggregates and domain services.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed input: blank required field, zero seats, future birth date, ...
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A referenced entity does not exist.
    #[error("{resource} not found: {id}")]
    NotFound {
        /// Kind of entity ("Flight", "Booking", ...)
        resource: &'static str,
        /// The identifier that was looked up
        id: String,
    },

    /// The operation is not allowed in the entity's current state.
    #[error("Invalid state: {0}")]
    StateConflict(String),

    /// Not enough seats left on the flight.
    #[error("Insufficient capacity: requested {requested}, available {available}")]
    Capacity {
        /// Seats asked for
        requested: u32,
        /// Seats that were still free
        available: u32,
    },
}

impl DomainError {
    /// Shorthand for [`DomainError::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Shorthand for [`DomainError::StateConflict`].
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::StateConflict(message.into())
    }

    /// Shorthand for [`DomainError::NotFound`].
    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }
}

/// Errors returned by the application services.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// A business rule was violated.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The store failed.
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// An event could not be encoded or decoded.
    #[error("Event serialization failed: {0}")]
    Event(#[from] EventError),

    /// A message could not be published.
    #[error("Event bus failed: {0}")]
    EventBus(#[from] EventBusError),
}

impl ServiceError {
    /// The business-rule violation, if this is one.
    #[must_use]
    pub const fn domain(&self) -> Option<&DomainError> {
        match self {
            Self::Domain(e) => Some(e),
            _ => None,
        }
    }

    /// Report a unique-key clash as [`DomainError::StateConflict`] with `message`.
    pub(crate) fn conflict_on_duplicate(
        err: RepositoryError,
        message: impl FnOnce() -> String,
    ) -> Self {
        match err {
            RepositoryError::Duplicate(_) => DomainError::conflict(message()).into(),
            other => other.into(),
        }
    }
}
