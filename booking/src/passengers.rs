//! Passenger registration and profile maintenance.

use crate::aggregates::Passenger;
use crate::error::{DomainError, ServiceError};
use crate::events::{EventContext, PassengerEvent, serialize_all};
use crate::repository::{PassengerRepository, Repositories};
use crate::types::{PassengerId, PassengerProfile};
use chrono::{DateTime, Utc};
use flight_booking_core::aggregate::Events;
use flight_booking_core::environment::Clock;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::info;

/// Passenger operations.
#[derive(Clone)]
pub struct PassengerService {
    passengers: Arc<dyn PassengerRepository>,
    relay: Option<Arc<Notify>>,
    clock: Arc<dyn Clock>,
}

impl PassengerService {
    /// Service over the store's passenger repository.
    #[must_use]
    pub fn new(repos: &Repositories, clock: Arc<dyn Clock>) -> Self {
        Self {
            passengers: repos.passengers.clone(),
            relay: None,
            clock,
        }
    }

    /// Wake this relay after every write.
    #[must_use]
    pub fn with_relay(mut self, notify: Arc<Notify>) -> Self {
        self.relay = Some(notify);
        self
    }

    /// Register a new passenger.
    ///
    /// # Errors
    ///
    /// [`DomainError::Validation`] for an incomplete profile,
    /// [`DomainError::StateConflict`] if the passport number or email is
    /// already registered.
    pub async fn register_passenger(
        &self,
        profile: PassengerProfile,
        context: &EventContext,
    ) -> Result<Passenger, ServiceError> {
        let now = self.clock.now();
        let (passenger, events) = Passenger::register(profile, now)?;

        if self.find_by_passport(passenger.passport_number()).await?.is_some() {
            return Err(DomainError::conflict("Passport number is already registered").into());
        }
        if self.find_by_email(passenger.email()).await?.is_some() {
            return Err(DomainError::conflict("Email is already registered").into());
        }

        let serialized = serialize_all(&events, &passenger.id().to_string(), context, now)?;
        self.passengers
            .insert(&passenger, &serialized)
            .await
            .map_err(|e| {
                ServiceError::conflict_on_duplicate(e, || "Passenger is already registered".to_string())
            })?;
        self.wake_relay();

        info!(passenger_id = %passenger.id(), "Passenger registered");
        Ok(passenger)
    }

    /// Passenger by id.
    ///
    /// # Errors
    ///
    /// [`DomainError::NotFound`] for an unknown id.
    pub async fn get_passenger(&self, id: PassengerId) -> Result<Passenger, ServiceError> {
        self.passengers
            .get(id)
            .await?
            .ok_or_else(|| DomainError::not_found("Passenger", id).into())
    }

    /// Passenger holding this passport, if any.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Repository`] if the store fails.
    pub async fn find_by_passport(&self, passport_number: &str) -> Result<Option<Passenger>, ServiceError> {
        Ok(self.passengers.find_by_passport(passport_number.trim()).await?)
    }

    /// Passenger with this email, if any.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Repository`] if the store fails.
    pub async fn find_by_email(&self, email: &str) -> Result<Option<Passenger>, ServiceError> {
        Ok(self.passengers.find_by_email(email.trim()).await?)
    }

    /// Passengers whose first or last name contains `query`.
    ///
    /// # Errors
    ///
    /// [`DomainError::Validation`] for a blank query.
    pub async fn search_by_name(&self, query: &str) -> Result<Vec<Passenger>, ServiceError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(DomainError::validation("Search query is required").into());
        }
        Ok(self.passengers.search_by_name(query).await?)
    }

    /// Replace email and phone.
    ///
    /// # Errors
    ///
    /// [`DomainError::NotFound`] for an unknown id,
    /// [`DomainError::StateConflict`] if the email belongs to someone else.
    pub async fn update_contact_info(
        &self,
        id: PassengerId,
        email: &str,
        phone: &str,
        context: &EventContext,
    ) -> Result<Passenger, ServiceError> {
        if let Some(other) = self.find_by_email(email).await? {
            if other.id() != id {
                return Err(DomainError::conflict("Email is already registered to another passenger").into());
            }
        }
        self.mutate(id, context, |passenger, now| {
            passenger.update_contact_info(email, phone, now)
        })
        .await
    }

    /// Replace the travel document.
    ///
    /// # Errors
    ///
    /// [`DomainError::NotFound`] for an unknown id,
    /// [`DomainError::Validation`] for an expired document,
    /// [`DomainError::StateConflict`] if the passport belongs to someone else.
    pub async fn update_passport_info(
        &self,
        id: PassengerId,
        number: &str,
        country: &str,
        expiry: DateTime<Utc>,
        context: &EventContext,
    ) -> Result<Passenger, ServiceError> {
        if let Some(other) = self.find_by_passport(number).await? {
            if other.id() != id {
                return Err(DomainError::conflict("Passport number is already registered to another passenger").into());
            }
        }
        self.mutate(id, context, |passenger, now| {
            passenger.update_passport_info(number, country, expiry, now)
        })
        .await
    }

    async fn mutate<F>(
        &self,
        id: PassengerId,
        context: &EventContext,
        command: F,
    ) -> Result<Passenger, ServiceError>
    where
        F: FnOnce(&mut Passenger, DateTime<Utc>) -> Result<Events<PassengerEvent>, DomainError>,
    {
        let mut passenger = self.get_passenger(id).await?;
        let now = self.clock.now();
        let events = command(&mut passenger, now)?;
        let serialized = serialize_all(&events, &id.to_string(), context, now)?;
        self.passengers
            .update(&passenger, &serialized)
            .await
            .map_err(|e| {
                ServiceError::conflict_on_duplicate(e, || "Passport number or email is already registered".to_string())
            })?;
        self.wake_relay();

        info!(passenger_id = %id, "Passenger updated");
        Ok(passenger)
    }

    fn wake_relay(&self) {
        if let Some(notify) = &self.relay {
            notify.notify_one();
        }
    }
}
