//! Persistence ports for the aggregates.
//!
//! Every write that changes an aggregate takes the events it raised, already
//! serialized, and stores them in the outbox in the same unit of work. The
//! [`OutboxRelay`](crate::dispatch::OutboxRelay) publishes them afterwards.
//!
//! Two implementations:
//!
//! - [`memory::InMemoryStore`]: one lock around everything; tests and
//!   single-process runs
//! - [`postgres::PostgresStore`]: one transaction per write; production

pub mod memory;
pub mod postgres;

use crate::aggregates::{Airport, Flight, FlightBooking, Passenger, User};
use crate::types::{AirportCode, BookingReference, FlightId, PassengerId, UserId};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use flight_booking_core::event::SerializedEvent;
use flight_booking_core::outbox::Outbox;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by repositories.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// The backing store failed.
    #[error("Database error: {0}")]
    Database(String),

    /// A unique key is already taken.
    #[error("Duplicate {0}")]
    Duplicate(String),

    /// The row to update does not exist.
    #[error("{resource} not found: {id}")]
    NotFound {
        /// Kind of entity
        resource: &'static str,
        /// Identifier looked up
        id: String,
    },

    /// The row changed since it was loaded.
    #[error("{resource} {id} was modified concurrently")]
    Stale {
        /// Kind of entity
        resource: &'static str,
        /// Identifier of the row
        id: String,
    },

    /// A stored row could not be turned back into an aggregate.
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            if db.is_unique_violation() {
                return Self::Duplicate(db.constraint().unwrap_or("key").to_string());
            }
        }
        Self::Database(err.to_string())
    }
}

/// Repository result.
pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Airports. No events.
#[async_trait]
pub trait AirportRepository: Send + Sync {
    /// Airport by code.
    async fn get(&self, code: &AirportCode) -> Result<Option<Airport>>;

    /// Active airports ordered by code.
    async fn list_active(&self) -> Result<Vec<Airport>>;

    /// Add an airport; [`RepositoryError::Duplicate`] if the code is taken.
    async fn insert(&self, airport: &Airport) -> Result<()>;

    /// Overwrite an existing airport.
    async fn update(&self, airport: &Airport) -> Result<()>;
}

/// Flights and their seat inventory.
#[async_trait]
pub trait FlightRepository: Send + Sync {
    /// Flight by id.
    async fn get(&self, id: FlightId) -> Result<Option<Flight>>;

    /// Add a flight.
    async fn insert(&self, flight: &Flight, events: &[SerializedEvent]) -> Result<()>;

    /// Persist status, price and schedule. Seat counts are left alone; they
    /// only change through [`Self::reserve_seats`] and [`Self::release_seats`].
    async fn update_details(&self, flight: &Flight, events: &[SerializedEvent]) -> Result<()>;

    /// Whether a flight with this number already departs on `date`.
    async fn exists_on_date(&self, flight_number: &str, date: NaiveDate) -> Result<bool>;

    /// Scheduled flights between two airports departing on `date` with at
    /// least `seats` seats left, ordered by departure time.
    async fn search(
        &self,
        from: &AirportCode,
        to: &AirportCode,
        date: NaiveDate,
        seats: u32,
    ) -> Result<Vec<Flight>>;

    /// Atomically take `seats` seats if the flight is `Scheduled` and has that
    /// many left. Returns `false` (and changes nothing) otherwise.
    async fn reserve_seats(&self, id: FlightId, seats: u32, now: DateTime<Utc>) -> Result<bool>;

    /// Give seats back, capped at the flight's total.
    async fn release_seats(&self, id: FlightId, seats: u32, now: DateTime<Utc>) -> Result<()>;

    /// Delete flights that arrived before `cutoff` and hold no active booking,
    /// together with their cancelled bookings. Returns how many flights were
    /// deleted.
    async fn delete_arrived_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// Passengers.
#[async_trait]
pub trait PassengerRepository: Send + Sync {
    /// Passenger by id.
    async fn get(&self, id: PassengerId) -> Result<Option<Passenger>>;

    /// Passenger by passport number (case-insensitive).
    async fn find_by_passport(&self, passport_number: &str) -> Result<Option<Passenger>>;

    /// Passenger by email (case-insensitive).
    async fn find_by_email(&self, email: &str) -> Result<Option<Passenger>>;

    /// Passengers whose first or last name contains `query` (case-insensitive).
    async fn search_by_name(&self, query: &str) -> Result<Vec<Passenger>>;

    /// Add a passenger; [`RepositoryError::Duplicate`] on a taken passport or email.
    async fn insert(&self, passenger: &Passenger, events: &[SerializedEvent]) -> Result<()>;

    /// Overwrite an existing passenger.
    async fn update(&self, passenger: &Passenger, events: &[SerializedEvent]) -> Result<()>;
}

/// Bookings.
#[async_trait]
pub trait BookingRepository: Send + Sync {
    /// Booking by reference.
    async fn get_by_reference(&self, reference: &BookingReference)
    -> Result<Option<FlightBooking>>;

    /// Whether the reference is already used.
    async fn reference_exists(&self, reference: &BookingReference) -> Result<bool>;

    /// A passenger's bookings, newest first.
    async fn list_for_passenger(&self, passenger_id: PassengerId) -> Result<Vec<FlightBooking>>;

    /// A flight's bookings, newest first.
    async fn list_for_flight(&self, flight_id: FlightId) -> Result<Vec<FlightBooking>>;

    /// Seats held by the flight's non-cancelled bookings.
    async fn active_seats_for_flight(&self, flight_id: FlightId) -> Result<u32>;

    /// Add a booking; [`RepositoryError::Duplicate`] if the reference is taken.
    async fn insert(&self, booking: &FlightBooking, events: &[SerializedEvent]) -> Result<()>;

    /// Overwrite an existing booking.
    ///
    /// The write only lands if the stored version still equals
    /// `booking.version()`; it then stores the next version. Otherwise
    /// [`RepositoryError::Stale`] and nothing changes.
    async fn update(&self, booking: &FlightBooking, events: &[SerializedEvent]) -> Result<()>;

    /// Overwrite a cancelled booking and return its seats to the flight, in
    /// one unit of work. Versioned like [`BookingRepository::update`], so a
    /// booking's seats are released at most once.
    async fn save_cancellation(
        &self,
        booking: &FlightBooking,
        events: &[SerializedEvent],
    ) -> Result<()>;
}

/// User accounts.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// User by id.
    async fn get(&self, id: UserId) -> Result<Option<User>>;

    /// User whose username or email matches `login` (email case-insensitive).
    async fn find_by_login(&self, login: &str) -> Result<Option<User>>;

    /// Whether any user has the `Admin` role.
    async fn any_admin(&self) -> Result<bool>;

    /// Add a user; [`RepositoryError::Duplicate`] on a taken username or email.
    async fn insert(&self, user: &User) -> Result<()>;

    /// Overwrite an existing user.
    async fn update(&self, user: &User) -> Result<()>;
}

/// Connectivity probe for readiness checks.
#[async_trait]
pub trait StoreHealth: Send + Sync {
    /// Whether the store answers.
    async fn is_healthy(&self) -> bool;
}

/// Every repository of one store, ready to hand to the services.
#[derive(Clone)]
pub struct Repositories {
    /// Airports
    pub airports: Arc<dyn AirportRepository>,
    /// Flights
    pub flights: Arc<dyn FlightRepository>,
    /// Passengers
    pub passengers: Arc<dyn PassengerRepository>,
    /// Bookings
    pub bookings: Arc<dyn BookingRepository>,
    /// Users
    pub users: Arc<dyn UserRepository>,
    /// Relay side of the outbox the repositories write to
    pub outbox: Arc<dyn Outbox>,
    /// Readiness probe
    pub health: Arc<dyn StoreHealth>,
}
