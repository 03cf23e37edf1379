//! Booking creation across the flight, passenger and booking aggregates.

use crate::aggregates::{FlightBooking, NewBooking, Passenger};
use crate::error::{DomainError, ServiceError};
use crate::events::{EventContext, serialize_all};
use crate::repository::{BookingRepository, FlightRepository, PassengerRepository, RepositoryError};
use crate::types::{BookingCreationOptions, BookingReference, PassengerProfile};
use chrono::{DateTime, Utc};
use flight_booking_core::environment::Clock;
use std::sync::Arc;
use tracing::{info, warn};

/// Attempts at drawing an unused booking reference.
pub const MAX_REFERENCE_ATTEMPTS: usize = 10;

/// A booking that was just persisted.
#[derive(Debug, Clone)]
pub struct CreatedBooking {
    /// The new booking
    pub booking: FlightBooking,
    /// The travelling passenger
    pub passenger: Passenger,
    /// Whether the passenger was registered by this booking
    pub passenger_registered: bool,
}

/// Creates bookings.
///
/// Steps: load the flight, check capacity against the flight's active
/// bookings, find or register the passenger by passport, draw a unique
/// reference, build the booking at the flight's current base price, take the
/// seats with an atomic conditional decrement, then persist the booking with
/// its events. The seats are given back if persisting fails.
#[derive(Clone)]
pub struct BookingDomainService {
    flights: Arc<dyn FlightRepository>,
    passengers: Arc<dyn PassengerRepository>,
    bookings: Arc<dyn BookingRepository>,
    clock: Arc<dyn Clock>,
}

impl BookingDomainService {
    /// Service over the given repositories.
    #[must_use]
    pub fn new(
        flights: Arc<dyn FlightRepository>,
        passengers: Arc<dyn PassengerRepository>,
        bookings: Arc<dyn BookingRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            flights,
            passengers,
            bookings,
            clock,
        }
    }

    /// Create and persist a `Pending` booking.
    ///
    /// # Errors
    ///
    /// - [`DomainError::Validation`] for an incomplete request
    /// - [`DomainError::NotFound`] if the flight does not exist
    /// - [`DomainError::Capacity`] if the flight cannot seat the request
    /// - [`DomainError::StateConflict`] if the passenger's email belongs to
    ///   another passport, or no free reference was found
    /// - [`ServiceError::Repository`] if the store fails
    #[tracing::instrument(skip(self, options, context), fields(flight_id = %options.flight_id, seats = options.seats))]
    pub async fn create_booking(
        &self,
        options: BookingCreationOptions,
        context: &EventContext,
    ) -> Result<CreatedBooking, ServiceError> {
        let now = self.clock.now();
        let options = options.validated(now)?;

        let flight = self
            .flights
            .get(options.flight_id)
            .await?
            .ok_or_else(|| DomainError::not_found("Flight", options.flight_id))?;

        let booked = self.bookings.active_seats_for_flight(flight.id()).await?;
        let available = flight.total_seats().saturating_sub(booked);
        if options.seats > available {
            return Err(DomainError::Capacity {
                requested: options.seats,
                available,
            }
            .into());
        }

        let (passenger, passenger_registered) = self
            .find_or_register(options.passenger, now, context)
            .await?;
        let reference = self.unique_reference().await?;

        let (booking, events) = FlightBooking::create(
            NewBooking {
                reference,
                flight_id: flight.id(),
                passenger_id: passenger.id(),
                seats: options.seats,
                cabin_class: options.cabin_class,
                unit_price: flight.base_price(),
                special_requests: options.special_requests,
            },
            now,
        )?;
        let serialized = serialize_all(&events, &booking.id().to_string(), context, now)?;

        if !self.flights.reserve_seats(flight.id(), options.seats, now).await? {
            let available = self
                .flights
                .get(flight.id())
                .await?
                .map_or(0, |f| if f.can_book(1) { f.available_seats() } else { 0 });
            return Err(DomainError::Capacity {
                requested: options.seats,
                available,
            }
            .into());
        }

        if let Err(e) = self.bookings.insert(&booking, &serialized).await {
            warn!(
                booking_reference = %booking.reference(),
                error = %e,
                "Persisting booking failed, releasing seats"
            );
            if let Err(release) = self.flights.release_seats(flight.id(), options.seats, now).await {
                warn!(error = %release, "Releasing seats after failed booking also failed");
            }
            return Err(e.into());
        }

        metrics::counter!("bookings_created_total", "cabin_class" => booking.cabin_class().as_str())
            .increment(1);
        info!(
            booking_reference = %booking.reference(),
            passenger_id = %passenger.id(),
            total_amount = %booking.total_amount(),
            "Booking created"
        );

        Ok(CreatedBooking {
            booking,
            passenger,
            passenger_registered,
        })
    }

    async fn find_or_register(
        &self,
        profile: PassengerProfile,
        now: DateTime<Utc>,
        context: &EventContext,
    ) -> Result<(Passenger, bool), ServiceError> {
        if let Some(existing) = self.passengers.find_by_passport(&profile.passport_number).await? {
            return Ok((existing, false));
        }

        let passport_number = profile.passport_number.clone();
        let (passenger, events) = Passenger::register(profile, now)?;
        let serialized = serialize_all(&events, &passenger.id().to_string(), context, now)?;

        match self.passengers.insert(&passenger, &serialized).await {
            Ok(()) => {
                info!(passenger_id = %passenger.id(), "Passenger registered");
                Ok((passenger, true))
            }
            Err(RepositoryError::Duplicate(_)) => {
                // Either a concurrent booking registered the same passport
                // first, or the email belongs to someone else.
                match self.passengers.find_by_passport(&passport_number).await? {
                    Some(existing) => Ok((existing, false)),
                    None => Err(DomainError::conflict(
                        "Email is already registered to another passenger",
                    )
                    .into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn unique_reference(&self) -> Result<BookingReference, ServiceError> {
        for _ in 0..MAX_REFERENCE_ATTEMPTS {
            let candidate = BookingReference::generate(&mut rand::thread_rng());
            if !self.bookings.reference_exists(&candidate).await? {
                return Ok(candidate);
            }
        }
        Err(DomainError::conflict("Could not generate a unique booking reference").into())
    }
}
