//! Flight schedule and seat inventory.
//!
//! Seat counts obey `0 ≤ available ≤ total` after every operation. In the
//! Postgres store the same bound is enforced by the conditional seat updates in
//! the repository, so concurrent bookings cannot oversell a flight.

use crate::error::DomainError;
use crate::events::FlightEvent;
use crate::types::{AirportCode, FlightId, FlightStatus, Money, require};
use chrono::{DateTime, Duration, Utc};
use flight_booking_core::aggregate::{Aggregate, Events, raise};
use serde::{Deserialize, Serialize};

/// Input for [`Flight::schedule`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFlight {
    /// e.g. `CZ3456`
    pub flight_number: String,
    /// e.g. `CZ`
    pub airline_code: String,
    /// e.g. `China Southern`
    pub airline_name: String,
    /// Departure airport code
    pub departure_airport: String,
    /// Scheduled departure
    pub departure_time: DateTime<Utc>,
    /// Departure terminal
    pub departure_terminal: String,
    /// Arrival airport code
    pub arrival_airport: String,
    /// Scheduled arrival
    pub arrival_time: DateTime<Utc>,
    /// Arrival terminal
    pub arrival_terminal: String,
    /// e.g. `A320`
    pub aircraft_type: String,
    /// Seats on board
    pub total_seats: u32,
    /// Economy price per seat
    pub base_price: Money,
}

/// An operational status change.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// Why (reported on delays and cancellations)
    pub reason: Option<String>,
    /// New departure time; only meaningful for `Delayed`
    pub new_departure_time: Option<DateTime<Utc>>,
}

/// A scheduled flight.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flight {
    pub(crate) id: FlightId,
    pub(crate) flight_number: String,
    pub(crate) airline_code: String,
    pub(crate) airline_name: String,
    pub(crate) departure_airport: AirportCode,
    pub(crate) departure_time: DateTime<Utc>,
    pub(crate) departure_terminal: String,
    pub(crate) arrival_airport: AirportCode,
    pub(crate) arrival_time: DateTime<Utc>,
    pub(crate) arrival_terminal: String,
    pub(crate) aircraft_type: String,
    pub(crate) total_seats: u32,
    pub(crate) available_seats: u32,
    pub(crate) base_price: Money,
    pub(crate) status: FlightStatus,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: Option<DateTime<Utc>>,
}

impl Flight {
    /// Schedule a new flight with every seat available.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] for blank fields, invalid airport
    /// codes, identical airports, zero seats or an arrival that is not after
    /// the departure.
    pub fn schedule(
        new: NewFlight,
        now: DateTime<Utc>,
    ) -> Result<(Self, Events<FlightEvent>), DomainError> {
        require("Flight number", &new.flight_number)?;
        require("Airline code", &new.airline_code)?;
        require("Airline name", &new.airline_name)?;
        require("Aircraft type", &new.aircraft_type)?;
        let departure_airport = AirportCode::parse(&new.departure_airport)?;
        let arrival_airport = AirportCode::parse(&new.arrival_airport)?;
        if new.total_seats == 0 {
            return Err(DomainError::validation("Total seats must be greater than 0"));
        }
        if departure_airport == arrival_airport {
            return Err(DomainError::validation(
                "Departure and arrival airports must differ",
            ));
        }
        if new.arrival_time <= new.departure_time {
            return Err(DomainError::validation(
                "Arrival time must be after departure time",
            ));
        }

        let flight = Self {
            id: FlightId::new(),
            flight_number: new.flight_number.trim().to_ascii_uppercase(),
            airline_code: new.airline_code.trim().to_ascii_uppercase(),
            airline_name: new.airline_name.trim().to_string(),
            departure_airport,
            departure_time: new.departure_time,
            departure_terminal: new.departure_terminal,
            arrival_airport,
            arrival_time: new.arrival_time,
            arrival_terminal: new.arrival_terminal,
            aircraft_type: new.aircraft_type.trim().to_string(),
            total_seats: new.total_seats,
            available_seats: new.total_seats,
            base_price: new.base_price,
            status: FlightStatus::Scheduled,
            created_at: now,
            updated_at: None,
        };

        let mut events = Events::new();
        events.push(FlightEvent::Created {
            flight_id: flight.id,
            flight_number: flight.flight_number.clone(),
            departure_airport: flight.departure_airport.to_string(),
            arrival_airport: flight.arrival_airport.to_string(),
            departure_time: flight.departure_time,
        });
        Ok((flight, events))
    }

    // ========================================================================
    // Seat inventory
    // ========================================================================

    /// `Scheduled` with at least `seats` seats left.
    #[must_use]
    pub fn can_book(&self, seats: u32) -> bool {
        self.status == FlightStatus::Scheduled && self.available_seats >= seats
    }

    /// Take `seats` seats out of the inventory.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Capacity`] unless [`Self::can_book`] holds.
    pub fn book_seats(&mut self, seats: u32, now: DateTime<Utc>) -> Result<(), DomainError> {
        if !self.can_book(seats) {
            let available = if self.status == FlightStatus::Scheduled {
                self.available_seats
            } else {
                0
            };
            return Err(DomainError::Capacity {
                requested: seats,
                available,
            });
        }
        self.available_seats -= seats;
        self.updated_at = Some(now);
        Ok(())
    }

    /// Return `seats` seats to the inventory.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] if that would exceed the total.
    pub fn release_seats(&mut self, seats: u32, now: DateTime<Utc>) -> Result<(), DomainError> {
        match self.available_seats.checked_add(seats) {
            Some(available) if available <= self.total_seats => {
                self.available_seats = available;
                self.updated_at = Some(now);
                Ok(())
            }
            _ => Err(DomainError::validation(format!(
                "Releasing {seats} seats would exceed the {} seats of flight {}",
                self.total_seats, self.flight_number
            ))),
        }
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Change the operational status.
    ///
    /// Raises `FlightStatusChanged`, plus `FlightDelayed` when moving to
    /// `Delayed` or `FlightCancelled` when moving to `Cancelled`. A delay with a
    /// new departure time shifts the arrival by the same amount. Setting the
    /// current status again without a new time raises nothing.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] for a new departure time on a
    /// non-delay status or one that is not later than the current departure,
    /// and [`DomainError::StateConflict`] when the flight is already cancelled.
    pub fn update_status(
        &mut self,
        status: FlightStatus,
        update: StatusUpdate,
        now: DateTime<Utc>,
    ) -> Result<Events<FlightEvent>, DomainError> {
        if update.new_departure_time.is_some() && status != FlightStatus::Delayed {
            return Err(DomainError::validation(
                "A new departure time can only be given for a delay",
            ));
        }
        if let Some(new_departure) = update.new_departure_time {
            if new_departure <= self.departure_time {
                return Err(DomainError::validation(
                    "A delayed departure must be later than the current one",
                ));
            }
        }
        if self.status == FlightStatus::Cancelled && status != FlightStatus::Cancelled {
            return Err(DomainError::conflict(format!(
                "Flight {} is cancelled",
                self.flight_number
            )));
        }
        if status == self.status && update.new_departure_time.is_none() {
            return Ok(Events::new());
        }

        let mut events = Events::new();
        let changed = FlightEvent::StatusChanged {
            flight_id: self.id,
            flight_number: self.flight_number.clone(),
            old_status: self.status,
            new_status: status,
            changed_at: now,
        };
        self.apply_event(&changed);
        events.push(changed);

        let reason = update.reason.unwrap_or_default();
        let follow_up = match status {
            FlightStatus::Delayed => Some(FlightEvent::Delayed {
                flight_id: self.id,
                flight_number: self.flight_number.clone(),
                original_departure: self.departure_time,
                new_departure: update.new_departure_time.unwrap_or(self.departure_time),
                reason,
            }),
            FlightStatus::Cancelled => Some(FlightEvent::Cancelled {
                flight_id: self.id,
                flight_number: self.flight_number.clone(),
                reason,
            }),
            _ => None,
        };
        if let Some(event) = follow_up {
            self.apply_event(&event);
            events.push(event);
        }
        Ok(events)
    }

    /// Change the base price. Setting the same price raises nothing.
    #[must_use]
    pub fn update_price(&mut self, price: Money, now: DateTime<Utc>) -> Events<FlightEvent> {
        if price == self.base_price {
            return Events::new();
        }
        self.updated_at = Some(now);
        let event = FlightEvent::PriceChanged {
            flight_id: self.id,
            old_price: self.base_price,
            new_price: price,
        };
        raise(self, event)
    }

    /// Scheduled time in the air.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.arrival_time - self.departure_time
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Identifier
    #[must_use]
    pub const fn id(&self) -> FlightId {
        self.id
    }

    /// Flight number
    #[must_use]
    pub fn flight_number(&self) -> &str {
        &self.flight_number
    }

    /// Airline code
    #[must_use]
    pub fn airline_code(&self) -> &str {
        &self.airline_code
    }

    /// Airline name
    #[must_use]
    pub fn airline_name(&self) -> &str {
        &self.airline_name
    }

    /// Departure airport
    #[must_use]
    pub const fn departure_airport(&self) -> &AirportCode {
        &self.departure_airport
    }

    /// Departure time
    #[must_use]
    pub const fn departure_time(&self) -> DateTime<Utc> {
        self.departure_time
    }

    /// Departure terminal
    #[must_use]
    pub fn departure_terminal(&self) -> &str {
        &self.departure_terminal
    }

    /// Arrival airport
    #[must_use]
    pub const fn arrival_airport(&self) -> &AirportCode {
        &self.arrival_airport
    }

    /// Arrival time
    #[must_use]
    pub const fn arrival_time(&self) -> DateTime<Utc> {
        self.arrival_time
    }

    /// Arrival terminal
    #[must_use]
    pub fn arrival_terminal(&self) -> &str {
        &self.arrival_terminal
    }

    /// Aircraft type
    #[must_use]
    pub fn aircraft_type(&self) -> &str {
        &self.aircraft_type
    }

    /// Seats on board
    #[must_use]
    pub const fn total_seats(&self) -> u32 {
        self.total_seats
    }

    /// Seats still free
    #[must_use]
    pub const fn available_seats(&self) -> u32 {
        self.available_seats
    }

    /// Price per Economy seat
    #[must_use]
    pub const fn base_price(&self) -> Money {
        self.base_price
    }

    /// Operational status
    #[must_use]
    pub const fn status(&self) -> FlightStatus {
        self.status
    }

    /// When the flight was scheduled
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Last change
    #[must_use]
    pub const fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }
}

impl Aggregate for Flight {
    type Event = FlightEvent;

    fn apply_event(&mut self, event: &FlightEvent) {
        match event {
            // Construction happens in `schedule`.
            FlightEvent::Created { .. } => {}
            FlightEvent::StatusChanged {
                new_status,
                changed_at,
                ..
            } => {
                self.status = *new_status;
                self.updated_at = Some(*changed_at);
            }
            FlightEvent::Delayed {
                original_departure,
                new_departure,
                ..
            } => {
                let shift = *new_departure - *original_departure;
                self.departure_time = *new_departure;
                self.arrival_time += shift;
            }
            FlightEvent::Cancelled { .. } => {
                self.status = FlightStatus::Cancelled;
            }
            FlightEvent::PriceChanged { new_price, .. } => {
                self.base_price = *new_price;
            }
        }
    }
}
