//! Domain events and their serialization into outbox-ready envelopes.
//!
//! Every event type name carries a version suffix. The names double as routing
//! keys (see [`crate::dispatch::channel_for`]), so renaming one is a breaking change
//! for every consumer.

use crate::types::{
    BookingId, BookingReference, CabinClass, FlightId, FlightStatus, Money, PassengerId,
    PassengerProfile,
};
use chrono::{DateTime, Utc};
use flight_booking_core::event::{Event, EventError, EventMetadata, SerializedEvent};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Booking events
// ============================================================================

/// Facts raised by the [`FlightBooking`](crate::aggregates::FlightBooking) aggregate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingEvent {
    /// A booking was created in `Pending` status.
    Created {
        /// Booking ID
        booking_id: BookingId,
        /// Human-facing reference
        reference: BookingReference,
        /// Booked flight
        flight_id: FlightId,
        /// Travelling passenger
        passenger_id: PassengerId,
        /// Seats booked
        seats: u32,
        /// Seating tier
        cabin_class: CabinClass,
        /// Flight base price at booking time
        unit_price: Money,
        /// Price for all seats including the cabin multiplier
        total_amount: Money,
        /// Free-text requests
        special_requests: String,
        /// When the booking was made
        booked_at: DateTime<Utc>,
    },

    /// The booking was confirmed.
    Confirmed {
        /// Booking ID
        booking_id: BookingId,
        /// Human-facing reference
        reference: BookingReference,
        /// When
        confirmed_at: DateTime<Utc>,
    },

    /// The booking was cancelled.
    Cancelled {
        /// Booking ID
        booking_id: BookingId,
        /// Human-facing reference
        reference: BookingReference,
        /// Why
        reason: String,
        /// Amount owed back to the passenger
        refund_amount: Money,
        /// When
        cancelled_at: DateTime<Utc>,
    },

    /// Payment was received.
    Paid {
        /// Booking ID
        booking_id: BookingId,
        /// Human-facing reference
        reference: BookingReference,
        /// Amount charged
        amount: Money,
        /// Payment provider reference
        payment_reference: String,
        /// When
        paid_at: DateTime<Utc>,
    },

    /// The payment was refunded.
    Refunded {
        /// Booking ID
        booking_id: BookingId,
        /// Human-facing reference
        reference: BookingReference,
        /// Amount refunded
        refund_amount: Money,
        /// When
        refunded_at: DateTime<Utc>,
    },

    /// The passenger checked in.
    CheckedIn {
        /// Booking ID
        booking_id: BookingId,
        /// Human-facing reference
        reference: BookingReference,
        /// When
        checked_in_at: DateTime<Utc>,
    },
}

impl BookingEvent {
    /// Booking the event belongs to.
    #[must_use]
    pub const fn booking_id(&self) -> BookingId {
        match self {
            Self::Created { booking_id, .. }
            | Self::Confirmed { booking_id, .. }
            | Self::Cancelled { booking_id, .. }
            | Self::Paid { booking_id, .. }
            | Self::Refunded { booking_id, .. }
            | Self::CheckedIn { booking_id, .. } => *booking_id,
        }
    }

    /// Reference of the booking the event belongs to.
    #[must_use]
    pub const fn reference(&self) -> &BookingReference {
        match self {
            Self::Created { reference, .. }
            | Self::Confirmed { reference, .. }
            | Self::Cancelled { reference, .. }
            | Self::Paid { reference, .. }
            | Self::Refunded { reference, .. }
            | Self::CheckedIn { reference, .. } => reference,
        }
    }
}

impl Event for BookingEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::Created { .. } => "BookingCreated.v1",
            Self::Confirmed { .. } => "BookingConfirmed.v1",
            Self::Cancelled { .. } => "BookingCancelled.v1",
            Self::Paid { .. } => "BookingPaid.v1",
            Self::Refunded { .. } => "BookingRefunded.v1",
            Self::CheckedIn { .. } => "BookingCheckedIn.v1",
        }
    }
}

// ============================================================================
// Flight events
// ============================================================================

/// Facts raised by the [`Flight`](crate::aggregates::Flight) aggregate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlightEvent {
    /// A flight was scheduled.
    Created {
        /// Flight ID
        flight_id: FlightId,
        /// e.g. `CZ3456`
        flight_number: String,
        /// Departure airport code
        departure_airport: String,
        /// Arrival airport code
        arrival_airport: String,
        /// Scheduled departure
        departure_time: DateTime<Utc>,
    },

    /// Operational status changed.
    StatusChanged {
        /// Flight ID
        flight_id: FlightId,
        /// Flight number
        flight_number: String,
        /// Previous status
        old_status: FlightStatus,
        /// New status
        new_status: FlightStatus,
        /// When
        changed_at: DateTime<Utc>,
    },

    /// Departure was postponed.
    Delayed {
        /// Flight ID
        flight_id: FlightId,
        /// Flight number
        flight_number: String,
        /// Departure before the delay
        original_departure: DateTime<Utc>,
        /// Departure after the delay
        new_departure: DateTime<Utc>,
        /// Why
        reason: String,
    },

    /// The flight will not operate.
    Cancelled {
        /// Flight ID
        flight_id: FlightId,
        /// Flight number
        flight_number: String,
        /// Why
        reason: String,
    },

    /// Base price changed.
    PriceChanged {
        /// Flight ID
        flight_id: FlightId,
        /// Previous price
        old_price: Money,
        /// New price
        new_price: Money,
    },
}

impl FlightEvent {
    /// Flight the event belongs to.
    #[must_use]
    pub const fn flight_id(&self) -> FlightId {
        match self {
            Self::Created { flight_id, .. }
            | Self::StatusChanged { flight_id, .. }
            | Self::Delayed { flight_id, .. }
            | Self::Cancelled { flight_id, .. }
            | Self::PriceChanged { flight_id, .. } => *flight_id,
        }
    }
}

impl Event for FlightEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::Created { .. } => "FlightCreated.v1",
            Self::StatusChanged { .. } => "FlightStatusChanged.v1",
            Self::Delayed { .. } => "FlightDelayed.v1",
            Self::Cancelled { .. } => "FlightCancelled.v1",
            Self::PriceChanged { .. } => "FlightPriceChanged.v1",
        }
    }
}

// ============================================================================
// Passenger events
// ============================================================================

/// Facts raised by the [`Passenger`](crate::aggregates::Passenger) aggregate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PassengerEvent {
    /// A passenger was registered.
    Registered {
        /// Passenger ID
        passenger_id: PassengerId,
        /// First and last name
        full_name: String,
        /// Contact email
        email: String,
        /// Passport number
        passport_number: String,
    },

    /// Contact details changed.
    ContactUpdated {
        /// Passenger ID
        passenger_id: PassengerId,
        /// New email
        email: String,
        /// New phone
        phone: String,
    },

    /// Travel document changed.
    PassportUpdated {
        /// Passenger ID
        passenger_id: PassengerId,
        /// New passport number
        passport_number: String,
        /// Issuing country
        passport_country: String,
        /// New expiry
        passport_expiry: DateTime<Utc>,
    },
}

impl PassengerEvent {
    /// Passenger the event belongs to.
    #[must_use]
    pub const fn passenger_id(&self) -> PassengerId {
        match self {
            Self::Registered { passenger_id, .. }
            | Self::ContactUpdated { passenger_id, .. }
            | Self::PassportUpdated { passenger_id, .. } => *passenger_id,
        }
    }
}

impl Event for PassengerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::Registered { .. } => "PassengerRegistered.v1",
            Self::ContactUpdated { .. } => "PassengerContactUpdated.v1",
            Self::PassportUpdated { .. } => "PassengerPassportUpdated.v1",
        }
    }
}

// ============================================================================
// Booking requests
// ============================================================================

/// A booking request accepted for asynchronous processing.
///
/// Not raised by an aggregate: `submit_booking` publishes it directly and the
/// `submit-booking` consumer turns it into a real booking.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingSubmitted {
    /// Identifier handed back to the client
    pub request_id: Uuid,
    /// Flight to book
    pub flight_id: FlightId,
    /// Who travels
    pub passenger: PassengerProfile,
    /// Seats requested
    pub seats: u32,
    /// Seating tier
    pub cabin_class: CabinClass,
    /// Free-text requests
    pub special_requests: String,
    /// When the request was accepted
    pub requested_at: DateTime<Utc>,
}

impl BookingSubmitted {
    /// Type name on the wire.
    pub const EVENT_TYPE: &'static str = "BookingSubmitted.v1";
}

impl Event for BookingSubmitted {
    fn event_type(&self) -> &'static str {
        Self::EVENT_TYPE
    }
}

// ============================================================================
// Serialization
// ============================================================================

/// Who and what caused a change; copied into every event's metadata.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventContext {
    /// Correlation ID of the originating request
    pub correlation_id: Option<String>,
    /// Acting user
    pub user_id: Option<String>,
}

impl EventContext {
    /// Context for a request with the given correlation ID.
    #[must_use]
    pub fn correlated(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: Some(correlation_id.into()),
            user_id: None,
        }
    }

    /// Attach the acting user.
    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Metadata for an event raised by `aggregate_id` at `occurred_at`.
    #[must_use]
    pub fn metadata(&self, aggregate_id: impl Into<String>, occurred_at: DateTime<Utc>) -> EventMetadata {
        EventMetadata::for_aggregate(aggregate_id, occurred_at)
            .with_correlation_id(self.correlation_id.clone())
            .with_user_id(self.user_id.clone())
    }
}

/// Serialize raised events with metadata naming their aggregate.
///
/// # Errors
///
/// Returns [`EventError::Encode`] if any event fails to encode.
pub fn serialize_all<'a, E, I>(
    events: I,
    aggregate_id: &str,
    context: &EventContext,
    occurred_at: DateTime<Utc>,
) -> Result<Vec<SerializedEvent>, EventError>
where
    E: Event + Serialize + 'a,
    I: IntoIterator<Item = &'a E>,
{
    events
        .into_iter()
        .map(|event| {
            SerializedEvent::from_event(event, Some(context.metadata(aggregate_id, occurred_at)))
        })
        .collect()
}
