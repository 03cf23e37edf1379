//! The booking lifecycle state machine.
//!
//! ```text
//! status:   Pending ──confirm──► Confirmed ──check_in──► CheckedIn
//!              │                     │
//!              └──────cancel─────────┴──► Cancelled
//!
//! payment:  Pending ──process_payment──► Paid ──refund_payment──► Refunded
//! ```
//!
//! The two axes only meet at check-in (requires `Paid`) and at cancellation
//! (the refund depends on the payment status and the status being left).

use crate::error::DomainError;
use crate::events::BookingEvent;
use crate::types::{
    BookingId, BookingReference, BookingStatus, CabinClass, FlightId, Money, PassengerId,
    PaymentStatus,
};
use chrono::{DateTime, Utc};
use flight_booking_core::aggregate::{Aggregate, Events, raise};
use serde::{Deserialize, Serialize};

/// Share of the total refunded when a confirmed booking is cancelled, per mille.
pub const CONFIRMED_REFUND_PER_MILLE: u32 = 800;

/// Input for [`FlightBooking::create`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewBooking {
    /// Unique human-facing reference
    pub reference: BookingReference,
    /// Booked flight
    pub flight_id: FlightId,
    /// Travelling passenger
    pub passenger_id: PassengerId,
    /// Seats to book
    pub seats: u32,
    /// Seating tier
    pub cabin_class: CabinClass,
    /// Flight base price
    pub unit_price: Money,
    /// Free-text requests
    pub special_requests: String,
}

/// A passenger's booking on a flight.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlightBooking {
    pub(crate) id: BookingId,
    pub(crate) reference: BookingReference,
    pub(crate) flight_id: FlightId,
    pub(crate) passenger_id: PassengerId,
    pub(crate) seats: u32,
    pub(crate) cabin_class: CabinClass,
    pub(crate) unit_price: Money,
    pub(crate) total_amount: Money,
    pub(crate) special_requests: String,
    pub(crate) status: BookingStatus,
    pub(crate) booked_at: DateTime<Utc>,
    pub(crate) confirmed_at: Option<DateTime<Utc>>,
    pub(crate) cancelled_at: Option<DateTime<Utc>>,
    pub(crate) checked_in_at: Option<DateTime<Utc>>,
    pub(crate) payment_status: PaymentStatus,
    pub(crate) paid_at: Option<DateTime<Utc>>,
    pub(crate) payment_reference: Option<String>,
    pub(crate) cancellation_reason: Option<String>,
    pub(crate) refund_amount: Money,
    /// Number of saves so far. Stores only accept a write carrying the
    /// version they hold.
    #[serde(default)]
    pub(crate) version: u64,
}

impl FlightBooking {
    /// Create a `Pending` booking and raise `BookingCreated`.
    ///
    /// The total is `unit_price × seats × cabin multiplier`, rounded to the cent.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] for a nil flight or passenger id,
    /// zero seats, or a total that overflows.
    pub fn create(
        new: NewBooking,
        now: DateTime<Utc>,
    ) -> Result<(Self, Events<BookingEvent>), DomainError> {
        if new.flight_id.is_nil() {
            return Err(DomainError::validation("Flight id is required"));
        }
        if new.passenger_id.is_nil() {
            return Err(DomainError::validation("Passenger id is required"));
        }
        if new.seats == 0 {
            return Err(DomainError::validation("Seats count must be greater than 0"));
        }
        let total_amount = Self::calculate_total(new.unit_price, new.seats, new.cabin_class)?;

        let event = BookingEvent::Created {
            booking_id: BookingId::new(),
            reference: new.reference,
            flight_id: new.flight_id,
            passenger_id: new.passenger_id,
            seats: new.seats,
            cabin_class: new.cabin_class,
            unit_price: new.unit_price,
            total_amount,
            special_requests: new.special_requests,
            booked_at: now,
        };
        let mut booking = Self::placeholder(now);
        let events = raise(&mut booking, event);
        Ok((booking, events))
    }

    /// Price of `seats` seats in `cabin_class` at `unit_price`.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] if the amount overflows.
    pub fn calculate_total(
        unit_price: Money,
        seats: u32,
        cabin_class: CabinClass,
    ) -> Result<Money, DomainError> {
        unit_price
            .checked_multiply(seats)
            .and_then(|base| base.checked_scale_per_mille(cabin_class.multiplier_per_mille()))
            .ok_or_else(|| DomainError::validation("Total amount is too large"))
    }

    // Overwritten entirely by the `Created` event.
    fn placeholder(now: DateTime<Utc>) -> Self {
        Self {
            id: BookingId::from_uuid(uuid::Uuid::nil()),
            reference: BookingReference::empty(),
            flight_id: FlightId::from_uuid(uuid::Uuid::nil()),
            passenger_id: PassengerId::from_uuid(uuid::Uuid::nil()),
            seats: 0,
            cabin_class: CabinClass::Economy,
            unit_price: Money::ZERO,
            total_amount: Money::ZERO,
            special_requests: String::new(),
            status: BookingStatus::Pending,
            booked_at: now,
            confirmed_at: None,
            cancelled_at: None,
            checked_in_at: None,
            payment_status: PaymentStatus::Pending,
            paid_at: None,
            payment_reference: None,
            cancellation_reason: None,
            refund_amount: Money::ZERO,
            version: 0,
        }
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Confirm a pending booking.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::StateConflict`] unless the booking is `Pending`.
    pub fn confirm(&mut self, now: DateTime<Utc>) -> Result<Events<BookingEvent>, DomainError> {
        if self.status != BookingStatus::Pending {
            return Err(DomainError::conflict(format!(
                "Only pending bookings can be confirmed, booking {} is {:?}",
                self.reference, self.status
            )));
        }
        let event = BookingEvent::Confirmed {
            booking_id: self.id,
            reference: self.reference.clone(),
            confirmed_at: now,
        };
        Ok(raise(self, event))
    }

    /// Cancel the booking.
    ///
    /// Cancelling an already cancelled booking is a no-op and raises nothing.
    /// The refund is computed from the status being left: the full total from
    /// `Pending`, 80 % from `Confirmed`, nothing if the booking was never paid.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::StateConflict`] once the passenger has checked in.
    pub fn cancel(
        &mut self,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Events<BookingEvent>, DomainError> {
        match self.status {
            BookingStatus::Cancelled => return Ok(Events::new()),
            BookingStatus::CheckedIn => {
                return Err(DomainError::conflict(format!(
                    "Booking {} is checked in and cannot be cancelled",
                    self.reference
                )));
            }
            BookingStatus::Pending | BookingStatus::Confirmed => {}
        }

        let refund_amount = self.refund_for_cancellation();
        let event = BookingEvent::Cancelled {
            booking_id: self.id,
            reference: self.reference.clone(),
            reason: reason.to_string(),
            refund_amount,
            cancelled_at: now,
        };
        Ok(raise(self, event))
    }

    fn refund_for_cancellation(&self) -> Money {
        if self.payment_status != PaymentStatus::Paid {
            return Money::ZERO;
        }
        match self.status {
            BookingStatus::Pending => self.total_amount,
            BookingStatus::Confirmed => self
                .total_amount
                .checked_scale_per_mille(CONFIRMED_REFUND_PER_MILLE)
                .unwrap_or(Money::ZERO),
            BookingStatus::CheckedIn | BookingStatus::Cancelled => Money::ZERO,
        }
    }

    /// Record payment of the total amount.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::StateConflict`] if the booking is already paid,
    /// and [`DomainError::Validation`] for a blank payment reference.
    pub fn process_payment(
        &mut self,
        payment_reference: &str,
        now: DateTime<Utc>,
    ) -> Result<Events<BookingEvent>, DomainError> {
        if self.payment_status == PaymentStatus::Paid {
            return Err(DomainError::conflict(format!(
                "Booking {} is already paid",
                self.reference
            )));
        }
        crate::types::require("Payment reference", payment_reference)?;

        let event = BookingEvent::Paid {
            booking_id: self.id,
            reference: self.reference.clone(),
            amount: self.total_amount,
            payment_reference: payment_reference.trim().to_string(),
            paid_at: now,
        };
        Ok(raise(self, event))
    }

    /// Refund a paid booking.
    ///
    /// A cancelled booking is refunded the amount fixed at cancellation; any
    /// other booking is refunded in full.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::StateConflict`] unless the booking is `Paid`.
    pub fn refund_payment(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Events<BookingEvent>, DomainError> {
        if self.payment_status != PaymentStatus::Paid {
            return Err(DomainError::conflict(format!(
                "Only paid bookings can be refunded, booking {} payment is {:?}",
                self.reference, self.payment_status
            )));
        }
        let refund_amount = if self.status == BookingStatus::Cancelled {
            self.refund_amount
        } else {
            self.total_amount
        };
        let event = BookingEvent::Refunded {
            booking_id: self.id,
            reference: self.reference.clone(),
            refund_amount,
            refunded_at: now,
        };
        Ok(raise(self, event))
    }

    /// Check the passenger in.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::StateConflict`] unless the booking is both
    /// `Confirmed` and `Paid`.
    pub fn check_in(&mut self, now: DateTime<Utc>) -> Result<Events<BookingEvent>, DomainError> {
        if self.status != BookingStatus::Confirmed {
            return Err(DomainError::conflict(format!(
                "Only confirmed bookings can check in, booking {} is {:?}",
                self.reference, self.status
            )));
        }
        if self.payment_status != PaymentStatus::Paid {
            return Err(DomainError::conflict(format!(
                "Booking {} must be paid before check-in",
                self.reference
            )));
        }
        let event = BookingEvent::CheckedIn {
            booking_id: self.id,
            reference: self.reference.clone(),
            checked_in_at: now,
        };
        Ok(raise(self, event))
    }

    /// Replace the special requests. Raises no event.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::StateConflict`] for a cancelled booking.
    pub fn update_special_requests(&mut self, requests: &str) -> Result<(), DomainError> {
        if self.status == BookingStatus::Cancelled {
            return Err(DomainError::conflict(format!(
                "Booking {} is cancelled and cannot be modified",
                self.reference
            )));
        }
        self.special_requests = requests.to_string();
        Ok(())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// `Pending` or `Confirmed`.
    #[must_use]
    pub fn can_be_cancelled(&self) -> bool {
        matches!(self.status, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    /// `Confirmed` and `Paid`.
    #[must_use]
    pub fn can_check_in(&self) -> bool {
        self.status == BookingStatus::Confirmed && self.payment_status == PaymentStatus::Paid
    }

    /// Anything but `Cancelled`; active bookings hold seats.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status != BookingStatus::Cancelled
    }

    /// Internal identifier
    #[must_use]
    pub const fn id(&self) -> BookingId {
        self.id
    }

    /// Human-facing reference
    #[must_use]
    pub const fn reference(&self) -> &BookingReference {
        &self.reference
    }

    /// Booked flight
    #[must_use]
    pub const fn flight_id(&self) -> FlightId {
        self.flight_id
    }

    /// Travelling passenger
    #[must_use]
    pub const fn passenger_id(&self) -> PassengerId {
        self.passenger_id
    }

    /// Seats held
    #[must_use]
    pub const fn seats(&self) -> u32 {
        self.seats
    }

    /// Seating tier
    #[must_use]
    pub const fn cabin_class(&self) -> CabinClass {
        self.cabin_class
    }

    /// Base price per seat at booking time
    #[must_use]
    pub const fn unit_price(&self) -> Money {
        self.unit_price
    }

    /// Total price
    #[must_use]
    pub const fn total_amount(&self) -> Money {
        self.total_amount
    }

    /// Free-text requests
    #[must_use]
    pub fn special_requests(&self) -> &str {
        &self.special_requests
    }

    /// Lifecycle status
    #[must_use]
    pub const fn status(&self) -> BookingStatus {
        self.status
    }

    /// Payment status
    #[must_use]
    pub const fn payment_status(&self) -> PaymentStatus {
        self.payment_status
    }

    /// When the booking was made
    #[must_use]
    pub const fn booked_at(&self) -> DateTime<Utc> {
        self.booked_at
    }

    /// When it was confirmed
    #[must_use]
    pub const fn confirmed_at(&self) -> Option<DateTime<Utc>> {
        self.confirmed_at
    }

    /// When it was cancelled
    #[must_use]
    pub const fn cancelled_at(&self) -> Option<DateTime<Utc>> {
        self.cancelled_at
    }

    /// When the passenger checked in
    #[must_use]
    pub const fn checked_in_at(&self) -> Option<DateTime<Utc>> {
        self.checked_in_at
    }

    /// When it was paid
    #[must_use]
    pub const fn paid_at(&self) -> Option<DateTime<Utc>> {
        self.paid_at
    }

    /// Payment provider reference
    #[must_use]
    pub fn payment_reference(&self) -> Option<&str> {
        self.payment_reference.as_deref()
    }

    /// Why it was cancelled
    #[must_use]
    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancellation_reason.as_deref()
    }

    /// Refund owed or paid back
    #[must_use]
    pub const fn refund_amount(&self) -> Money {
        self.refund_amount
    }

    /// Stored version this copy was loaded at
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// The copy a store writes: same state, next version.
    pub(crate) fn next_version(&self) -> Self {
        Self {
            version: self.version + 1,
            ..self.clone()
        }
    }
}

impl Aggregate for FlightBooking {
    type Event = BookingEvent;

    fn apply_event(&mut self, event: &BookingEvent) {
        match event {
            BookingEvent::Created {
                booking_id,
                reference,
                flight_id,
                passenger_id,
                seats,
                cabin_class,
                unit_price,
                total_amount,
                special_requests,
                booked_at,
            } => {
                *self = Self {
                    id: *booking_id,
                    reference: reference.clone(),
                    flight_id: *flight_id,
                    passenger_id: *passenger_id,
                    seats: *seats,
                    cabin_class: *cabin_class,
                    unit_price: *unit_price,
                    total_amount: *total_amount,
                    special_requests: special_requests.clone(),
                    booked_at: *booked_at,
                    ..Self::placeholder(*booked_at)
                };
            }
            BookingEvent::Confirmed { confirmed_at, .. } => {
                self.status = BookingStatus::Confirmed;
                self.confirmed_at = Some(*confirmed_at);
            }
            BookingEvent::Cancelled {
                reason,
                refund_amount,
                cancelled_at,
                ..
            } => {
                self.status = BookingStatus::Cancelled;
                self.cancelled_at = Some(*cancelled_at);
                self.cancellation_reason = Some(reason.clone());
                self.refund_amount = *refund_amount;
            }
            BookingEvent::Paid {
                payment_reference,
                paid_at,
                ..
            } => {
                self.payment_status = PaymentStatus::Paid;
                self.paid_at = Some(*paid_at);
                self.payment_reference = Some(payment_reference.clone());
            }
            BookingEvent::Refunded { refund_amount, .. } => {
                self.payment_status = PaymentStatus::Refunded;
                self.refund_amount = *refund_amount;
            }
            BookingEvent::CheckedIn { checked_in_at, .. } => {
                self.status = BookingStatus::CheckedIn;
                self.checked_in_at = Some(*checked_in_at);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
pub(crate) mod tests {
    use super::*;
    use flight_booking_core::environment::Clock;
    use flight_booking_testing::assertions::{assert_events_count, assert_no_events, single_event};
    use flight_booking_testing::{AggregateTest, test_clock};

    pub(crate) fn new_booking(seats: u32, unit_price: Money, cabin_class: CabinClass) -> NewBooking {
        NewBooking {
            reference: BookingReference::parse("ZK1234").unwrap(),
            flight_id: FlightId::new(),
            passenger_id: PassengerId::new(),
            seats,
            cabin_class,
            unit_price,
            special_requests: String::new(),
        }
    }

    fn pending() -> FlightBooking {
        let new = new_booking(2, Money::from_cents(10_000), CabinClass::Economy);
        FlightBooking::create(new, test_clock().now()).unwrap().0
    }

    fn with(status: BookingStatus, paid: bool) -> FlightBooking {
        let now = test_clock().now();
        let mut booking = pending();
        if paid {
            booking.process_payment("PAY-1", now).unwrap();
        }
        match status {
            BookingStatus::Pending => {}
            BookingStatus::Confirmed => {
                booking.confirm(now).unwrap();
            }
            BookingStatus::CheckedIn => {
                booking.confirm(now).unwrap();
                booking.check_in(now).unwrap();
            }
            BookingStatus::Cancelled => {
                booking.cancel("test", now).unwrap();
            }
        }
        booking
    }

    #[test]
    fn create_computes_total_with_cabin_multiplier() {
        let new = new_booking(2, Money::from_cents(10_000), CabinClass::Business);
        let (booking, events) = FlightBooking::create(new, test_clock().now()).unwrap();

        assert_eq!(booking.total_amount(), Money::from_cents(50_000));
        assert_eq!(booking.status(), BookingStatus::Pending);
        assert_eq!(booking.payment_status(), PaymentStatus::Pending);
        match single_event(&events) {
            BookingEvent::Created {
                booking_id,
                total_amount,
                seats,
                ..
            } => {
                assert_eq!(*booking_id, booking.id());
                assert_eq!(*total_amount, Money::from_cents(50_000));
                assert_eq!(*seats, 2);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn create_rejects_zero_seats_and_missing_ids() {
        let now = test_clock().now();
        let zero = new_booking(0, Money::from_cents(100), CabinClass::Economy);
        assert!(matches!(
            FlightBooking::create(zero, now),
            Err(DomainError::Validation(_))
        ));

        let mut nil_flight = new_booking(1, Money::from_cents(100), CabinClass::Economy);
        nil_flight.flight_id = FlightId::from_uuid(uuid::Uuid::nil());
        assert!(matches!(
            FlightBooking::create(nil_flight, now),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn confirm_pending_booking() {
        let now = test_clock().now();
        AggregateTest::given(pending())
            .when(move |b| b.confirm(now))
            .then_state(move |b| {
                assert_eq!(b.status(), BookingStatus::Confirmed);
                assert_eq!(b.confirmed_at(), Some(now));
            })
            .then_events(|events| {
                assert!(matches!(single_event(events), BookingEvent::Confirmed { .. }));
            })
            .run();
    }

    #[test]
    fn confirm_twice_is_a_state_conflict() {
        let now = test_clock().now();
        AggregateTest::given(with(BookingStatus::Confirmed, false))
            .when(move |b| b.confirm(now))
            .then_error(|e| assert!(matches!(e, DomainError::StateConflict(_))))
            .run();
    }

    #[test]
    fn cancel_is_idempotent() {
        let now = test_clock().now();
        AggregateTest::given(with(BookingStatus::Cancelled, false))
            .when(move |b| b.cancel("again", now))
            .then_events(|events| assert_no_events(events))
            .then_state(|b| assert_eq!(b.cancellation_reason(), Some("test")))
            .run();
    }

    #[test]
    fn cancel_after_check_in_fails() {
        let now = test_clock().now();
        AggregateTest::given(with(BookingStatus::CheckedIn, true))
            .when(move |b| b.cancel("too late", now))
            .then_error(|e| assert!(matches!(e, DomainError::StateConflict(_))))
            .run();
    }

    #[test]
    fn refund_on_cancellation_depends_on_status_left_and_payment() {
        let now = test_clock().now();
        let cases = [
            (BookingStatus::Pending, true, 20_000),
            (BookingStatus::Confirmed, true, 16_000),
            (BookingStatus::Pending, false, 0),
            (BookingStatus::Confirmed, false, 0),
        ];
        for (status, paid, expected) in cases {
            let mut booking = with(status, paid);
            let events = booking.cancel("change of plans", now).unwrap();
            match single_event(&events) {
                BookingEvent::Cancelled { refund_amount, .. } => {
                    assert_eq!(*refund_amount, Money::from_cents(expected), "{status:?} paid={paid}");
                }
                other => panic!("unexpected event {other:?}"),
            }
            assert_eq!(booking.status(), BookingStatus::Cancelled);
            assert_eq!(booking.refund_amount(), Money::from_cents(expected));
        }
    }

    #[test]
    fn check_in_requires_confirmed_and_paid() {
        let now = test_clock().now();
        for (status, paid, allowed) in [
            (BookingStatus::Confirmed, true, true),
            (BookingStatus::Confirmed, false, false),
            (BookingStatus::Pending, true, false),
            (BookingStatus::Pending, false, false),
        ] {
            let mut booking = with(status, paid);
            assert_eq!(booking.can_check_in(), allowed);
            let result = booking.check_in(now);
            assert_eq!(result.is_ok(), allowed, "{status:?} paid={paid}");
            if allowed {
                assert_eq!(booking.status(), BookingStatus::CheckedIn);
            } else {
                assert!(matches!(result, Err(DomainError::StateConflict(_))));
            }
        }
    }

    #[test]
    fn payment_cannot_be_taken_twice() {
        let now = test_clock().now();
        AggregateTest::given(with(BookingStatus::Pending, true))
            .when(move |b| b.process_payment("PAY-2", now))
            .then_error(|e| assert!(matches!(e, DomainError::StateConflict(_))))
            .run();
    }

    #[test]
    fn payment_records_reference_and_amount() {
        let now = test_clock().now();
        AggregateTest::given(pending())
            .when(move |b| b.process_payment(" PAY-9 ", now))
            .then_state(move |b| {
                assert_eq!(b.payment_status(), PaymentStatus::Paid);
                assert_eq!(b.payment_reference(), Some("PAY-9"));
                assert_eq!(b.paid_at(), Some(now));
            })
            .then_events(|events| match single_event(events) {
                BookingEvent::Paid { amount, .. } => assert_eq!(*amount, Money::from_cents(20_000)),
                other => panic!("unexpected event {other:?}"),
            })
            .run();
    }

    #[test]
    fn cancelled_booking_can_still_be_paid() {
        let now = test_clock().now();
        AggregateTest::given(with(BookingStatus::Cancelled, false))
            .when(move |b| b.process_payment("PAY-3", now))
            .then_state(|b| {
                assert_eq!(b.status(), BookingStatus::Cancelled);
                assert_eq!(b.payment_status(), PaymentStatus::Paid);
            })
            .then_events(|events| assert_events_count(events, 1))
            .run();
    }

    #[test]
    fn blank_payment_reference_is_rejected() {
        let now = test_clock().now();
        AggregateTest::given(pending())
            .when(move |b| b.process_payment("   ", now))
            .then_error(|e| assert!(matches!(e, DomainError::Validation(_))))
            .run();
    }

    #[test]
    fn next_version_keeps_the_state() {
        let booking = pending();
        let saved = booking.next_version();
        assert_eq!(saved.version(), booking.version() + 1);
        assert_eq!(saved.status(), booking.status());
        assert_eq!(saved.reference(), booking.reference());
    }

    #[test]
    fn refund_requires_payment() {
        let now = test_clock().now();
        AggregateTest::given(pending())
            .when(move |b| b.refund_payment(now))
            .then_error(|e| assert!(matches!(e, DomainError::StateConflict(_))))
            .run();
    }

    #[test]
    fn refund_after_cancellation_uses_cancellation_amount() {
        let now = test_clock().now();
        AggregateTest::given(with(BookingStatus::Confirmed, true))
            .when(move |b| -> Result<Events<BookingEvent>, DomainError> {
                let mut events = b.cancel("sick", now)?;
                events.extend(b.refund_payment(now)?);
                Ok(events)
            })
            .then_state(|b| {
                assert_eq!(b.payment_status(), PaymentStatus::Refunded);
                assert_eq!(b.refund_amount(), Money::from_cents(16_000));
            })
            .then_events(|events| {
                assert!(matches!(
                    events.last(),
                    Some(BookingEvent::Refunded { refund_amount, .. }) if *refund_amount == Money::from_cents(16_000)
                ));
            })
            .run();
    }

    #[test]
    fn special_requests_are_frozen_after_cancellation() {
        let mut booking = pending();
        booking.update_special_requests("window seat").unwrap();
        assert_eq!(booking.special_requests(), "window seat");

        let mut cancelled = with(BookingStatus::Cancelled, false);
        assert!(matches!(
            cancelled.update_special_requests("aisle"),
            Err(DomainError::StateConflict(_))
        ));
    }

    #[test]
    fn status_queries() {
        let pending = pending();
        assert!(pending.can_be_cancelled());
        assert!(pending.is_active());

        let checked_in = with(BookingStatus::CheckedIn, true);
        assert!(!checked_in.can_be_cancelled());
        assert!(checked_in.is_active());

        let cancelled = with(BookingStatus::Cancelled, true);
        assert!(!cancelled.can_be_cancelled());
        assert!(!cancelled.is_active());
    }
}
