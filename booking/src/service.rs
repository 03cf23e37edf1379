//! Booking application service.
//!
//! Every mutation loads a fresh aggregate, runs one command on it, persists the
//! aggregate together with the events it raised, and wakes the outbox relay.

use crate::aggregates::FlightBooking;
use crate::domain_service::{BookingDomainService, CreatedBooking};
use crate::error::{DomainError, ServiceError};
use crate::events::{BookingEvent, BookingSubmitted, EventContext, serialize_all};
use crate::repository::{
    BookingRepository, FlightRepository, PassengerRepository, Repositories, RepositoryError,
};
use crate::types::{BookingCreationOptions, BookingReference, BookingStatus, FlightId, PassengerId};
use chrono::{DateTime, Utc};
use flight_booking_core::aggregate::Events;
use flight_booking_core::environment::Clock;
use flight_booking_core::event::SerializedEvent;
use flight_booking_core::event_bus::EventBus;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::info;
use uuid::Uuid;

/// Reason recorded when a cancellation does not give one.
pub const DEFAULT_CANCELLATION_REASON: &str = "User requested cancellation";

/// Booking lifecycle operations exposed to the API and consumers.
#[derive(Clone)]
pub struct FlightBookingService {
    domain: BookingDomainService,
    flights: Arc<dyn FlightRepository>,
    passengers: Arc<dyn PassengerRepository>,
    bookings: Arc<dyn BookingRepository>,
    event_bus: Arc<dyn EventBus>,
    relay: Option<Arc<Notify>>,
    clock: Arc<dyn Clock>,
}

impl FlightBookingService {
    /// Service over a set of repositories.
    #[must_use]
    pub fn new(repos: &Repositories, event_bus: Arc<dyn EventBus>, clock: Arc<dyn Clock>) -> Self {
        Self {
            domain: BookingDomainService::new(
                repos.flights.clone(),
                repos.passengers.clone(),
                repos.bookings.clone(),
                clock.clone(),
            ),
            flights: repos.flights.clone(),
            passengers: repos.passengers.clone(),
            bookings: repos.bookings.clone(),
            event_bus,
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

    fn wake_relay(&self) {
        if let Some(notify) = &self.relay {
            notify.notify_one();
        }
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Create a booking; see [`BookingDomainService::create_booking`].
    ///
    /// # Errors
    ///
    /// Validation, not-found, capacity and conflict errors from the domain
    /// service, or a store failure.
    pub async fn create_booking(
        &self,
        options: BookingCreationOptions,
        context: &EventContext,
    ) -> Result<CreatedBooking, ServiceError> {
        let created = self.domain.create_booking(options, context).await?;
        self.wake_relay();
        Ok(created)
    }

    /// Accept a booking request for asynchronous creation by the
    /// `submit-booking` consumer. Returns the request id.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] for an incomplete request,
    /// [`DomainError::NotFound`] for an unknown flight, and
    /// [`ServiceError::EventBus`] if the request cannot be published.
    pub async fn submit_booking(
        &self,
        options: BookingCreationOptions,
        context: &EventContext,
    ) -> Result<Uuid, ServiceError> {
        let now = self.clock.now();
        let options = options.validated(now)?;
        if self.flights.get(options.flight_id).await?.is_none() {
            return Err(DomainError::not_found("Flight", options.flight_id).into());
        }

        let submitted = BookingSubmitted {
            request_id: Uuid::new_v4(),
            flight_id: options.flight_id,
            passenger: options.passenger,
            seats: options.seats,
            cabin_class: options.cabin_class,
            special_requests: options.special_requests,
            requested_at: now,
        };
        let event = SerializedEvent::from_event(
            &submitted,
            Some(context.metadata(submitted.request_id.to_string(), now)),
        )?;
        let channel = crate::dispatch::channel_for(&event.event_type);
        self.event_bus.publish(channel, &event).await?;

        info!(request_id = %submitted.request_id, flight_id = %submitted.flight_id, "Booking request submitted");
        Ok(submitted.request_id)
    }

    /// Confirm a pending booking.
    ///
    /// # Errors
    ///
    /// [`DomainError::NotFound`] for an unknown reference,
    /// [`DomainError::StateConflict`] unless the booking is `Pending`.
    pub async fn confirm_booking(
        &self,
        reference: &str,
        context: &EventContext,
    ) -> Result<FlightBooking, ServiceError> {
        self.mutate(reference, context, FlightBooking::confirm).await
    }

    /// Cancel a booking and return its seats to the flight.
    ///
    /// Cancelling a cancelled booking changes nothing and returns it as is.
    ///
    /// # Errors
    ///
    /// [`DomainError::NotFound`] for an unknown reference,
    /// [`DomainError::StateConflict`] after check-in or when another request
    /// changed the booking meanwhile.
    pub async fn cancel_booking(
        &self,
        reference: &str,
        reason: Option<&str>,
        context: &EventContext,
    ) -> Result<FlightBooking, ServiceError> {
        let reason = reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_CANCELLATION_REASON);
        let mut booking = self.load(reference).await?;
        let now = self.clock.now();

        let events = booking.cancel(reason, now)?;
        if events.is_empty() {
            return Ok(booking);
        }

        let serialized = serialize_all(&events, &booking.id().to_string(), context, now)?;
        match self.bookings.save_cancellation(&booking, &serialized).await {
            Ok(()) => {}
            Err(RepositoryError::Stale { .. }) => {
                // Another request got there first; its save released the seats.
                let current = self.load(reference).await?;
                if current.status() == BookingStatus::Cancelled {
                    return Ok(current);
                }
                return Err(concurrent_change(&current).into());
            }
            Err(err) => return Err(err.into()),
        }
        self.wake_relay();
        let booking = booking.next_version();

        metrics::counter!("bookings_cancelled_total").increment(1);
        info!(
            booking_reference = %booking.reference(),
            refund_amount = %booking.refund_amount(),
            reason,
            "Booking cancelled"
        );
        Ok(booking)
    }

    /// Record payment.
    ///
    /// # Errors
    ///
    /// [`DomainError::StateConflict`] if already paid,
    /// [`DomainError::Validation`] for a blank payment reference.
    pub async fn process_payment(
        &self,
        reference: &str,
        payment_reference: &str,
        context: &EventContext,
    ) -> Result<FlightBooking, ServiceError> {
        self.mutate(reference, context, |booking, now| {
            booking.process_payment(payment_reference, now)
        })
        .await
    }

    /// Refund a paid booking.
    ///
    /// # Errors
    ///
    /// [`DomainError::StateConflict`] unless the booking is paid.
    pub async fn refund_payment(
        &self,
        reference: &str,
        context: &EventContext,
    ) -> Result<FlightBooking, ServiceError> {
        self.mutate(reference, context, FlightBooking::refund_payment).await
    }

    /// Check the passenger in.
    ///
    /// # Errors
    ///
    /// [`DomainError::StateConflict`] unless confirmed and paid.
    pub async fn check_in(
        &self,
        reference: &str,
        context: &EventContext,
    ) -> Result<FlightBooking, ServiceError> {
        self.mutate(reference, context, FlightBooking::check_in).await
    }

    /// Replace the special requests.
    ///
    /// # Errors
    ///
    /// [`DomainError::StateConflict`] for a cancelled booking.
    pub async fn update_special_requests(
        &self,
        reference: &str,
        requests: &str,
        context: &EventContext,
    ) -> Result<FlightBooking, ServiceError> {
        self.mutate(reference, context, |booking, _| {
            booking.update_special_requests(requests.trim())?;
            Ok(Events::new())
        })
        .await
    }

    async fn mutate<F>(
        &self,
        reference: &str,
        context: &EventContext,
        command: F,
    ) -> Result<FlightBooking, ServiceError>
    where
        F: FnOnce(&mut FlightBooking, DateTime<Utc>) -> Result<Events<BookingEvent>, DomainError>,
    {
        let mut booking = self.load(reference).await?;
        let now = self.clock.now();

        let events = command(&mut booking, now)?;
        let serialized = serialize_all(&events, &booking.id().to_string(), context, now)?;
        match self.bookings.update(&booking, &serialized).await {
            Err(RepositoryError::Stale { .. }) => {
                return Err(concurrent_change(&booking).into());
            }
            other => other?,
        }
        if !serialized.is_empty() {
            self.wake_relay();
        }
        let booking = booking.next_version();

        info!(
            booking_reference = %booking.reference(),
            status = ?booking.status(),
            payment_status = ?booking.payment_status(),
            events = serialized.len(),
            "Booking updated"
        );
        Ok(booking)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Booking by reference.
    ///
    /// # Errors
    ///
    /// [`DomainError::Validation`] for a malformed reference,
    /// [`DomainError::NotFound`] for an unknown one.
    pub async fn get_booking(&self, reference: &str) -> Result<FlightBooking, ServiceError> {
        self.load(reference).await
    }

    /// A passenger's bookings, newest first.
    ///
    /// # Errors
    ///
    /// [`DomainError::NotFound`] for an unknown passenger.
    pub async fn get_passenger_bookings(
        &self,
        passenger_id: PassengerId,
    ) -> Result<Vec<FlightBooking>, ServiceError> {
        if self.passengers.get(passenger_id).await?.is_none() {
            return Err(DomainError::not_found("Passenger", passenger_id).into());
        }
        Ok(self.bookings.list_for_passenger(passenger_id).await?)
    }

    /// A flight's bookings, newest first.
    ///
    /// # Errors
    ///
    /// [`DomainError::NotFound`] for an unknown flight.
    pub async fn get_flight_bookings(
        &self,
        flight_id: FlightId,
    ) -> Result<Vec<FlightBooking>, ServiceError> {
        if self.flights.get(flight_id).await?.is_none() {
            return Err(DomainError::not_found("Flight", flight_id).into());
        }
        Ok(self.bookings.list_for_flight(flight_id).await?)
    }

    async fn load(&self, reference: &str) -> Result<FlightBooking, ServiceError> {
        let reference = BookingReference::parse(reference)?;
        self.bookings
            .get_by_reference(&reference)
            .await?
            .ok_or_else(|| DomainError::not_found("Booking", &reference).into())
    }
}

fn concurrent_change(booking: &FlightBooking) -> DomainError {
    DomainError::conflict(format!(
        "Booking {} was modified concurrently, retry",
        booking.reference()
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::aggregates::Flight;
    use crate::aggregates::flight::tests::new_flight;
    use crate::aggregates::passenger::tests::profile;
    use crate::dispatch::OutboxRelay;
    use crate::repository::memory::InMemoryStore;
    use crate::repository::Result as RepoResult;
    use crate::types::{CabinClass, Money, PaymentStatus};
    use async_trait::async_trait;
    use flight_booking_testing::{InMemoryEventBus, test_clock};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Fixture {
        store: InMemoryStore,
        bus: InMemoryEventBus,
        service: FlightBookingService,
        relay: OutboxRelay,
        flight: Flight,
    }

    async fn fixture() -> Fixture {
        let store = InMemoryStore::new();
        let repos = store.repositories();
        let bus = InMemoryEventBus::new();
        let flight = Flight::schedule(new_flight(5, Money::from_cents(10_000)), test_clock().now())
            .unwrap()
            .0;
        repos.flights.insert(&flight, &[]).await.unwrap();
        let relay = OutboxRelay::new(repos.outbox.clone(), Arc::new(bus.clone()));
        let service = FlightBookingService::new(&repos, Arc::new(bus.clone()), Arc::new(test_clock()))
            .with_relay(relay.notifier());
        Fixture {
            store,
            bus,
            service,
            relay,
            flight,
        }
    }

    fn request(flight_id: FlightId, seats: u32) -> BookingCreationOptions {
        BookingCreationOptions {
            flight_id,
            passenger: profile(test_clock().now()),
            seats,
            cabin_class: CabinClass::Economy,
            special_requests: String::new(),
        }
    }

    async fn book(f: &Fixture, seats: u32) -> String {
        f.service
            .create_booking(request(f.flight.id(), seats), &EventContext::correlated("corr-1"))
            .await
            .unwrap()
            .booking
            .reference()
            .to_string()
    }

    #[tokio::test]
    async fn full_lifecycle_publishes_each_event_on_its_channel() {
        let f = fixture().await;
        let ctx = EventContext::correlated("corr-1");
        let reference = book(&f, 2).await;

        f.service.confirm_booking(&reference, &ctx).await.unwrap();
        f.service.process_payment(&reference, "PAY-1", &ctx).await.unwrap();
        let booking = f.service.check_in(&reference, &ctx).await.unwrap();
        assert_eq!(booking.status(), BookingStatus::CheckedIn);

        f.relay.relay_pending().await.unwrap();
        for channel in ["booking-created", "booking-confirmed", "booking-paid", "booking-checked-in"] {
            assert_eq!(f.bus.published_to(channel).len(), 1, "{channel}");
        }
        let confirmed = &f.bus.published_to("booking-confirmed")[0];
        assert_eq!(confirmed.correlation_id(), Some("corr-1"));
    }

    #[tokio::test]
    async fn confirm_twice_is_a_conflict() {
        let f = fixture().await;
        let ctx = EventContext::default();
        let reference = book(&f, 1).await;

        f.service.confirm_booking(&reference, &ctx).await.unwrap();
        let err = f.service.confirm_booking(&reference, &ctx).await.unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::StateConflict(_))));
    }

    #[tokio::test]
    async fn cancel_releases_seats_and_is_idempotent() {
        let f = fixture().await;
        let ctx = EventContext::default();
        let reference = book(&f, 3).await;
        assert_eq!(f.store.bookable_seats(f.flight.id()), Some(2));

        f.service.process_payment(&reference, "PAY-9", &ctx).await.unwrap();
        let cancelled = f.service.cancel_booking(&reference, None, &ctx).await.unwrap();
        assert_eq!(cancelled.cancellation_reason(), Some(DEFAULT_CANCELLATION_REASON));
        assert_eq!(cancelled.refund_amount(), cancelled.total_amount());
        assert_eq!(f.store.bookable_seats(f.flight.id()), Some(5));

        let again = f.service.cancel_booking(&reference, Some("again"), &ctx).await.unwrap();
        assert_eq!(again, cancelled);
        assert_eq!(f.store.bookable_seats(f.flight.id()), Some(5));

        f.relay.relay_pending().await.unwrap();
        assert_eq!(f.bus.published_to("booking-cancelled").len(), 1);

        let refunded = f.service.refund_payment(&reference, &ctx).await.unwrap();
        assert_eq!(refunded.payment_status(), PaymentStatus::Refunded);
    }

    /// Bookings whose first write is preceded by a competing request's
    /// `change` on a fresh copy of the same booking.
    struct Racing<F> {
        inner: Arc<dyn BookingRepository>,
        change: F,
        raced: AtomicBool,
    }

    impl<F> Racing<F>
    where
        F: Fn(&mut FlightBooking) + Send + Sync,
    {
        async fn race(&self, reference: &BookingReference) -> RepoResult<()> {
            if self.raced.swap(true, Ordering::SeqCst) {
                return Ok(());
            }
            let mut other = self.inner.get_by_reference(reference).await?.unwrap();
            (self.change)(&mut other);
            if other.status() == BookingStatus::Cancelled {
                self.inner.save_cancellation(&other, &[]).await
            } else {
                self.inner.update(&other, &[]).await
            }
        }
    }

    #[async_trait]
    impl<F> BookingRepository for Racing<F>
    where
        F: Fn(&mut FlightBooking) + Send + Sync,
    {
        async fn get_by_reference(
            &self,
            reference: &BookingReference,
        ) -> RepoResult<Option<FlightBooking>> {
            self.inner.get_by_reference(reference).await
        }

        async fn reference_exists(&self, reference: &BookingReference) -> RepoResult<bool> {
            self.inner.reference_exists(reference).await
        }

        async fn list_for_passenger(&self, id: PassengerId) -> RepoResult<Vec<FlightBooking>> {
            self.inner.list_for_passenger(id).await
        }

        async fn list_for_flight(&self, id: FlightId) -> RepoResult<Vec<FlightBooking>> {
            self.inner.list_for_flight(id).await
        }

        async fn active_seats_for_flight(&self, id: FlightId) -> RepoResult<u32> {
            self.inner.active_seats_for_flight(id).await
        }

        async fn insert(&self, booking: &FlightBooking, events: &[SerializedEvent]) -> RepoResult<()> {
            self.inner.insert(booking, events).await
        }

        async fn update(&self, booking: &FlightBooking, events: &[SerializedEvent]) -> RepoResult<()> {
            self.race(booking.reference()).await?;
            self.inner.update(booking, events).await
        }

        async fn save_cancellation(
            &self,
            booking: &FlightBooking,
            events: &[SerializedEvent],
        ) -> RepoResult<()> {
            self.race(booking.reference()).await?;
            self.inner.save_cancellation(booking, events).await
        }
    }

    fn racing_service<F>(f: &Fixture, change: F) -> FlightBookingService
    where
        F: Fn(&mut FlightBooking) + Send + Sync + 'static,
    {
        let mut repos = f.store.repositories();
        repos.bookings = Arc::new(Racing {
            inner: repos.bookings.clone(),
            change,
            raced: AtomicBool::new(false),
        });
        FlightBookingService::new(&repos, Arc::new(f.bus.clone()), Arc::new(test_clock()))
    }

    #[tokio::test]
    async fn concurrent_cancels_release_seats_once() {
        let f = fixture().await;
        let ctx = EventContext::default();
        let reference = book(&f, 3).await;
        book(&f, 2).await;
        assert_eq!(f.store.bookable_seats(f.flight.id()), Some(0));

        let service = racing_service(&f, |booking| {
            let _ = booking.cancel("other tab", test_clock().now()).unwrap();
        });
        let cancelled = service.cancel_booking(&reference, None, &ctx).await.unwrap();

        assert_eq!(cancelled.status(), BookingStatus::Cancelled);
        assert_eq!(cancelled.cancellation_reason(), Some("other tab"));
        assert_eq!(f.store.bookable_seats(f.flight.id()), Some(3));
    }

    #[tokio::test]
    async fn cancel_losing_to_a_confirm_is_a_conflict() {
        let f = fixture().await;
        let ctx = EventContext::default();
        let reference = book(&f, 2).await;

        let service = racing_service(&f, |booking| {
            let _ = booking.confirm(test_clock().now()).unwrap();
        });
        let err = service.cancel_booking(&reference, None, &ctx).await.unwrap_err();

        assert!(matches!(err.domain(), Some(DomainError::StateConflict(_))));
        assert_eq!(f.store.bookable_seats(f.flight.id()), Some(3));
        let stored = f.service.get_booking(&reference).await.unwrap();
        assert_eq!(stored.status(), BookingStatus::Confirmed);
    }

    #[tokio::test]
    async fn stale_payment_does_not_overwrite_a_cancellation() {
        let f = fixture().await;
        let ctx = EventContext::default();
        let reference = book(&f, 2).await;

        let service = racing_service(&f, |booking| {
            let _ = booking.cancel("changed plans", test_clock().now()).unwrap();
        });
        let err = service.process_payment(&reference, "PAY-7", &ctx).await.unwrap_err();

        assert!(matches!(err.domain(), Some(DomainError::StateConflict(_))));
        let stored = f.service.get_booking(&reference).await.unwrap();
        assert_eq!(stored.status(), BookingStatus::Cancelled);
        assert_eq!(stored.payment_status(), PaymentStatus::Pending);
        assert_eq!(f.store.bookable_seats(f.flight.id()), Some(5));
    }

    #[tokio::test]
    async fn saved_bookings_carry_the_stored_version() {
        let f = fixture().await;
        let ctx = EventContext::default();
        let reference = book(&f, 1).await;

        let confirmed = f.service.confirm_booking(&reference, &ctx).await.unwrap();
        assert_eq!(confirmed, f.service.get_booking(&reference).await.unwrap());
        assert_eq!(confirmed.version(), 1);
    }

    #[tokio::test]
    async fn lookups_accept_lower_case_references() {
        let f = fixture().await;
        let reference = book(&f, 1).await;

        let booking = f.service.get_booking(&reference.to_lowercase()).await.unwrap();
        assert_eq!(booking.reference().as_str(), reference);

        let err = f.service.get_booking("ZZZZZZ").await.unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::NotFound { .. })));
        let err = f.service.get_booking("bad").await.unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::Validation(_))));
    }

    #[tokio::test]
    async fn special_requests_are_saved_without_events() {
        let f = fixture().await;
        let ctx = EventContext::default();
        let reference = book(&f, 1).await;
        let outbox_before = f.store.pending_outbox_count();

        let updated = f
            .service
            .update_special_requests(&reference, " Window seat ", &ctx)
            .await
            .unwrap();
        assert_eq!(updated.special_requests(), "Window seat");
        assert_eq!(f.store.pending_outbox_count(), outbox_before);
        assert_eq!(f.service.get_booking(&reference).await.unwrap(), updated);
    }

    #[tokio::test]
    async fn submit_publishes_request_without_booking() {
        let f = fixture().await;
        let request_id = f
            .service
            .submit_booking(request(f.flight.id(), 1), &EventContext::correlated("corr-2"))
            .await
            .unwrap();

        let published = f.bus.published_to("submit-booking");
        assert_eq!(published.len(), 1);
        let submitted: BookingSubmitted = published[0].decode().unwrap();
        assert_eq!(submitted.request_id, request_id);
        assert_eq!(f.store.bookable_seats(f.flight.id()), Some(5));

        let err = f
            .service
            .submit_booking(request(FlightId::new(), 1), &EventContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::NotFound { .. })));
    }

    #[tokio::test]
    async fn listings_by_passenger_and_flight() {
        let f = fixture().await;
        let created = f
            .service
            .create_booking(request(f.flight.id(), 1), &EventContext::default())
            .await
            .unwrap();
        book(&f, 1).await;

        let by_passenger = f.service.get_passenger_bookings(created.passenger.id()).await.unwrap();
        assert_eq!(by_passenger.len(), 2);
        let by_flight = f.service.get_flight_bookings(f.flight.id()).await.unwrap();
        assert_eq!(by_flight.len(), 2);
        assert!(f.service.get_passenger_bookings(PassengerId::new()).await.is_err());
    }
}
