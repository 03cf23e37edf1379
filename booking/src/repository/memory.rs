//! In-memory store implementing every repository and the outbox.
//!
//! A single mutex guards all tables, so each write (aggregate plus outbox
//! rows, or booking plus seat release) is atomic exactly like a database
//! transaction would be.

use super::{
    AirportRepository, BookingRepository, FlightRepository, PassengerRepository, Repositories,
    RepositoryError, Result, StoreHealth, UserRepository,
};
use crate::aggregates::{Airport, Flight, FlightBooking, Passenger, User};
use crate::dispatch::channel_for;
use crate::types::{
    AirportCode, BookingReference, FlightId, FlightStatus, PassengerId, UserId, UserRole,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use flight_booking_core::event::SerializedEvent;
use flight_booking_core::outbox::{Outbox, OutboxEntry, OutboxFuture};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct Tables {
    airports: BTreeMap<String, Airport>,
    flights: HashMap<FlightId, Flight>,
    passengers: HashMap<PassengerId, Passenger>,
    bookings: HashMap<String, FlightBooking>,
    users: HashMap<UserId, User>,
    outbox: Vec<StoredEntry>,
    next_outbox_id: i64,
}

struct StoredEntry {
    entry: OutboxEntry,
    published_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl Tables {
    fn enqueue(&mut self, events: &[SerializedEvent]) {
        for event in events {
            self.next_outbox_id += 1;
            let created_at = event
                .metadata
                .as_ref()
                .and_then(|m| m.occurred_at)
                .unwrap_or_else(Utc::now);
            self.outbox.push(StoredEntry {
                entry: OutboxEntry {
                    id: self.next_outbox_id,
                    channel: channel_for(&event.event_type).to_string(),
                    event: event.clone(),
                    attempts: 0,
                    created_at,
                },
                published_at: None,
                last_error: None,
            });
        }
    }

    /// The stored booking, provided `booking` was loaded at its version.
    fn current_booking(&mut self, booking: &FlightBooking) -> Result<&mut FlightBooking> {
        let stored = self
            .bookings
            .get_mut(booking.reference().as_str())
            .ok_or_else(|| not_found("Booking", booking.reference()))?;
        if stored.version() != booking.version() {
            return Err(RepositoryError::Stale {
                resource: "Booking",
                id: booking.reference().to_string(),
            });
        }
        Ok(stored)
    }

    fn active_seats(&self, flight_id: FlightId) -> u32 {
        self.bookings
            .values()
            .filter(|b| b.flight_id() == flight_id && b.is_active())
            .map(FlightBooking::seats)
            .sum()
    }
}

/// Process-local store; clones share the same tables.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All repositories backed by this store.
    #[must_use]
    pub fn repositories(&self) -> Repositories {
        let store = Arc::new(self.clone());
        Repositories {
            airports: store.clone(),
            flights: store.clone(),
            passengers: store.clone(),
            bookings: store.clone(),
            users: store.clone(),
            outbox: store.clone(),
            health: store,
        }
    }

    /// Outbox rows not yet published.
    #[must_use]
    pub fn pending_outbox_count(&self) -> usize {
        self.lock()
            .outbox
            .iter()
            .filter(|e| e.published_at.is_none())
            .count()
    }

    /// Last recorded publish error of every pending row, oldest first.
    #[must_use]
    pub fn outbox_errors(&self) -> Vec<String> {
        self.lock()
            .outbox
            .iter()
            .filter(|e| e.published_at.is_none())
            .filter_map(|e| e.last_error.clone())
            .collect()
    }

    /// Seats currently free on a flight, if it exists and is `Scheduled`.
    #[must_use]
    pub fn bookable_seats(&self, id: FlightId) -> Option<u32> {
        self.lock()
            .flights
            .get(&id)
            .filter(|f| f.status() == FlightStatus::Scheduled)
            .map(Flight::available_seats)
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn not_found(resource: &'static str, id: impl ToString) -> RepositoryError {
    RepositoryError::NotFound {
        resource,
        id: id.to_string(),
    }
}

#[async_trait]
impl AirportRepository for InMemoryStore {
    async fn get(&self, code: &AirportCode) -> Result<Option<Airport>> {
        Ok(self.lock().airports.get(code.as_str()).cloned())
    }

    async fn list_active(&self) -> Result<Vec<Airport>> {
        Ok(self
            .lock()
            .airports
            .values()
            .filter(|a| a.is_active())
            .cloned()
            .collect())
    }

    async fn insert(&self, airport: &Airport) -> Result<()> {
        let mut tables = self.lock();
        let code = airport.code().as_str().to_string();
        if tables.airports.contains_key(&code) {
            return Err(RepositoryError::Duplicate(format!("airport code {code}")));
        }
        tables.airports.insert(code, airport.clone());
        Ok(())
    }

    async fn update(&self, airport: &Airport) -> Result<()> {
        let mut tables = self.lock();
        let slot = tables
            .airports
            .get_mut(airport.code().as_str())
            .ok_or_else(|| not_found("Airport", airport.code()))?;
        *slot = airport.clone();
        Ok(())
    }
}

#[async_trait]
impl FlightRepository for InMemoryStore {
    async fn get(&self, id: FlightId) -> Result<Option<Flight>> {
        Ok(self.lock().flights.get(&id).cloned())
    }

    async fn insert(&self, flight: &Flight, events: &[SerializedEvent]) -> Result<()> {
        let mut tables = self.lock();
        if tables.flights.contains_key(&flight.id()) {
            return Err(RepositoryError::Duplicate(format!("flight {}", flight.id())));
        }
        tables.flights.insert(flight.id(), flight.clone());
        tables.enqueue(events);
        Ok(())
    }

    async fn update_details(&self, flight: &Flight, events: &[SerializedEvent]) -> Result<()> {
        let mut tables = self.lock();
        let stored = tables
            .flights
            .get_mut(&flight.id())
            .ok_or_else(|| not_found("Flight", flight.id()))?;
        let available_seats = stored.available_seats;
        *stored = Flight {
            available_seats,
            ..flight.clone()
        };
        tables.enqueue(events);
        Ok(())
    }

    async fn exists_on_date(&self, flight_number: &str, date: NaiveDate) -> Result<bool> {
        Ok(self.lock().flights.values().any(|f| {
            f.flight_number().eq_ignore_ascii_case(flight_number)
                && f.departure_time().date_naive() == date
        }))
    }

    async fn search(
        &self,
        from: &AirportCode,
        to: &AirportCode,
        date: NaiveDate,
        seats: u32,
    ) -> Result<Vec<Flight>> {
        let mut flights: Vec<Flight> = self
            .lock()
            .flights
            .values()
            .filter(|f| {
                f.departure_airport() == from
                    && f.arrival_airport() == to
                    && f.departure_time().date_naive() == date
                    && f.can_book(seats)
            })
            .cloned()
            .collect();
        flights.sort_by_key(Flight::departure_time);
        Ok(flights)
    }

    async fn reserve_seats(&self, id: FlightId, seats: u32, now: DateTime<Utc>) -> Result<bool> {
        let mut tables = self.lock();
        let flight = tables
            .flights
            .get_mut(&id)
            .ok_or_else(|| not_found("Flight", id))?;
        Ok(flight.book_seats(seats, now).is_ok())
    }

    async fn release_seats(&self, id: FlightId, seats: u32, now: DateTime<Utc>) -> Result<()> {
        let mut tables = self.lock();
        let flight = tables
            .flights
            .get_mut(&id)
            .ok_or_else(|| not_found("Flight", id))?;
        let seats = seats.min(flight.total_seats() - flight.available_seats());
        flight
            .release_seats(seats, now)
            .map_err(|e| RepositoryError::InvalidData(e.to_string()))
    }

    async fn delete_arrived_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut tables = self.lock();
        let expired: Vec<FlightId> = tables
            .flights
            .values()
            .filter(|f| f.arrival_time() < cutoff && tables.active_seats(f.id()) == 0)
            .map(Flight::id)
            .collect();
        for id in &expired {
            tables.flights.remove(id);
        }
        tables.bookings.retain(|_, b| !expired.contains(&b.flight_id()));
        Ok(expired.len() as u64)
    }
}

#[async_trait]
impl PassengerRepository for InMemoryStore {
    async fn get(&self, id: PassengerId) -> Result<Option<Passenger>> {
        Ok(self.lock().passengers.get(&id).cloned())
    }

    async fn find_by_passport(&self, passport_number: &str) -> Result<Option<Passenger>> {
        Ok(self
            .lock()
            .passengers
            .values()
            .find(|p| p.passport_number().eq_ignore_ascii_case(passport_number.trim()))
            .cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Passenger>> {
        Ok(self
            .lock()
            .passengers
            .values()
            .find(|p| p.email().eq_ignore_ascii_case(email.trim()))
            .cloned())
    }

    async fn search_by_name(&self, query: &str) -> Result<Vec<Passenger>> {
        let query = query.trim().to_lowercase();
        let mut found: Vec<Passenger> = self
            .lock()
            .passengers
            .values()
            .filter(|p| {
                p.first_name().to_lowercase().contains(&query)
                    || p.last_name().to_lowercase().contains(&query)
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| (a.last_name(), a.first_name()).cmp(&(b.last_name(), b.first_name())));
        Ok(found)
    }

    async fn insert(&self, passenger: &Passenger, events: &[SerializedEvent]) -> Result<()> {
        let mut tables = self.lock();
        for existing in tables.passengers.values() {
            if existing.passport_number() == passenger.passport_number() {
                return Err(RepositoryError::Duplicate("passport number".to_string()));
            }
            if existing.email() == passenger.email() {
                return Err(RepositoryError::Duplicate("email".to_string()));
            }
        }
        tables.passengers.insert(passenger.id(), passenger.clone());
        tables.enqueue(events);
        Ok(())
    }

    async fn update(&self, passenger: &Passenger, events: &[SerializedEvent]) -> Result<()> {
        let mut tables = self.lock();
        let clash = tables.passengers.values().find(|p| {
            p.id() != passenger.id()
                && (p.passport_number() == passenger.passport_number()
                    || p.email() == passenger.email())
        });
        if clash.is_some() {
            return Err(RepositoryError::Duplicate(
                "passport number or email".to_string(),
            ));
        }
        let slot = tables
            .passengers
            .get_mut(&passenger.id())
            .ok_or_else(|| not_found("Passenger", passenger.id()))?;
        *slot = passenger.clone();
        tables.enqueue(events);
        Ok(())
    }
}

#[async_trait]
impl BookingRepository for InMemoryStore {
    async fn get_by_reference(
        &self,
        reference: &BookingReference,
    ) -> Result<Option<FlightBooking>> {
        Ok(self.lock().bookings.get(reference.as_str()).cloned())
    }

    async fn reference_exists(&self, reference: &BookingReference) -> Result<bool> {
        Ok(self.lock().bookings.contains_key(reference.as_str()))
    }

    async fn list_for_passenger(&self, passenger_id: PassengerId) -> Result<Vec<FlightBooking>> {
        let mut bookings: Vec<FlightBooking> = self
            .lock()
            .bookings
            .values()
            .filter(|b| b.passenger_id() == passenger_id)
            .cloned()
            .collect();
        bookings.sort_by_key(|b| std::cmp::Reverse(b.booked_at()));
        Ok(bookings)
    }

    async fn list_for_flight(&self, flight_id: FlightId) -> Result<Vec<FlightBooking>> {
        let mut bookings: Vec<FlightBooking> = self
            .lock()
            .bookings
            .values()
            .filter(|b| b.flight_id() == flight_id)
            .cloned()
            .collect();
        bookings.sort_by_key(|b| std::cmp::Reverse(b.booked_at()));
        Ok(bookings)
    }

    async fn active_seats_for_flight(&self, flight_id: FlightId) -> Result<u32> {
        Ok(self.lock().active_seats(flight_id))
    }

    async fn insert(&self, booking: &FlightBooking, events: &[SerializedEvent]) -> Result<()> {
        let mut tables = self.lock();
        let reference = booking.reference().as_str().to_string();
        if tables.bookings.contains_key(&reference) {
            return Err(RepositoryError::Duplicate(format!(
                "booking reference {reference}"
            )));
        }
        tables.bookings.insert(reference, booking.clone());
        tables.enqueue(events);
        Ok(())
    }

    async fn update(&self, booking: &FlightBooking, events: &[SerializedEvent]) -> Result<()> {
        let mut tables = self.lock();
        let slot = tables.current_booking(booking)?;
        *slot = booking.next_version();
        tables.enqueue(events);
        Ok(())
    }

    async fn save_cancellation(
        &self,
        booking: &FlightBooking,
        events: &[SerializedEvent],
    ) -> Result<()> {
        let mut tables = self.lock();
        tables.current_booking(booking)?;
        let now = booking.cancelled_at().unwrap_or_else(Utc::now);
        if let Some(flight) = tables.flights.get_mut(&booking.flight_id()) {
            flight
                .release_seats(booking.seats(), now)
                .map_err(|e| RepositoryError::InvalidData(e.to_string()))?;
        }
        tables
            .bookings
            .insert(booking.reference().as_str().to_string(), booking.next_version());
        tables.enqueue(events);
        Ok(())
    }
}

#[async_trait]
impl UserRepository for InMemoryStore {
    async fn get(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.lock().users.get(&id).cloned())
    }

    async fn find_by_login(&self, login: &str) -> Result<Option<User>> {
        let login = login.trim();
        Ok(self
            .lock()
            .users
            .values()
            .find(|u| u.username() == login || u.email().eq_ignore_ascii_case(login))
            .cloned())
    }

    async fn any_admin(&self) -> Result<bool> {
        Ok(self
            .lock()
            .users
            .values()
            .any(|u| u.role() == UserRole::Admin))
    }

    async fn insert(&self, user: &User) -> Result<()> {
        let mut tables = self.lock();
        if tables
            .users
            .values()
            .any(|u| u.username() == user.username() || u.email() == user.email())
        {
            return Err(RepositoryError::Duplicate("username or email".to_string()));
        }
        tables.users.insert(user.id(), user.clone());
        Ok(())
    }

    async fn update(&self, user: &User) -> Result<()> {
        let mut tables = self.lock();
        let slot = tables
            .users
            .get_mut(&user.id())
            .ok_or_else(|| not_found("User", user.id()))?;
        *slot = user.clone();
        Ok(())
    }
}

impl Outbox for InMemoryStore {
    fn pending(&self, limit: usize) -> OutboxFuture<'_, Vec<OutboxEntry>> {
        let entries = self
            .lock()
            .outbox
            .iter()
            .filter(|e| e.published_at.is_none())
            .take(limit)
            .map(|e| e.entry.clone())
            .collect();
        Box::pin(async move { Ok(entries) })
    }

    fn mark_published(&self, id: i64, at: DateTime<Utc>) -> OutboxFuture<'_, ()> {
        if let Some(stored) = self.lock().outbox.iter_mut().find(|e| e.entry.id == id) {
            stored.published_at = Some(at);
            stored.last_error = None;
        }
        Box::pin(async { Ok(()) })
    }

    fn record_failure(&self, id: i64, error: &str) -> OutboxFuture<'_, ()> {
        if let Some(stored) = self.lock().outbox.iter_mut().find(|e| e.entry.id == id) {
            stored.entry.attempts += 1;
            stored.last_error = Some(error.to_string());
        }
        Box::pin(async { Ok(()) })
    }
}

#[async_trait]
impl StoreHealth for InMemoryStore {
    async fn is_healthy(&self) -> bool {
        true
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::aggregates::NewBooking;
    use crate::aggregates::booking::tests::new_booking;
    use crate::aggregates::flight::tests::new_flight;
    use crate::types::{BookingStatus, CabinClass, Money};
    use flight_booking_core::environment::Clock;
    use flight_booking_core::event::EventMetadata;
    use flight_booking_testing::test_clock;

    fn flight(total: u32) -> Flight {
        Flight::schedule(new_flight(total, Money::from_cents(10_000)), test_clock().now())
            .unwrap()
            .0
    }

    fn event(kind: &str) -> SerializedEvent {
        SerializedEvent::new(
            kind.to_string(),
            vec![1],
            Some(EventMetadata::for_aggregate("agg", test_clock().now())),
        )
    }

    #[tokio::test]
    async fn reserve_is_all_or_nothing() {
        let store = InMemoryStore::new();
        let repos = store.repositories();
        let now = test_clock().now();
        let flight = flight(3);
        repos.flights.insert(&flight, &[]).await.unwrap();

        assert!(repos.flights.reserve_seats(flight.id(), 2, now).await.unwrap());
        assert!(!repos.flights.reserve_seats(flight.id(), 2, now).await.unwrap());
        assert_eq!(store.bookable_seats(flight.id()), Some(1));

        repos.flights.release_seats(flight.id(), 10, now).await.unwrap();
        assert_eq!(store.bookable_seats(flight.id()), Some(3));
    }

    #[tokio::test]
    async fn detail_updates_keep_seat_counts() {
        let store = InMemoryStore::new();
        let repos = store.repositories();
        let now = test_clock().now();
        let flight = flight(5);
        repos.flights.insert(&flight, &[]).await.unwrap();
        repos.flights.reserve_seats(flight.id(), 4, now).await.unwrap();

        // A stale copy still says five seats are free.
        let mut stale = flight.clone();
        let _ = stale.update_price(Money::from_cents(1), now);
        repos.flights.update_details(&stale, &[]).await.unwrap();

        let stored = repos.flights.get(flight.id()).await.unwrap().unwrap();
        assert_eq!(stored.available_seats(), 1);
        assert_eq!(stored.base_price(), Money::from_cents(1));
    }

    async fn booked(repos: &Repositories, flight: &Flight, reference: &str, seats: u32) {
        let now = test_clock().now();
        let new = NewBooking {
            reference: BookingReference::parse(reference).unwrap(),
            flight_id: flight.id(),
            ..new_booking(seats, Money::from_cents(10_000), CabinClass::Economy)
        };
        let booking = FlightBooking::create(new, now).unwrap().0;
        assert!(repos.flights.reserve_seats(flight.id(), seats, now).await.unwrap());
        repos.bookings.insert(&booking, &[]).await.unwrap();
    }

    #[tokio::test]
    async fn a_booking_releases_its_seats_once() {
        let store = InMemoryStore::new();
        let repos = store.repositories();
        let now = test_clock().now();
        let flight = flight(5);
        repos.flights.insert(&flight, &[]).await.unwrap();
        booked(&repos, &flight, "AAAAA1", 3).await;
        booked(&repos, &flight, "BBBBB2", 2).await;
        assert_eq!(store.bookable_seats(flight.id()), Some(0));

        let reference = BookingReference::parse("AAAAA1").unwrap();
        let mut first = repos.bookings.get_by_reference(&reference).await.unwrap().unwrap();
        let mut second = first.clone();
        let _ = first.cancel("first", now).unwrap();
        let _ = second.cancel("second", now).unwrap();

        repos.bookings.save_cancellation(&first, &[]).await.unwrap();
        let err = repos.bookings.save_cancellation(&second, &[]).await.unwrap_err();

        assert!(matches!(err, RepositoryError::Stale { .. }));
        assert_eq!(store.bookable_seats(flight.id()), Some(3));
        assert_eq!(repos.bookings.active_seats_for_flight(flight.id()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn a_stale_confirm_cannot_undo_a_cancellation() {
        let store = InMemoryStore::new();
        let repos = store.repositories();
        let now = test_clock().now();
        let flight = flight(5);
        repos.flights.insert(&flight, &[]).await.unwrap();
        booked(&repos, &flight, "CCCCC3", 2).await;

        let reference = BookingReference::parse("CCCCC3").unwrap();
        let mut cancelling = repos.bookings.get_by_reference(&reference).await.unwrap().unwrap();
        let mut confirming = cancelling.clone();
        let _ = cancelling.cancel("changed plans", now).unwrap();
        let _ = confirming.confirm(now).unwrap();

        repos.bookings.save_cancellation(&cancelling, &[]).await.unwrap();
        let err = repos.bookings.update(&confirming, &[event("BookingConfirmed.v1")]).await.unwrap_err();

        assert!(matches!(err, RepositoryError::Stale { .. }));
        let stored = repos.bookings.get_by_reference(&reference).await.unwrap().unwrap();
        assert_eq!(stored.status(), BookingStatus::Cancelled);
        assert_eq!(stored.version(), 1);
        assert_eq!(store.pending_outbox_count(), 0);
    }

    #[tokio::test]
    async fn outbox_routes_and_tracks_entries() {
        let store = InMemoryStore::new();
        let repos = store.repositories();
        let flight = flight(5);
        repos
            .flights
            .insert(&flight, &[event("FlightCreated.v1"), event("BookingPaid.v1")])
            .await
            .unwrap();

        let pending = repos.outbox.pending(10).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].channel, "domain-events");
        assert_eq!(pending[1].channel, "booking-paid");

        repos.outbox.record_failure(pending[0].id, "down").await.unwrap();
        repos
            .outbox
            .mark_published(pending[1].id, test_clock().now())
            .await
            .unwrap();

        let pending = repos.outbox.pending(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 1);
        assert_eq!(store.outbox_errors(), vec!["down".to_string()]);
    }
}
