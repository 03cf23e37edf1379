//! Airports and flights.
//!
//! The active-airport list is read on every search form and changes rarely,
//! so it is served from the cache and dropped on every airport write.

use crate::aggregates::{Airport, AirportInfo, Flight, NewFlight, StatusUpdate};
use crate::error::{DomainError, ServiceError};
use crate::events::{EventContext, serialize_all};
use crate::infra::Cache;
use crate::repository::{AirportRepository, FlightRepository, Repositories};
use crate::types::{AirportCode, FlightId, FlightStatus, Money};
use chrono::NaiveDate;
use flight_booking_core::environment::Clock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{info, warn};

/// Cache key of the active-airport list.
pub const ACTIVE_AIRPORTS_KEY: &str = "airports:active";

/// How long the active-airport list is cached.
pub const ACTIVE_AIRPORTS_TTL: Duration = Duration::from_secs(10 * 60);

/// Catalog of airports and scheduled flights.
#[derive(Clone)]
pub struct CatalogService {
    airports: Arc<dyn AirportRepository>,
    flights: Arc<dyn FlightRepository>,
    cache: Arc<dyn Cache>,
    relay: Option<Arc<Notify>>,
    clock: Arc<dyn Clock>,
}

impl CatalogService {
    /// Catalog over the store's repositories.
    #[must_use]
    pub fn new(repos: &Repositories, cache: Arc<dyn Cache>, clock: Arc<dyn Clock>) -> Self {
        Self {
            airports: repos.airports.clone(),
            flights: repos.flights.clone(),
            cache,
            relay: None,
            clock,
        }
    }

    /// Wake this relay after flight writes.
    #[must_use]
    pub fn with_relay(mut self, notify: Arc<Notify>) -> Self {
        self.relay = Some(notify);
        self
    }

    // ========================================================================
    // Airports
    // ========================================================================

    /// Active airports ordered by code.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Repository`] if the store fails on a cache miss.
    pub async fn get_active_airports(&self) -> Result<Vec<Airport>, ServiceError> {
        match self.cache.get_json::<Vec<Airport>>(ACTIVE_AIRPORTS_KEY).await {
            Ok(Some(airports)) => return Ok(airports),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Ignoring unreadable airport cache entry"),
        }

        let airports = self.airports.list_active().await?;
        if let Err(e) = self
            .cache
            .set_json(ACTIVE_AIRPORTS_KEY, &airports, ACTIVE_AIRPORTS_TTL)
            .await
        {
            warn!(error = %e, "Failed to cache active airports");
        }
        Ok(airports)
    }

    /// Airport by code.
    ///
    /// # Errors
    ///
    /// [`DomainError::Validation`] for a malformed code,
    /// [`DomainError::NotFound`] for an unknown one.
    pub async fn get_airport(&self, code: &str) -> Result<Airport, ServiceError> {
        let code = AirportCode::parse(code)?;
        self.load_airport(&code).await
    }

    /// Add an active airport.
    ///
    /// # Errors
    ///
    /// [`DomainError::Validation`] for bad input,
    /// [`DomainError::StateConflict`] if the code is taken.
    pub async fn add_airport(&self, code: &str, info: AirportInfo) -> Result<Airport, ServiceError> {
        let airport = Airport::new(code, info, self.clock.now())?;
        self.airports.insert(&airport).await.map_err(|e| {
            ServiceError::conflict_on_duplicate(e, || {
                format!("Airport {} already exists", airport.code())
            })
        })?;
        self.invalidate_airports().await;
        info!(airport = %airport.code(), "Airport added");
        Ok(airport)
    }

    /// Replace an airport's name, city, country and timezone.
    ///
    /// # Errors
    ///
    /// [`DomainError::NotFound`] for an unknown code,
    /// [`DomainError::Validation`] for a blank field.
    pub async fn update_airport(&self, code: &str, info: AirportInfo) -> Result<Airport, ServiceError> {
        let mut airport = self.get_airport(code).await?;
        airport.update_info(info, self.clock.now())?;
        self.airports.update(&airport).await?;
        self.invalidate_airports().await;
        Ok(airport)
    }

    /// Open or close an airport for new flights.
    ///
    /// # Errors
    ///
    /// [`DomainError::NotFound`] for an unknown code.
    pub async fn set_airport_active(&self, code: &str, active: bool) -> Result<Airport, ServiceError> {
        let mut airport = self.get_airport(code).await?;
        let now = self.clock.now();
        if active {
            airport.activate(now);
        } else {
            airport.deactivate(now);
        }
        self.airports.update(&airport).await?;
        self.invalidate_airports().await;
        info!(airport = %airport.code(), active, "Airport availability changed");
        Ok(airport)
    }

    async fn load_airport(&self, code: &AirportCode) -> Result<Airport, ServiceError> {
        self.airports
            .get(code)
            .await?
            .ok_or_else(|| DomainError::not_found("Airport", code).into())
    }

    async fn invalidate_airports(&self) {
        if let Err(e) = self.cache.remove(ACTIVE_AIRPORTS_KEY).await {
            warn!(error = %e, "Failed to invalidate airport cache");
        }
    }

    // ========================================================================
    // Flights
    // ========================================================================

    /// Schedule a flight between two active airports.
    ///
    /// # Errors
    ///
    /// [`DomainError::Validation`] for bad input or an inactive airport,
    /// [`DomainError::NotFound`] for an unknown airport,
    /// [`DomainError::StateConflict`] if the flight number already departs that day.
    pub async fn add_flight(
        &self,
        new_flight: NewFlight,
        context: &EventContext,
    ) -> Result<Flight, ServiceError> {
        let now = self.clock.now();
        let (flight, events) = Flight::schedule(new_flight, now)?;

        for code in [flight.departure_airport(), flight.arrival_airport()] {
            let airport = self.load_airport(code).await?;
            if !airport.is_active() {
                return Err(DomainError::validation(format!("Airport {code} is not active")).into());
            }
        }

        let date = flight.departure_time().date_naive();
        let clash = || format!("Flight {} already departs on {date}", flight.flight_number());
        if self.flights.exists_on_date(flight.flight_number(), date).await? {
            return Err(DomainError::conflict(clash()).into());
        }

        let serialized = serialize_all(&events, &flight.id().to_string(), context, now)?;
        self.flights
            .insert(&flight, &serialized)
            .await
            .map_err(|e| ServiceError::conflict_on_duplicate(e, clash))?;
        self.wake_relay();

        info!(
            flight_id = %flight.id(),
            flight_number = %flight.flight_number(),
            from = %flight.departure_airport(),
            to = %flight.arrival_airport(),
            "Flight scheduled"
        );
        Ok(flight)
    }

    /// Flight by id.
    ///
    /// # Errors
    ///
    /// [`DomainError::NotFound`] for an unknown id.
    pub async fn get_flight(&self, id: FlightId) -> Result<Flight, ServiceError> {
        self.flights
            .get(id)
            .await?
            .ok_or_else(|| DomainError::not_found("Flight", id).into())
    }

    /// Scheduled flights from `from` to `to` on `date` with room for
    /// `passengers`, earliest departure first.
    ///
    /// # Errors
    ///
    /// [`DomainError::Validation`] for a malformed airport code or zero passengers.
    pub async fn search_flights(
        &self,
        from: &str,
        to: &str,
        date: NaiveDate,
        passengers: u32,
    ) -> Result<Vec<Flight>, ServiceError> {
        let from = AirportCode::parse(from)?;
        let to = AirportCode::parse(to)?;
        if passengers == 0 {
            return Err(DomainError::validation("Passengers must be at least 1").into());
        }
        Ok(self.flights.search(&from, &to, date, passengers).await?)
    }

    /// Change a flight's operational status.
    ///
    /// # Errors
    ///
    /// [`DomainError::NotFound`] for an unknown id, and the status rules of
    /// [`Flight::update_status`].
    pub async fn update_flight_status(
        &self,
        id: FlightId,
        status: FlightStatus,
        update: StatusUpdate,
        context: &EventContext,
    ) -> Result<Flight, ServiceError> {
        let mut flight = self.get_flight(id).await?;
        let now = self.clock.now();
        let events = flight.update_status(status, update, now)?;
        self.save_flight(&flight, &events, context, now).await?;
        info!(flight_id = %id, status = ?status, "Flight status updated");
        Ok(flight)
    }

    /// Change a flight's base price. Existing bookings keep their price.
    ///
    /// # Errors
    ///
    /// [`DomainError::NotFound`] for an unknown id.
    pub async fn update_flight_price(
        &self,
        id: FlightId,
        price: Money,
        context: &EventContext,
    ) -> Result<Flight, ServiceError> {
        let mut flight = self.get_flight(id).await?;
        let now = self.clock.now();
        let events = flight.update_price(price, now);
        self.save_flight(&flight, &events, context, now).await?;
        info!(flight_id = %id, price = %price, "Flight price updated");
        Ok(flight)
    }

    async fn save_flight(
        &self,
        flight: &Flight,
        events: &[crate::events::FlightEvent],
        context: &EventContext,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), ServiceError> {
        let serialized = serialize_all(events, &flight.id().to_string(), context, now)?;
        self.flights.update_details(flight, &serialized).await?;
        if !serialized.is_empty() {
            self.wake_relay();
        }
        Ok(())
    }

    fn wake_relay(&self) {
        if let Some(notify) = &self.relay {
            notify.notify_one();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::aggregates::airport::tests::info;
    use crate::aggregates::flight::tests::new_flight;
    use crate::infra::InMemoryCache;
    use crate::repository::memory::InMemoryStore;
    use chrono::Duration as ChronoDuration;
    use flight_booking_testing::test_clock;

    struct Fixture {
        store: InMemoryStore,
        cache: Arc<dyn Cache>,
        catalog: CatalogService,
    }

    async fn fixture() -> Fixture {
        let store = InMemoryStore::new();
        let cache: Arc<dyn Cache> = Arc::new(InMemoryCache::new());
        let catalog = CatalogService::new(&store.repositories(), cache.clone(), Arc::new(test_clock()));
        catalog.add_airport("can", info("Baiyun", "Guangzhou")).await.unwrap();
        catalog.add_airport("pek", info("Capital", "Beijing")).await.unwrap();
        Fixture { store, cache, catalog }
    }

    fn price(cents: u64) -> Money {
        Money::from_cents(cents)
    }

    #[tokio::test]
    async fn active_airports_are_cached_until_a_write() {
        let f = fixture().await;

        let airports = f.catalog.get_active_airports().await.unwrap();
        assert_eq!(airports.len(), 2);
        assert!(f.cache.exists(ACTIVE_AIRPORTS_KEY).await.unwrap());

        f.catalog.set_airport_active("PEK", false).await.unwrap();
        assert!(!f.cache.exists(ACTIVE_AIRPORTS_KEY).await.unwrap());

        let airports = f.catalog.get_active_airports().await.unwrap();
        assert_eq!(airports.len(), 1);
        assert_eq!(airports[0].code().as_str(), "CAN");
    }

    #[tokio::test]
    async fn duplicate_airport_is_a_conflict() {
        let f = fixture().await;
        let err = f.catalog.add_airport("CAN", info("Other", "Guangzhou")).await.unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::StateConflict(_))));
    }

    #[tokio::test]
    async fn flights_need_active_airports_and_unique_numbers() {
        let f = fixture().await;
        let ctx = EventContext::default();

        let flight = f.catalog.add_flight(new_flight(100, price(80_000)), &ctx).await.unwrap();
        assert_eq!(flight.flight_number(), "CZ3456");
        assert_eq!(f.store.pending_outbox_count(), 1);

        let err = f.catalog.add_flight(new_flight(100, price(80_000)), &ctx).await.unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::StateConflict(_))));

        let mut next_day = new_flight(100, price(80_000));
        next_day.departure_time += ChronoDuration::days(1);
        next_day.arrival_time += ChronoDuration::days(1);
        f.catalog.add_flight(next_day, &ctx).await.unwrap();

        f.catalog.set_airport_active("PEK", false).await.unwrap();
        let mut other = new_flight(100, price(80_000));
        other.flight_number = "CZ9".to_string();
        let err = f.catalog.add_flight(other.clone(), &ctx).await.unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::Validation(_))));

        other.arrival_airport = "sha".to_string();
        let err = f.catalog.add_flight(other, &ctx).await.unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::NotFound { .. })));
    }

    #[tokio::test]
    async fn search_filters_by_route_date_and_seats() {
        let f = fixture().await;
        let ctx = EventContext::default();
        let flight = f.catalog.add_flight(new_flight(3, price(80_000)), &ctx).await.unwrap();
        let date = flight.departure_time().date_naive();

        let found = f.catalog.search_flights("can", "pek", date, 3).await.unwrap();
        assert_eq!(found.len(), 1);
        assert!(f.catalog.search_flights("can", "pek", date, 4).await.unwrap().is_empty());
        assert!(f.catalog.search_flights("pek", "can", date, 1).await.unwrap().is_empty());
        assert!(f.catalog.search_flights("can", "pek", date.succ_opt().unwrap(), 1).await.unwrap().is_empty());
        assert!(f.catalog.search_flights("can", "pek", date, 0).await.is_err());

        f.catalog
            .update_flight_status(flight.id(), FlightStatus::Cancelled, StatusUpdate::default(), &ctx)
            .await
            .unwrap();
        assert!(f.catalog.search_flights("can", "pek", date, 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn price_and_status_updates_are_persisted() {
        let f = fixture().await;
        let ctx = EventContext::default();
        let flight = f.catalog.add_flight(new_flight(3, price(80_000)), &ctx).await.unwrap();

        f.catalog.update_flight_price(flight.id(), price(90_000), &ctx).await.unwrap();
        let delayed_to = flight.departure_time() + ChronoDuration::hours(2);
        f.catalog
            .update_flight_status(
                flight.id(),
                FlightStatus::Delayed,
                StatusUpdate {
                    reason: Some("Weather".to_string()),
                    new_departure_time: Some(delayed_to),
                },
                &ctx,
            )
            .await
            .unwrap();

        let stored = f.catalog.get_flight(flight.id()).await.unwrap();
        assert_eq!(stored.base_price(), price(90_000));
        assert_eq!(stored.status(), FlightStatus::Delayed);
        assert_eq!(stored.departure_time(), delayed_to);
        // Created, PriceChanged, StatusChanged, Delayed.
        assert_eq!(f.store.pending_outbox_count(), 4);
    }
}
