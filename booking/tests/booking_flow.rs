//! End-to-end booking flows over the in-memory backends: services, outbox
//! relay, event bus and the background consumers wired by `bootstrap`.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use chrono::{Duration, TimeZone, Utc};
use flight_booking::aggregates::{AirportInfo, NewFlight};
use flight_booking::bootstrap::{self, Resources};
use flight_booking::config::Config;
use flight_booking::events::EventContext;
use flight_booking::repository::memory::InMemoryStore;
use flight_booking::{
    BookingCreationOptions, BookingStatus, CabinClass, CatalogService, DomainError,
    FlightBookingService, FlightId, Gender, Money, PassengerProfile,
};
use flight_booking_core::environment::Clock;
use flight_booking_testing::{InMemoryEventBus, test_clock};
use std::sync::Arc;
use tokio::sync::broadcast;

const SECRET: &str = "integration-secret-integration-secret";

struct Harness {
    store: InMemoryStore,
    bus: InMemoryEventBus,
    resources: Resources,
    catalog: CatalogService,
    bookings: FlightBookingService,
}

fn harness() -> Harness {
    let store = InMemoryStore::new();
    let bus = InMemoryEventBus::new();
    let resources = Resources::in_memory(&store, Arc::new(bus.clone()), Arc::new(test_clock()));
    let catalog = CatalogService::new(
        &resources.repos,
        Arc::clone(&resources.cache),
        Arc::clone(&resources.clock),
    );
    let bookings = FlightBookingService::new(
        &resources.repos,
        Arc::clone(&resources.event_bus),
        Arc::clone(&resources.clock),
    );
    Harness {
        store,
        bus,
        resources,
        catalog,
        bookings,
    }
}

fn config() -> Config {
    Config::from_lookup(|name| match name {
        "JWT_SECRET" => Some(SECRET.to_string()),
        "OUTBOX_POLL_INTERVAL_MS" => Some("20".to_string()),
        "CONSUMER_RETRY_DELAY_SECS" => Some("1".to_string()),
        _ => None,
    })
    .expect("test configuration is valid")
}

fn airport(name: &str, city: &str) -> AirportInfo {
    AirportInfo {
        name: name.to_string(),
        city: city.to_string(),
        country: "China".to_string(),
        timezone: "Asia/Shanghai".to_string(),
    }
}

async fn schedule_flight(h: &Harness, total_seats: u32) -> FlightId {
    let ctx = EventContext::default();
    for (code, name, city) in [
        ("CAN", "Baiyun International", "Guangzhou"),
        ("PEK", "Capital International", "Beijing"),
    ] {
        if h.catalog.get_airport(code).await.is_err() {
            h.catalog.add_airport(code, airport(name, city)).await.unwrap();
        }
    }

    let departure = test_clock().now() + Duration::days(14);
    h.catalog
        .add_flight(
            NewFlight {
                flight_number: format!("CZ{}", 3000 + total_seats),
                airline_code: "CZ".to_string(),
                airline_name: "China Southern".to_string(),
                departure_airport: "CAN".to_string(),
                departure_time: departure,
                departure_terminal: "T2".to_string(),
                arrival_airport: "PEK".to_string(),
                arrival_time: departure + Duration::hours(3),
                arrival_terminal: "T3".to_string(),
                aircraft_type: "A321".to_string(),
                total_seats,
                base_price: Money::from_cents(85_000),
            },
            &ctx,
        )
        .await
        .unwrap()
        .id()
}

fn traveller(index: usize) -> PassengerProfile {
    PassengerProfile {
        first_name: "Lin".to_string(),
        last_name: format!("Traveller{index}"),
        date_of_birth: Utc.with_ymd_and_hms(1985, 3, 9, 0, 0, 0).unwrap(),
        gender: Gender::Other,
        passport_number: format!("G{:08}", index),
        passport_country: "CN".to_string(),
        passport_expiry: test_clock().now() + Duration::days(2 * 365),
        nationality: "Chinese".to_string(),
        email: format!("lin.{index}@example.com"),
        phone: "+86 139 0000 0000".to_string(),
    }
}

fn request(flight_id: FlightId, index: usize, seats: u32) -> BookingCreationOptions {
    BookingCreationOptions {
        flight_id,
        passenger: traveller(index),
        seats,
        cabin_class: CabinClass::Business,
        special_requests: String::new(),
    }
}

#[tokio::test]
async fn concurrent_bookings_never_oversell() {
    let h = harness();
    let flight_id = schedule_flight(&h, 5).await;

    let attempts = (0..10).map(|i| {
        let bookings = h.bookings.clone();
        tokio::spawn(async move {
            bookings
                .create_booking(request(flight_id, i, 1), &EventContext::default())
                .await
        })
    });
    let results = futures::future::join_all(attempts).await;

    let mut booked = 0;
    let mut rejected = 0;
    for result in results {
        match result.expect("task completes") {
            Ok(_) => booked += 1,
            Err(e) => {
                assert!(matches!(e.domain(), Some(DomainError::Capacity { .. })), "{e}");
                rejected += 1;
            }
        }
    }

    assert_eq!(booked, 5);
    assert_eq!(rejected, 5);
    assert_eq!(h.store.bookable_seats(flight_id), Some(0));
    assert_eq!(h.bookings.get_flight_bookings(flight_id).await.unwrap().len(), 5);
}

#[tokio::test]
async fn business_fare_and_lifecycle_events_reach_the_bus() {
    let h = harness();
    let flight_id = schedule_flight(&h, 4).await;
    let relay = bootstrap::outbox_relay(&config(), &h.resources);
    let ctx = EventContext::correlated("flow-1").with_user("agent-7");

    let created = h.bookings.create_booking(request(flight_id, 1, 2), &ctx).await.unwrap();
    assert!(created.passenger_registered);
    // 850.00 x 2.5 x 2 seats
    assert_eq!(created.booking.total_amount(), Money::from_cents(425_000));

    let reference = created.booking.reference().to_string();
    h.bookings.confirm_booking(&reference, &ctx).await.unwrap();
    h.bookings.process_payment(&reference, "TXN-42", &ctx).await.unwrap();
    let cancelled = h.bookings.cancel_booking(&reference, Some("Plans changed"), &ctx).await.unwrap();
    assert_eq!(cancelled.status(), BookingStatus::Cancelled);
    assert_eq!(h.store.bookable_seats(flight_id), Some(4));

    let report = relay.relay_pending().await.unwrap();
    assert!(report.published >= 4, "{report:?}");
    assert_eq!(h.store.pending_outbox_count(), 0);

    for channel in ["booking-created", "booking-confirmed", "booking-paid", "booking-cancelled"] {
        let events = h.bus.published_to(channel);
        assert_eq!(events.len(), 1, "{channel}");
        assert_eq!(events[0].correlation_id(), Some("flow-1"));
    }
}

#[tokio::test]
async fn submitted_request_is_booked_by_the_consumer() {
    let h = harness();
    let flight_id = schedule_flight(&h, 3).await;
    let config = config();

    let (shutdown_tx, _) = broadcast::channel(1);
    let relay = bootstrap::outbox_relay(&config, &h.resources);
    let workers = bootstrap::spawn_workers(
        &config,
        &h.resources,
        relay,
        h.bookings.clone(),
        &shutdown_tx,
    );
    // Let the consumers subscribe before anything is published.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    h.bookings
        .submit_booking(request(flight_id, 9, 2), &EventContext::correlated("async-1"))
        .await
        .unwrap();
    assert_eq!(h.bus.published_to("submit-booking").len(), 1);

    let mut booked = Vec::new();
    for _ in 0..100 {
        booked = h.bookings.get_flight_bookings(flight_id).await.unwrap();
        if !booked.is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert_eq!(booked.len(), 1);
    assert_eq!(booked[0].seats(), 2);
    assert_eq!(h.store.bookable_seats(flight_id), Some(1));

    // The relay publishes the BookingCreated raised by the consumer.
    let mut created = Vec::new();
    for _ in 0..100 {
        created = h.bus.published_to("booking-created");
        if !created.is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert_eq!(created.len(), 1);

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(
        std::time::Duration::from_secs(5),
        futures::future::join_all(workers),
    )
    .await
    .expect("workers stop on shutdown");
}
