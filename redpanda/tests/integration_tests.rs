//! Integration tests for [`RedpandaEventBus`] against a real Kafka broker.
//!
//! Ignored by default: they need Docker and take a while to start the broker.
//!
//! ```bash
//! cargo test -p flight-booking-redpanda --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use chrono::Utc;
use flight_booking_core::event::{EventMetadata, SerializedEvent};
use flight_booking_core::event_bus::{EventBus, EventBusError, EventStream};
use flight_booking_redpanda::{RedpandaEventBus, StartFrom};
use futures::StreamExt;
use std::time::Duration;
use testcontainers::ImageExt;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};

fn booking_event(event_type: &str, reference: &str, data: Vec<u8>) -> SerializedEvent {
    SerializedEvent::new(
        event_type.to_string(),
        data,
        Some(EventMetadata::for_aggregate(reference, Utc::now())),
    )
}

async fn start_broker() -> (testcontainers::ContainerAsync<Kafka>, String) {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("Failed to start Kafka container");

    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");
    (kafka, format!("{host}:{port}"))
}

/// Publish a warmup message until the topic exists and metadata has settled.
async fn ensure_topic(bus: &RedpandaEventBus, topic: &str) {
    let warmup = SerializedEvent::new("warmup".to_string(), vec![0], None);
    for attempt in 1..=60 {
        if bus.publish(topic, &warmup).await.is_ok() {
            tokio::time::sleep(Duration::from_secs(2)).await;
            return;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(attempt != 60, "topic {topic} never became available");
    }
}

async fn collect(
    stream: &mut EventStream,
    count: usize,
) -> Vec<SerializedEvent> {
    let mut received = Vec::new();
    tokio::time::timeout(Duration::from_secs(20), async {
        while received.len() < count {
            match stream.next().await {
                Some(Ok(event)) if event.event_type != "warmup" => received.push(event),
                Some(Ok(_)) => {},
                Some(Err(e)) => panic!("stream error: {e}"),
                None => break,
            }
        }
    })
    .await
    .expect("timed out waiting for events");
    received
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn booking_events_round_trip_with_metadata() {
    let (_kafka, brokers) = start_broker().await;
    let bus = RedpandaEventBus::builder()
        .brokers(&brokers)
        .consumer_group("round-trip")
        .build()
        .expect("bus");

    ensure_topic(&bus, "booking-created").await;
    assert!(bus.is_healthy().await);

    let mut stream = bus.subscribe(&["booking-created"]).await.expect("subscribe");

    bus.publish("booking-created", &booking_event("BookingCreated.v1", "ABC123", vec![1, 2]))
        .await
        .expect("publish");

    let received = collect(&mut stream, 1).await;
    assert_eq!(received[0].event_type, "BookingCreated.v1");
    assert_eq!(received[0].data, vec![1, 2]);
    assert_eq!(received[0].aggregate_id(), Some("ABC123"));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn events_of_one_booking_keep_their_order() {
    let (_kafka, brokers) = start_broker().await;
    let bus = RedpandaEventBus::builder()
        .brokers(&brokers)
        .consumer_group("ordering")
        .build()
        .expect("bus");

    ensure_topic(&bus, "domain-events").await;
    let mut stream = bus.subscribe(&["domain-events"]).await.expect("subscribe");

    for step in 0..10u8 {
        bus.publish("domain-events", &booking_event("Step.v1", "XYZ789", vec![step]))
            .await
            .expect("publish");
    }

    let received = collect(&mut stream, 10).await;
    let steps: Vec<u8> = received.iter().map(|e| e.data[0]).collect();
    assert_eq!(steps, (0..10).collect::<Vec<u8>>());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn subscription_spans_several_channels() {
    let (_kafka, brokers) = start_broker().await;
    let bus = RedpandaEventBus::builder()
        .brokers(&brokers)
        .build()
        .expect("bus");

    ensure_topic(&bus, "booking-paid").await;
    ensure_topic(&bus, "booking-refunded").await;

    let mut stream = bus
        .subscribe(&["booking-paid", "booking-refunded"])
        .await
        .expect("subscribe");

    bus.publish("booking-paid", &booking_event("BookingPaid.v1", "AAA111", vec![1]))
        .await
        .expect("publish");
    bus.publish("booking-refunded", &booking_event("BookingRefunded.v1", "AAA111", vec![2]))
        .await
        .expect("publish");

    let mut types: Vec<String> = collect(&mut stream, 2)
        .await
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    types.sort();
    assert_eq!(types, vec!["BookingPaid.v1", "BookingRefunded.v1"]);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn empty_channel_list_is_rejected() {
    let (_kafka, brokers) = start_broker().await;
    let bus = RedpandaEventBus::builder()
        .brokers(&brokers)
        .start_from(StartFrom::Latest)
        .build()
        .expect("bus");
    assert!(matches!(
        bus.subscribe(&[]).await,
        Err(EventBusError::Subscribe { .. })
    ));
    assert!(matches!(
        bus.publish("", &booking_event("BookingPaid.v1", "AAA111", vec![])).await,
        Err(EventBusError::EmptyChannel)
    ));
}
