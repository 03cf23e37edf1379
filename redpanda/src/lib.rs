//! Redpanda (Kafka protocol) event bus for the flight booking service.
//!
//! Each channel is a topic. The outbox relay publishes through
//! [`RedpandaEventBus`] and every consumer subscribes through it. Payloads are
//! `bincode`-encoded [`SerializedEvent`]s keyed by aggregate ID, so the events of
//! one booking stay on one partition and keep their order.
//!
//! Offsets are committed only after the subscriber received the message; a crash
//! in between redelivers it.
//!
//! ```no_run
//! use flight_booking_core::event_bus::EventBus;
//! use flight_booking_redpanda::RedpandaEventBus;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = RedpandaEventBus::builder()
//!     .brokers("localhost:9092")
//!     .consumer_group("flight-booking")
//!     .build()?;
//!
//! let mut confirmations = bus.subscribe(&["booking-confirmed"]).await?;
//! while let Some(event) = confirmations.next().await {
//!     let event = event?;
//!     println!("{} for {:?}", event.event_type, event.aggregate_id());
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use flight_booking_core::event::SerializedEvent;
use flight_booking_core::event_bus::{BusFuture, EventBus, EventBusError, EventStream};
use futures::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::mpsc;

/// Consumer group used when none is configured.
pub const DEFAULT_CONSUMER_GROUP: &str = "flight-booking";

/// Where a consumer group without committed offsets starts reading.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StartFrom {
    /// Oldest retained message
    #[default]
    Earliest,
    /// Only messages produced after the subscription
    Latest,
}

impl StartFrom {
    const fn as_config(self) -> &'static str {
        match self {
            Self::Earliest => "earliest",
            Self::Latest => "latest",
        }
    }
}

/// Event bus over a Kafka-compatible broker.
///
/// One producer per process; every [`EventBus::subscribe`] call opens its own
/// consumer in the bus's consumer group.
pub struct RedpandaEventBus {
    producer: FutureProducer,
    brokers: String,
    consumer_group: String,
    send_timeout: Duration,
    buffer: usize,
    start_from: StartFrom,
}

impl RedpandaEventBus {
    /// Start configuring a bus.
    #[must_use]
    pub fn builder() -> RedpandaEventBusBuilder {
        RedpandaEventBusBuilder::default()
    }

    /// Bootstrap servers.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// Consumer group of every subscription.
    #[must_use]
    pub fn consumer_group(&self) -> &str {
        &self.consumer_group
    }

    fn consumer(&self, channels: &[String]) -> Result<StreamConsumer, EventBusError> {
        let subscribe_error = |reason: String| EventBusError::Subscribe {
            channels: channels.to_vec(),
            reason,
        };

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &self.consumer_group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", self.start_from.as_config())
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "6000")
            .create()
            .map_err(|e| subscribe_error(e.to_string()))?;

        let topics: Vec<&str> = channels.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topics)
            .map_err(|e| subscribe_error(e.to_string()))?;
        Ok(consumer)
    }
}

/// Builder for [`RedpandaEventBus`].
#[derive(Debug, Default)]
pub struct RedpandaEventBusBuilder {
    brokers: Option<String>,
    consumer_group: Option<String>,
    send_timeout: Option<Duration>,
    buffer: Option<usize>,
    start_from: StartFrom,
}

impl RedpandaEventBusBuilder {
    /// Comma-separated bootstrap servers.
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Consumer group shared by all subscriptions (default `flight-booking`).
    ///
    /// Instances in the same group split the partitions of a channel.
    #[must_use]
    pub fn consumer_group(mut self, group: impl Into<String>) -> Self {
        self.consumer_group = Some(group.into());
        self
    }

    /// How long a publish may wait for the broker's acknowledgement (default 5 s).
    #[must_use]
    pub const fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = Some(timeout);
        self
    }

    /// Messages buffered per subscription (default 256, at least 1).
    #[must_use]
    pub fn buffer(mut self, messages: usize) -> Self {
        self.buffer = Some(messages.max(1));
        self
    }

    /// Where a new consumer group starts.
    #[must_use]
    pub const fn start_from(mut self, start_from: StartFrom) -> Self {
        self.start_from = start_from;
        self
    }

    /// Create the producer.
    ///
    /// # Errors
    ///
    /// [`EventBusError::Unavailable`] without brokers or when the client
    /// configuration is rejected.
    pub fn build(self) -> Result<RedpandaEventBus, EventBusError> {
        let brokers = self
            .brokers
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty())
            .ok_or_else(|| EventBusError::Unavailable("no brokers configured".to_string()))?;
        let send_timeout = self.send_timeout.unwrap_or(Duration::from_secs(5));

        // acks=all with idempotence: a retried send never duplicates an event.
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("message.timeout.ms", send_timeout.as_millis().to_string())
            .create()
            .map_err(|e| EventBusError::Unavailable(format!("producer: {e}")))?;

        let bus = RedpandaEventBus {
            producer,
            brokers,
            consumer_group: self
                .consumer_group
                .unwrap_or_else(|| DEFAULT_CONSUMER_GROUP.to_string()),
            send_timeout,
            buffer: self.buffer.unwrap_or(256),
            start_from: self.start_from,
        };
        tracing::info!(
            brokers = %bus.brokers,
            consumer_group = %bus.consumer_group,
            "Redpanda event bus ready"
        );
        Ok(bus)
    }
}

/// Message key of an event: its aggregate ID, else its type.
#[must_use]
pub fn message_key(event: &SerializedEvent) -> &str {
    event.aggregate_id().unwrap_or(&event.event_type)
}

/// Wire form of an event.
///
/// # Errors
///
/// [`EventBusError::Publish`] if the event cannot be encoded.
pub fn encode(channel: &str, event: &SerializedEvent) -> Result<Vec<u8>, EventBusError> {
    bincode::serialize(event).map_err(|e| EventBusError::Publish {
        channel: channel.to_string(),
        reason: format!("encoding failed: {e}"),
    })
}

/// Event carried by a message payload.
///
/// # Errors
///
/// [`EventBusError::Undecodable`] for a missing or malformed payload.
pub fn decode(payload: Option<&[u8]>) -> Result<SerializedEvent, EventBusError> {
    let payload = payload.ok_or_else(|| EventBusError::Undecodable("empty message".to_string()))?;
    bincode::deserialize(payload).map_err(|e| EventBusError::Undecodable(e.to_string()))
}

/// Forward messages from `consumer` to `tx`, committing each one once handed over.
async fn pump(
    consumer: StreamConsumer,
    tx: mpsc::Sender<Result<SerializedEvent, EventBusError>>,
) {
    let mut messages = consumer.stream();
    while let Some(next) = messages.next().await {
        let delivered = match next {
            Ok(message) => {
                let event = decode(message.payload());
                if tx.send(event).await.is_err() {
                    break;
                }
                commit(&consumer, &message);
                continue;
            }
            Err(e) => tx.send(Err(EventBusError::Interrupted(e.to_string()))).await,
        };
        if delivered.is_err() {
            break;
        }
    }
    tracing::debug!("Subscriber gone, Redpanda consumer stopped");
}

fn commit(consumer: &StreamConsumer, message: &BorrowedMessage<'_>) {
    if let Err(e) = consumer.commit_message(message, CommitMode::Async) {
        tracing::warn!(
            channel = message.topic(),
            partition = message.partition(),
            offset = message.offset(),
            error = %e,
            "Offset commit failed, the message may be redelivered"
        );
    }
}

impl EventBus for RedpandaEventBus {
    fn publish(&self, channel: &str, event: &SerializedEvent) -> BusFuture<'_, ()> {
        let channel = channel.to_string();
        let event = event.clone();

        Box::pin(async move {
            if channel.is_empty() {
                return Err(EventBusError::EmptyChannel);
            }
            let payload = encode(&channel, &event)?;
            let record = FutureRecord::to(&channel)
                .key(message_key(&event))
                .payload(&payload);

            match self
                .producer
                .send(record, Timeout::After(self.send_timeout))
                .await
            {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        channel = %channel,
                        event_type = %event.event_type,
                        partition,
                        offset,
                        "Event published"
                    );
                    Ok(())
                }
                Err((e, _)) => Err(EventBusError::Publish {
                    channel,
                    reason: e.to_string(),
                }),
            }
        })
    }

    fn subscribe(&self, channels: &[&str]) -> BusFuture<'_, EventStream> {
        let channels: Vec<String> = channels.iter().map(|c| (*c).to_string()).collect();

        Box::pin(async move {
            if channels.is_empty() {
                return Err(EventBusError::Subscribe {
                    channels,
                    reason: "no channels given".to_string(),
                });
            }
            let consumer = self.consumer(&channels)?;
            tracing::info!(
                channels = ?channels,
                consumer_group = %self.consumer_group,
                "Subscribed to Redpanda"
            );

            let (tx, mut rx) = mpsc::channel(self.buffer);
            tokio::spawn(pump(consumer, tx));

            let stream = async_stream::stream! {
                while let Some(item) = rx.recv().await {
                    yield item;
                }
            };
            Ok(Box::pin(stream) as EventStream)
        })
    }

    fn is_healthy(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        let producer = self.producer.clone();
        let timeout = self.send_timeout;

        // Metadata requests block the calling thread.
        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                producer
                    .client()
                    .fetch_metadata(None, Timeout::After(timeout))
                    .is_ok()
            })
            .await
            .unwrap_or(false)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use flight_booking_core::event::EventMetadata;

    fn confirmed(aggregate: Option<&str>) -> SerializedEvent {
        SerializedEvent::new(
            "BookingConfirmed.v1".to_string(),
            vec![7, 7, 7],
            aggregate.map(|id| EventMetadata::for_aggregate(id, chrono::Utc::now())),
        )
    }

    #[test]
    fn builder_needs_brokers() {
        assert!(matches!(
            RedpandaEventBus::builder().build(),
            Err(EventBusError::Unavailable(_))
        ));
        assert!(matches!(
            RedpandaEventBus::builder().brokers(" ").build(),
            Err(EventBusError::Unavailable(_))
        ));
    }

    #[test]
    fn key_is_the_aggregate_when_known() {
        assert_eq!(message_key(&confirmed(Some("0b7c5d"))), "0b7c5d");
        assert_eq!(message_key(&confirmed(None)), "BookingConfirmed.v1");
    }

    #[test]
    fn payloads_decode_back_to_the_event() {
        let event = confirmed(Some("0b7c5d"));
        let payload = encode("booking-confirmed", &event).unwrap();
        assert_eq!(decode(Some(&payload)).unwrap(), event);

        assert!(matches!(decode(None), Err(EventBusError::Undecodable(_))));
        assert!(matches!(decode(Some(&[0xff])), Err(EventBusError::Undecodable(_))));
    }

    #[test]
    fn defaults() {
        assert_eq!(StartFrom::default().as_config(), "earliest");
        assert_eq!(StartFrom::Latest.as_config(), "latest");
    }
}
