//! In-memory event bus for tests and single-process deployments.
//!
//! Each topic is a `tokio::sync::broadcast` channel. Every published event is also
//! recorded so tests can assert on exactly what went out on which channel.

use flight_booking_core::event::SerializedEvent;
use flight_booking_core::event_bus::{BusFuture, EventBus, EventBusError, EventStream};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 1024;

/// In-memory [`EventBus`] backed by broadcast channels.
///
/// Subscribers only see events published after they subscribed, which matches a
/// broker consumer group starting from the latest offset.
#[derive(Clone)]
pub struct InMemoryEventBus {
    inner: Arc<Inner>,
}

struct Inner {
    topics: Mutex<HashMap<String, broadcast::Sender<SerializedEvent>>>,
    published: Mutex<Vec<(String, SerializedEvent)>>,
    failures_remaining: AtomicUsize,
    capacity: usize,
}

impl InMemoryEventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create an empty bus whose per-topic buffers hold `capacity` events.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                topics: Mutex::new(HashMap::new()),
                published: Mutex::new(Vec::new()),
                failures_remaining: AtomicUsize::new(0),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Make the next `count` publishes fail with [`EventBusError::Publish`].
    pub fn fail_next_publishes(&self, count: usize) {
        self.inner.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Every successfully published `(topic, event)` pair, in publish order.
    #[must_use]
    pub fn published(&self) -> Vec<(String, SerializedEvent)> {
        lock(&self.inner.published).clone()
    }

    /// Events published to a single topic, in publish order.
    #[must_use]
    pub fn published_to(&self, topic: &str) -> Vec<SerializedEvent> {
        lock(&self.inner.published)
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, e)| e.clone())
            .collect()
    }

    /// Forget the publish history.
    pub fn clear(&self) {
        lock(&self.inner.published).clear();
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<SerializedEvent> {
        lock(&self.inner.topics)
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.inner.capacity).0)
            .clone()
    }

    fn take_failure(&self) -> bool {
        self.inner
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(&self, topic: &str, event: &SerializedEvent) -> BusFuture<'_, ()> {
        let topic = topic.to_string();
        let event = event.clone();

        Box::pin(async move {
            if topic.is_empty() {
                return Err(EventBusError::EmptyChannel);
            }
            if self.take_failure() {
                return Err(EventBusError::Publish {
                    channel: topic,
                    reason: "injected failure".to_string(),
                });
            }

            // No subscribers is not an error: the event is simply not delivered.
            let _ = self.sender(&topic).send(event.clone());
            tracing::debug!(topic = %topic, event_type = %event.event_type, "Event published in memory");
            lock(&self.inner.published).push((topic, event));
            Ok(())
        })
    }

    fn subscribe(&self, topics: &[&str]) -> BusFuture<'_, EventStream> {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();

        Box::pin(async move {
            if topics.is_empty() {
                return Err(EventBusError::Subscribe {
                    channels: topics,
                    reason: "no topics given".to_string(),
                });
            }

            let streams = topics.iter().map(|topic| {
                let mut rx = self.sender(topic).subscribe();
                let topic = topic.clone();
                async_stream::stream! {
                    loop {
                        match rx.recv().await {
                            Ok(event) => yield Ok(event),
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                yield Err(EventBusError::Interrupted(format!(
                                    "subscriber on '{topic}' lagged, {skipped} events dropped"
                                )));
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
                .boxed()
            });

            Ok(Box::pin(stream::select_all(streams)) as EventStream)
        })
    }
}

// A poisoned lock only means another test thread panicked; the data is still usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn event(kind: &str) -> SerializedEvent {
        SerializedEvent::new(kind.to_string(), vec![1, 2, 3], None)
    }

    #[tokio::test]
    async fn subscriber_receives_events_from_all_topics() {
        let bus = InMemoryEventBus::new();
        let mut stream = bus.subscribe(&["a", "b"]).await.unwrap();

        bus.publish("a", &event("A.v1")).await.unwrap();
        bus.publish("b", &event("B.v1")).await.unwrap();
        bus.publish("c", &event("C.v1")).await.unwrap();

        let mut seen = Vec::new();
        for _ in 0..2 {
            let next = tokio::time::timeout(Duration::from_secs(1), stream.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            seen.push(next.event_type);
        }
        seen.sort();
        assert_eq!(seen, vec!["A.v1".to_string(), "B.v1".to_string()]);
    }

    #[tokio::test]
    async fn publish_history_is_recorded_per_topic() {
        let bus = InMemoryEventBus::new();
        bus.publish("booking-confirmed", &event("BookingConfirmed.v1"))
            .await
            .unwrap();
        bus.publish("domain-events", &event("FlightCreated.v1"))
            .await
            .unwrap();

        assert_eq!(bus.published().len(), 2);
        assert_eq!(bus.published_to("booking-confirmed").len(), 1);
        bus.clear();
        assert!(bus.published().is_empty());
    }

    #[tokio::test]
    async fn injected_failures_are_consumed_in_order() {
        let bus = InMemoryEventBus::new();
        bus.fail_next_publishes(1);

        assert!(bus.publish("t", &event("X.v1")).await.is_err());
        assert!(bus.publish("t", &event("X.v1")).await.is_ok());
        assert_eq!(bus.published_to("t").len(), 1);
    }

    #[tokio::test]
    async fn empty_topic_is_rejected() {
        let bus = InMemoryEventBus::new();
        assert!(matches!(
            bus.publish("", &event("X.v1")).await,
            Err(EventBusError::EmptyChannel)
        ));
        assert!(bus.subscribe(&[]).await.is_err());
    }
}
