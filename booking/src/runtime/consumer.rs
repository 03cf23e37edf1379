//! Event bus consumer with reconnection and redelivery.
//!
//! ```text
//! loop {
//!     subscribe ──► for each event:
//!                       handle ──► ok: next event
//!                              └─► err: redeliver (or dead-letter after max attempts)
//!     stream ended or subscribe failed: wait retry_delay, subscribe again
//! }
//! ```
//!
//! A failing event is retried before the next one is read, so a subscription
//! keeps its order. With `max_attempts == 0` redelivery is unlimited.

use super::handlers::{EventHandler, HandlerError};
use async_trait::async_trait;
use flight_booking_core::event::SerializedEvent;
use flight_booking_core::event_bus::{EventBus, EventStream};
use flight_booking_postgres::DeadLetterQueue;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Where events go after their last failed attempt.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Keep `event` for inspection.
    ///
    /// # Errors
    ///
    /// Returns an error if the event could not be stored.
    async fn dead_letter(
        &self,
        consumer: &str,
        event: &SerializedEvent,
        error: &str,
        attempts: u32,
    ) -> Result<(), HandlerError>;
}

#[async_trait]
impl DeadLetterSink for DeadLetterQueue {
    async fn dead_letter(
        &self,
        consumer: &str,
        event: &SerializedEvent,
        error: &str,
        attempts: u32,
    ) -> Result<(), HandlerError> {
        self.park(consumer, event, error, attempts).await?;
        Ok(())
    }
}

/// How failed events are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedeliveryPolicy {
    /// Attempts before dead-lettering; 0 retries forever
    pub max_attempts: u32,
    /// Pause between attempts
    pub delay: Duration,
}

impl Default for RedeliveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            delay: Duration::ZERO,
        }
    }
}

enum Delivery {
    Done,
    ShutDown,
}

/// Consumes one subscription and feeds every event to a handler.
pub struct EventConsumer {
    name: String,
    topics: Vec<String>,
    event_bus: Arc<dyn EventBus>,
    handler: Arc<dyn EventHandler>,
    shutdown: broadcast::Receiver<()>,
    retry_delay: Duration,
    redelivery: RedeliveryPolicy,
    dead_letters: Option<Arc<dyn DeadLetterSink>>,
}

impl EventConsumer {
    /// Consumer reconnecting after 5 s and redelivering failures forever.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        topics: Vec<String>,
        event_bus: Arc<dyn EventBus>,
        handler: Arc<dyn EventHandler>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            name: name.into(),
            topics,
            event_bus,
            handler,
            shutdown,
            retry_delay: Duration::from_secs(5),
            redelivery: RedeliveryPolicy::default(),
            dead_letters: None,
        }
    }

    /// Set the wait before resubscribing.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the redelivery policy.
    #[must_use]
    pub const fn with_redelivery(mut self, policy: RedeliveryPolicy) -> Self {
        self.redelivery = policy;
        self
    }

    /// Store events that exhaust their attempts in `sink`.
    #[must_use]
    pub fn with_dead_letters(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.dead_letters = Some(sink);
        self
    }

    /// Run until shutdown in a background task.
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&mut self) {
        info!(consumer = %self.name, topics = ?self.topics, "Event consumer started");

        loop {
            let topics: Vec<&str> = self.topics.iter().map(String::as_str).collect();

            let subscribed = tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Event consumer received shutdown signal");
                    break;
                }
                result = self.event_bus.subscribe(&topics) => result,
            };

            match subscribed {
                Ok(mut stream) => {
                    info!(consumer = %self.name, "Subscribed to event bus");
                    if let Delivery::ShutDown = self.process_stream(&mut stream).await {
                        break;
                    }
                    warn!(
                        consumer = %self.name,
                        "Event stream ended, reconnecting in {:?}",
                        self.retry_delay
                    );
                }
                Err(e) => {
                    error!(
                        consumer = %self.name,
                        error = %e,
                        "Failed to subscribe to event bus, retrying in {:?}",
                        self.retry_delay
                    );
                }
            }

            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Event consumer received shutdown signal");
                    break;
                }
                () = tokio::time::sleep(self.retry_delay) => {}
            }
        }

        info!(consumer = %self.name, "Event consumer stopped");
    }

    async fn process_stream(&mut self, stream: &mut EventStream) -> Delivery {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Event consumer received shutdown signal during processing");
                    return Delivery::ShutDown;
                }
                next = stream.next() => match next {
                    Some(Ok(event)) => {
                        if let Delivery::ShutDown = self.deliver(&event).await {
                            return Delivery::ShutDown;
                        }
                    }
                    Some(Err(e)) => {
                        error!(consumer = %self.name, error = %e, "Error receiving event from stream");
                    }
                    None => return Delivery::Done,
                }
            }
        }
    }

    async fn deliver(&mut self, event: &SerializedEvent) -> Delivery {
        let mut attempts: u32 = 0;

        loop {
            attempts = attempts.saturating_add(1);
            let error = match self.handler.handle(event).await {
                Ok(()) => {
                    metrics::counter!("consumer_events_handled_total", "consumer" => self.name.clone())
                        .increment(1);
                    return Delivery::Done;
                }
                Err(e) => e.to_string(),
            };

            if self.redelivery.max_attempts > 0 && attempts >= self.redelivery.max_attempts {
                self.give_up(event, &error, attempts).await;
                return Delivery::Done;
            }

            warn!(
                consumer = %self.name,
                event_type = %event.event_type,
                correlation_id = event.correlation_id().unwrap_or("-"),
                attempts,
                error = %error,
                "Failed to handle event, redelivering"
            );
            metrics::counter!("consumer_redeliveries_total", "consumer" => self.name.clone()).increment(1);

            tokio::select! {
                biased;
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Event consumer received shutdown signal during redelivery");
                    return Delivery::ShutDown;
                }
                () = tokio::time::sleep(self.redelivery.delay) => {}
            }
        }
    }

    async fn give_up(&self, event: &SerializedEvent, error: &str, attempts: u32) {
        let Some(sink) = &self.dead_letters else {
            error!(
                consumer = %self.name,
                event_type = %event.event_type,
                attempts,
                error,
                "Dropping event after final failed attempt"
            );
            return;
        };
        if let Err(e) = sink.dead_letter(&self.name, event, error, attempts).await {
            error!(
                consumer = %self.name,
                event_type = %event.event_type,
                error = %e,
                "Failed to dead-letter event, dropping it"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use flight_booking_testing::InMemoryEventBus;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` calls, then succeeds.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    impl Flaky {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl EventHandler for Flaky {
        async fn handle(&self, _event: &SerializedEvent) -> Result<(), HandlerError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                return Err(format!("failure {call}").into());
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct Sink {
        entries: Mutex<Vec<(String, u32)>>,
    }

    #[async_trait]
    impl DeadLetterSink for Sink {
        async fn dead_letter(
            &self,
            _consumer: &str,
            event: &SerializedEvent,
            _error: &str,
            attempts: u32,
        ) -> Result<(), HandlerError> {
            self.entries.lock().unwrap().push((event.event_type.clone(), attempts));
            Ok(())
        }
    }

    fn event() -> SerializedEvent {
        SerializedEvent::new("BookingPaid.v1".to_string(), vec![], None)
    }

    async fn publish_after_subscribe(bus: &InMemoryEventBus) {
        tokio::time::sleep(Duration::from_millis(50)).await;
        bus.publish("booking-paid", &event()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn failing_event_is_redelivered_until_it_succeeds() {
        let bus = InMemoryEventBus::new();
        let handler = Flaky::new(3);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = EventConsumer::new(
            "test",
            vec!["booking-paid".to_string()],
            Arc::new(bus.clone()),
            handler.clone(),
            shutdown_rx,
        )
        .spawn();

        publish_after_subscribe(&bus).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 4);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn exhausted_event_goes_to_dead_letters() {
        let bus = InMemoryEventBus::new();
        let handler = Flaky::new(u32::MAX);
        let sink = Arc::new(Sink::default());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = EventConsumer::new(
            "test",
            vec!["booking-paid".to_string()],
            Arc::new(bus.clone()),
            handler.clone(),
            shutdown_rx,
        )
        .with_redelivery(RedeliveryPolicy {
            max_attempts: 3,
            delay: Duration::from_millis(1),
        })
        .with_dead_letters(sink.clone())
        .spawn();

        publish_after_subscribe(&bus).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            *sink.entries.lock().unwrap(),
            vec![("BookingPaid.v1".to_string(), 3)]
        );

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_interrupts_endless_redelivery() {
        let bus = InMemoryEventBus::new();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = EventConsumer::new(
            "test",
            vec!["booking-paid".to_string()],
            Arc::new(bus.clone()),
            Flaky::new(u32::MAX),
            shutdown_rx,
        )
        .with_redelivery(RedeliveryPolicy {
            max_attempts: 0,
            delay: Duration::from_millis(5),
        })
        .spawn();

        publish_after_subscribe(&bus).await;
        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
