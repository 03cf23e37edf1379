//! Event-to-channel routing and the outbox relay.
//!
//! Repositories write raised events to the outbox together with the aggregate.
//! [`OutboxRelay`] drains the outbox in creation order and publishes every entry
//! on the channel it was routed to when it was enqueued.

use flight_booking_core::environment::{Clock, SystemClock};
use flight_booking_core::event_bus::EventBus;
use flight_booking_core::outbox::{Outbox, OutboxError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, broadcast};
use tracing::{debug, error, info, warn};

/// Channel for every event type without a dedicated one.
pub const DEFAULT_CHANNEL: &str = "domain-events";

/// Event type to channel.
pub const CHANNELS: &[(&str, &str)] = &[
    ("BookingCreated.v1", "booking-created"),
    ("BookingConfirmed.v1", "booking-confirmed"),
    ("BookingCancelled.v1", "booking-cancelled"),
    ("BookingPaid.v1", "booking-paid"),
    ("BookingRefunded.v1", "booking-refunded"),
    ("BookingCheckedIn.v1", "booking-checked-in"),
    ("BookingSubmitted.v1", "submit-booking"),
];

/// Channel an event type is published on.
#[must_use]
pub fn channel_for(event_type: &str) -> &'static str {
    CHANNELS
        .iter()
        .find(|(kind, _)| *kind == event_type)
        .map_or(DEFAULT_CHANNEL, |(_, channel)| channel)
}

/// Every channel a consumer may subscribe to, the fallback included.
#[must_use]
pub fn all_channels() -> Vec<&'static str> {
    CHANNELS
        .iter()
        .map(|(_, channel)| *channel)
        .chain(std::iter::once(DEFAULT_CHANNEL))
        .collect()
}

/// Outcome of one relay pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayReport {
    /// Entries published and marked
    pub published: usize,
    /// Whether the pass stopped at a failed publish
    pub stalled: bool,
}

/// Publishes outbox entries to the event bus.
///
/// Entries go out strictly in creation order: the first failure ends the pass
/// and the failed entry is retried first on the next one.
#[derive(Clone)]
pub struct OutboxRelay {
    outbox: Arc<dyn Outbox>,
    event_bus: Arc<dyn EventBus>,
    notify: Arc<Notify>,
    poll_interval: Duration,
    batch_size: usize,
    clock: Arc<dyn Clock>,
}

impl OutboxRelay {
    /// Relay polling every 500 ms in batches of 100.
    #[must_use]
    pub fn new(outbox: Arc<dyn Outbox>, event_bus: Arc<dyn EventBus>) -> Self {
        Self {
            outbox,
            event_bus,
            notify: Arc::new(Notify::new()),
            poll_interval: Duration::from_millis(500),
            batch_size: 100,
            clock: Arc::new(SystemClock),
        }
    }

    /// Set how often the outbox is polled when nobody wakes the relay.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set how many entries one pass reads.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Set the clock used to stamp published entries.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Handle that wakes the relay right after a write.
    #[must_use]
    pub fn notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }

    /// Publish pending entries until the outbox is empty or a publish fails.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError`] if the outbox itself cannot be read or updated.
    /// Publish failures are recorded on the entry, not returned.
    pub async fn relay_pending(&self) -> Result<RelayReport, OutboxError> {
        let mut report = RelayReport::default();

        loop {
            let batch = self.outbox.pending(self.batch_size).await?;
            if batch.is_empty() {
                return Ok(report);
            }
            let full_batch = batch.len() == self.batch_size;

            for entry in batch {
                match self.event_bus.publish(&entry.channel, &entry.event).await {
                    Ok(()) => {
                        self.outbox.mark_published(entry.id, self.clock.now()).await?;
                        metrics::counter!("outbox_published_total", "channel" => entry.channel.clone())
                            .increment(1);
                        debug!(
                            outbox_id = entry.id,
                            channel = %entry.channel,
                            event_type = %entry.event.event_type,
                            "Event published"
                        );
                        report.published += 1;
                    }
                    Err(e) => {
                        let reason = e.to_string();
                        self.outbox.record_failure(entry.id, &reason).await?;
                        metrics::counter!("outbox_publish_failures_total", "channel" => entry.channel.clone())
                            .increment(1);
                        warn!(
                            outbox_id = entry.id,
                            channel = %entry.channel,
                            event_type = %entry.event.event_type,
                            attempts = entry.attempts + 1,
                            error = %reason,
                            "Failed to publish event, will retry"
                        );
                        report.stalled = true;
                        return Ok(report);
                    }
                }
            }

            if !full_batch {
                return Ok(report);
            }
        }
    }

    /// Run the relay until shutdown, waking on notification or every poll interval.
    #[must_use]
    pub fn spawn(self, mut shutdown: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                poll_interval_ms = u64::try_from(self.poll_interval.as_millis()).unwrap_or(u64::MAX),
                batch_size = self.batch_size,
                "Outbox relay started"
            );

            loop {
                if let Err(e) = self.relay_pending().await {
                    error!(error = %e, "Outbox relay pass failed");
                }

                tokio::select! {
                    _ = shutdown.recv() => {
                        info!("Outbox relay received shutdown signal");
                        break;
                    }
                    () = self.notify.notified() => {}
                    () = tokio::time::sleep(self.poll_interval) => {}
                }
            }

            // Last pass so writes made just before shutdown are not held back.
            if let Err(e) = self.relay_pending().await {
                error!(error = %e, "Final outbox relay pass failed");
            }
            info!("Outbox relay stopped");
        })
    }
}
