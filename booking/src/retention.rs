//! Periodic deletion of flights that arrived long ago.
//!
//! Several instances may run the sweep; a distributed lock makes sure only one
//! of them deletes at a time.

use crate::infra::{DistributedLock, LockError};
use crate::repository::{FlightRepository, RepositoryError};
use chrono::Duration as RetentionWindow;
use flight_booking_core::environment::Clock;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Lock resource held while sweeping.
pub const RETENTION_LOCK: &str = "retention:flights";

const LOCK_TTL: Duration = Duration::from_secs(5 * 60);

/// Sweep failures.
#[derive(Error, Debug)]
pub enum RetentionError {
    /// The lock backend failed.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// The delete failed.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Deletes flights whose arrival is older than the retention window and that
/// hold no active booking.
pub struct FlightRetentionSweep {
    flights: Arc<dyn FlightRepository>,
    lock: Arc<dyn DistributedLock>,
    retention: RetentionWindow,
    interval: Duration,
    clock: Arc<dyn Clock>,
}

impl FlightRetentionSweep {
    /// Sweep keeping `retention_days` days of arrived flights, run every `interval`.
    #[must_use]
    pub fn new(
        flights: Arc<dyn FlightRepository>,
        lock: Arc<dyn DistributedLock>,
        retention_days: u32,
        interval: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            flights,
            lock,
            retention: RetentionWindow::days(i64::from(retention_days)),
            interval,
            clock,
        }
    }

    /// Run one sweep. Returns `None` when another instance holds the lock.
    ///
    /// # Errors
    ///
    /// Returns [`RetentionError`] if the lock or the delete fails.
    pub async fn sweep_once(&self) -> Result<Option<u64>, RetentionError> {
        let Some(guard) = self.lock.try_acquire(RETENTION_LOCK, LOCK_TTL).await? else {
            debug!("Retention sweep skipped, lock held elsewhere");
            return Ok(None);
        };

        let cutoff = self.clock.now() - self.retention;
        let result = self.flights.delete_arrived_before(cutoff).await;

        match self.lock.release(guard).await {
            Ok(true) => {}
            Ok(false) => warn!("Retention lock expired before the sweep finished"),
            Err(e) => warn!(error = %e, "Failed to release retention lock"),
        }

        let deleted = result?;
        if deleted > 0 {
            info!(deleted, cutoff = %cutoff, "Deleted expired flights");
        }
        Ok(Some(deleted))
    }

    /// Sweep every interval until shutdown.
    #[must_use]
    pub fn spawn(self, mut shutdown: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                retention_days = self.retention.num_days(),
                interval_secs = self.interval.as_secs(),
                "Flight retention sweep started"
            );
            let mut ticker = tokio::time::interval(self.interval);

            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        info!("Flight retention sweep received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep_once().await {
                            error!(error = %e, "Flight retention sweep failed");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::aggregates::Flight;
    use crate::aggregates::flight::tests::new_flight;
    use crate::infra::InMemoryLock;
    use crate::repository::memory::InMemoryStore;
    use crate::types::Money;
    use chrono::Duration as ChronoDuration;
    use flight_booking_testing::{FixedClock, test_clock};

    async fn store_with_flight() -> (InMemoryStore, Flight) {
        let store = InMemoryStore::new();
        let flight = Flight::schedule(new_flight(10, Money::from_cents(100)), test_clock().now())
            .unwrap()
            .0;
        store.repositories().flights.insert(&flight, &[]).await.unwrap();
        (store, flight)
    }

    fn sweep_at(store: &InMemoryStore, lock: Arc<dyn DistributedLock>, now: chrono::DateTime<chrono::Utc>) -> FlightRetentionSweep {
        FlightRetentionSweep::new(
            store.repositories().flights,
            lock,
            7,
            Duration::from_secs(3600),
            Arc::new(FixedClock::new(now)),
        )
    }

    #[tokio::test]
    async fn deletes_only_past_the_window() {
        let (store, flight) = store_with_flight().await;
        let lock: Arc<dyn DistributedLock> = Arc::new(InMemoryLock::new());

        let early = sweep_at(&store, lock.clone(), flight.arrival_time() + ChronoDuration::days(6));
        assert_eq!(early.sweep_once().await.unwrap(), Some(0));
        assert!(store.bookable_seats(flight.id()).is_some());

        let late = sweep_at(&store, lock, flight.arrival_time() + ChronoDuration::days(8));
        assert_eq!(late.sweep_once().await.unwrap(), Some(1));
        assert!(store.bookable_seats(flight.id()).is_none());
    }

    #[tokio::test]
    async fn skips_while_lock_is_held() {
        let (store, flight) = store_with_flight().await;
        let lock: Arc<dyn DistributedLock> = Arc::new(InMemoryLock::new());
        let held = lock.try_acquire(RETENTION_LOCK, Duration::from_secs(60)).await.unwrap().unwrap();

        let sweep = sweep_at(&store, lock.clone(), flight.arrival_time() + ChronoDuration::days(30));
        assert_eq!(sweep.sweep_once().await.unwrap(), None);

        assert!(lock.release(held).await.unwrap());
        assert_eq!(sweep.sweep_once().await.unwrap(), Some(1));
    }
}
