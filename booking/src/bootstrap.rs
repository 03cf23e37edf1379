//! Infrastructure setup and background workers.
//!
//! [`Resources::from_config`] picks a backend for every concern:
//!
//! | Concern | Configured | Fallback |
//! |---|---|---|
//! | Store | `DATABASE_URL` (Postgres) | in-memory |
//! | Event bus | `REDPANDA_BROKERS` (with the `redpanda` feature) | in-memory |
//! | Cache, lock, rate limiter | `REDIS_URL` | in-memory |
//!
//! [`spawn_workers`] then starts the outbox relay, the consumers and the
//! retention sweep, all stopped by the same shutdown broadcast.

use crate::config::Config;
use crate::dispatch::{OutboxRelay, all_channels, channel_for};
use crate::events::BookingSubmitted;
use crate::infra::{
    Cache, CacheError, DistributedLock, InMemoryCache, InMemoryLock, InMemoryRateLimiter,
    RateLimiter, RedisCache, RedisLock, RedisRateLimiter, connect_redis,
};
use crate::repository::memory::InMemoryStore;
use crate::repository::postgres::{self, PostgresStore};
use crate::repository::{Repositories, RepositoryError};
use crate::retention::FlightRetentionSweep;
use crate::runtime::{DeadLetterSink, EventConsumer, HandlerRegistry, SubmitBookingHandler};
use crate::service::FlightBookingService;
use flight_booking_core::environment::{Clock, SystemClock};
use flight_booking_core::event_bus::{EventBus, EventBusError};
use flight_booking_postgres::{DeadLetterQueue, PoolSettings, PostgresError};
use flight_booking_testing::InMemoryEventBus;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Prefix of every cache key written by this service.
pub const CACHE_PREFIX: &str = "flight-booking";

/// Start-up failures.
#[derive(Error, Debug)]
pub enum BootstrapError {
    /// Postgres could not be reached or its infrastructure tables created.
    #[error(transparent)]
    Postgres(#[from] PostgresError),

    /// The domain tables could not be created.
    #[error("Schema setup failed: {0}")]
    Schema(#[from] RepositoryError),

    /// The broker client could not be built.
    #[error(transparent)]
    EventBus(#[from] EventBusError),

    /// Redis could not be reached.
    #[error(transparent)]
    Redis(#[from] CacheError),
}

/// Every infrastructure handle the services and workers need.
#[derive(Clone)]
pub struct Resources {
    /// Repositories of the selected store
    pub repos: Repositories,
    /// Selected event bus
    pub event_bus: Arc<dyn EventBus>,
    /// Cache
    pub cache: Arc<dyn Cache>,
    /// Distributed lock
    pub lock: Arc<dyn DistributedLock>,
    /// Login rate limiter
    pub rate_limiter: Arc<dyn RateLimiter>,
    /// Where consumers park events they give up on; Postgres only
    pub dead_letters: Option<Arc<dyn DeadLetterSink>>,
    /// Wall clock
    pub clock: Arc<dyn Clock>,
}

impl Resources {
    /// Connect everything `config` names.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError`] if a configured backend is unreachable.
    pub async fn from_config(config: &Config) -> Result<Self, BootstrapError> {
        let (repos, dead_letters) = match &config.postgres.url {
            Some(url) => {
                info!("Connecting to PostgreSQL...");
                let settings = PoolSettings {
                    url: url.clone(),
                    max_connections: config.postgres.max_connections,
                    connect_timeout: Duration::from_secs(config.postgres.connect_timeout),
                };
                let pool = flight_booking_postgres::connect(&settings).await?;
                flight_booking_postgres::ensure_schema(&pool).await?;
                postgres::ensure_schema(&pool).await?;
                info!("PostgreSQL store ready");

                let dead_letters: Arc<dyn DeadLetterSink> =
                    Arc::new(DeadLetterQueue::new(pool.clone()));
                (PostgresStore::new(pool).repositories(), Some(dead_letters))
            }
            None => {
                warn!("DATABASE_URL not set, using the in-memory store");
                (InMemoryStore::new().repositories(), None)
            }
        };

        let event_bus = connect_event_bus(config)?;

        let (cache, lock, rate_limiter): (
            Arc<dyn Cache>,
            Arc<dyn DistributedLock>,
            Arc<dyn RateLimiter>,
        ) = match &config.redis.url {
            Some(url) => {
                let manager = connect_redis(url).await?;
                (
                    Arc::new(RedisCache::new(manager.clone(), CACHE_PREFIX)),
                    Arc::new(RedisLock::new(manager.clone())),
                    Arc::new(RedisRateLimiter::new(manager)),
                )
            }
            None => {
                warn!("REDIS_URL not set, cache, lock and rate limiter are process-local");
                (
                    Arc::new(InMemoryCache::new()),
                    Arc::new(InMemoryLock::new()),
                    Arc::new(InMemoryRateLimiter::new()),
                )
            }
        };

        Ok(Self {
            repos,
            event_bus,
            cache,
            lock,
            rate_limiter,
            dead_letters,
            clock: Arc::new(SystemClock),
        })
    }

    /// Process-local resources over `store` and `event_bus`.
    #[must_use]
    pub fn in_memory(store: &InMemoryStore, event_bus: Arc<dyn EventBus>, clock: Arc<dyn Clock>) -> Self {
        Self {
            repos: store.repositories(),
            event_bus,
            cache: Arc::new(InMemoryCache::new()),
            lock: Arc::new(InMemoryLock::new()),
            rate_limiter: Arc::new(InMemoryRateLimiter::new()),
            dead_letters: None,
            clock,
        }
    }
}

#[cfg(feature = "redpanda")]
fn connect_event_bus(config: &Config) -> Result<Arc<dyn EventBus>, EventBusError> {
    match &config.redpanda.brokers {
        Some(brokers) => {
            info!(brokers = %brokers, "Connecting to Redpanda...");
            let bus = flight_booking_redpanda::RedpandaEventBus::builder()
                .brokers(brokers)
                .consumer_group(&config.redpanda.consumer_group)
                .build()?;
            Ok(Arc::new(bus))
        }
        None => {
            warn!("REDPANDA_BROKERS not set, using the in-memory event bus");
            Ok(Arc::new(InMemoryEventBus::new()))
        }
    }
}

#[cfg(not(feature = "redpanda"))]
#[allow(clippy::unnecessary_wraps)]
fn connect_event_bus(config: &Config) -> Result<Arc<dyn EventBus>, EventBusError> {
    if config.redpanda.brokers.is_some() {
        warn!("REDPANDA_BROKERS is set but this build lacks the redpanda feature, using the in-memory event bus");
    }
    Ok(Arc::new(InMemoryEventBus::new()))
}

/// Outbox relay configured from `config`.
#[must_use]
pub fn outbox_relay(config: &Config, resources: &Resources) -> OutboxRelay {
    OutboxRelay::new(
        Arc::clone(&resources.repos.outbox),
        Arc::clone(&resources.event_bus),
    )
    .with_poll_interval(Duration::from_millis(config.outbox.poll_interval_ms))
    .with_batch_size(config.outbox.batch_size)
    .with_clock(Arc::clone(&resources.clock))
}

/// Start the relay, the notification and submit-booking consumers and, when a
/// retention window is configured, the flight retention sweep.
#[must_use]
pub fn spawn_workers(
    config: &Config,
    resources: &Resources,
    relay: OutboxRelay,
    bookings: FlightBookingService,
    shutdown: &broadcast::Sender<()>,
) -> Vec<JoinHandle<()>> {
    let mut handles = vec![relay.spawn(shutdown.subscribe())];
    let retry_delay = Duration::from_secs(config.consumer.retry_delay_secs);

    let submit_channel = channel_for(BookingSubmitted::EVENT_TYPE);
    let notification_topics: Vec<String> = all_channels()
        .into_iter()
        .filter(|channel| *channel != submit_channel)
        .map(str::to_string)
        .collect();

    handles.push(
        EventConsumer::new(
            "notifications",
            notification_topics,
            Arc::clone(&resources.event_bus),
            Arc::new(HandlerRegistry::notifications()),
            shutdown.subscribe(),
        )
        .with_retry_delay(retry_delay)
        .with_redelivery(config.consumer.redelivery())
        .spawn(),
    );

    let submit_consumer = EventConsumer::new(
        "submit-booking",
        vec![submit_channel.to_string()],
        Arc::clone(&resources.event_bus),
        Arc::new(SubmitBookingHandler::new(bookings)),
        shutdown.subscribe(),
    )
    .with_retry_delay(retry_delay)
    .with_redelivery(config.consumer.redelivery());
    let submit_consumer = match &resources.dead_letters {
        Some(sink) => submit_consumer.with_dead_letters(Arc::clone(sink)),
        None => submit_consumer,
    };
    handles.push(submit_consumer.spawn());

    if config.retention.flight_retention_days > 0 {
        let sweep = FlightRetentionSweep::new(
            Arc::clone(&resources.repos.flights),
            Arc::clone(&resources.lock),
            config.retention.flight_retention_days,
            Duration::from_secs(config.retention.sweep_interval_secs),
            Arc::clone(&resources.clock),
        );
        handles.push(sweep.spawn(shutdown.subscribe()));
    }

    info!(workers = handles.len(), "Background workers started");
    handles
}
