//! Publish/subscribe over named channels.
//!
//! Services never publish domain events directly: the outbox relay moves them
//! from the store to the bus, one channel per event type. Booking requests
//! submitted for asynchronous processing are the exception and go straight to
//! their channel.
//!
//! ```text
//! outbox relay ──publish(channel, event)──► EventBus ──► EventStream ──► consumer
//! ```
//!
//! Delivery is at least once. A broker keeps order per aggregate (the message
//! key); the in-memory bus keeps publish order.

use crate::event::SerializedEvent;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Event bus failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventBusError {
    /// No client could be built for the broker.
    #[error("Event bus unavailable: {0}")]
    Unavailable(String),

    /// A channel name was empty.
    #[error("Channel name must not be empty")]
    EmptyChannel,

    /// The broker did not accept the event.
    #[error("Publishing to '{channel}' failed: {reason}")]
    Publish {
        /// Target channel
        channel: String,
        /// Broker or encoding error
        reason: String,
    },

    /// The subscription could not be set up.
    #[error("Subscribing to {channels:?} failed: {reason}")]
    Subscribe {
        /// Requested channels
        channels: Vec<String>,
        /// Broker error
        reason: String,
    },

    /// A received message was not a serialized event.
    #[error("Undecodable message: {0}")]
    Undecodable(String),

    /// The subscription broke while streaming.
    #[error("Subscription interrupted: {0}")]
    Interrupted(String),
}

/// Events delivered to a subscriber.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<SerializedEvent, EventBusError>> + Send>>;

/// Result future returned by [`EventBus`] methods.
pub type BusFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, EventBusError>> + Send + 'a>>;

/// A channel-based event bus, shared as `Arc<dyn EventBus>`.
pub trait EventBus: Send + Sync {
    /// Publish `event` on `channel`.
    ///
    /// # Errors
    ///
    /// [`EventBusError::EmptyChannel`] for a blank channel,
    /// [`EventBusError::Publish`] if the event is not accepted.
    fn publish(&self, channel: &str, event: &SerializedEvent) -> BusFuture<'_, ()>;

    /// Stream every event published on `channels` from now on.
    ///
    /// # Errors
    ///
    /// [`EventBusError::Subscribe`] if the subscription cannot be set up.
    fn subscribe(&self, channels: &[&str]) -> BusFuture<'_, EventStream>;

    /// Whether the bus can currently reach its broker.
    fn is_healthy(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(async { true })
    }
}
