//! Transactional outbox abstraction.
//!
//! Repositories write an aggregate and the events it raised in one unit of work,
//! appending each event to the outbox together with the channel it must be
//! published on. A relay drains the outbox to the [`EventBus`](crate::event_bus::EventBus).
//! A mutation therefore can never commit without its notification being recorded,
//! and a broker outage only delays delivery.

use crate::event::SerializedEvent;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors raised by outbox storage.
#[derive(Error, Debug, Clone)]
pub enum OutboxError {
    /// The backing store failed.
    #[error("Outbox storage error: {0}")]
    Storage(String),

    /// A stored row could not be decoded.
    #[error("Corrupt outbox entry {id}: {reason}")]
    Corrupt {
        /// Row identifier
        id: i64,
        /// What was wrong with it
        reason: String,
    },
}

/// An event waiting to be published.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboxEntry {
    /// Monotonic identifier; entries are relayed in ascending order.
    pub id: i64,
    /// Channel the event is published on.
    pub channel: String,
    /// The event itself.
    pub event: SerializedEvent,
    /// Failed publish attempts so far.
    pub attempts: u32,
    /// When the entry was written.
    pub created_at: DateTime<Utc>,
}

/// Result future returned by [`Outbox`] methods.
pub type OutboxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, OutboxError>> + Send + 'a>>;

/// Storage side of the outbox, as seen by the relay.
pub trait Outbox: Send + Sync {
    /// Unpublished entries, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Storage`] if the store cannot be read.
    fn pending(&self, limit: usize) -> OutboxFuture<'_, Vec<OutboxEntry>>;

    /// Mark an entry as delivered.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Storage`] if the update fails.
    fn mark_published(&self, id: i64, at: DateTime<Utc>) -> OutboxFuture<'_, ()>;

    /// Record a failed publish attempt; the entry stays pending.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Storage`] if the update fails.
    fn record_failure(&self, id: i64, error: &str) -> OutboxFuture<'_, ()>;
}
