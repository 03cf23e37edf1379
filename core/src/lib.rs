//! Building blocks shared by the flight booking crates.
//!
//! - [`aggregate`]: entities that change only through their own commands and
//!   return the events each command raised
//! - [`event`]: the event trait and the serialized form stored in the outbox
//! - [`outbox`]: the store side of transactional publishing
//! - [`event_bus`]: named channels that carry serialized events to consumers
//! - [`environment`]: injected dependencies such as the [`environment::Clock`]
//!
//! A command never publishes anything itself:
//!
//! ```ignore
//! let events = booking.confirm(clock.now())?;
//! repository.update(&booking, &serialize_all(&events, booking.reference(), &ctx, now)?).await?;
//! // later, the outbox relay moves the rows onto the bus
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod aggregate;
pub mod environment;
pub mod event;
pub mod event_bus;
pub mod outbox;

pub use smallvec::{SmallVec, smallvec};
