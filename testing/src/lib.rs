//! Test support for the flight booking crates.
//!
//! - [`FixedClock`] and [`test_clock`]: time that does not move
//! - [`InMemoryEventBus`]: a bus that keeps what was published per channel
//! - [`AggregateTest`]: given an aggregate, when a command runs, then check
//!   the state and the events it raised
//!
//! ```ignore
//! use flight_booking_testing::{AggregateTest, test_clock};
//!
//! AggregateTest::given(pending_booking())
//!     .when(move |booking| booking.confirm(test_clock().now()))
//!     .then_state(|booking| assert!(booking.is_active()))
//!     .run();
//! ```

pub mod clock;
pub mod event_bus;

pub use aggregate_test::{AggregateTest, assertions};
pub use clock::{FixedClock, test_clock};
pub use event_bus::InMemoryEventBus;
