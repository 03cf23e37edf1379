//! Dependencies handed to services instead of reached for globally.

use chrono::{DateTime, Utc};

/// Source of the current time.
///
/// Services and aggregates take `now` from a clock they were given, so tests
/// can pin it (see `flight_booking_testing::FixedClock`).
///
/// ```
/// use flight_booking_core::environment::{Clock, SystemClock};
///
/// let before = chrono::Utc::now();
/// assert!(SystemClock.now() >= before);
/// ```
pub trait Clock: Send + Sync {
    /// The current instant in UTC.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
