//! Deterministic time.

use chrono::{DateTime, Duration, Utc};
use flight_booking_core::environment::Clock;

/// 2025-01-01T00:00:00Z as a Unix timestamp.
const NEW_YEAR_2025: i64 = 1_735_689_600;

/// A [`Clock`] that never moves.
///
/// ```
/// use chrono::Duration;
/// use flight_booking_core::environment::Clock;
/// use flight_booking_testing::test_clock;
///
/// let later = test_clock().shifted(Duration::hours(3));
/// assert_eq!(later.now() - test_clock().now(), Duration::hours(3));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedClock {
    time: DateTime<Utc>,
}

impl FixedClock {
    /// Stop the clock at `time`.
    #[must_use]
    pub const fn new(time: DateTime<Utc>) -> Self {
        Self { time }
    }

    /// Another clock, stopped `by` later (or earlier when negative).
    #[must_use]
    pub fn shifted(self, by: Duration) -> Self {
        Self::new(self.time + by)
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.time
    }
}

/// The clock every test uses unless it needs another instant: New Year 2025, UTC.
#[must_use]
pub fn test_clock() -> FixedClock {
    FixedClock::new(DateTime::from_timestamp(NEW_YEAR_2025, 0).unwrap_or_default())
}
