//! Aggregate trait and the raised-event collection.
//!
//! An aggregate owns its state and is only ever changed through its own
//! command methods. Each command follows the same three steps:
//!
//! 1. Validate the command against the current state
//! 2. Build the event(s) describing the change
//! 3. Apply the event(s) to the state via [`Aggregate::apply_event`]
//!
//! and hands the raised events back to the caller, which persists and publishes
//! them. Nothing is buffered inside the aggregate, so a freshly loaded instance
//! never carries stale events from a previous operation.

use smallvec::SmallVec;

/// Events raised by a single command.
///
/// Almost every command raises exactly one event; an idempotent no-op raises none.
pub type Events<E> = SmallVec<[E; 2]>;

/// An entity that mutates itself by applying its own events.
///
/// # Example
///
/// ```
/// use flight_booking_core::aggregate::{Aggregate, Events};
/// use flight_booking_core::smallvec;
///
/// #[derive(Default)]
/// struct Counter {
///     value: u32,
/// }
///
/// enum CounterEvent {
///     Incremented,
/// }
///
/// impl Aggregate for Counter {
///     type Event = CounterEvent;
///
///     fn apply_event(&mut self, event: &CounterEvent) {
///         match event {
///             CounterEvent::Incremented => self.value += 1,
///         }
///     }
/// }
///
/// let mut counter = Counter::default();
/// let events: Events<CounterEvent> = smallvec![CounterEvent::Incremented];
/// counter.apply_all(&events);
/// assert_eq!(counter.value, 1);
/// ```
pub trait Aggregate {
    /// The event type this aggregate raises.
    type Event;

    /// Apply an already validated event to the state.
    ///
    /// Must be infallible: all checks happen before the event is built.
    fn apply_event(&mut self, event: &Self::Event);

    /// Apply a sequence of events in order.
    fn apply_all<'a, I>(&mut self, events: I)
    where
        I: IntoIterator<Item = &'a Self::Event>,
        Self::Event: 'a,
    {
        for event in events {
            self.apply_event(event);
        }
    }
}

/// Convenience for commands that raise a single event.
///
/// Applies the event to the aggregate and returns it wrapped in [`Events`].
pub fn raise<A: Aggregate>(aggregate: &mut A, event: A::Event) -> Events<A::Event> {
    aggregate.apply_event(&event);
    let mut events = Events::new();
    events.push(event);
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default, Debug)]
    struct Tally {
        total: i64,
    }

    #[derive(Debug, Clone, PartialEq)]
    enum TallyEvent {
        Added(i64),
    }

    impl Aggregate for Tally {
        type Event = TallyEvent;

        fn apply_event(&mut self, event: &TallyEvent) {
            match event {
                TallyEvent::Added(n) => self.total += n,
            }
        }
    }

    #[test]
    fn raise_applies_and_returns_event() {
        let mut tally = Tally::default();
        let events = raise(&mut tally, TallyEvent::Added(5));

        assert_eq!(tally.total, 5);
        assert_eq!(events.as_slice(), &[TallyEvent::Added(5)]);
    }

    #[test]
    fn apply_all_preserves_order() {
        let mut tally = Tally::default();
        tally.apply_all(&[TallyEvent::Added(2), TallyEvent::Added(-7)]);
        assert_eq!(tally.total, -5);
    }
}
