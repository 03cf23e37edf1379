//! Aggregates of the flight booking domain.
//!
//! - [`FlightBooking`]: the booking lifecycle state machine (aggregate root)
//! - [`Flight`]: schedule, status and seat inventory
//! - [`Passenger`]: identity and travel documents
//! - [`Airport`] and [`User`]: catalog and account entities without events
//!
//! Commands take the current time as a parameter and return the events they
//! raised; nothing is buffered on the aggregate.

pub mod airport;
pub mod booking;
pub mod flight;
pub mod passenger;
pub mod user;

pub use airport::{Airport, AirportInfo};
pub use booking::{FlightBooking, NewBooking};
pub use flight::{Flight, NewFlight, StatusUpdate};
pub use passenger::Passenger;
pub use user::User;
