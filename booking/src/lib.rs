//! Flight booking service.
//!
//! Airlines publish airports and flights; passengers book seats, pay, check in
//! or cancel. Every state change raises domain events that are delivered to
//! consumers through a transactional outbox.
//!
//! # Architecture
//!
//! ```text
//!   HTTP (axum)                          consumers
//!   ┌──────────┐                  ┌──────────────────────┐
//!   │   api    │                  │ notifications        │
//!   └────┬─────┘                  │ submit-booking ──────┼──┐
//!        ▼                        └──────────▲───────────┘  │
//!   ┌──────────────────────────┐             │              │
//!   │ services                 │        ┌────┴─────┐        │
//!   │ catalog / passengers /   │        │ event bus│        │
//!   │ bookings (domain service)│        └────▲─────┘        │
//!   └────┬─────────────────────┘             │              │
//!        ▼                              ┌────┴─────┐        │
//!   ┌──────────────────────────┐        │  outbox  │        │
//!   │ aggregates (pure)        │        │  relay   │        │
//!   └──────────────────────────┘        └────▲─────┘        │
//!        │ aggregate + events, one transaction │            │
//!        ▼                                     │            │
//!   ┌──────────────────────────────────────────┴─┐          │
//!   │ repositories: Postgres or in-memory        │◄─────────┘
//!   └────────────────────────────────────────────┘
//! ```
//!
//! # Booking lifecycle
//!
//! ```text
//! Pending ──confirm──► Confirmed ──check_in (paid)──► CheckedIn
//!    │                     │
//!    └──────cancel─────────┴──► Cancelled (seats released)
//!
//! payment: Pending ──pay──► Paid ──refund──► Refunded
//! ```
//!
//! # Seat inventory
//!
//! Seats are taken with a conditional decrement in the store, so two bookings
//! racing for the last seat cannot both succeed.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod aggregates;
pub mod api;
pub mod auth;
pub mod bootstrap;
pub mod catalog;
pub mod config;
pub mod dispatch;
pub mod domain_service;
pub mod error;
pub mod events;
pub mod infra;
pub mod metrics;
pub mod passengers;
pub mod repository;
pub mod retention;
pub mod runtime;
pub mod server;
pub mod service;
pub mod types;

pub use catalog::CatalogService;
pub use config::Config;
pub use domain_service::{BookingDomainService, CreatedBooking};
pub use error::{DomainError, ServiceError};
pub use passengers::PassengerService;
pub use service::FlightBookingService;
pub use types::*;
