//! HTTP plumbing for the flight booking API that knows nothing about flights.
//!
//! Routes, state and DTOs live in the booking crate. This crate supplies what
//! every handler shares:
//!
//! - [`AppError`], rendered as `{ "code": ..., "message": ... }`
//! - [`correlation_id_layer`], which tags requests with `X-Correlation-ID`
//! - the [`CorrelationId`] and [`BearerToken`] extractors
//! - liveness and readiness bodies in [`handlers::health`]
//!
//! ```ignore
//! use axum::{Router, routing::get};
//! use flight_booking_web::{correlation_id_layer, handlers::health_check};
//!
//! let app: Router = Router::new()
//!     .route("/health", get(health_check))
//!     .layer(correlation_id_layer());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;

pub use error::AppError;
pub use extractors::{BearerToken, CorrelationId};
pub use middleware::{CORRELATION_ID_HEADER, CorrelationIdExt, correlation_id_layer};

/// What a fallible handler returns.
pub type WebResult<T> = Result<T, AppError>;
