//! HTTP handlers that are not tied to a domain.

pub mod health;

pub use health::{ComponentHealth, ReadinessReport, health_check, readiness};
