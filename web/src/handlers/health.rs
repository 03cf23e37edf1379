//! Liveness and readiness responses.
//!
//! `/health` never touches a dependency. `/ready` is assembled by the service
//! from whatever it depends on (store, event bus, cache) and answers 503 as
//! soon as one of them is down.

use axum::{Json, http::StatusCode};
use serde::Serialize;

/// Liveness response body.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"`
    pub status: String,
    /// Crate version of the running binary
    pub version: String,
}

/// `GET /health`
///
/// ```bash
/// curl http://localhost:8080/health
/// # {"status":"ok","version":"0.1.0"}
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

/// One dependency's probe result.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ComponentHealth {
    /// Dependency name (`"store"`, `"event_bus"`, ...)
    pub component: String,
    /// Probe outcome
    pub healthy: bool,
}

/// Readiness response body.
#[derive(Debug, Clone, Serialize, Default)]
pub struct ReadinessReport {
    /// `true` when every component is healthy
    pub ready: bool,
    /// Individual probe results
    pub components: Vec<ComponentHealth>,
}

impl ReadinessReport {
    /// Start an empty (ready) report.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ready: true,
            components: Vec::new(),
        }
    }

    /// Record a probe result.
    #[must_use]
    pub fn with(mut self, component: impl Into<String>, healthy: bool) -> Self {
        self.ready &= healthy;
        self.components.push(ComponentHealth {
            component: component.into(),
            healthy,
        });
        self
    }
}

/// Render a report as `200` or `503`.
#[must_use]
pub fn readiness(report: ReadinessReport) -> (StatusCode, Json<ReadinessReport>) {
    let status = if report.ready {
        StatusCode::OK
    } else {
        tracing::warn!(components = ?report.components, "Service not ready");
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}
