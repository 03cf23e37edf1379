//! Readiness and metrics endpoints.
//!
//! Liveness is the shared [`flight_booking_web::handlers::health_check`].

use super::state::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use flight_booking_web::handlers::{ReadinessReport, readiness};

/// `GET /ready`: 503 while the store, the event bus or the cache is down.
///
/// ```bash
/// curl http://localhost:8080/ready
/// # {"ready":true,"components":[{"component":"store","healthy":true}, ...]}
/// ```
pub async fn readiness_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<ReadinessReport>) {
    let (store, event_bus, cache) = tokio::join!(
        state.store_health.is_healthy(),
        state.event_bus.is_healthy(),
        state.cache.is_healthy(),
    );

    let report = ReadinessReport::new()
        .with("store", store)
        .with("event_bus", event_bus)
        .with("cache", cache);
    if !report.ready {
        tracing::warn!(store, event_bus, cache, "Readiness check failed");
    }
    readiness(report)
}

/// `GET /metrics`: Prometheus text exposition.
#[allow(clippy::unused_async)]
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::NOT_FOUND,
            "Metrics recorder not installed".to_string(),
        ),
    }
}
