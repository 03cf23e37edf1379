//! Prometheus metrics.
//!
//! ## Counters
//! - `bookings_created_total` - bookings created
//! - `bookings_cancelled_total` - bookings cancelled
//! - `outbox_published_total{channel}` - outbox entries published
//! - `outbox_publish_failures_total{channel}` - failed publish attempts
//! - `consumer_events_handled_total{consumer}` - events handled
//! - `consumer_redeliveries_total{consumer}` - handler failures redelivered
//! - `consumer_dead_lettered_total{event_type}` - events moved to the dead-letter queue

use metrics::describe_counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use thiserror::Error;

/// Exporter installation failure.
#[derive(Error, Debug)]
#[error("Failed to install Prometheus recorder: {0}")]
pub struct MetricsError(String);

/// Describe every counter.
pub fn register_metrics() {
    describe_counter!("bookings_created_total", "Total number of bookings created");
    describe_counter!("bookings_cancelled_total", "Total number of bookings cancelled");
    describe_counter!(
        "outbox_published_total",
        "Outbox entries published to the event bus, by channel"
    );
    describe_counter!(
        "outbox_publish_failures_total",
        "Failed attempts to publish outbox entries, by channel"
    );
    describe_counter!(
        "consumer_events_handled_total",
        "Events handled successfully, by consumer"
    );
    describe_counter!(
        "consumer_redeliveries_total",
        "Handler failures that were redelivered, by consumer"
    );
    describe_counter!(
        "consumer_dead_lettered_total",
        "Events written to the dead-letter queue, by event type"
    );

    tracing::debug!("Metrics registered");
}

/// Install the global Prometheus recorder and describe the counters.
///
/// # Errors
///
/// Returns [`MetricsError`] if a recorder is already installed.
pub fn install() -> Result<PrometheusHandle, MetricsError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| MetricsError(e.to_string()))?;
    register_metrics();
    Ok(handle)
}
