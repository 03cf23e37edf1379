//! Flight booking HTTP server.
//!
//! Reads its configuration from the environment (and `.env`), connects the
//! configured backends, starts the background workers and serves the API until
//! Ctrl+C or SIGTERM.

use flight_booking::bootstrap::{self, Resources};
use flight_booking::config::Config;
use flight_booking::metrics;
use flight_booking::server::{AppState, build_router};
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flight_booking=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Flight Booking HTTP Server");

    let config = Config::from_env()?;
    info!(
        postgres = config.postgres.url.is_some(),
        redpanda = config.redpanda.brokers.is_some(),
        redis = config.redis.url.is_some(),
        "Configuration loaded"
    );

    let metrics_handle = match metrics::install() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Metrics disabled");
            None
        }
    };

    let resources = Resources::from_config(&config).await?;
    let relay = bootstrap::outbox_relay(&config, &resources);

    let mut state = AppState::new(
        &resources.repos,
        resources.event_bus.clone(),
        resources.cache.clone(),
        resources.rate_limiter.clone(),
        config.auth.jwt_settings(),
        config.rate_limit.login(),
        resources.clock.clone(),
    )
    .with_relay(&relay.notifier());
    if let Some(handle) = metrics_handle {
        state = state.with_metrics(handle);
    }

    if let Some(admin) = &config.auth.admin {
        if state
            .auth
            .ensure_admin(&admin.username, &admin.email, &admin.password)
            .await?
        {
            info!(username = %admin.username, "Bootstrap admin created");
        }
    }

    let (shutdown_tx, _) = broadcast::channel(1);
    let workers = bootstrap::spawn_workers(
        &config,
        &resources,
        relay,
        state.bookings.clone(),
        &shutdown_tx,
    );

    let app = build_router(state);
    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, stopping background workers");
    // Err only means every worker already exited.
    let _ = shutdown_tx.send(());

    let timeout = Duration::from_secs(config.server.shutdown_timeout);
    if tokio::time::timeout(timeout, futures::future::join_all(workers))
        .await
        .is_err()
    {
        warn!("Background workers did not stop within {:?}", timeout);
    }

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
