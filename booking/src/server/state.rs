//! Application state shared by every handler.
//!
//! Services are cheap to clone (they hold `Arc`s), so the whole state is
//! cloned per request.

use crate::auth::{AuthService, JwtIssuer, JwtSettings, LoginRateLimit, TokenVerifier};
use crate::catalog::CatalogService;
use crate::infra::{Cache, RateLimiter};
use crate::passengers::PassengerService;
use crate::repository::{Repositories, StoreHealth};
use crate::service::FlightBookingService;
use axum::extract::FromRef;
use flight_booking_core::environment::Clock;
use flight_booking_core::event_bus::EventBus;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tokio::sync::Notify;

/// Application state shared across all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Booking lifecycle
    pub bookings: FlightBookingService,
    /// Airports and flights
    pub catalog: CatalogService,
    /// Passenger records
    pub passengers: PassengerService,
    /// Login
    pub auth: AuthService,
    /// Bearer token verification for the extractors
    pub verifier: TokenVerifier,
    /// Store readiness probe
    pub store_health: Arc<dyn StoreHealth>,
    /// Event bus, probed by `/ready`
    pub event_bus: Arc<dyn EventBus>,
    /// Cache, probed by `/ready`
    pub cache: Arc<dyn Cache>,
    /// Renders `/metrics`; absent when no recorder is installed
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Build every service over `repos`.
    #[must_use]
    pub fn new(
        repos: &Repositories,
        event_bus: Arc<dyn EventBus>,
        cache: Arc<dyn Cache>,
        rate_limiter: Arc<dyn RateLimiter>,
        jwt: JwtSettings,
        login_limit: LoginRateLimit,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let issuer = Arc::new(JwtIssuer::new(jwt));
        let auth = AuthService::new(
            Arc::clone(&repos.users),
            Arc::clone(&issuer),
            rate_limiter,
            Arc::clone(&clock),
        )
        .with_rate_limit(login_limit);

        Self {
            bookings: FlightBookingService::new(repos, Arc::clone(&event_bus), Arc::clone(&clock)),
            catalog: CatalogService::new(repos, Arc::clone(&cache), Arc::clone(&clock)),
            passengers: PassengerService::new(repos, Arc::clone(&clock)),
            verifier: TokenVerifier::new(issuer, clock),
            auth,
            store_health: Arc::clone(&repos.health),
            event_bus,
            cache,
            metrics: None,
        }
    }

    /// Wake the outbox relay after every write.
    #[must_use]
    pub fn with_relay(mut self, notify: &Arc<Notify>) -> Self {
        self.bookings = self.bookings.with_relay(Arc::clone(notify));
        self.catalog = self.catalog.with_relay(Arc::clone(notify));
        self.passengers = self.passengers.with_relay(Arc::clone(notify));
        self
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

impl FromRef<AppState> for TokenVerifier {
    fn from_ref(state: &AppState) -> Self {
        state.verifier.clone()
    }
}
