//! Router for the flight booking API.

use super::health::{metrics, readiness_check};
use super::state::AppState;
use crate::api::{airports, auth, bookings, flights, passengers};
use axum::{
    Router,
    routing::{get, post, put},
};
use flight_booking_web::correlation_id_layer;
use flight_booking_web::handlers::health_check;
use tower_http::trace::TraceLayer;

/// Build the complete router.
///
/// `/health`, `/ready` and `/metrics` sit at the root; everything else is
/// nested under `/api`. Every request gets a correlation ID and a trace span.
pub fn build_router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route("/airports", post(airports::create_airport))
        .route("/airports/:code", put(airports::update_airport))
        .route("/airports/:code/activate", post(airports::activate_airport))
        .route("/airports/:code/deactivate", post(airports::deactivate_airport))
        .route("/flights", post(flights::create_flight))
        .route("/flights/:id/status", put(flights::update_flight_status))
        .route("/flights/:id/price", put(flights::update_flight_price));

    let api_routes = Router::new()
        .route("/auth/login", post(auth::login))
        // Catalog (public)
        .route("/airports", get(airports::list_airports))
        .route("/flights/search", get(flights::search_flights))
        .route("/flights/:id", get(flights::get_flight))
        .route("/flights/:id/bookings", get(flights::list_flight_bookings))
        // Bookings
        .route("/bookings", post(bookings::create_booking))
        .route("/bookings/submit", post(bookings::submit_booking))
        .route("/bookings/:reference", get(bookings::get_booking))
        .route("/bookings/:reference/confirm", post(bookings::confirm_booking))
        .route("/bookings/:reference/cancel", post(bookings::cancel_booking))
        .route("/bookings/:reference/pay", post(bookings::pay_booking))
        .route("/bookings/:reference/refund", post(bookings::refund_booking))
        .route("/bookings/:reference/check-in", post(bookings::check_in))
        .route(
            "/bookings/:reference/special-requests",
            put(bookings::update_special_requests),
        )
        // Passengers
        .route(
            "/passengers",
            post(passengers::register_passenger).get(passengers::find_passengers),
        )
        .route("/passengers/:id", get(passengers::get_passenger))
        .route("/passengers/:id/contact", put(passengers::update_contact))
        .route("/passengers/:id/passport", put(passengers::update_passport))
        .route(
            "/passengers/:id/bookings",
            get(passengers::list_passenger_bookings),
        )
        .nest("/admin", admin_routes);

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(correlation_id_layer())
        .with_state(state)
}
