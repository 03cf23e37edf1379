//! Flight endpoints.
//!
//! - GET /api/flights/search?from=CAN&to=PEK&date=2025-03-01&passengers=2 - Bookable flights (public)
//! - GET /api/flights/:id - Flight details (public)
//! - GET /api/flights/:id/bookings - Bookings on a flight (admin)
//! - POST /api/admin/flights - Schedule a flight (admin)
//! - PUT /api/admin/flights/:id/status - Change operational status (admin)
//! - PUT /api/admin/flights/:id/price - Change base price (admin)
//!
//! Prices are decimal amounts in requests and responses.

use super::bookings::BookingResponse;
use super::{context, money};
use crate::aggregates::{Flight, NewFlight, StatusUpdate};
use crate::auth::RequireAdmin;
use crate::server::state::AppState;
use crate::types::{FlightId, FlightStatus};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::{DateTime, NaiveDate, Utc};
use flight_booking_web::{AppError, CorrelationId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Search parameters.
#[derive(Debug, Deserialize)]
pub struct SearchFlightsQuery {
    /// Departure airport code
    pub from: String,
    /// Arrival airport code
    pub to: String,
    /// Departure date (UTC)
    pub date: NaiveDate,
    /// Seats needed; defaults to 1
    pub passengers: Option<u32>,
}

/// Flight to schedule.
#[derive(Debug, Deserialize)]
pub struct CreateFlightRequest {
    /// e.g. `CZ3456`
    pub flight_number: String,
    /// e.g. `CZ`
    pub airline_code: String,
    /// e.g. `China Southern`
    pub airline_name: String,
    /// Departure airport code
    pub departure_airport: String,
    /// Scheduled departure
    pub departure_time: DateTime<Utc>,
    /// Departure terminal
    #[serde(default)]
    pub departure_terminal: String,
    /// Arrival airport code
    pub arrival_airport: String,
    /// Scheduled arrival
    pub arrival_time: DateTime<Utc>,
    /// Arrival terminal
    #[serde(default)]
    pub arrival_terminal: String,
    /// e.g. `A320`
    pub aircraft_type: String,
    /// Seats on board
    pub total_seats: u32,
    /// Economy price per seat
    pub base_price: f64,
}

/// Status change.
#[derive(Debug, Deserialize)]
pub struct UpdateFlightStatusRequest {
    /// New status
    pub status: FlightStatus,
    /// Reason, shown to passengers on delays and cancellations
    pub reason: Option<String>,
    /// New departure time for `Delayed`
    pub new_departure_time: Option<DateTime<Utc>>,
}

/// Price change.
#[derive(Debug, Deserialize)]
pub struct UpdateFlightPriceRequest {
    /// New economy price per seat
    pub base_price: f64,
}

/// Flight as returned by the API.
#[derive(Debug, Serialize)]
pub struct FlightResponse {
    /// Id
    pub id: Uuid,
    /// Flight number
    pub flight_number: String,
    /// Airline code
    pub airline_code: String,
    /// Airline name
    pub airline_name: String,
    /// Departure airport code
    pub departure_airport: String,
    /// Departure time
    pub departure_time: DateTime<Utc>,
    /// Departure terminal
    pub departure_terminal: String,
    /// Arrival airport code
    pub arrival_airport: String,
    /// Arrival time
    pub arrival_time: DateTime<Utc>,
    /// Arrival terminal
    pub arrival_terminal: String,
    /// Aircraft
    pub aircraft_type: String,
    /// Seats on board
    pub total_seats: u32,
    /// Seats still bookable
    pub available_seats: u32,
    /// Economy price per seat
    pub base_price: f64,
    /// Operational status
    pub status: FlightStatus,
    /// Scheduled flight time in minutes
    pub duration_minutes: i64,
}

impl From<&Flight> for FlightResponse {
    fn from(flight: &Flight) -> Self {
        Self {
            id: *flight.id().as_uuid(),
            flight_number: flight.flight_number().to_string(),
            airline_code: flight.airline_code().to_string(),
            airline_name: flight.airline_name().to_string(),
            departure_airport: flight.departure_airport().to_string(),
            departure_time: flight.departure_time(),
            departure_terminal: flight.departure_terminal().to_string(),
            arrival_airport: flight.arrival_airport().to_string(),
            arrival_time: flight.arrival_time(),
            arrival_terminal: flight.arrival_terminal().to_string(),
            aircraft_type: flight.aircraft_type().to_string(),
            total_seats: flight.total_seats(),
            available_seats: flight.available_seats(),
            base_price: flight.base_price().as_decimal(),
            status: flight.status(),
            duration_minutes: flight.duration().num_minutes(),
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Search bookable flights.
///
/// ```bash
/// curl "http://localhost:8080/api/flights/search?from=CAN&to=PEK&date=2025-03-01&passengers=2"
/// ```
///
/// # Errors
///
/// 422 for a malformed airport code or zero passengers.
pub async fn search_flights(
    State(state): State<AppState>,
    Query(query): Query<SearchFlightsQuery>,
) -> Result<Json<Vec<FlightResponse>>, AppError> {
    let flights = state
        .catalog
        .search_flights(&query.from, &query.to, query.date, query.passengers.unwrap_or(1))
        .await?;
    Ok(Json(flights.iter().map(FlightResponse::from).collect()))
}

/// Flight details.
///
/// # Errors
///
/// 404 for an unknown id.
pub async fn get_flight(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<FlightResponse>, AppError> {
    let flight = state.catalog.get_flight(FlightId::from_uuid(id)).await?;
    Ok(Json(FlightResponse::from(&flight)))
}

/// Every booking on a flight, newest first.
///
/// # Errors
///
/// 404 for an unknown id.
pub async fn list_flight_bookings(
    RequireAdmin(_admin): RequireAdmin,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<BookingResponse>>, AppError> {
    let bookings = state.bookings.get_flight_bookings(FlightId::from_uuid(id)).await?;
    Ok(Json(bookings.iter().map(BookingResponse::from).collect()))
}

/// Schedule a flight.
///
/// ```bash
/// curl -X POST http://localhost:8080/api/admin/flights \
///   -H "Authorization: Bearer <token>" \
///   -H "Content-Type: application/json" \
///   -d '{
///     "flight_number": "CZ3456", "airline_code": "CZ", "airline_name": "China Southern",
///     "departure_airport": "CAN", "departure_time": "2025-03-01T08:00:00Z",
///     "arrival_airport": "PEK", "arrival_time": "2025-03-01T11:00:00Z",
///     "aircraft_type": "A320", "total_seats": 180, "base_price": 1200.00
///   }'
/// ```
///
/// # Errors
///
/// 404 for an unknown airport, 409 if the flight number already departs that
/// day, 422 for bad input or an inactive airport.
pub async fn create_flight(
    RequireAdmin(admin): RequireAdmin,
    correlation_id: CorrelationId,
    State(state): State<AppState>,
    Json(request): Json<CreateFlightRequest>,
) -> Result<(StatusCode, Json<FlightResponse>), AppError> {
    let new_flight = NewFlight {
        base_price: money("base_price", request.base_price)?,
        flight_number: request.flight_number,
        airline_code: request.airline_code,
        airline_name: request.airline_name,
        departure_airport: request.departure_airport,
        departure_time: request.departure_time,
        departure_terminal: request.departure_terminal,
        arrival_airport: request.arrival_airport,
        arrival_time: request.arrival_time,
        arrival_terminal: request.arrival_terminal,
        aircraft_type: request.aircraft_type,
        total_seats: request.total_seats,
    };

    let flight = state
        .catalog
        .add_flight(new_flight, &context(correlation_id, &admin))
        .await?;
    Ok((StatusCode::CREATED, Json(FlightResponse::from(&flight))))
}

/// Change a flight's status.
///
/// # Errors
///
/// 404 for an unknown id, 409 once the flight is cancelled, 422 for a new
/// departure time on anything but a later delay.
pub async fn update_flight_status(
    RequireAdmin(admin): RequireAdmin,
    correlation_id: CorrelationId,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateFlightStatusRequest>,
) -> Result<Json<FlightResponse>, AppError> {
    let update = StatusUpdate {
        reason: request.reason,
        new_departure_time: request.new_departure_time,
    };
    let flight = state
        .catalog
        .update_flight_status(
            FlightId::from_uuid(id),
            request.status,
            update,
            &context(correlation_id, &admin),
        )
        .await?;
    Ok(Json(FlightResponse::from(&flight)))
}

/// Change a flight's base price. Existing bookings keep theirs.
///
/// # Errors
///
/// 404 for an unknown id, 422 for a negative price.
pub async fn update_flight_price(
    RequireAdmin(admin): RequireAdmin,
    correlation_id: CorrelationId,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateFlightPriceRequest>,
) -> Result<Json<FlightResponse>, AppError> {
    let price = money("base_price", request.base_price)?;
    let flight = state
        .catalog
        .update_flight_price(FlightId::from_uuid(id), price, &context(correlation_id, &admin))
        .await?;
    Ok(Json(FlightResponse::from(&flight)))
}
