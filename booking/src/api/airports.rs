//! Airport endpoints.
//!
//! - GET /api/airports - Active airports (public, cached)
//! - POST /api/admin/airports - Add an airport (admin)
//! - PUT /api/admin/airports/:code - Update name, city, country, timezone (admin)
//! - POST /api/admin/airports/:code/activate - Accept new flights (admin)
//! - POST /api/admin/airports/:code/deactivate - Stop accepting new flights (admin)

use crate::aggregates::{Airport, AirportInfo};
use crate::auth::RequireAdmin;
use crate::server::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use flight_booking_web::AppError;
use serde::{Deserialize, Serialize};
use tracing::info;

// ============================================================================
// Request/Response Types
// ============================================================================

/// New airport.
#[derive(Debug, Deserialize)]
pub struct CreateAirportRequest {
    /// IATA code, e.g. `PEK`
    pub code: String,
    /// Descriptive fields
    #[serde(flatten)]
    pub info: AirportInfo,
}

/// Airport as returned by the API.
#[derive(Debug, Serialize)]
pub struct AirportResponse {
    /// IATA code
    pub code: String,
    /// Name
    pub name: String,
    /// City
    pub city: String,
    /// Country
    pub country: String,
    /// IANA timezone
    pub timezone: String,
    /// Whether new flights may use it
    pub is_active: bool,
    /// Created
    pub created_at: DateTime<Utc>,
    /// Last change
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<&Airport> for AirportResponse {
    fn from(airport: &Airport) -> Self {
        let info = airport.info();
        Self {
            code: airport.code().to_string(),
            name: info.name.clone(),
            city: info.city.clone(),
            country: info.country.clone(),
            timezone: info.timezone.clone(),
            is_active: airport.is_active(),
            created_at: airport.created_at(),
            updated_at: airport.updated_at(),
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// List active airports.
///
/// ```bash
/// curl http://localhost:8080/api/airports
/// ```
pub async fn list_airports(
    State(state): State<AppState>,
) -> Result<Json<Vec<AirportResponse>>, AppError> {
    let airports = state.catalog.get_active_airports().await?;
    Ok(Json(airports.iter().map(AirportResponse::from).collect()))
}

/// Add an airport.
///
/// # Errors
///
/// 409 if the code is taken, 422 for a malformed code or blank field.
pub async fn create_airport(
    RequireAdmin(admin): RequireAdmin,
    State(state): State<AppState>,
    Json(request): Json<CreateAirportRequest>,
) -> Result<(StatusCode, Json<AirportResponse>), AppError> {
    let airport = state.catalog.add_airport(&request.code, request.info).await?;
    info!(code = %airport.code(), admin = %admin.username, "Airport added");
    Ok((StatusCode::CREATED, Json(AirportResponse::from(&airport))))
}

/// Replace an airport's descriptive fields.
///
/// # Errors
///
/// 404 for an unknown code.
pub async fn update_airport(
    RequireAdmin(_admin): RequireAdmin,
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(info): Json<AirportInfo>,
) -> Result<Json<AirportResponse>, AppError> {
    let airport = state.catalog.update_airport(&code, info).await?;
    Ok(Json(AirportResponse::from(&airport)))
}

/// Reopen an airport for new flights.
///
/// # Errors
///
/// 404 for an unknown code.
pub async fn activate_airport(
    RequireAdmin(_admin): RequireAdmin,
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<AirportResponse>, AppError> {
    let airport = state.catalog.set_airport_active(&code, true).await?;
    Ok(Json(AirportResponse::from(&airport)))
}

/// Close an airport to new flights. Existing flights are untouched.
///
/// # Errors
///
/// 404 for an unknown code.
pub async fn deactivate_airport(
    RequireAdmin(_admin): RequireAdmin,
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<AirportResponse>, AppError> {
    let airport = state.catalog.set_airport_active(&code, false).await?;
    Ok(Json(AirportResponse::from(&airport)))
}
