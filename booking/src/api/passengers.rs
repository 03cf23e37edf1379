//! Passenger endpoints. All of them require a valid bearer token.
//!
//! - POST /api/passengers - Register a passenger
//! - GET /api/passengers?name=|passport=|email= - Look passengers up (admin)
//! - GET /api/passengers/:id - Passenger details
//! - PUT /api/passengers/:id/contact - Replace email and phone
//! - PUT /api/passengers/:id/passport - Replace the travel document
//! - GET /api/passengers/:id/bookings - The passenger's bookings, newest first

use super::bookings::BookingResponse;
use super::context;
use crate::aggregates::Passenger;
use crate::auth::{AuthUser, RequireAdmin};
use crate::server::state::AppState;
use crate::types::{Gender, PassengerId, PassengerProfile, PassengerType};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use flight_booking_web::{AppError, CorrelationId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Lookup parameters; exactly one is expected.
#[derive(Debug, Default, Deserialize)]
pub struct PassengerLookupQuery {
    /// Part of the first or last name
    pub name: Option<String>,
    /// Exact passport number
    pub passport: Option<String>,
    /// Exact email
    pub email: Option<String>,
}

/// New contact details.
#[derive(Debug, Deserialize)]
pub struct UpdateContactRequest {
    /// Email
    pub email: String,
    /// Phone
    pub phone: String,
}

/// New travel document.
#[derive(Debug, Deserialize)]
pub struct UpdatePassportRequest {
    /// Passport number
    pub passport_number: String,
    /// Issuing country
    pub passport_country: String,
    /// Expiry
    pub passport_expiry: DateTime<Utc>,
}

/// Passenger as returned by the API.
#[derive(Debug, Serialize)]
pub struct PassengerResponse {
    /// Id
    pub id: Uuid,
    /// First name
    pub first_name: String,
    /// Last name
    pub last_name: String,
    /// Date of birth
    pub date_of_birth: DateTime<Utc>,
    /// Gender
    pub gender: Gender,
    /// Passport number
    pub passport_number: String,
    /// Issuing country
    pub passport_country: String,
    /// Passport expiry
    pub passport_expiry: DateTime<Utc>,
    /// Nationality
    pub nationality: String,
    /// Email
    pub email: String,
    /// Phone
    pub phone: String,
    /// Fare category
    pub passenger_type: PassengerType,
    /// Registered
    pub created_at: DateTime<Utc>,
    /// Last change
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<&Passenger> for PassengerResponse {
    fn from(passenger: &Passenger) -> Self {
        Self {
            id: *passenger.id().as_uuid(),
            first_name: passenger.first_name().to_string(),
            last_name: passenger.last_name().to_string(),
            date_of_birth: passenger.date_of_birth(),
            gender: passenger.gender(),
            passport_number: passenger.passport_number().to_string(),
            passport_country: passenger.passport_country().to_string(),
            passport_expiry: passenger.passport_expiry(),
            nationality: passenger.nationality().to_string(),
            email: passenger.email().to_string(),
            phone: passenger.phone().to_string(),
            passenger_type: passenger.passenger_type(),
            created_at: passenger.created_at(),
            updated_at: passenger.updated_at(),
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Register a passenger.
///
/// # Errors
///
/// 409 if the passport number or email is taken, 422 for an incomplete
/// profile or an expired passport.
pub async fn register_passenger(
    user: AuthUser,
    correlation_id: CorrelationId,
    State(state): State<AppState>,
    Json(profile): Json<PassengerProfile>,
) -> Result<(StatusCode, Json<PassengerResponse>), AppError> {
    let passenger = state
        .passengers
        .register_passenger(profile, &context(correlation_id, &user))
        .await?;
    Ok((StatusCode::CREATED, Json(PassengerResponse::from(&passenger))))
}

/// Look passengers up by passport, email or name.
///
/// # Errors
///
/// 400 without a lookup parameter, 422 for a blank name.
pub async fn find_passengers(
    RequireAdmin(_admin): RequireAdmin,
    State(state): State<AppState>,
    Query(query): Query<PassengerLookupQuery>,
) -> Result<Json<Vec<PassengerResponse>>, AppError> {
    let passengers = if let Some(passport) = query.passport {
        state.passengers.find_by_passport(&passport).await?.into_iter().collect()
    } else if let Some(email) = query.email {
        state.passengers.find_by_email(&email).await?.into_iter().collect()
    } else if let Some(name) = query.name {
        state.passengers.search_by_name(&name).await?
    } else {
        return Err(AppError::bad_request("One of name, passport or email is required"));
    };
    Ok(Json(passengers.iter().map(PassengerResponse::from).collect()))
}

/// Passenger details.
///
/// # Errors
///
/// 404 for an unknown id.
pub async fn get_passenger(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PassengerResponse>, AppError> {
    let passenger = state.passengers.get_passenger(PassengerId::from_uuid(id)).await?;
    Ok(Json(PassengerResponse::from(&passenger)))
}

/// Replace email and phone.
///
/// # Errors
///
/// 404 for an unknown id, 409 if the email belongs to another passenger, 422
/// for blank values.
pub async fn update_contact(
    user: AuthUser,
    correlation_id: CorrelationId,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateContactRequest>,
) -> Result<Json<PassengerResponse>, AppError> {
    let passenger = state
        .passengers
        .update_contact_info(
            PassengerId::from_uuid(id),
            &request.email,
            &request.phone,
            &context(correlation_id, &user),
        )
        .await?;
    Ok(Json(PassengerResponse::from(&passenger)))
}

/// Replace the travel document.
///
/// # Errors
///
/// 404 for an unknown id, 409 if the passport belongs to another passenger,
/// 422 for an expired document.
pub async fn update_passport(
    user: AuthUser,
    correlation_id: CorrelationId,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdatePassportRequest>,
) -> Result<Json<PassengerResponse>, AppError> {
    let passenger = state
        .passengers
        .update_passport_info(
            PassengerId::from_uuid(id),
            &request.passport_number,
            &request.passport_country,
            request.passport_expiry,
            &context(correlation_id, &user),
        )
        .await?;
    Ok(Json(PassengerResponse::from(&passenger)))
}

/// A passenger's bookings, newest first.
///
/// # Errors
///
/// 404 for an unknown passenger.
pub async fn list_passenger_bookings(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<BookingResponse>>, AppError> {
    let bookings = state
        .bookings
        .get_passenger_bookings(PassengerId::from_uuid(id))
        .await?;
    Ok(Json(bookings.iter().map(BookingResponse::from).collect()))
}
