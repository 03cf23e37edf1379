//! Booking endpoints. All of them require a valid bearer token.
//!
//! - POST /api/bookings - Create a booking now
//! - POST /api/bookings/submit - Queue a booking for the submit-booking consumer (202)
//! - GET /api/bookings/:reference - Booking details
//! - POST /api/bookings/:reference/confirm - Pending to Confirmed
//! - POST /api/bookings/:reference/cancel - Cancel, releasing the seats
//! - POST /api/bookings/:reference/pay - Record a payment
//! - POST /api/bookings/:reference/refund - Refund a paid booking
//! - POST /api/bookings/:reference/check-in - Check in a confirmed, paid booking
//! - PUT /api/bookings/:reference/special-requests - Replace the special requests
//!
//! References are case-insensitive.

use super::context;
use crate::aggregates::FlightBooking;
use crate::auth::AuthUser;
use crate::server::state::AppState;
use crate::types::{
    BookingCreationOptions, BookingStatus, CabinClass, FlightId, PassengerProfile, PaymentStatus,
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use flight_booking_web::{AppError, CorrelationId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Booking request. The passenger is matched by passport number and
/// registered on the fly when unknown.
#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    /// Flight to book
    pub flight_id: Uuid,
    /// Travelling passenger
    pub passenger: PassengerProfile,
    /// Seats wanted
    pub seats: u32,
    /// Cabin
    pub cabin_class: CabinClass,
    /// Free text, at most 500 characters
    #[serde(default)]
    pub special_requests: String,
}

impl From<CreateBookingRequest> for BookingCreationOptions {
    fn from(request: CreateBookingRequest) -> Self {
        Self {
            flight_id: FlightId::from_uuid(request.flight_id),
            passenger: request.passenger,
            seats: request.seats,
            cabin_class: request.cabin_class,
            special_requests: request.special_requests,
        }
    }
}

/// Cancellation; the reason is optional.
#[derive(Debug, Default, Deserialize)]
pub struct CancelBookingRequest {
    /// Why the passenger cancels
    pub reason: Option<String>,
}

/// Payment confirmation from the payment provider.
#[derive(Debug, Deserialize)]
pub struct PaymentRequest {
    /// Provider transaction reference
    pub payment_reference: String,
}

/// New special requests.
#[derive(Debug, Deserialize)]
pub struct SpecialRequestsRequest {
    /// Free text, at most 500 characters; empty clears it
    pub special_requests: String,
}

/// Booking as returned by the API.
#[derive(Debug, Serialize)]
pub struct BookingResponse {
    /// Internal id
    pub id: Uuid,
    /// Six-character reference shown to the customer
    pub reference: String,
    /// Booked flight
    pub flight_id: Uuid,
    /// Travelling passenger
    pub passenger_id: Uuid,
    /// Seats booked
    pub seats: u32,
    /// Cabin
    pub cabin_class: CabinClass,
    /// Price per seat at booking time
    pub unit_price: f64,
    /// Total price
    pub total_amount: f64,
    /// Special requests
    pub special_requests: String,
    /// Lifecycle status
    pub status: BookingStatus,
    /// Payment status
    pub payment_status: PaymentStatus,
    /// Provider transaction reference
    pub payment_reference: Option<String>,
    /// Amount refunded on cancellation or refund
    pub refund_amount: f64,
    /// Cancellation reason
    pub cancellation_reason: Option<String>,
    /// Created
    pub booked_at: DateTime<Utc>,
    /// Confirmed
    pub confirmed_at: Option<DateTime<Utc>>,
    /// Paid
    pub paid_at: Option<DateTime<Utc>>,
    /// Checked in
    pub checked_in_at: Option<DateTime<Utc>>,
    /// Cancelled
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl From<&FlightBooking> for BookingResponse {
    fn from(booking: &FlightBooking) -> Self {
        Self {
            id: *booking.id().as_uuid(),
            reference: booking.reference().to_string(),
            flight_id: *booking.flight_id().as_uuid(),
            passenger_id: *booking.passenger_id().as_uuid(),
            seats: booking.seats(),
            cabin_class: booking.cabin_class(),
            unit_price: booking.unit_price().as_decimal(),
            total_amount: booking.total_amount().as_decimal(),
            special_requests: booking.special_requests().to_string(),
            status: booking.status(),
            payment_status: booking.payment_status(),
            payment_reference: booking.payment_reference().map(str::to_string),
            refund_amount: booking.refund_amount().as_decimal(),
            cancellation_reason: booking.cancellation_reason().map(str::to_string),
            booked_at: booking.booked_at(),
            confirmed_at: booking.confirmed_at(),
            paid_at: booking.paid_at(),
            checked_in_at: booking.checked_in_at(),
            cancelled_at: booking.cancelled_at(),
        }
    }
}

/// A booking that was just created.
#[derive(Debug, Serialize)]
pub struct CreateBookingResponse {
    /// The booking
    pub booking: BookingResponse,
    /// Whether the passenger was registered by this request
    pub passenger_registered: bool,
}

/// A queued booking request.
#[derive(Debug, Serialize)]
pub struct SubmitBookingResponse {
    /// Id to find the request in the logs
    pub request_id: Uuid,
    /// Always `"Submitted"`
    pub status: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// Create a booking.
///
/// ```bash
/// curl -X POST http://localhost:8080/api/bookings \
///   -H "Authorization: Bearer <token>" \
///   -H "Content-Type: application/json" \
///   -d '{
///     "flight_id": "550e8400-e29b-41d4-a716-446655440000",
///     "seats": 2,
///     "cabin_class": "Business",
///     "passenger": {
///       "first_name": "Wei", "last_name": "Zhang",
///       "date_of_birth": "1985-06-15T00:00:00Z", "gender": "Male",
///       "passport_number": "E12345678", "passport_country": "CN",
///       "passport_expiry": "2030-01-01T00:00:00Z", "nationality": "CN",
///       "email": "wei.zhang@example.com", "phone": "+8613800000000"
///     }
///   }'
/// ```
///
/// # Errors
///
/// 404 for an unknown flight, 409 `CAPACITY_EXCEEDED` when the flight lacks
/// seats, 409 for a flight that is not bookable, 422 for bad input.
pub async fn create_booking(
    user: AuthUser,
    correlation_id: CorrelationId,
    State(state): State<AppState>,
    Json(request): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<CreateBookingResponse>), AppError> {
    let created = state
        .bookings
        .create_booking(request.into(), &context(correlation_id, &user))
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateBookingResponse {
            booking: BookingResponse::from(&created.booking),
            passenger_registered: created.passenger_registered,
        }),
    ))
}

/// Queue a booking request. The booking is created by the submit-booking
/// consumer; a request the domain rejects there only shows up in the logs.
///
/// # Errors
///
/// 404 for an unknown flight, 422 for bad input, 500 if the request cannot be
/// published.
pub async fn submit_booking(
    user: AuthUser,
    correlation_id: CorrelationId,
    State(state): State<AppState>,
    Json(request): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<SubmitBookingResponse>), AppError> {
    let request_id = state
        .bookings
        .submit_booking(request.into(), &context(correlation_id, &user))
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitBookingResponse {
            request_id,
            status: "Submitted".to_string(),
        }),
    ))
}

/// Booking details.
///
/// # Errors
///
/// 404 for an unknown reference.
pub async fn get_booking(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<Json<BookingResponse>, AppError> {
    let booking = state.bookings.get_booking(&reference).await?;
    Ok(Json(BookingResponse::from(&booking)))
}

/// Confirm a pending booking.
///
/// # Errors
///
/// 404 for an unknown reference, 409 unless the booking is pending.
pub async fn confirm_booking(
    user: AuthUser,
    correlation_id: CorrelationId,
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<Json<BookingResponse>, AppError> {
    let booking = state
        .bookings
        .confirm_booking(&reference, &context(correlation_id, &user))
        .await?;
    Ok(Json(BookingResponse::from(&booking)))
}

/// Cancel a booking. Cancelling twice returns the cancelled booking.
///
/// # Errors
///
/// 404 for an unknown reference, 409 after check-in.
pub async fn cancel_booking(
    user: AuthUser,
    correlation_id: CorrelationId,
    State(state): State<AppState>,
    Path(reference): Path<String>,
    body: Option<Json<CancelBookingRequest>>,
) -> Result<Json<BookingResponse>, AppError> {
    let Json(request) = body.unwrap_or_default();
    let booking = state
        .bookings
        .cancel_booking(
            &reference,
            request.reason.as_deref(),
            &context(correlation_id, &user),
        )
        .await?;
    Ok(Json(BookingResponse::from(&booking)))
}

/// Record a payment.
///
/// # Errors
///
/// 404 for an unknown reference, 409 if already paid or cancelled, 422 for a
/// blank payment reference.
pub async fn pay_booking(
    user: AuthUser,
    correlation_id: CorrelationId,
    State(state): State<AppState>,
    Path(reference): Path<String>,
    Json(request): Json<PaymentRequest>,
) -> Result<Json<BookingResponse>, AppError> {
    let booking = state
        .bookings
        .process_payment(
            &reference,
            &request.payment_reference,
            &context(correlation_id, &user),
        )
        .await?;
    Ok(Json(BookingResponse::from(&booking)))
}

/// Refund a paid booking.
///
/// # Errors
///
/// 404 for an unknown reference, 409 unless the booking is paid.
pub async fn refund_booking(
    user: AuthUser,
    correlation_id: CorrelationId,
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<Json<BookingResponse>, AppError> {
    let booking = state
        .bookings
        .refund_payment(&reference, &context(correlation_id, &user))
        .await?;
    Ok(Json(BookingResponse::from(&booking)))
}

/// Check in.
///
/// # Errors
///
/// 404 for an unknown reference, 409 unless the booking is confirmed and paid.
pub async fn check_in(
    user: AuthUser,
    correlation_id: CorrelationId,
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<Json<BookingResponse>, AppError> {
    let booking = state
        .bookings
        .check_in(&reference, &context(correlation_id, &user))
        .await?;
    Ok(Json(BookingResponse::from(&booking)))
}

/// Replace the special requests.
///
/// # Errors
///
/// 404 for an unknown reference, 409 for a cancelled or checked-in booking,
/// 422 for text over 500 characters.
pub async fn update_special_requests(
    user: AuthUser,
    correlation_id: CorrelationId,
    State(state): State<AppState>,
    Path(reference): Path<String>,
    Json(request): Json<SpecialRequestsRequest>,
) -> Result<Json<BookingResponse>, AppError> {
    let booking = state
        .bookings
        .update_special_requests(
            &reference,
            &request.special_requests,
            &context(correlation_id, &user),
        )
        .await?;
    Ok(Json(BookingResponse::from(&booking)))
}
