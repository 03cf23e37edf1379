//! Authentication endpoint.
//!
//! - POST /api/auth/login - Exchange credentials for a JWT

use crate::auth::LoginResponse;
use crate::server::state::AppState;
use axum::{Json, extract::State};
use flight_booking_web::AppError;
use serde::Deserialize;

/// Login request; `username` also accepts the account's email.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Username or email
    pub username: String,
    /// Plain-text password
    pub password: String,
}

/// Log in.
///
/// ```bash
/// curl -X POST http://localhost:8080/api/auth/login \
///   -H "Content-Type: application/json" \
///   -d '{"username": "admin", "password": "..."}'
/// ```
///
/// # Errors
///
/// 401 for bad credentials, 403 for a disabled account, 429 after too many
/// attempts for the same login.
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let response = state.auth.login(&request.username, &request.password).await?;
    Ok(Json(response))
}
