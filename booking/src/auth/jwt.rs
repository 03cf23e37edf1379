//! HS256 access tokens.
//!
//! Expiry is checked against the injected clock rather than the system time
//! so tests with a fixed clock stay deterministic.

use super::AuthError;
use crate::aggregates::User;
use crate::types::{UserId, UserRole};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Signing settings.
#[derive(Clone)]
pub struct JwtSettings {
    /// HMAC secret
    pub secret: String,
    /// `iss` claim
    pub issuer: String,
    /// `aud` claim
    pub audience: String,
    /// Token lifetime
    pub expiration: Duration,
}

impl std::fmt::Debug for JwtSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtSettings")
            .field("secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// Token claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    /// Username
    pub unique_name: String,
    /// Email
    pub email: String,
    /// Role name
    pub role: String,
    /// Issuer
    pub iss: String,
    /// Audience
    pub aud: String,
    /// Issued at (seconds since the epoch)
    pub iat: i64,
    /// Expiry (seconds since the epoch)
    pub exp: i64,
}

impl Claims {
    /// User id from `sub`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidToken`] if `sub` is not a UUID.
    pub fn user_id(&self) -> Result<UserId, AuthError> {
        Uuid::parse_str(&self.sub)
            .map(UserId::from_uuid)
            .map_err(|_| AuthError::InvalidToken("subject is not a user id".to_string()))
    }

    /// Role from `role`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidToken`] for an unknown role.
    pub fn role(&self) -> Result<UserRole, AuthError> {
        UserRole::from_str(&self.role).map_err(|e| AuthError::InvalidToken(e.to_string()))
    }
}

/// A freshly signed token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    /// Compact JWS
    pub token: String,
    /// Expiry instant
    pub expires_at: DateTime<Utc>,
    /// Lifetime in seconds
    pub expires_in: i64,
}

/// Signs and verifies access tokens.
#[derive(Clone)]
pub struct JwtIssuer {
    settings: JwtSettings,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtIssuer {
    /// Issuer for the given settings.
    #[must_use]
    pub fn new(settings: JwtSettings) -> Self {
        let encoding_key = EncodingKey::from_secret(settings.secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(settings.secret.as_bytes());
        Self {
            settings,
            encoding_key,
            decoding_key,
        }
    }

    /// Sign a token for `user`, valid from `now` for the configured lifetime.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Crypto`] if signing fails.
    pub fn issue(&self, user: &User, now: DateTime<Utc>) -> Result<IssuedToken, AuthError> {
        let expires_at = now + self.settings.expiration;
        let claims = Claims {
            sub: user.id().to_string(),
            unique_name: user.username().to_string(),
            email: user.email().to_string(),
            role: user.role().as_str().to_string(),
            iss: self.settings.issuer.clone(),
            aud: self.settings.audience.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Crypto(format!("Failed to sign token: {e}")))?;

        Ok(IssuedToken {
            token,
            expires_at,
            expires_in: self.settings.expiration.num_seconds(),
        })
    }

    /// Verify signature, issuer, audience and expiry.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidToken`] if any check fails.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.settings.issuer]);
        validation.set_audience(&[&self.settings.audience]);
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);

        let claims = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?
            .claims;

        if claims.exp <= now.timestamp() {
            return Err(AuthError::InvalidToken("token expired".to_string()));
        }
        Ok(claims)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;
    use flight_booking_core::environment::Clock;
    use flight_booking_testing::test_clock;

    pub(crate) fn settings() -> JwtSettings {
        JwtSettings {
            secret: "test-secret-with-enough-entropy".to_string(),
            issuer: "flight-booking".to_string(),
            audience: "flight-booking-api".to_string(),
            expiration: Duration::minutes(60),
        }
    }

    fn user(role: UserRole) -> User {
        User::new("wei", "wei@example.com", "Wei", "$argon2id$x".to_string(), role, test_clock().now())
            .unwrap()
    }

    #[test]
    fn issued_token_verifies_with_claims() {
        let issuer = JwtIssuer::new(settings());
        let now = test_clock().now();
        let admin = user(UserRole::Admin);

        let issued = issuer.issue(&admin, now).unwrap();
        assert_eq!(issued.expires_in, 3600);

        let claims = issuer.verify(&issued.token, now).unwrap();
        assert_eq!(claims.user_id().unwrap(), admin.id());
        assert_eq!(claims.role().unwrap(), UserRole::Admin);
        assert_eq!(claims.unique_name, "wei");
        assert_eq!(claims.aud, "flight-booking-api");
    }

    #[test]
    fn expired_token_is_rejected() {
        let issuer = JwtIssuer::new(settings());
        let now = test_clock().now();
        let issued = issuer.issue(&user(UserRole::User), now).unwrap();

        let later = now + Duration::minutes(61);
        assert!(matches!(issuer.verify(&issued.token, later), Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn token_from_other_secret_is_rejected() {
        let now = test_clock().now();
        let other = JwtIssuer::new(JwtSettings {
            secret: "another-secret".to_string(),
            ..settings()
        });
        let issued = other.issue(&user(UserRole::User), now).unwrap();

        assert!(JwtIssuer::new(settings()).verify(&issued.token, now).is_err());
    }
}
