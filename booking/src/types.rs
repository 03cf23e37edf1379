//! Identifiers, value objects and enums of the flight booking domain.
//!
//! Everything here is immutable and validated on construction; the aggregates
//! in [`crate::aggregates`] are built from these pieces.

use crate::error::DomainError;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// `true` for the all-zero UUID, which never names a real entity
            #[must_use]
            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a flight
    FlightId
);
uuid_id!(
    /// Unique identifier for a passenger
    PassengerId
);
uuid_id!(
    /// Unique identifier for a booking (internal; customers see the [`BookingReference`])
    BookingId
);
uuid_id!(
    /// Unique identifier for a user account
    UserId
);

// ============================================================================
// Money (cents, never floating point)
// ============================================================================

/// An amount of money in cents.
///
/// Negative amounts are unrepresentable, so "price ≥ 0" holds by construction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(u64);

impl Money {
    /// Zero
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from cents
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Convert a decimal amount (e.g. `199.99`) rounding to the nearest cent.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] for negative, non-finite or
    /// out-of-range amounts.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn try_from_decimal(amount: f64) -> Result<Self, DomainError> {
        if !amount.is_finite() {
            return Err(DomainError::validation("Amount must be a finite number"));
        }
        if amount < 0.0 {
            return Err(DomainError::validation("Amount cannot be negative"));
        }
        let cents = (amount * 100.0).round();
        if cents > u64::MAX as f64 {
            return Err(DomainError::validation("Amount is too large"));
        }
        Ok(Self(cents as u64))
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Decimal representation for JSON responses.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_decimal(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Multiplies money by a quantity with overflow checking
    #[must_use]
    pub const fn checked_multiply(self, quantity: u32) -> Option<Self> {
        match self.0.checked_mul(quantity as u64) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Scale by a per-mille factor (1000 = ×1.0), rounding half up to the cent.
    #[must_use]
    pub const fn checked_scale_per_mille(self, per_mille: u32) -> Option<Self> {
        match self.0.checked_mul(per_mille as u64) {
            Some(product) => match product.checked_add(500) {
                Some(rounded) => Some(Self(rounded / 1000)),
                None => None,
            },
            None => None,
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

// ============================================================================
// Enums
// ============================================================================

/// Seating tier of a booking.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CabinClass {
    /// ×1.0
    Economy,
    /// ×1.3
    PremiumEconomy,
    /// ×2.5
    Business,
    /// ×4.0
    First,
}

impl CabinClass {
    /// Price multiplier in per-mille.
    #[must_use]
    pub const fn multiplier_per_mille(self) -> u32 {
        match self {
            Self::Economy => 1000,
            Self::PremiumEconomy => 1300,
            Self::Business => 2500,
            Self::First => 4000,
        }
    }

    /// Stable name used in storage and messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Economy => "Economy",
            Self::PremiumEconomy => "PremiumEconomy",
            Self::Business => "Business",
            Self::First => "First",
        }
    }
}

impl FromStr for CabinClass {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Economy" => Ok(Self::Economy),
            "PremiumEconomy" => Ok(Self::PremiumEconomy),
            "Business" => Ok(Self::Business),
            "First" => Ok(Self::First),
            other => Err(DomainError::validation(format!("Unknown cabin class: {other}"))),
        }
    }
}

/// Main axis of the booking lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    /// Created, awaiting confirmation
    Pending,
    /// Confirmed by the airline
    Confirmed,
    /// Passenger checked in (terminal)
    CheckedIn,
    /// Cancelled (terminal)
    Cancelled,
}

/// Payment axis of the booking lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentStatus {
    /// Not paid yet
    Pending,
    /// Paid
    Paid,
    /// Payment attempt failed
    Failed,
    /// Paid, then refunded
    Refunded,
}

/// Operational status of a flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlightStatus {
    /// Bookable
    Scheduled,
    /// Boarding
    Boarding,
    /// Left the gate
    Departed,
    /// Airborne
    InFlight,
    /// Landed
    Arrived,
    /// Departure postponed
    Delayed,
    /// Will not fly
    Cancelled,
}

/// Passenger gender as printed in the passport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gender {
    /// Male
    Male,
    /// Female
    Female,
    /// Other / unspecified
    Other,
}

/// Fare category derived from age.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PassengerType {
    /// Under 2
    Infant,
    /// 2 to 11
    Child,
    /// 12 to 64
    Adult,
    /// 65 and over
    Senior,
}

impl PassengerType {
    /// Category for an age in whole years.
    #[must_use]
    pub const fn for_age(age: u32) -> Self {
        match age {
            0..=1 => Self::Infant,
            2..=11 => Self::Child,
            65.. => Self::Senior,
            _ => Self::Adult,
        }
    }
}

/// Account role.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UserRole {
    /// Manages airports and flights
    Admin,
    /// Books flights
    User,
}

impl UserRole {
    /// Stable name used in tokens and storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "Admin",
            Self::User => "User",
        }
    }
}

impl FromStr for UserRole {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Admin" => Ok(Self::Admin),
            "User" => Ok(Self::User),
            other => Err(DomainError::validation(format!("Unknown role: {other}"))),
        }
    }
}

// Storage helpers for the enums persisted as text.
macro_rules! text_enum {
    ($name:ident { $($variant:ident),+ $(,)? }) => {
        impl $name {
            /// Stable text form used in storage.
            #[must_use]
            pub const fn as_db_str(self) -> &'static str {
                match self {
                    $(Self::$variant => stringify!($variant),)+
                }
            }

            /// Parse the text form written by [`Self::as_db_str`].
            ///
            /// # Errors
            ///
            /// Returns [`DomainError::Validation`] for an unknown name.
            pub fn parse_db_str(s: &str) -> Result<Self, DomainError> {
                match s {
                    $(stringify!($variant) => Ok(Self::$variant),)+
                    other => Err(DomainError::validation(format!(
                        concat!("Unknown ", stringify!($name), ": {}"),
                        other
                    ))),
                }
            }
        }
    };
}

text_enum!(BookingStatus { Pending, Confirmed, CheckedIn, Cancelled });
text_enum!(PaymentStatus { Pending, Paid, Failed, Refunded });
text_enum!(FlightStatus { Scheduled, Boarding, Departed, InFlight, Arrived, Delayed, Cancelled });
text_enum!(Gender { Male, Female, Other });

// ============================================================================
// Booking reference
// ============================================================================

const REFERENCE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Human-facing booking identifier: six characters from `A-Z0-9`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BookingReference(String);

impl BookingReference {
    /// Length of every reference.
    pub const LEN: usize = 6;

    /// Draw a random reference. Uniqueness is the repository's business.
    #[must_use]
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let code = (0..Self::LEN)
            .map(|_| char::from(REFERENCE_ALPHABET[rng.gen_range(0..REFERENCE_ALPHABET.len())]))
            .collect();
        Self(code)
    }

    /// Parse user input; case-insensitive.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] unless the input is six ASCII
    /// letters or digits.
    pub fn parse(input: &str) -> Result<Self, DomainError> {
        let code = input.trim().to_ascii_uppercase();
        if code.len() != Self::LEN || !code.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(DomainError::validation(format!(
                "Booking reference must be {} letters or digits",
                Self::LEN
            )));
        }
        Ok(Self(code))
    }

    /// The reference as text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) const fn empty() -> Self {
        Self(String::new())
    }
}

impl fmt::Display for BookingReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Airport code
// ============================================================================

/// IATA airport code: three ASCII letters, stored upper-case.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AirportCode(String);

impl AirportCode {
    /// Parse and normalise.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] unless the input is three letters.
    pub fn parse(input: &str) -> Result<Self, DomainError> {
        let code = input.trim().to_ascii_uppercase();
        if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(DomainError::validation(format!(
                "Airport code must be three letters, got '{input}'"
            )));
        }
        Ok(Self(code))
    }

    /// The code as text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AirportCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Passenger profile
// ============================================================================

/// Personal and travel-document data supplied with a booking request.
///
/// Used to find the passenger by passport number or register them on their
/// first booking.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassengerProfile {
    /// Given name
    pub first_name: String,
    /// Family name
    pub last_name: String,
    /// Date of birth (midnight UTC)
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
    /// Contact email
    pub email: String,
    /// Contact phone
    pub phone: String,
}

impl PassengerProfile {
    /// Check the fields a booking request must carry and normalise them.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] for a blank required field or a date
    /// of birth that is not in the past.
    pub fn normalized(mut self, now: DateTime<Utc>) -> Result<Self, DomainError> {
        require("First name", &self.first_name)?;
        require("Last name", &self.last_name)?;
        require("Email", &self.email)?;
        require("Passport number", &self.passport_number)?;
        require("Nationality", &self.nationality)?;
        if self.date_of_birth >= now {
            return Err(DomainError::validation("Date of birth must be in the past"));
        }

        self.first_name = self.first_name.trim().to_string();
        self.last_name = self.last_name.trim().to_string();
        self.email = self.email.trim().to_string();
        self.passport_number = self.passport_number.trim().to_ascii_uppercase();
        self.nationality = self.nationality.trim().to_string();
        Ok(self)
    }
}

/// Fail with a validation error when `value` is blank.
///
/// # Errors
///
/// Returns [`DomainError::Validation`] naming `field`.
pub(crate) fn require(field: &str, value: &str) -> Result<(), DomainError> {
    if value.trim().is_empty() {
        return Err(DomainError::validation(format!("{field} is required")));
    }
    Ok(())
}

/// Options for creating a booking.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingCreationOptions {
    /// Flight to book
    pub flight_id: FlightId,
    /// Who travels
    pub passenger: PassengerProfile,
    /// Seats requested
    pub seats: u32,
    /// Seating tier
    pub cabin_class: CabinClass,
    /// Free-text requests (meal, assistance, ...)
    pub special_requests: String,
}

impl BookingCreationOptions {
    /// Check the request-level invariants.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] for a nil flight id or zero seats,
    /// or if the passenger profile is incomplete.
    pub fn validated(mut self, now: DateTime<Utc>) -> Result<Self, DomainError> {
        if self.flight_id.is_nil() {
            return Err(DomainError::validation("Flight id is required"));
        }
        if self.seats == 0 {
            return Err(DomainError::validation("Seats count must be greater than 0"));
        }
        self.passenger = self.passenger.normalized(now)?;
        Ok(self)
    }
}
