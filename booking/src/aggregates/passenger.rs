//! Passenger identity and travel documents.

use crate::error::DomainError;
use crate::events::PassengerEvent;
use crate::types::{Gender, PassengerId, PassengerProfile, PassengerType, require};
use chrono::{DateTime, Datelike, Months, Utc};
use flight_booking_core::aggregate::{Aggregate, Events, raise};
use serde::{Deserialize, Serialize};

/// Oldest plausible passenger.
const MAX_AGE: u32 = 120;

/// A registered passenger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passenger {
    pub(crate) id: PassengerId,
    pub(crate) first_name: String,
    pub(crate) last_name: String,
    pub(crate) date_of_birth: DateTime<Utc>,
    pub(crate) gender: Gender,
    pub(crate) passport_number: String,
    pub(crate) passport_country: String,
    pub(crate) passport_expiry: DateTime<Utc>,
    pub(crate) nationality: String,
    pub(crate) email: String,
    pub(crate) phone: String,
    pub(crate) passenger_type: PassengerType,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: Option<DateTime<Utc>>,
}

/// Whole years between `date_of_birth` and `on`.
#[must_use]
pub fn age_on(date_of_birth: DateTime<Utc>, on: DateTime<Utc>) -> u32 {
    let mut age = on.year() - date_of_birth.year();
    if (on.month(), on.day()) < (date_of_birth.month(), date_of_birth.day()) {
        age -= 1;
    }
    u32::try_from(age).unwrap_or(0)
}

impl Passenger {
    /// Register a passenger from their profile.
    ///
    /// Passport number and issuing country are upper-cased, the email is
    /// lower-cased and the passenger type is derived from the age at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] for a blank field, a birth date that
    /// is not in the past, an implausible age or an expired passport.
    pub fn register(
        profile: PassengerProfile,
        now: DateTime<Utc>,
    ) -> Result<(Self, Events<PassengerEvent>), DomainError> {
        require("First name", &profile.first_name)?;
        require("Last name", &profile.last_name)?;
        require("Passport number", &profile.passport_number)?;
        require("Passport country", &profile.passport_country)?;
        require("Nationality", &profile.nationality)?;
        require("Email", &profile.email)?;
        require("Phone number", &profile.phone)?;
        if profile.date_of_birth >= now {
            return Err(DomainError::validation("Date of birth must be in the past"));
        }
        if profile.passport_expiry <= now {
            return Err(DomainError::validation("Passport has expired"));
        }
        let age = age_on(profile.date_of_birth, now);
        if age > MAX_AGE {
            return Err(DomainError::validation(format!(
                "Age {age} is not plausible"
            )));
        }

        let passenger = Self {
            id: PassengerId::new(),
            first_name: profile.first_name.trim().to_string(),
            last_name: profile.last_name.trim().to_string(),
            date_of_birth: profile.date_of_birth,
            gender: profile.gender,
            passport_number: profile.passport_number.trim().to_ascii_uppercase(),
            passport_country: profile.passport_country.trim().to_ascii_uppercase(),
            passport_expiry: profile.passport_expiry,
            nationality: profile.nationality.trim().to_string(),
            email: profile.email.trim().to_lowercase(),
            phone: profile.phone.trim().to_string(),
            passenger_type: PassengerType::for_age(age),
            created_at: now,
            updated_at: None,
        };

        let mut events = Events::new();
        events.push(PassengerEvent::Registered {
            passenger_id: passenger.id,
            full_name: passenger.full_name(),
            email: passenger.email.clone(),
            passport_number: passenger.passport_number.clone(),
        });
        Ok((passenger, events))
    }

    /// Replace email and phone.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] if either is blank.
    pub fn update_contact_info(
        &mut self,
        email: &str,
        phone: &str,
        now: DateTime<Utc>,
    ) -> Result<Events<PassengerEvent>, DomainError> {
        require("Email", email)?;
        require("Phone number", phone)?;
        self.updated_at = Some(now);
        let event = PassengerEvent::ContactUpdated {
            passenger_id: self.id,
            email: email.trim().to_lowercase(),
            phone: phone.trim().to_string(),
        };
        Ok(raise(self, event))
    }

    /// Replace the travel document.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] for a blank number or country, or an
    /// expiry that is not in the future.
    pub fn update_passport_info(
        &mut self,
        number: &str,
        country: &str,
        expiry: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Events<PassengerEvent>, DomainError> {
        require("Passport number", number)?;
        require("Passport country", country)?;
        if expiry <= now {
            return Err(DomainError::validation("Passport has expired"));
        }
        self.updated_at = Some(now);
        let event = PassengerEvent::PassportUpdated {
            passenger_id: self.id,
            passport_number: number.trim().to_ascii_uppercase(),
            passport_country: country.trim().to_ascii_uppercase(),
            passport_expiry: expiry,
        };
        Ok(raise(self, event))
    }

    /// Passport good for travel: expires more than six months after `now`.
    #[must_use]
    pub fn is_passport_valid(&self, now: DateTime<Utc>) -> bool {
        now.checked_add_months(Months::new(6))
            .is_some_and(|limit| self.passport_expiry > limit)
    }

    /// Age in whole years at `now`.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> u32 {
        age_on(self.date_of_birth, now)
    }

    /// "First Last"
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    /// Identifier
    #[must_use]
    pub const fn id(&self) -> PassengerId {
        self.id
    }

    /// Given name
    #[must_use]
    pub fn first_name(&self) -> &str {
        &self.first_name
    }

    /// Family name
    #[must_use]
    pub fn last_name(&self) -> &str {
        &self.last_name
    }

    /// Date of birth
    #[must_use]
    pub const fn date_of_birth(&self) -> DateTime<Utc> {
        self.date_of_birth
    }

    /// Gender
    #[must_use]
    pub const fn gender(&self) -> Gender {
        self.gender
    }

    /// Passport number (upper-case)
    #[must_use]
    pub fn passport_number(&self) -> &str {
        &self.passport_number
    }

    /// Issuing country (upper-case)
    #[must_use]
    pub fn passport_country(&self) -> &str {
        &self.passport_country
    }

    /// Passport expiry
    #[must_use]
    pub const fn passport_expiry(&self) -> DateTime<Utc> {
        self.passport_expiry
    }

    /// Nationality
    #[must_use]
    pub fn nationality(&self) -> &str {
        &self.nationality
    }

    /// Email (lower-case)
    #[must_use]
    pub fn email(&self) -> &str {
        &self.email
    }

    /// Phone
    #[must_use]
    pub fn phone(&self) -> &str {
        &self.phone
    }

    /// Fare category fixed at registration
    #[must_use]
    pub const fn passenger_type(&self) -> PassengerType {
        self.passenger_type
    }

    /// When registered
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Last change
    #[must_use]
    pub const fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }
}

impl Aggregate for Passenger {
    type Event = PassengerEvent;

    fn apply_event(&mut self, event: &PassengerEvent) {
        match event {
            PassengerEvent::Registered { .. } => {}
            PassengerEvent::ContactUpdated { email, phone, .. } => {
                self.email.clone_from(email);
                self.phone.clone_from(phone);
            }
            PassengerEvent::PassportUpdated {
                passport_number,
                passport_country,
                passport_expiry,
                ..
            } => {
                self.passport_number.clone_from(passport_number);
                self.passport_country.clone_from(passport_country);
                self.passport_expiry = *passport_expiry;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use flight_booking_core::environment::Clock;
    use flight_booking_testing::assertions::single_event;
    use flight_booking_testing::{AggregateTest, test_clock};

    /// A complete adult profile valid at `now`.
    pub(crate) fn profile(now: DateTime<Utc>) -> PassengerProfile {
        PassengerProfile {
            first_name: "Wei".to_string(),
            last_name: "Zhang".to_string(),
            date_of_birth: Utc.with_ymd_and_hms(1990, 5, 17, 0, 0, 0).unwrap(),
            gender: Gender::Female,
            passport_number: "e12345678".to_string(),
            passport_country: "cn".to_string(),
            passport_expiry: now + Duration::days(3 * 365),
            nationality: "Chinese".to_string(),
            email: "Wei.Zhang@Example.com".to_string(),
            phone: "+86 138 0000 0000".to_string(),
        }
    }

    fn registered() -> Passenger {
        let now = test_clock().now();
        Passenger::register(profile(now), now).unwrap().0
    }

    #[test]
    fn register_normalises_documents_and_email() {
        let now = test_clock().now();
        let (passenger, events) = Passenger::register(profile(now), now).unwrap();

        assert_eq!(passenger.passport_number(), "E12345678");
        assert_eq!(passenger.passport_country(), "CN");
        assert_eq!(passenger.email(), "wei.zhang@example.com");
        assert_eq!(passenger.full_name(), "Wei Zhang");
        assert_eq!(passenger.passenger_type(), PassengerType::Adult);
        assert_eq!(passenger.age(now), 34);
        assert!(matches!(
            single_event(&events),
            PassengerEvent::Registered { full_name, .. } if full_name == "Wei Zhang"
        ));
    }

    #[test]
    fn register_derives_type_from_age() {
        let now = test_clock().now();
        let cases = [
            (Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(), PassengerType::Infant),
            (Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap(), PassengerType::Child),
            (Utc.with_ymd_and_hms(1950, 1, 1, 0, 0, 0).unwrap(), PassengerType::Senior),
        ];
        for (date_of_birth, expected) in cases {
            let mut profile = profile(now);
            profile.date_of_birth = date_of_birth;
            let (passenger, _) = Passenger::register(profile, now).unwrap();
            assert_eq!(passenger.passenger_type(), expected);
        }
    }

    #[test]
    fn register_rejects_bad_dates() {
        let now = test_clock().now();

        let mut unborn = profile(now);
        unborn.date_of_birth = now + Duration::days(1);
        assert!(Passenger::register(unborn, now).is_err());

        let mut expired = profile(now);
        expired.passport_expiry = now - Duration::days(1);
        assert!(Passenger::register(expired, now).is_err());

        let mut ancient = profile(now);
        ancient.date_of_birth = Utc.with_ymd_and_hms(1890, 1, 1, 0, 0, 0).unwrap();
        assert!(Passenger::register(ancient, now).is_err());

        let mut no_phone = profile(now);
        no_phone.phone = String::new();
        assert!(Passenger::register(no_phone, now).is_err());
    }

    #[test]
    fn passport_needs_six_months_left() {
        let now = test_clock().now();
        let mut passenger = registered();
        assert!(passenger.is_passport_valid(now));

        passenger.passport_expiry = now + Duration::days(100);
        assert!(!passenger.is_passport_valid(now));
    }

    #[test]
    fn update_contact_info() {
        let now = test_clock().now();
        AggregateTest::given(registered())
            .when(move |p| p.update_contact_info("NEW@example.com", "123", now))
            .then_state(move |p| {
                assert_eq!(p.email(), "new@example.com");
                assert_eq!(p.phone(), "123");
                assert_eq!(p.updated_at(), Some(now));
            })
            .run();

        AggregateTest::given(registered())
            .when(move |p| p.update_contact_info("new@example.com", " ", now))
            .then_error(|e| assert!(matches!(e, DomainError::Validation(_))))
            .run();
    }

    #[test]
    fn update_passport_requires_future_expiry() {
        let now = test_clock().now();
        AggregateTest::given(registered())
            .when(move |p| p.update_passport_info("g999", "cn", now - Duration::days(1), now))
            .then_error(|e| assert!(matches!(e, DomainError::Validation(_))))
            .run();

        let expiry = now + Duration::days(2000);
        AggregateTest::given(registered())
            .when(move |p| p.update_passport_info("g999", "cn", expiry, now))
            .then_state(move |p| {
                assert_eq!(p.passport_number(), "G999");
                assert_eq!(p.passport_expiry(), expiry);
            })
            .run();
    }
}
