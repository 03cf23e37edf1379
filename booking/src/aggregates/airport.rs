//! Airports served by the catalog.

use crate::error::DomainError;
use crate::types::{AirportCode, require};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Descriptive fields of an airport.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AirportInfo {
    /// Airport name
    pub name: String,
    /// City served
    pub city: String,
    /// Country
    pub country: String,
    /// IANA timezone, e.g. `Asia/Shanghai`
    pub timezone: String,
}

impl AirportInfo {
    fn validated(self) -> Result<Self, DomainError> {
        require("Airport name", &self.name)?;
        require("City", &self.city)?;
        require("Country", &self.country)?;
        require("Timezone", &self.timezone)?;
        Ok(Self {
            name: self.name.trim().to_string(),
            city: self.city.trim().to_string(),
            country: self.country.trim().to_string(),
            timezone: self.timezone.trim().to_string(),
        })
    }
}

/// An airport; only active airports accept new flights.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Airport {
    pub(crate) code: AirportCode,
    pub(crate) info: AirportInfo,
    pub(crate) is_active: bool,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: Option<DateTime<Utc>>,
}

impl Airport {
    /// Create an active airport.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] for an invalid code or blank field.
    pub fn new(code: &str, info: AirportInfo, now: DateTime<Utc>) -> Result<Self, DomainError> {
        Ok(Self {
            code: AirportCode::parse(code)?,
            info: info.validated()?,
            is_active: true,
            created_at: now,
            updated_at: None,
        })
    }

    /// Replace the descriptive fields.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] for a blank field.
    pub fn update_info(&mut self, info: AirportInfo, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.info = info.validated()?;
        self.updated_at = Some(now);
        Ok(())
    }

    /// Accept new flights again.
    pub fn activate(&mut self, now: DateTime<Utc>) {
        self.is_active = true;
        self.updated_at = Some(now);
    }

    /// Stop accepting new flights.
    pub fn deactivate(&mut self, now: DateTime<Utc>) {
        self.is_active = false;
        self.updated_at = Some(now);
    }

    /// IATA code
    #[must_use]
    pub const fn code(&self) -> &AirportCode {
        &self.code
    }

    /// Name, city, country and timezone
    #[must_use]
    pub const fn info(&self) -> &AirportInfo {
        &self.info
    }

    /// Whether new flights may use it
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.is_active
    }

    /// When added
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
