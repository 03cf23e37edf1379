//! Domain events and their stored form.
//!
//! An aggregate raises typed events; services turn them into
//! [`SerializedEvent`]s (a `bincode` payload plus [`EventMetadata`]) before
//! writing them to the outbox. The relay and every consumer work on the
//! serialized form, and only a handler that needs the payload decodes it.
//!
//! ```
//! use flight_booking_core::event::{Event, EventMetadata, SerializedEvent};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
//! enum SeatEvent {
//!     Held { flight: String, seats: u32 },
//!     Released { flight: String, seats: u32 },
//! }
//!
//! impl Event for SeatEvent {
//!     fn event_type(&self) -> &'static str {
//!         match self {
//!             SeatEvent::Held { .. } => "SeatsHeld.v1",
//!             SeatEvent::Released { .. } => "SeatsReleased.v1",
//!         }
//!     }
//! }
//!
//! let held = SeatEvent::Held { flight: "CA1234".into(), seats: 2 };
//! let stored = SerializedEvent::from_event(&held, None).unwrap();
//! assert_eq!(stored.event_type, "SeatsHeld.v1");
//! assert_eq!(stored.decode::<SeatEvent>().unwrap(), held);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt;
use thiserror::Error;

/// Encoding failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// The event or its metadata could not be encoded.
    #[error("Could not encode event: {0}")]
    Encode(String),

    /// The bytes are not an event of the expected type.
    #[error("Could not decode event: {0}")]
    Decode(String),
}

/// Something that happened to an aggregate.
///
/// `event_type()` names the event with a version suffix
/// (`"BookingConfirmed.v1"`). Bus channels and consumer dispatch are derived
/// from it, so changing a name breaks every subscriber.
pub trait Event: Send + Sync + 'static {
    /// Versioned type name.
    fn event_type(&self) -> &'static str;
}

/// Context stored beside every event.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Correlation ID of the request that caused the event.
    pub correlation_id: Option<String>,
    /// The aggregate that raised the event.
    pub aggregate_id: Option<String>,
    /// Acting user, when known.
    pub user_id: Option<String>,
    /// When the event was raised.
    pub occurred_at: Option<DateTime<Utc>>,
}

impl EventMetadata {
    /// Metadata for an event raised by `aggregate_id` at `occurred_at`.
    #[must_use]
    pub fn for_aggregate(aggregate_id: impl Into<String>, occurred_at: DateTime<Utc>) -> Self {
        Self {
            aggregate_id: Some(aggregate_id.into()),
            occurred_at: Some(occurred_at),
            ..Self::default()
        }
    }

    /// Attach the request's correlation ID.
    #[must_use]
    pub fn with_correlation_id(self, correlation_id: Option<String>) -> Self {
        Self { correlation_id, ..self }
    }

    /// Attach the acting user.
    #[must_use]
    pub fn with_user_id(self, user_id: Option<String>) -> Self {
        Self { user_id, ..self }
    }

    /// JSON for a `JSONB` column.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "correlation_id": self.correlation_id,
            "aggregate_id": self.aggregate_id,
            "user_id": self.user_id,
            "occurred_at": self.occurred_at,
        })
    }

    /// Read back a `JSONB` column.
    ///
    /// # Errors
    ///
    /// [`EventError::Decode`] if the object has the wrong shape.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, EventError> {
        Self::deserialize(value).map_err(|e| EventError::Decode(e.to_string()))
    }
}

/// An event as the outbox and the bus carry it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedEvent {
    /// Versioned type name, see [`Event::event_type`].
    pub event_type: String,
    /// `bincode` payload.
    pub data: Vec<u8>,
    /// Correlation and origin.
    pub metadata: Option<EventMetadata>,
}

impl SerializedEvent {
    /// Wrap an already encoded payload.
    #[must_use]
    pub const fn new(event_type: String, data: Vec<u8>, metadata: Option<EventMetadata>) -> Self {
        Self {
            event_type,
            data,
            metadata,
        }
    }

    /// Encode a domain event.
    ///
    /// # Errors
    ///
    /// [`EventError::Encode`] if `bincode` rejects the event.
    pub fn from_event<E>(event: &E, metadata: Option<EventMetadata>) -> Result<Self, EventError>
    where
        E: Event + Serialize,
    {
        let data = bincode::serialize(event).map_err(|e| EventError::Encode(e.to_string()))?;
        Ok(Self::new(event.event_type().to_string(), data, metadata))
    }

    /// Decode the payload as `E`.
    ///
    /// # Errors
    ///
    /// [`EventError::Decode`] if the payload is not an `E`.
    pub fn decode<E>(&self) -> Result<E, EventError>
    where
        E: Event + DeserializeOwned,
    {
        bincode::deserialize(&self.data).map_err(|e| EventError::Decode(e.to_string()))
    }

    /// Correlation ID, if the metadata has one.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        self.metadata.as_ref()?.correlation_id.as_deref()
    }

    /// Aggregate ID, if the metadata has one.
    #[must_use]
    pub fn aggregate_id(&self) -> Option<&str> {
        self.metadata.as_ref()?.aggregate_id.as_deref()
    }
}

impl fmt::Display for SerializedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} bytes", self.event_type, self.data.len())?;
        if let Some(aggregate) = self.aggregate_id() {
            write!(f, ", aggregate {aggregate}")?;
        }
        f.write_str(")")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
    enum GateEvent {
        Assigned { flight: String, gate: String },
        Closed { flight: String },
    }

    impl Event for GateEvent {
        fn event_type(&self) -> &'static str {
            match self {
                Self::Assigned { .. } => "GateAssigned.v1",
                Self::Closed { .. } => "GateClosed.v1",
            }
        }
    }

    fn assigned() -> GateEvent {
        GateEvent::Assigned {
            flight: "MU5101".to_string(),
            gate: "B12".to_string(),
        }
    }

    #[test]
    fn metadata_follows_the_payload() {
        let metadata = EventMetadata::for_aggregate("MU5101", Utc::now())
            .with_correlation_id(Some("req-77".to_string()));
        let stored = SerializedEvent::from_event(&assigned(), Some(metadata)).unwrap();

        assert_eq!(stored.event_type, "GateAssigned.v1");
        assert_eq!(stored.correlation_id(), Some("req-77"));
        assert_eq!(stored.aggregate_id(), Some("MU5101"));
        assert_eq!(stored.decode::<GateEvent>().unwrap(), assigned());
    }

    #[test]
    fn the_bus_envelope_is_bincode_too() {
        let stored = SerializedEvent::from_event(
            &GateEvent::Closed { flight: "MU5101".to_string() },
            Some(EventMetadata::for_aggregate("MU5101", Utc::now())),
        )
        .unwrap();

        let bytes = bincode::serialize(&stored).unwrap();
        assert_eq!(bincode::deserialize::<SerializedEvent>(&bytes).unwrap(), stored);
    }

    #[test]
    fn metadata_json_uses_field_names() {
        let metadata = EventMetadata::for_aggregate("Q7K2ZD", Utc::now())
            .with_user_id(Some("user-9".to_string()));
        let json = metadata.to_json();

        assert_eq!(json["aggregate_id"], "Q7K2ZD");
        assert!(json["correlation_id"].is_null());
        assert_eq!(EventMetadata::from_json(&json).unwrap(), metadata);
        assert!(EventMetadata::from_json(&serde_json::json!([1, 2])).is_err());
    }

    #[test]
    fn garbage_does_not_decode() {
        let stored = SerializedEvent::new("GateAssigned.v1".to_string(), vec![0xff], None);
        assert!(matches!(stored.decode::<GateEvent>(), Err(EventError::Decode(_))));
    }

    #[test]
    fn display_names_type_size_and_aggregate() {
        let bare = SerializedEvent::new("GateClosed.v1".to_string(), vec![1, 2, 3], None);
        assert_eq!(bare.to_string(), "GateClosed.v1 (3 bytes)");

        let tagged = SerializedEvent::new(
            "GateClosed.v1".to_string(),
            vec![1],
            Some(EventMetadata::for_aggregate("MU5101", Utc::now())),
        );
        assert_eq!(tagged.to_string(), "GateClosed.v1 (1 bytes, aggregate MU5101)");
    }
}
