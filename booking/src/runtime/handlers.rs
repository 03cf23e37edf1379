//! Event handlers run by the consumers.
//!
//! A handler receives the whole [`SerializedEvent`] so it can read the
//! correlation ID from the metadata. Returning an error asks the consumer to
//! redeliver the message.

use crate::events::{BookingEvent, BookingSubmitted, EventContext};
use crate::service::FlightBookingService;
use crate::types::BookingCreationOptions;
use async_trait::async_trait;
use flight_booking_core::event::SerializedEvent;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Handler failure; any error type will do.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Processes one delivered event.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Handle the event.
    ///
    /// # Errors
    ///
    /// Any error makes the consumer redeliver the event.
    async fn handle(&self, event: &SerializedEvent) -> Result<(), HandlerError>;
}

/// Dispatches events to the handler registered for their type.
///
/// Event types without a handler go to the fallback, which logs them.
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
    fallback: Arc<dyn EventHandler>,
}

impl HandlerRegistry {
    /// Empty registry with the logging fallback.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            fallback: Arc::new(LoggingHandler),
        }
    }

    /// Route `event_type` to `handler`, replacing any earlier registration.
    #[must_use]
    pub fn register(mut self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.insert(event_type.into(), handler);
        self
    }

    /// Replace the fallback handler.
    #[must_use]
    pub fn with_fallback(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.fallback = handler;
        self
    }

    /// Registry with the notification handler on every booking event type.
    #[must_use]
    pub fn notifications() -> Self {
        let notifier: Arc<dyn EventHandler> = Arc::new(BookingNotificationHandler);
        NOTIFIED_EVENTS
            .iter()
            .fold(Self::new(), |registry, event_type| {
                registry.register(*event_type, Arc::clone(&notifier))
            })
    }

    fn handler_for(&self, event_type: &str) -> &Arc<dyn EventHandler> {
        self.handlers.get(event_type).unwrap_or(&self.fallback)
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventHandler for HandlerRegistry {
    async fn handle(&self, event: &SerializedEvent) -> Result<(), HandlerError> {
        self.handler_for(&event.event_type).handle(event).await
    }
}

/// Booking event types the notification handler reacts to.
pub const NOTIFIED_EVENTS: &[&str] = &[
    "BookingCreated.v1",
    "BookingConfirmed.v1",
    "BookingCancelled.v1",
    "BookingPaid.v1",
    "BookingRefunded.v1",
    "BookingCheckedIn.v1",
];

/// Logs every event it receives.
pub struct LoggingHandler;

#[async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &SerializedEvent) -> Result<(), HandlerError> {
        info!(
            event_type = %event.event_type,
            aggregate_id = event.aggregate_id().unwrap_or("-"),
            correlation_id = event.correlation_id().unwrap_or("-"),
            "Domain event received"
        );
        Ok(())
    }
}

/// Passenger notifications for booking lifecycle events.
///
/// Delivery to the passenger (mail, SMS) is outside this service; the
/// handler records what would be sent.
pub struct BookingNotificationHandler;

#[async_trait]
impl EventHandler for BookingNotificationHandler {
    async fn handle(&self, event: &SerializedEvent) -> Result<(), HandlerError> {
        let booking_event: BookingEvent = event.decode()?;
        let correlation_id = event.correlation_id().unwrap_or("-");

        match &booking_event {
            BookingEvent::Created {
                reference,
                seats,
                total_amount,
                ..
            } => info!(
                booking_reference = %reference,
                seats,
                total_amount = %total_amount,
                correlation_id,
                "Sending booking received notification"
            ),
            BookingEvent::Confirmed { reference, .. } => info!(
                booking_reference = %reference,
                correlation_id,
                "Sending booking confirmation"
            ),
            BookingEvent::Cancelled {
                reference,
                reason,
                refund_amount,
                ..
            } => info!(
                booking_reference = %reference,
                reason = %reason,
                refund_amount = %refund_amount,
                correlation_id,
                "Sending cancellation notice"
            ),
            BookingEvent::Paid {
                reference,
                amount,
                payment_reference,
                ..
            } => info!(
                booking_reference = %reference,
                amount = %amount,
                payment_reference = %payment_reference,
                correlation_id,
                "Sending payment receipt"
            ),
            BookingEvent::Refunded {
                reference,
                refund_amount,
                ..
            } => info!(
                booking_reference = %reference,
                refund_amount = %refund_amount,
                correlation_id,
                "Sending refund notice"
            ),
            BookingEvent::CheckedIn { reference, .. } => info!(
                booking_reference = %reference,
                correlation_id,
                "Sending boarding pass"
            ),
        }
        Ok(())
    }
}

/// Creates bookings from requests accepted by
/// [`FlightBookingService::submit_booking`].
///
/// A request the domain rejects (full flight, unknown flight, bad data) is
/// logged and acknowledged: redelivering it would fail the same way. Store and
/// bus failures are returned so the request is redelivered.
pub struct SubmitBookingHandler {
    service: FlightBookingService,
}

impl SubmitBookingHandler {
    /// Handler creating bookings through `service`.
    #[must_use]
    pub const fn new(service: FlightBookingService) -> Self {
        Self { service }
    }
}

#[async_trait]
impl EventHandler for SubmitBookingHandler {
    async fn handle(&self, event: &SerializedEvent) -> Result<(), HandlerError> {
        let request: BookingSubmitted = event.decode()?;
        let request_id = request.request_id.to_string();
        let context = EventContext::correlated(event.correlation_id().unwrap_or(&request_id));
        let context = match event.metadata.as_ref().and_then(|m| m.user_id.clone()) {
            Some(user_id) => context.with_user(user_id),
            None => context,
        };

        let options = BookingCreationOptions {
            flight_id: request.flight_id,
            passenger: request.passenger,
            seats: request.seats,
            cabin_class: request.cabin_class,
            special_requests: request.special_requests,
        };

        match self.service.create_booking(options, &context).await {
            Ok(created) => {
                info!(
                    request_id = %request_id,
                    booking_reference = %created.booking.reference(),
                    "Submitted booking created"
                );
                Ok(())
            }
            Err(e) => {
                if let Some(rejection) = e.domain() {
                    warn!(request_id = %request_id, reason = %rejection, "Submitted booking rejected");
                    return Ok(());
                }
                debug!(request_id = %request_id, error = %e, "Submitted booking failed, will be redelivered");
                Err(e.into())
            }
        }
    }
}
