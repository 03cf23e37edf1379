//! Background consumers.
//!
//! - **`consumer`**: subscribe-process-reconnect loop with redelivery
//! - **`handlers`**: the [`EventHandler`] trait, the registry that routes by
//!   event type, and the booking handlers

pub mod consumer;
pub mod handlers;

pub use consumer::{DeadLetterSink, EventConsumer, RedeliveryPolicy};
pub use handlers::{
    BookingNotificationHandler, EventHandler, HandlerError, HandlerRegistry, LoggingHandler,
    SubmitBookingHandler,
};
