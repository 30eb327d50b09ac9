//! # Notifier Testing
//!
//! Testing utilities for the booking confirmation notifier.
//!
//! This crate provides:
//! - [`RecordingMailTransport`]: captures accepted emails and replays scripted failures
//! - [`ScriptedDispatcher`]: replays dispatch results without composing emails
//! - [`RecordingAcknowledger`]: records every ack / redeliver / dead-letter call
//! - [`InMemoryBroker`]: a single-partition broker with redelivery and dead-lettering
//! - [`fixtures`]: ready-made events and deliveries
//!
//! ## Example
//!
//! ```ignore
//! use notifier_testing::{InMemoryBroker, RecordingMailTransport, fixtures};
//!
//! #[tokio::test]
//! async fn confirmation_is_sent_once() {
//!     let transport = RecordingMailTransport::new();
//!     let broker = InMemoryBroker::new("Booking-Confirmation");
//!     let consumer = consumer_over(&transport, &broker);
//!
//!     let offset = broker.publish_event(&fixtures::sample_event());
//!     broker.drain(&consumer).await;
//!
//!     assert!(broker.is_acknowledged(offset));
//!     assert_eq!(transport.sent_count(), 1);
//! }
//! ```

pub mod broker;
pub mod mocks;

/// Ready-made events and deliveries.
pub mod fixtures {
    use chrono::{DateTime, TimeZone, Utc};
    use notifier_core::delivery::Delivery;
    use notifier_core::event::BookingConfirmationEvent;

    /// Topic used by fixtures.
    pub const TOPIC: &str = "Booking-Confirmation";

    /// 2024-01-01T10:00:00Z
    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn booked_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
    }

    /// The `B-100` sedan booking for `a@x.com`.
    #[must_use]
    pub fn sample_event() -> BookingConfirmationEvent {
        booking_event("B-100", "a@x.com")
    }

    /// A booking with the given id and recipient.
    #[must_use]
    pub fn booking_event(booking_id: &str, user_email: &str) -> BookingConfirmationEvent {
        BookingConfirmationEvent::new(booking_id, user_email, "Sedan, 2 days", booked_at())
    }

    /// A first-attempt delivery of `event` at `offset`.
    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn delivery_of(event: &BookingConfirmationEvent, offset: i64) -> Delivery {
        Delivery::new(TOPIC, 0, offset, Some(event.encode().unwrap()))
            .with_key(Some(event.booking_id().as_bytes().to_vec()))
    }
}

// Re-export commonly used items
pub use broker::{DeadLetter, InMemoryBroker};
pub use mocks::{RecordingAcknowledger, RecordingMailTransport, ScriptedDispatcher, Settlement};
