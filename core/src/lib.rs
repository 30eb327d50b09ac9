//! # Notifier Core
//!
//! Core traits and types for the booking confirmation notifier.
//!
//! The notifier consumes booking-confirmation events from a broker topic and sends
//! one confirmation email per event. This crate holds the vocabulary shared by every
//! other crate in the workspace:
//!
//! - [`event`]: the [`BookingConfirmationEvent`](event::BookingConfirmationEvent) and its wire codec
//! - [`mail`]: outbound [`EmailMessage`](mail::EmailMessage) and the [`MailTransport`](mail::MailTransport) seam
//! - [`dispatcher`]: the [`Dispatcher`](dispatcher::Dispatcher) capability and its failure taxonomy
//! - [`delivery`]: broker envelopes, [`Disposition`](delivery::Disposition) and the
//!   [`Acknowledger`](delivery::Acknowledger) seam through which the consumer talks to the broker
//!
//! ## Delivery Contract
//!
//! ```text
//! Broker ──► Consumer ──► Dispatcher ──► MailTransport
//!    ▲           │
//!    └── ack / redeliver / dead-letter
//! ```
//!
//! - An event is acknowledged if and only if the dispatcher reports success
//! - A failed dispatch is never acknowledged; the broker layer redelivers it
//! - An undecodable payload goes straight to the dead-letter destination
//!
//! Nothing here performs I/O. Implementations live in `notifier-runtime`,
//! `notifier-redpanda` and `notifier-mail`.

pub mod delivery;
pub mod dispatcher;
pub mod event;
pub mod mail;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use delivery::{AckError, Acknowledger, Delivery, Disposition};
pub use dispatcher::{DispatchError, Dispatcher, FailureKind};
pub use event::{BookingConfirmationEvent, CodecError};
pub use mail::{EmailMessage, MailError, MailTransport};
