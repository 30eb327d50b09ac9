//! Booking confirmation notifier service.
//!
//! Consumes booking confirmation events from Redpanda and emails each customer a
//! confirmation. See the `booking-notifier` binary for process wiring; this library
//! exposes the pieces worth testing on their own.

pub mod config;

pub use config::{Config, ConfigError, MailTransportKind};
