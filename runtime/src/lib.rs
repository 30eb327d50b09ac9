//! # Notifier Runtime
//!
//! Runtime implementation of the booking confirmation notifier.
//!
//! ## Core Components
//!
//! - **Consumer**: [`BookingConfirmationConsumer`] decodes deliveries, dispatches, and
//!   settles each one with the broker (ack, redeliver or dead-letter)
//! - **Dispatcher**: [`EmailDispatcher`] composes the confirmation and sends it through a
//!   shared mail transport under a timeout
//! - **Redelivery**: [`RedeliveryPolicy`] used by broker adapters to back off and to
//!   decide when a record is exhausted
//! - **Metrics**: Prometheus counters and histograms for every outcome
//!
//! ## Example
//!
//! ```ignore
//! use notifier_runtime::{BookingConfirmationConsumer, DispatcherConfig, EmailDispatcher};
//!
//! let dispatcher = Arc::new(EmailDispatcher::new(transport, DispatcherConfig::default()));
//! let consumer = BookingConfirmationConsumer::new(dispatcher, acknowledger);
//!
//! let disposition = consumer.process(&delivery).await;
//! ```

/// Booking confirmation consumer
pub mod consumer;

/// Email dispatcher
pub mod dispatcher;

/// Prometheus metrics for observability
pub mod metrics;

/// Broker-side redelivery policy with exponential backoff
pub mod redelivery;

pub use consumer::{BookingConfirmationConsumer, PermanentFailurePolicy};
pub use dispatcher::{DispatcherConfig, EmailDispatcher};
pub use redelivery::{RedeliveryDecision, RedeliveryPolicy};
