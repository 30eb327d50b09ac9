//! Redpanda adapter for the booking confirmation notifier.
//!
//! This crate connects [`BookingConfirmationConsumer`](notifier_runtime::BookingConfirmationConsumer)
//! to a Kafka-compatible broker through rdkafka. It works with Redpanda, Apache Kafka,
//! AWS MSK or anything else that speaks the Kafka protocol.
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with manual offset commits:
//! - An offset is committed only after the confirmation email was accepted, or after
//!   the record was safely republished to the dead-letter topic
//! - A failed dispatch rewinds the partition to the record after a backoff, so the
//!   same record is handed out again
//! - After `max_attempts` deliveries the record goes to `<topic>.DLT`; if that publish
//!   fails the record is rewound and dead-lettered again on its next delivery
//! - If a record can be neither committed past nor rewound, the listener stops with
//!   [`ListenerError::Stalled`] rather than consume past it
//! - Attempt numbers for revoked partitions are dropped on rebalance
//! - If the process crashes before commit, records are redelivered; recipients can
//!   receive duplicate emails
//!
//! # Architecture
//!
//! ```text
//! Booking-Confirmation ──► RedpandaListener ──► BookingConfirmationConsumer ──► EmailDispatcher
//!                                ▲                        │
//!                                │   ack / redeliver /    │
//!                                └── dead_letter ◄────────┘
//!                          (RedpandaAcknowledger: commit, seek, publish to .DLT)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use notifier_redpanda::RedpandaListener;
//! use notifier_runtime::BookingConfirmationConsumer;
//! # use notifier_core::dispatcher::Dispatcher;
//! # use std::sync::Arc;
//!
//! # async fn example(dispatcher: Arc<dyn Dispatcher>) -> Result<(), Box<dyn std::error::Error>> {
//! let listener = RedpandaListener::builder()
//!     .brokers("localhost:9092")
//!     .consumer_group("booking-notifier")
//!     .build()?;
//!
//! let consumer = BookingConfirmationConsumer::new(dispatcher, listener.acknowledger());
//!
//! let (_shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
//! listener.run(&consumer, shutdown_rx).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod acknowledger;
pub mod listener;
pub mod tracker;

pub use acknowledger::{RedpandaAcknowledger, dead_letter_headers, delivery_from_message};
pub use listener::{DEFAULT_CONSUMER_GROUP, DEFAULT_TOPIC, RedpandaListener, RedpandaListenerBuilder};
pub use tracker::{DeliveryTracker, ListenerContext};

use thiserror::Error;

/// Errors raised while setting up or running a listener.
#[derive(Error, Debug)]
pub enum ListenerError {
    /// No broker addresses were configured.
    #[error("Brokers not configured")]
    MissingBrokers,

    /// The Kafka client rejected its configuration.
    #[error("Failed to create {client}: {reason}")]
    ClientCreation {
        /// Which client ("consumer" or "producer")
        client: &'static str,
        /// Error reason
        reason: String,
    },

    /// Subscribing to the inbound topic failed.
    #[error("Failed to subscribe to '{topic}': {reason}")]
    SubscriptionFailed {
        /// Topic
        topic: String,
        /// Error reason
        reason: String,
    },

    /// A record could be neither settled nor rewound; the listener stopped short of it.
    #[error("Stalled at {topic}[{partition}]@{offset}: record was neither settled nor rewound")]
    Stalled {
        /// Topic
        topic: String,
        /// Partition
        partition: i32,
        /// Offset of the unsettled record
        offset: i64,
    },
}
