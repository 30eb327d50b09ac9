//! Broker deliveries and the acknowledgment seam.
//!
//! The broker layer wraps every record it hands out in a [`Delivery`] and decides what
//! happens to it through the [`Acknowledger`] trait:
//!
//! - [`Acknowledger::ack`]: the event was processed; commit progress past it
//! - [`Acknowledger::redeliver`]: the event failed; make it available again, subject to
//!   the broker layer's retry limit (which may dead-letter it instead)
//! - [`Acknowledger::dead_letter`]: the event can never succeed; park it in the
//!   dead-letter destination and move on
//!
//! # Per-Event State Machine
//!
//! ```text
//! RECEIVED ──► DISPATCHING ──┬──► ACKED
//!                            └──► REDELIVERY_PENDING ──► (broker) ──► DEAD_LETTERED
//! ```
//!
//! Retry counting, backoff and the dead-letter destination are all owned by the
//! broker layer. The consumer's only obligation is to never ack a failed event.

use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// One record as handed to the consumer by the broker layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    /// Source topic
    pub topic: String,
    /// Source partition
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
    /// Record key, if any
    pub key: Option<Vec<u8>>,
    /// Raw payload, if any
    pub payload: Option<Vec<u8>>,
    /// 1-based count of times this record has been handed out
    pub attempt: u32,
}

impl Delivery {
    /// Create a first-attempt delivery.
    #[must_use]
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64, payload: Option<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key: None,
            payload,
            attempt: 1,
        }
    }

    /// Attach a record key.
    #[must_use]
    pub fn with_key(mut self, key: Option<Vec<u8>>) -> Self {
        self.key = key;
        self
    }

    /// Set the attempt number.
    #[must_use]
    pub const fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    /// Payload bytes, if present.
    #[must_use]
    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }
}

/// What the consumer decided for a delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// Dispatch succeeded and the delivery was acknowledged.
    Acknowledged,
    /// Dispatch failed; acknowledgment was withheld and redelivery requested.
    RedeliveryRequested,
    /// The delivery was routed to the dead-letter destination without dispatch success.
    DeadLettered,
}

impl Disposition {
    /// Whether the delivery was acknowledged as successfully processed.
    #[must_use]
    pub const fn is_acknowledged(self) -> bool {
        matches!(self, Self::Acknowledged)
    }
}

/// Errors raised while settling a delivery with the broker.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AckError {
    /// Committing the offset failed; the record may be redelivered.
    #[error("Failed to commit offset {offset} on {topic}[{partition}]: {reason}")]
    CommitFailed {
        /// Topic
        topic: String,
        /// Partition
        partition: i32,
        /// Offset
        offset: i64,
        /// Broker response
        reason: String,
    },

    /// Rewinding the partition for redelivery failed.
    #[error("Failed to rewind {topic}[{partition}] to offset {offset}: {reason}")]
    SeekFailed {
        /// Topic
        topic: String,
        /// Partition
        partition: i32,
        /// Offset
        offset: i64,
        /// Broker response
        reason: String,
    },

    /// Publishing to the dead-letter destination failed.
    #[error("Failed to dead-letter record to '{topic}': {reason}")]
    DeadLetterFailed {
        /// Dead-letter topic
        topic: String,
        /// Broker response
        reason: String,
    },
}

/// Future returned by [`Acknowledger`] methods.
pub type AckFuture<'a> = Pin<Box<dyn Future<Output = Result<(), AckError>> + Send + 'a>>;

/// The broker-side half of the delivery contract.
///
/// Implementations must be `Send + Sync`; one acknowledger may serve several
/// concurrent consumer invocations.
pub trait Acknowledger: Send + Sync {
    /// Mark the delivery as durably processed.
    ///
    /// # Errors
    ///
    /// Returns [`AckError::CommitFailed`] if progress could not be committed.
    fn ack(&self, delivery: &Delivery) -> AckFuture<'_>;

    /// Withhold acknowledgment and make the delivery available again.
    ///
    /// The broker layer applies its own retry limit and may dead-letter the
    /// delivery instead.
    ///
    /// # Errors
    ///
    /// Returns [`AckError`] if the broker could not be rewound or the exhausted
    /// record could not be dead-lettered.
    fn redeliver(&self, delivery: &Delivery, reason: &str) -> AckFuture<'_>;

    /// Route the delivery to the dead-letter destination.
    ///
    /// On failure the delivery must stay pending: implementations never commit
    /// past a record that was not parked.
    ///
    /// # Errors
    ///
    /// Returns [`AckError::DeadLetterFailed`] if the record could not be parked.
    fn dead_letter(&self, delivery: &Delivery, reason: &str) -> AckFuture<'_>;
}
