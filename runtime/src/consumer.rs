//! Booking confirmation consumer.
//!
//! [`BookingConfirmationConsumer`] bridges broker delivery semantics to dispatch
//! outcomes. For each delivery it:
//!
//! 1. Decodes the payload. Undecodable payloads go straight to the dead-letter
//!    destination; retrying them can never succeed.
//! 2. Calls the [`Dispatcher`] once.
//! 3. Acknowledges on success. On failure it withholds acknowledgment and asks the
//!    broker layer to redeliver, unless the failure is permanent and the
//!    [`PermanentFailurePolicy`] says to dead-letter it.
//!
//! The consumer keeps no state between calls and has no local retry loop. Retry
//! counting, backoff and exhaustion belong to the [`Acknowledger`] implementation.
//!
//! # Example
//!
//! ```rust,ignore
//! let consumer = BookingConfirmationConsumer::new(dispatcher, acknowledger);
//!
//! match consumer.process(&delivery).await {
//!     Disposition::Acknowledged => {}
//!     Disposition::RedeliveryRequested => {}
//!     Disposition::DeadLettered => {}
//! }
//! ```

use crate::metrics::ConsumerMetrics;
use notifier_core::delivery::{AckError, Acknowledger, Delivery, Disposition};
use notifier_core::dispatcher::{Dispatcher, FailureKind};
use notifier_core::event::BookingConfirmationEvent;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// What to do with failures that can never succeed (e.g. an invalid recipient).
///
/// The upstream service retried every failure the same way, so a bad address is
/// redelivered until the broker's retry limit dead-letters it. That remains the
/// default. `DeadLetter` parks such events on the first failure instead.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PermanentFailurePolicy {
    /// Treat permanent failures like transient ones.
    #[default]
    Redeliver,
    /// Dead-letter permanent failures immediately.
    DeadLetter,
}

impl std::str::FromStr for PermanentFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redeliver" | "retry" => Ok(Self::Redeliver),
            "dead-letter" | "dead_letter" | "deadletter" => Ok(Self::DeadLetter),
            other => Err(format!("unknown permanent failure policy '{other}'")),
        }
    }
}

/// Consumes booking confirmations and settles each delivery with the broker.
#[derive(Clone)]
pub struct BookingConfirmationConsumer {
    dispatcher: Arc<dyn Dispatcher>,
    acknowledger: Arc<dyn Acknowledger>,
    permanent_failures: PermanentFailurePolicy,
}

impl BookingConfirmationConsumer {
    /// Create a consumer with the default [`PermanentFailurePolicy`].
    #[must_use]
    pub fn new(dispatcher: Arc<dyn Dispatcher>, acknowledger: Arc<dyn Acknowledger>) -> Self {
        Self {
            dispatcher,
            acknowledger,
            permanent_failures: PermanentFailurePolicy::default(),
        }
    }

    /// Set how permanent dispatch failures are settled.
    #[must_use]
    pub const fn with_permanent_failure_policy(mut self, policy: PermanentFailurePolicy) -> Self {
        self.permanent_failures = policy;
        self
    }

    /// The permanent failure policy in use.
    #[must_use]
    pub const fn permanent_failure_policy(&self) -> PermanentFailurePolicy {
        self.permanent_failures
    }

    /// Decode and handle one raw delivery.
    ///
    /// Decode failures are dead-lettered without reaching [`handle`](Self::handle).
    /// If the dead-letter destination rejects the record, the result is
    /// [`Disposition::RedeliveryRequested`].
    pub async fn process(&self, delivery: &Delivery) -> Disposition {
        ConsumerMetrics::record_received();

        match BookingConfirmationEvent::decode(delivery.payload()) {
            Ok(event) => self.handle(&event, delivery).await,
            Err(e) => {
                warn!(
                    topic = %delivery.topic,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    error = %e,
                    "Undecodable booking confirmation, routing to dead letter"
                );
                ConsumerMetrics::record_decode_failure();
                self.dead_letter(delivery, &e.to_string()).await
            },
        }
    }

    /// Dispatch the confirmation for a decoded event and settle the delivery.
    ///
    /// Acknowledges if and only if the dispatcher reports success.
    pub async fn handle(&self, event: &BookingConfirmationEvent, delivery: &Delivery) -> Disposition {
        info!(
            booking_id = %event.booking_id(),
            attempt = delivery.attempt,
            offset = delivery.offset,
            "Booking confirmation received"
        );
        debug!(booking_id = %event.booking_id(), recipient = %event.user_email(), "Dispatching confirmation");

        let started = Instant::now();
        let result = self.dispatcher.send(event).await;
        ConsumerMetrics::record_dispatch(started.elapsed());

        match result {
            Ok(()) => {
                if let Err(e) = self.acknowledger.ack(delivery).await {
                    settlement_failed(delivery, &e);
                }
                ConsumerMetrics::record_acknowledged();
                info!(
                    booking_id = %event.booking_id(),
                    attempt = delivery.attempt,
                    "Confirmation sent, delivery acknowledged"
                );
                Disposition::Acknowledged
            },
            Err(err) => {
                let kind = err.kind();
                ConsumerMetrics::record_dispatch_failure(kind);
                error!(
                    booking_id = %event.booking_id(),
                    attempt = delivery.attempt,
                    kind = kind.as_str(),
                    error = %err,
                    "Failed to send confirmation, withholding acknowledgment"
                );

                if kind == FailureKind::Permanent
                    && self.permanent_failures == PermanentFailurePolicy::DeadLetter
                {
                    return self.dead_letter(delivery, &err.to_string()).await;
                }

                if let Err(e) = self.acknowledger.redeliver(delivery, &err.to_string()).await {
                    settlement_failed(delivery, &e);
                }
                ConsumerMetrics::record_redelivery_requested();
                Disposition::RedeliveryRequested
            },
        }
    }

    /// A record that could not be parked is still pending, so it is reported as
    /// awaiting redelivery rather than dead-lettered.
    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Disposition {
        match self.acknowledger.dead_letter(delivery, reason).await {
            Ok(()) => {
                ConsumerMetrics::record_dead_lettered();
                Disposition::DeadLettered
            },
            Err(e) => {
                settlement_failed(delivery, &e);
                ConsumerMetrics::record_redelivery_requested();
                Disposition::RedeliveryRequested
            },
        }
    }
}

fn settlement_failed(delivery: &Delivery, err: &AckError) {
    ConsumerMetrics::record_settlement_error();
    error!(
        topic = %delivery.topic,
        partition = delivery.partition,
        offset = delivery.offset,
        error = %err,
        "Broker rejected settlement (record may be redelivered)"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_permanent_failure_policy() {
        assert_eq!("redeliver".parse(), Ok(PermanentFailurePolicy::Redeliver));
        assert_eq!("Dead-Letter".parse(), Ok(PermanentFailurePolicy::DeadLetter));
        assert!("drop".parse::<PermanentFailurePolicy>().is_err());
    }

    #[test]
    fn consumer_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<BookingConfirmationConsumer>();
    }
}
