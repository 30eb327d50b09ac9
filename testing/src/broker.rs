//! In-memory broker for exercising the full delivery contract without Kafka.
//!
//! [`InMemoryBroker`] behaves like one partition of a topic with a consumer group:
//!
//! - `publish` appends a record at the next offset
//! - `ack` commits the record
//! - `redeliver` consults the [`RedeliveryPolicy`]: below the limit the record is put
//!   back at the head of the queue with its attempt number bumped (the backoff is
//!   recorded, not slept); at the limit it is dead-lettered and committed
//! - `dead_letter` parks the record and commits it. While the dead-letter
//!   destination is down ([`InMemoryBroker::fail_dead_letters`]) the record is put
//!   back at the head of the queue instead and nothing is committed
//!
//! # Example
//!
//! ```ignore
//! let broker = InMemoryBroker::new("Booking-Confirmation");
//! let consumer = BookingConfirmationConsumer::new(dispatcher, Arc::new(broker.clone()));
//!
//! let offset = broker.publish_event(&sample_event());
//! broker.drain(&consumer).await;
//! assert!(broker.is_acknowledged(offset));
//! ```

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use notifier_core::delivery::{AckError, AckFuture, Acknowledger, Delivery, Disposition};
use notifier_core::event::BookingConfirmationEvent;
use notifier_runtime::{BookingConfirmationConsumer, RedeliveryDecision, RedeliveryPolicy};
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// A record parked in the dead-letter destination.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeadLetter {
    /// The delivery as last handed out
    pub delivery: Delivery,
    /// Why it was parked
    pub reason: String,
}

#[derive(Debug, Default)]
struct BrokerState {
    next_offset: i64,
    pending: VecDeque<Delivery>,
    acknowledged: Vec<i64>,
    committed: Vec<i64>,
    dead_letters: Vec<DeadLetter>,
    backoffs: Vec<Duration>,
    dead_letter_outage: Option<String>,
}

/// Single-partition in-memory broker implementing [`Acknowledger`].
#[derive(Clone, Debug)]
pub struct InMemoryBroker {
    topic: String,
    policy: RedeliveryPolicy,
    state: Arc<RwLock<BrokerState>>,
}

impl InMemoryBroker {
    /// Create a broker with the default [`RedeliveryPolicy`].
    #[must_use]
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            policy: RedeliveryPolicy::default(),
            state: Arc::new(RwLock::new(BrokerState::default())),
        }
    }

    /// Replace the redelivery policy.
    #[must_use]
    pub fn with_policy(mut self, policy: RedeliveryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Append a raw payload and return its offset.
    pub fn publish(&self, payload: impl Into<Vec<u8>>) -> i64 {
        let mut state = self.state.write().unwrap();
        let offset = state.next_offset;
        state.next_offset += 1;
        state
            .pending
            .push_back(Delivery::new(self.topic.clone(), 0, offset, Some(payload.into())));
        offset
    }

    /// Encode and append an event, keyed by booking id.
    pub fn publish_event(&self, event: &BookingConfirmationEvent) -> i64 {
        let offset = self.publish(event.encode().unwrap());
        let mut state = self.state.write().unwrap();
        if let Some(delivery) = state.pending.back_mut() {
            delivery.key = Some(event.booking_id().as_bytes().to_vec());
        }
        offset
    }

    /// Reject every dead-letter publish with `reason` until
    /// [`restore_dead_letters`](Self::restore_dead_letters).
    pub fn fail_dead_letters(&self, reason: impl Into<String>) {
        self.state.write().unwrap().dead_letter_outage = Some(reason.into());
    }

    /// Accept dead-letter publishes again.
    pub fn restore_dead_letters(&self) {
        self.state.write().unwrap().dead_letter_outage = None;
    }

    /// Hand out the next pending delivery.
    #[must_use]
    pub fn poll(&self) -> Option<Delivery> {
        self.state.write().unwrap().pending.pop_front()
    }

    /// Process deliveries until nothing is pending.
    ///
    /// Terminates because every redelivery bumps the attempt number and the policy
    /// dead-letters at `max_attempts`.
    pub async fn drain(&self, consumer: &BookingConfirmationConsumer) -> Vec<Disposition> {
        let mut dispositions = Vec::new();
        while let Some(delivery) = self.poll() {
            dispositions.push(consumer.process(&delivery).await);
        }
        dispositions
    }

    /// Whether the record at `offset` is still waiting to be (re)delivered.
    #[must_use]
    pub fn is_pending(&self, offset: i64) -> bool {
        self.state.read().unwrap().pending.iter().any(|d| d.offset == offset)
    }

    /// Whether the record at `offset` was acknowledged by the consumer.
    #[must_use]
    pub fn is_acknowledged(&self, offset: i64) -> bool {
        self.state.read().unwrap().acknowledged.contains(&offset)
    }

    /// Whether consumer-group progress moved past `offset` (ack or dead-letter).
    #[must_use]
    pub fn is_committed(&self, offset: i64) -> bool {
        self.state.read().unwrap().committed.contains(&offset)
    }

    /// Records parked in the dead-letter destination.
    #[must_use]
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.read().unwrap().dead_letters.clone()
    }

    /// Backoff delays the broker scheduled, in order.
    #[must_use]
    pub fn backoffs(&self) -> Vec<Duration> {
        self.state.read().unwrap().backoffs.clone()
    }

    fn park(&self, state: &mut BrokerState, delivery: &Delivery, reason: String) -> Result<(), AckError> {
        if let Some(outage) = &state.dead_letter_outage {
            let err = AckError::DeadLetterFailed {
                topic: format!("{}.DLT", self.topic),
                reason: outage.clone(),
            };
            state.pending.push_front(delivery.clone());
            return Err(err);
        }
        state.dead_letters.push(DeadLetter {
            delivery: delivery.clone(),
            reason,
        });
        state.committed.push(delivery.offset);
        Ok(())
    }
}

impl Acknowledger for InMemoryBroker {
    fn ack(&self, delivery: &Delivery) -> AckFuture<'_> {
        let mut state = self.state.write().unwrap();
        state.acknowledged.push(delivery.offset);
        state.committed.push(delivery.offset);
        Box::pin(async { Ok(()) })
    }

    fn redeliver(&self, delivery: &Delivery, reason: &str) -> AckFuture<'_> {
        let mut state = self.state.write().unwrap();
        let result = match self.policy.decide(delivery.attempt) {
            RedeliveryDecision::RetryAfter(delay) => {
                state.backoffs.push(delay);
                state
                    .pending
                    .push_front(delivery.clone().with_attempt(delivery.attempt + 1));
                Ok(())
            },
            RedeliveryDecision::Exhausted => {
                let reason = format!(
                    "redelivery exhausted after {} attempts: {reason}",
                    delivery.attempt
                );
                self.park(&mut state, delivery, reason)
            },
        };
        Box::pin(async move { result })
    }

    fn dead_letter(&self, delivery: &Delivery, reason: &str) -> AckFuture<'_> {
        let result = self.park(&mut self.state.write().unwrap(), delivery, reason.to_string());
        Box::pin(async move { result })
    }
}
