//! Recording mocks for the mail transport, dispatcher and acknowledger seams.
//!
//! Every mock is cheap to clone and shares its recorded state between clones, so a
//! test can hand one clone to the code under test and assert on another.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use notifier_core::delivery::{AckError, AckFuture, Acknowledger, Delivery};
use notifier_core::dispatcher::{DispatchError, Dispatcher};
use notifier_core::event::BookingConfirmationEvent;
use notifier_core::mail::{EmailMessage, MailError, MailTransport};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::time::Duration;

#[derive(Debug, Default)]
struct TransportState {
    sent: Vec<EmailMessage>,
    attempts: usize,
    script: VecDeque<Result<(), MailError>>,
    fallback: Option<MailError>,
    latency: Option<Duration>,
}

/// Mail transport that records accepted messages and replays scripted failures.
///
/// Outcomes are taken from the script in order; once it runs out the transport
/// accepts every message (or fails with the error set by
/// [`fail_always`](Self::fail_always)).
///
/// # Example
///
/// ```
/// use notifier_testing::RecordingMailTransport;
/// use notifier_core::mail::MailError;
///
/// let transport = RecordingMailTransport::new();
/// transport.fail_next(MailError::Connection("connection refused".to_string()));
/// assert_eq!(transport.sent_count(), 0);
/// ```
#[derive(Clone, Debug, Default)]
pub struct RecordingMailTransport {
    state: Arc<RwLock<TransportState>>,
}

impl RecordingMailTransport {
    /// Create a transport that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next send with `err`.
    pub fn fail_next(&self, err: MailError) {
        self.state.write().unwrap().script.push_back(Err(err));
    }

    /// Accept the next send (useful between scripted failures).
    pub fn succeed_next(&self) {
        self.state.write().unwrap().script.push_back(Ok(()));
    }

    /// Fail every unscripted send with `err`.
    pub fn fail_always(&self, err: MailError) {
        self.state.write().unwrap().fallback = Some(err);
    }

    /// Delay every send by `latency` before answering.
    #[must_use]
    pub fn with_latency(self, latency: Duration) -> Self {
        self.state.write().unwrap().latency = Some(latency);
        self
    }

    /// Messages the transport accepted, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<EmailMessage> {
        self.state.read().unwrap().sent.clone()
    }

    /// Number of accepted messages.
    #[must_use]
    pub fn sent_count(&self) -> usize {
        self.state.read().unwrap().sent.len()
    }

    /// Number of send calls, accepted or not.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.state.read().unwrap().attempts
    }
}

impl MailTransport for RecordingMailTransport {
    fn send(
        &self,
        message: &EmailMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), MailError>> + Send + '_>> {
        let message = message.clone();

        Box::pin(async move {
            let (outcome, latency) = {
                let mut state = self.state.write().unwrap();
                state.attempts += 1;
                let outcome = state
                    .script
                    .pop_front()
                    .unwrap_or_else(|| state.fallback.clone().map_or(Ok(()), Err));
                (outcome, state.latency)
            };

            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }

            if outcome.is_ok() {
                self.state.write().unwrap().sent.push(message);
            }
            outcome
        })
    }
}

/// Dispatcher that replays scripted results without composing any email.
///
/// Useful for testing the consumer in isolation from message composition.
#[derive(Clone, Debug, Default)]
pub struct ScriptedDispatcher {
    script: Arc<RwLock<VecDeque<Result<(), DispatchError>>>>,
    calls: Arc<RwLock<Vec<BookingConfirmationEvent>>>,
}

impl ScriptedDispatcher {
    /// Create a dispatcher that succeeds unless scripted otherwise.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the result of the next `send`.
    pub fn push(&self, result: Result<(), DispatchError>) {
        self.script.write().unwrap().push_back(result);
    }

    /// Events passed to `send`, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<BookingConfirmationEvent> {
        self.calls.read().unwrap().clone()
    }
}

impl Dispatcher for ScriptedDispatcher {
    fn send(
        &self,
        event: &BookingConfirmationEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), DispatchError>> + Send + '_>> {
        self.calls.write().unwrap().push(event.clone());
        let result = self.script.write().unwrap().pop_front().unwrap_or(Ok(()));
        Box::pin(async move { result })
    }
}

/// A settlement recorded by [`RecordingAcknowledger`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Settlement {
    /// `ack` was called.
    Acked {
        /// Offset of the delivery
        offset: i64,
    },
    /// `redeliver` was called.
    RedeliveryRequested {
        /// Offset of the delivery
        offset: i64,
        /// Reason given by the consumer
        reason: String,
    },
    /// `dead_letter` was called.
    DeadLettered {
        /// Offset of the delivery
        offset: i64,
        /// Reason given by the consumer
        reason: String,
    },
}

#[derive(Debug, Default)]
struct SettlementFailures {
    ack: Option<AckError>,
    redeliver: Option<AckError>,
    dead_letter: Option<AckError>,
}

/// Acknowledger that records what the consumer asked for.
///
/// Each settlement kind can be made to fail; failed calls are still recorded.
#[derive(Clone, Debug, Default)]
pub struct RecordingAcknowledger {
    settlements: Arc<RwLock<Vec<Settlement>>>,
    failures: Arc<RwLock<SettlementFailures>>,
}

impl RecordingAcknowledger {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every `ack` with `err`.
    pub fn fail_acks(&self, err: AckError) {
        self.failures.write().unwrap().ack = Some(err);
    }

    /// Fail every `redeliver` with `err`.
    pub fn fail_redeliveries(&self, err: AckError) {
        self.failures.write().unwrap().redeliver = Some(err);
    }

    /// Fail every `dead_letter` with `err`.
    pub fn fail_dead_letters(&self, err: AckError) {
        self.failures.write().unwrap().dead_letter = Some(err);
    }

    /// All settlements, in order.
    #[must_use]
    pub fn settlements(&self) -> Vec<Settlement> {
        self.settlements.read().unwrap().clone()
    }

    /// Whether the delivery at `offset` was acknowledged.
    #[must_use]
    pub fn was_acked(&self, offset: i64) -> bool {
        self.settlements
            .read()
            .unwrap()
            .iter()
            .any(|s| matches!(s, Settlement::Acked { offset: o } if *o == offset))
    }

    /// Number of `ack` calls.
    #[must_use]
    pub fn ack_count(&self) -> usize {
        self.settlements
            .read()
            .unwrap()
            .iter()
            .filter(|s| matches!(s, Settlement::Acked { .. }))
            .count()
    }

    fn record(&self, settlement: Settlement, failure: Option<AckError>) -> AckFuture<'_> {
        self.settlements.write().unwrap().push(settlement);
        Box::pin(async move { failure.map_or(Ok(()), Err) })
    }
}

impl Acknowledger for RecordingAcknowledger {
    fn ack(&self, delivery: &Delivery) -> AckFuture<'_> {
        let failure = self.failures.read().unwrap().ack.clone();
        self.record(Settlement::Acked { offset: delivery.offset }, failure)
    }

    fn redeliver(&self, delivery: &Delivery, reason: &str) -> AckFuture<'_> {
        let failure = self.failures.read().unwrap().redeliver.clone();
        self.record(
            Settlement::RedeliveryRequested {
                offset: delivery.offset,
                reason: reason.to_string(),
            },
            failure,
        )
    }

    fn dead_letter(&self, delivery: &Delivery, reason: &str) -> AckFuture<'_> {
        let failure = self.failures.read().unwrap().dead_letter.clone();
        self.record(
            Settlement::DeadLettered {
                offset: delivery.offset,
                reason: reason.to_string(),
            },
            failure,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> EmailMessage {
        EmailMessage {
            from: "from@x.com".to_string(),
            to: "to@x.com".to_string(),
            subject: "s".to_string(),
            body: "b".to_string(),
        }
    }

    #[tokio::test]
    async fn transport_replays_script_then_accepts() {
        let transport = RecordingMailTransport::new();
        transport.fail_next(MailError::Connection("refused".to_string()));

        assert!(transport.send(&message()).await.is_err());
        assert!(transport.send(&message()).await.is_ok());
        assert_eq!(transport.attempts(), 2);
        assert_eq!(transport.sent_count(), 1);
    }

    #[tokio::test]
    async fn transport_fallback_applies_after_script() {
        let transport = RecordingMailTransport::new();
        transport.succeed_next();
        transport.fail_always(MailError::Timeout("read".to_string()));

        assert!(transport.send(&message()).await.is_ok());
        assert!(transport.send(&message()).await.is_err());
        assert!(transport.send(&message()).await.is_err());
        assert_eq!(transport.sent_count(), 1);
    }

    #[tokio::test]
    async fn acknowledger_records_failed_settlements() {
        let acknowledger = RecordingAcknowledger::new();
        let err = AckError::DeadLetterFailed {
            topic: "Booking-Confirmation.DLT".to_string(),
            reason: "broker down".to_string(),
        };
        acknowledger.fail_dead_letters(err.clone());
        let delivery = Delivery::new("Booking-Confirmation", 0, 3, None);

        assert_eq!(acknowledger.ack(&delivery).await, Ok(()));
        assert_eq!(acknowledger.dead_letter(&delivery, "bad").await, Err(err));
        assert_eq!(acknowledger.settlements().len(), 2);
    }
}
