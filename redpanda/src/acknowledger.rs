//! Broker-side settlement of deliveries.
//!
//! [`RedpandaAcknowledger`] implements [`Acknowledger`] on top of a manually committed
//! [`StreamConsumer`]:
//!
//! - **ack**: commit `offset + 1` for the record's partition
//! - **redeliver**: below the [`RedeliveryPolicy`] limit, sleep for the backoff and seek
//!   the partition back to the record's offset so the next poll returns it again; at
//!   the limit, dead-letter it
//! - **dead letter**: republish key and payload to the dead-letter topic with
//!   `x-original-*` headers, then commit past the record. If the publish fails the
//!   partition is rewound after a backoff and the record is dead-lettered again on
//!   its next delivery
//!
//! A record that can be neither settled nor rewound stalls the listener (see
//! [`RedpandaAcknowledger::stalled`]); nothing after it on its partition is committed.
//!
//! Attempt numbers live in a [`DeliveryTracker`], keyed by partition and offset. They
//! reset when the process restarts or the partition is revoked.

use crate::tracker::{DeliveryTracker, ListenerContext};
use notifier_core::delivery::{AckError, AckFuture, Acknowledger, Delivery};
use notifier_runtime::{RedeliveryDecision, RedeliveryPolicy};
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Header, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Header carrying the topic the record was consumed from.
pub const ORIGINAL_TOPIC_HEADER: &str = "x-original-topic";
/// Header carrying the partition the record was consumed from.
pub const ORIGINAL_PARTITION_HEADER: &str = "x-original-partition";
/// Header carrying the record's original offset.
pub const ORIGINAL_OFFSET_HEADER: &str = "x-original-offset";
/// Header carrying how many times the record was delivered.
pub const DELIVERY_ATTEMPTS_HEADER: &str = "x-delivery-attempts";
/// Header carrying why the record was dead-lettered.
pub const DEAD_LETTER_REASON_HEADER: &str = "x-dead-letter-reason";

/// Settles deliveries consumed by one listener.
///
/// Shares the listener's consumer handle, so commits and seeks apply to the
/// partitions that listener owns.
pub struct RedpandaAcknowledger {
    consumer: Arc<StreamConsumer<ListenerContext>>,
    producer: FutureProducer,
    dead_letter_topic: String,
    policy: RedeliveryPolicy,
    timeout: Duration,
    tracker: Arc<DeliveryTracker>,
}

impl RedpandaAcknowledger {
    pub(crate) fn new(
        consumer: Arc<StreamConsumer<ListenerContext>>,
        producer: FutureProducer,
        dead_letter_topic: String,
        policy: RedeliveryPolicy,
        timeout: Duration,
        tracker: Arc<DeliveryTracker>,
    ) -> Self {
        Self {
            consumer,
            producer,
            dead_letter_topic,
            policy,
            timeout,
            tracker,
        }
    }

    /// Topic dead-lettered records are published to.
    #[must_use]
    pub fn dead_letter_topic(&self) -> &str {
        &self.dead_letter_topic
    }

    /// Redelivery policy applied to `redeliver` requests.
    #[must_use]
    pub const fn policy(&self) -> &RedeliveryPolicy {
        &self.policy
    }

    /// Build a [`Delivery`] for a consumed message, numbering the attempt from
    /// earlier redelivery requests for the same record.
    pub fn delivery_of<M: Message>(&self, message: &M) -> Delivery {
        let attempt = self.tracker.attempt(message.partition(), message.offset());
        delivery_from_message(message, attempt)
    }

    /// The record, as `(partition, offset)`, that could be neither settled nor
    /// rewound. Once set, the listener must stop before committing anything else.
    #[must_use]
    pub fn stalled(&self) -> Option<(i32, i64)> {
        self.tracker.stalled()
    }

    fn commit(&self, delivery: &Delivery) -> Result<(), AckError> {
        let failed = |reason: String| AckError::CommitFailed {
            topic: delivery.topic.clone(),
            partition: delivery.partition,
            offset: delivery.offset,
            reason,
        };

        let mut positions = TopicPartitionList::new();
        positions
            .add_partition_offset(&delivery.topic, delivery.partition, Offset::Offset(delivery.offset + 1))
            .map_err(|e| failed(e.to_string()))?;
        self.consumer
            .commit(&positions, CommitMode::Async)
            .map_err(|e| failed(e.to_string()))?;
        self.tracker.settle(delivery.partition, delivery.offset);
        Ok(())
    }

    /// Seek back to the record, stalling the listener if the seek is rejected.
    fn rewind(&self, delivery: &Delivery) -> Result<(), AckError> {
        let result = self
            .consumer
            .seek(
                &delivery.topic,
                delivery.partition,
                Offset::Offset(delivery.offset),
                Timeout::After(self.timeout),
            )
            .map_err(|e| AckError::SeekFailed {
                topic: delivery.topic.clone(),
                partition: delivery.partition,
                offset: delivery.offset,
                reason: e.to_string(),
            });
        if let Err(e) = &result {
            error!(
                topic = %delivery.topic,
                partition = delivery.partition,
                offset = delivery.offset,
                error = %e,
                "Could not rewind partition, stalling listener"
            );
            self.tracker.stall(delivery.partition, delivery.offset);
        }
        result
    }

    async fn publish_dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), AckError> {
        let mut record: FutureRecord<'_, [u8], [u8]> =
            FutureRecord::to(&self.dead_letter_topic).headers(dead_letter_headers(delivery, reason));
        if let Some(key) = delivery.key.as_deref() {
            record = record.key(key);
        }
        if let Some(payload) = delivery.payload.as_deref() {
            record = record.payload(payload);
        }

        match self.producer.send(record, Timeout::After(self.timeout)).await {
            Ok((partition, offset)) => {
                warn!(
                    topic = %delivery.topic,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    attempt = delivery.attempt,
                    dead_letter_topic = %self.dead_letter_topic,
                    dead_letter_partition = partition,
                    dead_letter_offset = offset,
                    reason = %reason,
                    "Record dead-lettered"
                );
            },
            Err((kafka_error, _)) => {
                error!(
                    topic = %delivery.topic,
                    offset = delivery.offset,
                    dead_letter_topic = %self.dead_letter_topic,
                    error = %kafka_error,
                    "Failed to publish to dead-letter topic"
                );
                self.tracker
                    .schedule(delivery.partition, delivery.offset, delivery.attempt);
                tokio::time::sleep(self.policy.delay_for_attempt(delivery.attempt)).await;
                if self.rewind(delivery).is_ok() {
                    debug!(
                        topic = %delivery.topic,
                        partition = delivery.partition,
                        offset = delivery.offset,
                        "Record rewound for another dead-letter attempt"
                    );
                }
                return Err(AckError::DeadLetterFailed {
                    topic: self.dead_letter_topic.clone(),
                    reason: kafka_error.to_string(),
                });
            },
        }

        self.commit(delivery)
    }
}

impl Acknowledger for RedpandaAcknowledger {
    fn ack(&self, delivery: &Delivery) -> AckFuture<'_> {
        let result = self.commit(delivery);
        Box::pin(async move { result })
    }

    fn redeliver(&self, delivery: &Delivery, reason: &str) -> AckFuture<'_> {
        let delivery = delivery.clone();
        let reason = reason.to_string();

        Box::pin(async move {
            match self.policy.decide(delivery.attempt) {
                RedeliveryDecision::RetryAfter(delay) => {
                    self.tracker
                        .schedule(delivery.partition, delivery.offset, delivery.attempt + 1);

                    debug!(
                        topic = %delivery.topic,
                        partition = delivery.partition,
                        offset = delivery.offset,
                        attempt = delivery.attempt,
                        delay_ms = delay.as_millis(),
                        "Scheduling redelivery"
                    );
                    tokio::time::sleep(delay).await;
                    self.rewind(&delivery)
                },
                RedeliveryDecision::Exhausted => {
                    let reason = format!(
                        "redelivery exhausted after {} attempts: {reason}",
                        delivery.attempt
                    );
                    self.publish_dead_letter(&delivery, &reason).await
                },
            }
        })
    }

    fn dead_letter(&self, delivery: &Delivery, reason: &str) -> AckFuture<'_> {
        let delivery = delivery.clone();
        let reason = reason.to_string();

        Box::pin(async move { self.publish_dead_letter(&delivery, &reason).await })
    }
}

/// Copy a consumed message into an owned [`Delivery`].
pub fn delivery_from_message<M: Message>(message: &M, attempt: u32) -> Delivery {
    Delivery::new(
        message.topic(),
        message.partition(),
        message.offset(),
        message.payload().map(<[u8]>::to_vec),
    )
    .with_key(message.key().map(<[u8]>::to_vec))
    .with_attempt(attempt)
}

/// Headers attached to a dead-lettered record.
#[must_use]
pub fn dead_letter_headers(delivery: &Delivery, reason: &str) -> OwnedHeaders {
    let partition = delivery.partition.to_string();
    let offset = delivery.offset.to_string();
    let attempts = delivery.attempt.to_string();

    OwnedHeaders::new()
        .insert(Header {
            key: ORIGINAL_TOPIC_HEADER,
            value: Some(delivery.topic.as_str()),
        })
        .insert(Header {
            key: ORIGINAL_PARTITION_HEADER,
            value: Some(partition.as_str()),
        })
        .insert(Header {
            key: ORIGINAL_OFFSET_HEADER,
            value: Some(offset.as_str()),
        })
        .insert(Header {
            key: DELIVERY_ATTEMPTS_HEADER,
            value: Some(attempts.as_str()),
        })
        .insert(Header {
            key: DEAD_LETTER_REASON_HEADER,
            value: Some(reason),
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rdkafka::Timestamp;
    use rdkafka::message::{Headers, OwnedMessage};

    fn header<'a>(headers: &'a OwnedHeaders, key: &str) -> Option<&'a str> {
        headers
            .iter()
            .find(|h| h.key == key)
            .and_then(|h| h.value)
            .map(|v| std::str::from_utf8(v).unwrap())
    }

    #[test]
    fn copies_message_into_delivery() {
        let message = OwnedMessage::new(
            Some(b"{}".to_vec()),
            Some(b"B-100".to_vec()),
            "Booking-Confirmation".to_string(),
            Timestamp::NotAvailable,
            3,
            42,
            None,
        );

        let delivery = delivery_from_message(&message, 2);

        assert_eq!(delivery.topic, "Booking-Confirmation");
        assert_eq!(delivery.partition, 3);
        assert_eq!(delivery.offset, 42);
        assert_eq!(delivery.key.as_deref(), Some(b"B-100".as_slice()));
        assert_eq!(delivery.payload(), Some(b"{}".as_slice()));
        assert_eq!(delivery.attempt, 2);
    }

    #[test]
    fn tombstone_has_no_payload() {
        let message = OwnedMessage::new(
            None,
            None,
            "Booking-Confirmation".to_string(),
            Timestamp::NotAvailable,
            0,
            7,
            None,
        );

        let delivery = delivery_from_message(&message, 1);
        assert!(delivery.payload().is_none());
        assert!(delivery.key.is_none());
    }

    #[test]
    fn dead_letter_headers_describe_origin() {
        let delivery = Delivery::new("Booking-Confirmation", 1, 99, Some(b"x".to_vec())).with_attempt(10);

        let headers = dead_letter_headers(&delivery, "redelivery exhausted after 10 attempts: timeout");

        assert_eq!(headers.count(), 5);
        assert_eq!(header(&headers, ORIGINAL_TOPIC_HEADER), Some("Booking-Confirmation"));
        assert_eq!(header(&headers, ORIGINAL_PARTITION_HEADER), Some("1"));
        assert_eq!(header(&headers, ORIGINAL_OFFSET_HEADER), Some("99"));
        assert_eq!(header(&headers, DELIVERY_ATTEMPTS_HEADER), Some("10"));
        assert_eq!(
            header(&headers, DEAD_LETTER_REASON_HEADER),
            Some("redelivery exhausted after 10 attempts: timeout")
        );
    }

    fn unreachable_acknowledger() -> Arc<RedpandaAcknowledger> {
        let policy = RedeliveryPolicy::builder()
            .max_attempts(3)
            .initial_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(5))
            .build();
        crate::RedpandaListener::builder()
            .brokers("127.0.0.1:1")
            .timeout(Duration::from_millis(200))
            .redelivery_policy(policy)
            .build()
            .unwrap()
            .acknowledger()
    }

    #[tokio::test]
    async fn failed_rewind_stalls_the_listener() {
        let acknowledger = unreachable_acknowledger();
        let delivery = Delivery::new("Booking-Confirmation", 0, 7, Some(b"{}".to_vec()));

        let result = acknowledger.redeliver(&delivery, "read timed out").await;

        assert!(matches!(result, Err(AckError::SeekFailed { partition: 0, offset: 7, .. })));
        assert_eq!(acknowledger.stalled(), Some((0, 7)));
    }

    #[tokio::test]
    async fn failed_dead_letter_publish_keeps_the_record() {
        let acknowledger = unreachable_acknowledger();
        let delivery = Delivery::new("Booking-Confirmation", 0, 7, Some(b"{}".to_vec())).with_attempt(3);

        let result = acknowledger.dead_letter(&delivery, "redelivery exhausted").await;

        assert!(matches!(result, Err(AckError::DeadLetterFailed { .. })));
        // Partition 0 is not assigned, so the rewind fails too.
        assert_eq!(acknowledger.stalled(), Some((0, 7)));

        let message = OwnedMessage::new(
            Some(b"{}".to_vec()),
            None,
            "Booking-Confirmation".to_string(),
            Timestamp::NotAvailable,
            0,
            7,
            None,
        );
        assert_eq!(acknowledger.delivery_of(&message).attempt, 3);
    }

    #[test]
    fn acknowledger_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RedpandaAcknowledger>();
    }
}
