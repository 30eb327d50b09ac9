//! Redpanda listener feeding the booking confirmation consumer.

use crate::ListenerError;
use crate::acknowledger::RedpandaAcknowledger;
use crate::tracker::{DeliveryTracker, ListenerContext};
use futures::StreamExt;
use notifier_core::delivery::Disposition;
use notifier_runtime::{BookingConfirmationConsumer, RedeliveryPolicy};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::FutureProducer;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Default inbound topic.
pub const DEFAULT_TOPIC: &str = "Booking-Confirmation";

/// Default consumer group.
pub const DEFAULT_CONSUMER_GROUP: &str = "booking-notifier";

/// One member of the notifier's consumer group.
///
/// Owns a manually committed [`StreamConsumer`] and the [`RedpandaAcknowledger`] that
/// settles its deliveries. Records are processed one at a time, so order within each
/// assigned partition is preserved. Run several listeners with the same group to
/// consume partitions in parallel.
///
/// # Example
///
/// ```no_run
/// use notifier_redpanda::RedpandaListener;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let listener = RedpandaListener::builder()
///     .brokers("localhost:9092")
///     .consumer_group("booking-notifier")
///     .topic("Booking-Confirmation")
///     .build()?;
///
/// // Wire the acknowledger into the consumer, then `listener.run(&consumer, shutdown)`.
/// let acknowledger = listener.acknowledger();
/// # Ok(())
/// # }
/// ```
pub struct RedpandaListener {
    consumer: Arc<StreamConsumer<ListenerContext>>,
    acknowledger: Arc<RedpandaAcknowledger>,
    topic: String,
    consumer_group: String,
}

impl RedpandaListener {
    /// Create a new builder for configuring a listener.
    #[must_use]
    pub fn builder() -> RedpandaListenerBuilder {
        RedpandaListenerBuilder::default()
    }

    /// The acknowledger bound to this listener's consumer.
    #[must_use]
    pub fn acknowledger(&self) -> Arc<RedpandaAcknowledger> {
        Arc::clone(&self.acknowledger)
    }

    /// Subscribed topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Consumer group this listener joins.
    #[must_use]
    pub fn consumer_group(&self) -> &str {
        &self.consumer_group
    }

    /// Subscribe and hand every record to `consumer` until `shutdown` fires.
    ///
    /// The shutdown signal is only observed between records; an in-flight record is
    /// always settled before the loop exits. Receive errors are logged and the loop
    /// keeps polling.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::SubscriptionFailed`] if the topic subscription is
    /// rejected, and [`ListenerError::Stalled`] if a record could be neither settled
    /// nor rewound. Nothing after a stalled record is consumed or committed.
    pub async fn run(
        &self,
        consumer: &BookingConfirmationConsumer,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError> {
        self.consumer
            .subscribe(&[self.topic.as_str()])
            .map_err(|e| ListenerError::SubscriptionFailed {
                topic: self.topic.clone(),
                reason: e.to_string(),
            })?;

        info!(
            topic = %self.topic,
            consumer_group = %self.consumer_group,
            dead_letter_topic = %self.acknowledger.dead_letter_topic(),
            manual_commit = true,
            "Listener subscribed"
        );

        let mut stream = self.consumer.stream();

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(topic = %self.topic, "Listener received shutdown signal");
                    break;
                }
                received = stream.next() => {
                    let delivery = match received {
                        Some(Ok(message)) => self.acknowledger.delivery_of(&message),
                        Some(Err(e)) => {
                            warn!(topic = %self.topic, error = %e, "Failed to receive message");
                            continue;
                        }
                        None => {
                            error!(topic = %self.topic, "Consumer stream ended");
                            break;
                        }
                    };

                    let disposition = consumer.process(&delivery).await;
                    debug!(
                        partition = delivery.partition,
                        offset = delivery.offset,
                        attempt = delivery.attempt,
                        acknowledged = disposition == Disposition::Acknowledged,
                        "Delivery settled"
                    );

                    if let Some((partition, offset)) = self.acknowledger.stalled() {
                        error!(
                            topic = %self.topic,
                            partition,
                            offset,
                            "Record could not be settled or rewound, stopping listener"
                        );
                        self.consumer.unsubscribe();
                        return Err(ListenerError::Stalled {
                            topic: self.topic.clone(),
                            partition,
                            offset,
                        });
                    }
                }
            }
        }

        self.consumer.unsubscribe();
        info!(topic = %self.topic, "Listener stopped");
        Ok(())
    }
}

/// Builder for configuring a [`RedpandaListener`].
///
/// # Example
///
/// ```no_run
/// use notifier_redpanda::RedpandaListener;
/// use notifier_runtime::RedeliveryPolicy;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let listener = RedpandaListener::builder()
///     .brokers("broker-1:9092,broker-2:9092")
///     .consumer_group("booking-notifier")
///     .auto_offset_reset("earliest")
///     .session_timeout(Duration::from_secs(45))
///     .sasl("SCRAM-SHA-256", "notifier", "secret")
///     .security_protocol("sasl_ssl")
///     .redelivery_policy(RedeliveryPolicy::builder().max_attempts(5).build())
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct RedpandaListenerBuilder {
    brokers: Option<String>,
    consumer_group: Option<String>,
    topic: Option<String>,
    dead_letter_topic: Option<String>,
    auto_offset_reset: Option<String>,
    session_timeout: Option<Duration>,
    security_protocol: Option<String>,
    sasl: Option<(String, String, String)>,
    ssl_ca_location: Option<String>,
    redelivery_policy: Option<RedeliveryPolicy>,
    timeout: Option<Duration>,
}

impl RedpandaListenerBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the consumer group.
    ///
    /// Default: `booking-notifier`
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Set the inbound topic.
    ///
    /// Default: `Booking-Confirmation`
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Set the dead-letter topic.
    ///
    /// Default: the inbound topic with a `.DLT` suffix
    #[must_use]
    pub fn dead_letter_topic(mut self, topic: impl Into<String>) -> Self {
        self.dead_letter_topic = Some(topic.into());
        self
    }

    /// Set where a new consumer group starts reading: `"earliest"`, `"latest"` or `"error"`.
    ///
    /// Default: `"earliest"`
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Set the group session timeout.
    ///
    /// Default: 45 seconds
    #[must_use]
    pub const fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = Some(timeout);
        self
    }

    /// Set the security protocol: `plaintext`, `ssl`, `sasl_plaintext` or `sasl_ssl`.
    ///
    /// Default: `plaintext`
    #[must_use]
    pub fn security_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.security_protocol = Some(protocol.into());
        self
    }

    /// Set SASL mechanism and credentials.
    #[must_use]
    pub fn sasl(
        mut self,
        mechanism: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.sasl = Some((mechanism.into(), username.into(), password.into()));
        self
    }

    /// Set the CA certificate used to verify brokers.
    #[must_use]
    pub fn ssl_ca_location(mut self, path: impl Into<String>) -> Self {
        self.ssl_ca_location = Some(path.into());
        self
    }

    /// Set the redelivery policy.
    ///
    /// Default: [`RedeliveryPolicy::default`]
    #[must_use]
    pub const fn redelivery_policy(mut self, policy: RedeliveryPolicy) -> Self {
        self.redelivery_policy = Some(policy);
        self
    }

    /// Set the timeout for seeks and dead-letter publishes.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the [`RedpandaListener`].
    ///
    /// No connection is made until the listener runs.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::MissingBrokers`] if no brokers were set, and
    /// [`ListenerError::ClientCreation`] if the consumer or producer configuration is
    /// rejected.
    pub fn build(self) -> Result<RedpandaListener, ListenerError> {
        let brokers = self.brokers.ok_or(ListenerError::MissingBrokers)?;
        let topic = self.topic.unwrap_or_else(|| DEFAULT_TOPIC.to_string());
        let consumer_group = self
            .consumer_group
            .unwrap_or_else(|| DEFAULT_CONSUMER_GROUP.to_string());
        let dead_letter_topic = self
            .dead_letter_topic
            .unwrap_or_else(|| format!("{topic}.DLT"));
        let auto_offset_reset = self
            .auto_offset_reset
            .unwrap_or_else(|| "earliest".to_string());
        let session_timeout = self.session_timeout.unwrap_or(Duration::from_secs(45));
        let timeout = self.timeout.unwrap_or(Duration::from_secs(5));

        let mut base = ClientConfig::new();
        base.set("bootstrap.servers", &brokers).set(
            "security.protocol",
            self.security_protocol.as_deref().unwrap_or("plaintext"),
        );
        if let Some((mechanism, username, password)) = &self.sasl {
            base.set("sasl.mechanism", mechanism)
                .set("sasl.username", username)
                .set("sasl.password", password);
        }
        if let Some(ca) = &self.ssl_ca_location {
            base.set("ssl.ca.location", ca);
        }

        let tracker = Arc::new(DeliveryTracker::new());
        let consumer: StreamConsumer<ListenerContext> = base
            .clone()
            .set("group.id", &consumer_group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &auto_offset_reset)
            .set("session.timeout.ms", session_timeout.as_millis().to_string())
            .set("enable.partition.eof", "false")
            .create_with_context(ListenerContext::new(Arc::clone(&tracker)))
            .map_err(|e| ListenerError::ClientCreation {
                client: "consumer",
                reason: e.to_string(),
            })?;

        let producer: FutureProducer = base
            .clone()
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", "all")
            .create()
            .map_err(|e| ListenerError::ClientCreation {
                client: "producer",
                reason: e.to_string(),
            })?;

        let policy = self.redelivery_policy.unwrap_or_default();

        tracing::info!(
            brokers = %brokers,
            topic = %topic,
            consumer_group = %consumer_group,
            dead_letter_topic = %dead_letter_topic,
            auto_offset_reset = %auto_offset_reset,
            max_attempts = policy.max_attempts,
            "RedpandaListener created"
        );

        let consumer = Arc::new(consumer);
        let acknowledger = Arc::new(RedpandaAcknowledger::new(
            Arc::clone(&consumer),
            producer,
            dead_letter_topic,
            policy,
            timeout,
            tracker,
        ));

        Ok(RedpandaListener {
            consumer,
            acknowledger,
            topic,
            consumer_group,
        })
    }
}
