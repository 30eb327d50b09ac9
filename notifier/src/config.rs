//! Configuration management for the booking notifier.
//!
//! Loads configuration from environment variables with sensible defaults. Unlike a
//! missing variable, a present but unparseable one is an error: a typo in
//! `REDELIVERY_MAX_ATTEMPTS` should stop the service, not silently fall back.

use notifier_mail::{SmtpConfig, SmtpSecurity};
use notifier_runtime::{DispatcherConfig, PermanentFailurePolicy, RedeliveryPolicy};
use std::env;
use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set but its value is not acceptable.
    #[error("Invalid value '{value}' for {key}: {reason}")]
    Invalid {
        /// Environment variable
        key: String,
        /// Value found
        value: String,
        /// Why it was rejected
        reason: String,
    },

    /// A variable is required by another setting but missing.
    #[error("{key} is required when {because}")]
    Missing {
        /// Environment variable
        key: String,
        /// Setting that requires it
        because: String,
    },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Redpanda/Kafka configuration
    pub redpanda: RedpandaConfig,
    /// Mail configuration
    pub mail: MailConfig,
    /// Consumer configuration
    pub consumer: ConsumerConfig,
    /// Service configuration
    pub server: ServerConfig,
}

/// Redpanda/Kafka configuration
#[derive(Debug, Clone)]
pub struct RedpandaConfig {
    /// Broker addresses (comma-separated)
    pub brokers: String,
    /// Consumer group
    pub consumer_group: String,
    /// Inbound topic
    pub topic: String,
    /// Dead-letter topic (default: `<topic>.DLT`)
    pub dead_letter_topic: String,
    /// Where a new group starts reading: earliest, latest
    pub auto_offset_reset: String,
    /// Session timeout in milliseconds (default: 45000)
    pub session_timeout_ms: u64,
    /// Security protocol: plaintext, ssl, `sasl_plaintext`, `sasl_ssl`
    pub security_protocol: String,
    /// SASL mechanism: PLAIN, SCRAM-SHA-256, SCRAM-SHA-512
    pub sasl_mechanism: Option<String>,
    /// SASL username
    pub sasl_username: Option<String>,
    /// SASL password
    pub sasl_password: Option<String>,
    /// Path to SSL CA certificate
    pub ssl_ca_location: Option<String>,
}

/// Which mail transport to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailTransportKind {
    /// Deliver through an SMTP relay
    Smtp,
    /// Log messages instead of sending them
    Console,
}

impl FromStr for MailTransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "smtp" => Ok(Self::Smtp),
            "console" => Ok(Self::Console),
            other => Err(format!("unknown mail transport '{other}' (expected smtp or console)")),
        }
    }
}

/// Mail configuration
#[derive(Debug, Clone)]
pub struct MailConfig {
    /// Transport kind
    pub transport: MailTransportKind,
    /// SMTP relay settings (ignored by the console transport)
    pub smtp: SmtpConfig,
    /// Sender address, brand and send timeout
    pub dispatcher: DispatcherConfig,
}

/// Consumer configuration
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Number of listeners in the consumer group
    pub workers: usize,
    /// How permanent dispatch failures are settled
    pub permanent_failures: PermanentFailurePolicy,
    /// Broker-side redelivery policy
    pub redelivery: RedeliveryPolicy,
}

/// Service configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Log level (trace, debug, info, warn, error) used when `RUST_LOG` is unset
    pub log_level: String,
    /// Prometheus exporter address
    pub metrics_addr: SocketAddr,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is set to an unusable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is set to an unusable value.
    #[allow(clippy::too_many_lines)] // Config loading is naturally long but simple
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let topic = var("BOOKING_TOPIC", "Booking-Confirmation");
        let redpanda = RedpandaConfig {
            brokers: var("REDPANDA_BROKERS", "localhost:9092"),
            consumer_group: var("REDPANDA_CONSUMER_GROUP", "booking-notifier"),
            dead_letter_topic: lookup("DEAD_LETTER_TOPIC").unwrap_or_else(|| format!("{topic}.DLT")),
            topic,
            auto_offset_reset: var("REDPANDA_AUTO_OFFSET_RESET", "earliest"),
            session_timeout_ms: parsed(&lookup, "REDPANDA_SESSION_TIMEOUT_MS", 45_000)?,
            security_protocol: var("REDPANDA_SECURITY_PROTOCOL", "plaintext"),
            sasl_mechanism: lookup("REDPANDA_SASL_MECHANISM"),
            sasl_username: lookup("REDPANDA_SASL_USERNAME"),
            sasl_password: lookup("REDPANDA_SASL_PASSWORD"),
            ssl_ca_location: lookup("REDPANDA_SSL_CA_LOCATION"),
        };

        if redpanda.sasl_mechanism.is_some() {
            for (key, value) in [
                ("REDPANDA_SASL_USERNAME", &redpanda.sasl_username),
                ("REDPANDA_SASL_PASSWORD", &redpanda.sasl_password),
            ] {
                if value.is_none() {
                    return Err(ConfigError::Missing {
                        key: key.to_string(),
                        because: "REDPANDA_SASL_MECHANISM is set".to_string(),
                    });
                }
            }
        }

        let dispatcher_defaults = DispatcherConfig::default();
        let mail = MailConfig {
            transport: parsed(&lookup, "MAIL_TRANSPORT", MailTransportKind::Smtp)?,
            smtp: SmtpConfig {
                host: var("SMTP_HOST", "smtp.gmail.com"),
                port: parsed(&lookup, "SMTP_PORT", 587)?,
                username: lookup("SMTP_USERNAME"),
                password: lookup("SMTP_PASSWORD"),
                security: parsed(&lookup, "SMTP_SECURITY", SmtpSecurity::StartTls)?,
                timeout: timeout_secs(&lookup, "SMTP_TIMEOUT_SECS", 10)?,
                max_connections: parsed(&lookup, "SMTP_MAX_CONNECTIONS", 10)?,
            },
            dispatcher: DispatcherConfig {
                sender: lookup("MAIL_SENDER").unwrap_or(dispatcher_defaults.sender),
                brand: lookup("MAIL_BRAND").unwrap_or(dispatcher_defaults.brand),
                send_timeout: timeout_secs(
                    &lookup,
                    "MAIL_SEND_TIMEOUT_SECS",
                    dispatcher_defaults.send_timeout.as_secs(),
                )?,
            },
        };

        let policy_defaults = RedeliveryPolicy::default();
        let consumer = ConsumerConfig {
            workers: parsed(&lookup, "CONSUMER_WORKERS", 1)?,
            permanent_failures: parsed(
                &lookup,
                "PERMANENT_FAILURE_POLICY",
                PermanentFailurePolicy::default(),
            )?,
            redelivery: RedeliveryPolicy::builder()
                .max_attempts(parsed(&lookup, "REDELIVERY_MAX_ATTEMPTS", policy_defaults.max_attempts)?)
                .initial_delay(Duration::from_millis(parsed(
                    &lookup,
                    "REDELIVERY_INITIAL_DELAY_MS",
                    millis(policy_defaults.initial_delay),
                )?))
                .max_delay(Duration::from_millis(parsed(
                    &lookup,
                    "REDELIVERY_MAX_DELAY_MS",
                    millis(policy_defaults.max_delay),
                )?))
                .multiplier(parsed(&lookup, "REDELIVERY_MULTIPLIER", policy_defaults.multiplier)?)
                .build(),
        };

        if consumer.workers == 0 {
            return Err(ConfigError::Invalid {
                key: "CONSUMER_WORKERS".to_string(),
                value: "0".to_string(),
                reason: "at least one worker is required".to_string(),
            });
        }
        if consumer.redelivery.multiplier < 1.0 {
            return Err(ConfigError::Invalid {
                key: "REDELIVERY_MULTIPLIER".to_string(),
                value: consumer.redelivery.multiplier.to_string(),
                reason: "backoff must not shrink".to_string(),
            });
        }

        let server = ServerConfig {
            log_level: var("LOG_LEVEL", "info"),
            metrics_addr: parsed(&lookup, "METRICS_ADDR", SocketAddr::from(([0, 0, 0, 0], 9090)))?,
            shutdown_timeout: Duration::from_secs(parsed(&lookup, "SHUTDOWN_TIMEOUT_SECS", 30)?),
        };

        Ok(Self {
            redpanda,
            mail,
            consumer,
            server,
        })
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    let Some(value) = lookup(key) else {
        return Ok(default);
    };

    match value.trim().parse::<T>() {
        Ok(parsed) => Ok(parsed),
        Err(e) => Err(ConfigError::Invalid {
            key: key.to_string(),
            reason: e.to_string(),
            value,
        }),
    }
}

/// A non-zero timeout in whole seconds.
fn timeout_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: u64,
) -> Result<Duration, ConfigError> {
    match parsed(lookup, key, default)? {
        0 => Err(ConfigError::Invalid {
            key: key.to_string(),
            value: "0".to_string(),
            reason: "timeout must be at least one second".to_string(),
        }),
        secs => Ok(Duration::from_secs(secs)),
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = load(&[]).unwrap();

        assert_eq!(config.redpanda.brokers, "localhost:9092");
        assert_eq!(config.redpanda.topic, "Booking-Confirmation");
        assert_eq!(config.redpanda.dead_letter_topic, "Booking-Confirmation.DLT");
        assert_eq!(config.redpanda.auto_offset_reset, "earliest");
        assert_eq!(config.mail.transport, MailTransportKind::Smtp);
        assert_eq!(config.mail.smtp.port, 587);
        assert_eq!(config.mail.dispatcher, DispatcherConfig::default());
        assert_eq!(config.consumer.workers, 1);
        assert_eq!(config.consumer.permanent_failures, PermanentFailurePolicy::Redeliver);
        assert_eq!(config.consumer.redelivery, RedeliveryPolicy::default());
        assert_eq!(config.server.metrics_addr.port(), 9090);
        assert_eq!(config.server.shutdown_timeout, Duration::from_secs(30));
    }

    #[test]
    fn dead_letter_topic_follows_topic() {
        let config = load(&[("BOOKING_TOPIC", "bookings")]).unwrap();
        assert_eq!(config.redpanda.dead_letter_topic, "bookings.DLT");

        let config = load(&[("BOOKING_TOPIC", "bookings"), ("DEAD_LETTER_TOPIC", "parked")]).unwrap();
        assert_eq!(config.redpanda.dead_letter_topic, "parked");
    }

    #[test]
    fn reads_overrides() {
        let config = load(&[
            ("MAIL_TRANSPORT", "console"),
            ("MAIL_BRAND", "Acme Rentals"),
            ("MAIL_SEND_TIMEOUT_SECS", "5"),
            ("CONSUMER_WORKERS", "4"),
            ("PERMANENT_FAILURE_POLICY", "dead-letter"),
            ("REDELIVERY_MAX_ATTEMPTS", "3"),
            ("REDELIVERY_INITIAL_DELAY_MS", "250"),
            ("SMTP_SECURITY", "tls"),
        ])
        .unwrap();

        assert_eq!(config.mail.transport, MailTransportKind::Console);
        assert_eq!(config.mail.dispatcher.brand, "Acme Rentals");
        assert_eq!(config.mail.dispatcher.send_timeout, Duration::from_secs(5));
        assert_eq!(config.mail.smtp.security, SmtpSecurity::Tls);
        assert_eq!(config.consumer.workers, 4);
        assert_eq!(config.consumer.permanent_failures, PermanentFailurePolicy::DeadLetter);
        assert_eq!(config.consumer.redelivery.max_attempts, 3);
        assert_eq!(config.consumer.redelivery.initial_delay, Duration::from_millis(250));
    }

    #[test]
    fn rejects_unparseable_values() {
        let err = load(&[("REDELIVERY_MAX_ATTEMPTS", "ten")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "REDELIVERY_MAX_ATTEMPTS"));

        assert!(load(&[("MAIL_TRANSPORT", "pigeon")]).is_err());
        assert!(load(&[("METRICS_ADDR", "not-an-addr")]).is_err());
        assert!(load(&[("CONSUMER_WORKERS", "0")]).is_err());
        assert!(load(&[("REDELIVERY_MULTIPLIER", "0.5")]).is_err());
    }

    #[test]
    fn rejects_zero_mail_timeouts() {
        for key in ["SMTP_TIMEOUT_SECS", "MAIL_SEND_TIMEOUT_SECS"] {
            let err = load(&[(key, "0")]).unwrap_err();
            assert_eq!(
                err,
                ConfigError::Invalid {
                    key: key.to_string(),
                    value: "0".to_string(),
                    reason: "timeout must be at least one second".to_string(),
                }
            );
        }

        let config = load(&[("SMTP_TIMEOUT_SECS", "1"), ("MAIL_SEND_TIMEOUT_SECS", "5")]).unwrap();
        assert_eq!(config.mail.smtp.timeout, Duration::from_secs(1));
        assert_eq!(config.mail.dispatcher.send_timeout, Duration::from_secs(5));
    }

    #[test]
    fn sasl_requires_credentials() {
        let err = load(&[("REDPANDA_SASL_MECHANISM", "PLAIN")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Missing {
                key: "REDPANDA_SASL_USERNAME".to_string(),
                because: "REDPANDA_SASL_MECHANISM is set".to_string(),
            }
        );

        assert!(load(&[
            ("REDPANDA_SASL_MECHANISM", "PLAIN"),
            ("REDPANDA_SASL_USERNAME", "u"),
            ("REDPANDA_SASL_PASSWORD", "p"),
        ])
        .is_ok());
    }
}
