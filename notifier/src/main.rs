//! Booking notifier service.
//!
//! Runs `CONSUMER_WORKERS` Redpanda listeners in one consumer group, each feeding a
//! booking confirmation consumer that emails customers through the configured mail
//! transport. Ctrl+C or SIGTERM stops the listeners after their in-flight record. A
//! listener that fails stops the others too, and the process exits with its error.

use booking_notifier::config::{Config, MailTransportKind};
use notifier_core::dispatcher::Dispatcher;
use notifier_core::mail::MailTransport;
use notifier_mail::{ConsoleMailTransport, SmtpMailTransport};
use notifier_redpanda::{ListenerError, RedpandaListener};
use notifier_runtime::metrics::MetricsServer;
use notifier_runtime::{BookingConfirmationConsumer, EmailDispatcher};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env file is fine; the process environment still applies.
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    // Initialize tracing
    let level = &config.server.log_level;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "booking_notifier={level},notifier_runtime={level},notifier_redpanda={level},notifier_mail={level}"
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting booking notifier");
    info!(
        redpanda_brokers = %config.redpanda.brokers,
        consumer_group = %config.redpanda.consumer_group,
        topic = %config.redpanda.topic,
        dead_letter_topic = %config.redpanda.dead_letter_topic,
        workers = config.consumer.workers,
        permanent_failures = ?config.consumer.permanent_failures,
        mail_transport = ?config.mail.transport,
        "Configuration loaded"
    );

    let mut metrics = MetricsServer::new(config.server.metrics_addr);
    metrics.start()?;

    let transport: Arc<dyn MailTransport> = match config.mail.transport {
        MailTransportKind::Smtp => {
            let smtp = SmtpMailTransport::new(&config.mail.smtp)?;
            if let Err(e) = smtp.verify().await {
                // Sends will fail and be redelivered until the relay is reachable.
                warn!(host = %config.mail.smtp.host, error = %e, "SMTP relay check failed");
            }
            Arc::new(smtp)
        },
        MailTransportKind::Console => {
            warn!("Console mail transport selected, confirmations will only be logged");
            Arc::new(ConsoleMailTransport::new())
        },
    };

    let dispatcher: Arc<dyn Dispatcher> = Arc::new(EmailDispatcher::new(
        transport,
        config.mail.dispatcher.clone(),
    ));

    let (shutdown_tx, _) = broadcast::channel(16);
    let (failed_tx, mut failed_rx) = mpsc::unbounded_channel::<usize>();
    let mut listeners = Vec::with_capacity(config.consumer.workers);

    for worker in 0..config.consumer.workers {
        let listener = build_listener(&config)?;
        let consumer = BookingConfirmationConsumer::new(Arc::clone(&dispatcher), listener.acknowledger())
            .with_permanent_failure_policy(config.consumer.permanent_failures);
        let shutdown = shutdown_tx.subscribe();
        let failed = failed_tx.clone();

        listeners.push(tokio::spawn(async move {
            let result = listener.run(&consumer, shutdown).await;
            if let Err(e) = &result {
                error!(worker, error = %e, "Listener failed");
                failed.send(worker).ok();
            }
            result
        }));
    }

    info!(workers = listeners.len(), "Listeners spawned");

    tokio::select! {
        () = shutdown_signal() => {},
        Some(worker) = failed_rx.recv() => {
            error!(worker, "Listener failed, stopping the remaining listeners");
        },
    }

    // Err only means every listener already exited.
    shutdown_tx.send(()).ok();
    let drained = tokio::time::timeout(config.server.shutdown_timeout, async {
        let mut failure = None;
        for listener in listeners {
            match listener.await {
                Ok(Err(e)) => {
                    failure.get_or_insert(e);
                },
                Ok(Ok(())) => {},
                Err(e) => error!(error = %e, "Listener task panicked"),
            }
        }
        failure
    })
    .await;

    let failure = drained.unwrap_or_else(|_| {
        warn!(
            timeout_secs = config.server.shutdown_timeout.as_secs(),
            "Shutdown timeout elapsed, uncommitted records will be redelivered"
        );
        None
    });

    info!("Booking notifier stopped");
    match failure {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

fn build_listener(config: &Config) -> Result<RedpandaListener, ListenerError> {
    let redpanda = &config.redpanda;
    let mut builder = RedpandaListener::builder()
        .brokers(&redpanda.brokers)
        .consumer_group(&redpanda.consumer_group)
        .topic(&redpanda.topic)
        .dead_letter_topic(&redpanda.dead_letter_topic)
        .auto_offset_reset(&redpanda.auto_offset_reset)
        .session_timeout(Duration::from_millis(redpanda.session_timeout_ms))
        .security_protocol(&redpanda.security_protocol)
        .redelivery_policy(config.consumer.redelivery.clone());

    if let (Some(mechanism), Some(username), Some(password)) = (
        &redpanda.sasl_mechanism,
        &redpanda.sasl_username,
        &redpanda.sasl_password,
    ) {
        builder = builder.sasl(mechanism, username, password);
    }
    if let Some(ca) = &redpanda.ssl_ca_location {
        builder = builder.ssl_ca_location(ca);
    }

    builder.build()
}

/// Graceful shutdown signal handler.
///
/// Waits for:
/// - Ctrl+C (SIGINT)
/// - SIGTERM (in production environments)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            },
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
