//! Email dispatcher: booking event in, one confirmation email out.
//!
//! [`EmailDispatcher`] composes the confirmation from the event and a
//! [`DispatcherConfig`], then hands it to a shared [`MailTransport`] bounded by
//! `send_timeout`. It performs exactly one transport call per `send` and never retries.
//!
//! # Message Layout
//!
//! ```text
//! From:    <sender>
//! To:      <userEmail>
//! Subject: Booking Confirmed! ID: <bookingId>
//!
//! Hello!
//!
//! Your <brand> booking is confirmed.
//! Details: <bookingSummary>
//! Booking placed at: <timestamp>
//!
//! Thank you for choosing <brand>!
//! ```

use chrono::SecondsFormat;
use lettre::Address;
use notifier_core::dispatcher::{DispatchError, Dispatcher};
use notifier_core::event::BookingConfirmationEvent;
use notifier_core::mail::{EmailMessage, MailTransport};
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Static settings for composing and sending confirmations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Fixed sender address
    pub sender: String,
    /// Brand name used in the body
    pub brand: String,
    /// Upper bound on a single transport call
    pub send_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            sender: "cargounofficial@gmail.com".to_string(),
            brand: "Car-Go".to_string(),
            send_timeout: Duration::from_secs(30),
        }
    }
}

/// [`Dispatcher`] that sends confirmations through a [`MailTransport`].
#[derive(Clone)]
pub struct EmailDispatcher {
    transport: Arc<dyn MailTransport>,
    config: DispatcherConfig,
}

impl EmailDispatcher {
    /// Create a dispatcher over a shared transport.
    #[must_use]
    pub fn new(transport: Arc<dyn MailTransport>, config: DispatcherConfig) -> Self {
        Self { transport, config }
    }

    /// The configuration in use.
    #[must_use]
    pub const fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Build the confirmation email for `event` without sending it.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidRecipient`] if the event's address is empty
    /// or not a syntactically valid mailbox.
    pub fn compose(&self, event: &BookingConfirmationEvent) -> Result<EmailMessage, DispatchError> {
        let recipient = event.user_email().trim();
        if recipient.is_empty() {
            return Err(DispatchError::InvalidRecipient {
                address: event.user_email().to_string(),
                reason: "address is empty".to_string(),
            });
        }
        Address::from_str(recipient).map_err(|e| DispatchError::InvalidRecipient {
            address: recipient.to_string(),
            reason: e.to_string(),
        })?;

        let brand = &self.config.brand;
        let body = format!(
            "Hello!\n\nYour {brand} booking is confirmed.\n\
             Details: {summary}\n\
             Booking placed at: {placed_at}\n\n\
             Thank you for choosing {brand}!",
            summary = event.booking_summary(),
            placed_at = event.timestamp().to_rfc3339_opts(SecondsFormat::AutoSi, true),
        );

        Ok(EmailMessage {
            from: self.config.sender.clone(),
            to: recipient.to_string(),
            subject: format!("Booking Confirmed! ID: {}", event.booking_id()),
            body,
        })
    }
}

impl Dispatcher for EmailDispatcher {
    fn send(
        &self,
        event: &BookingConfirmationEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), DispatchError>> + Send + '_>> {
        let composed = self.compose(event);
        let booking_id = event.booking_id().to_string();
        let send_timeout = self.config.send_timeout;

        Box::pin(async move {
            let message = composed?;

            match tokio::time::timeout(send_timeout, self.transport.send(&message)).await {
                Ok(Ok(())) => {
                    tracing::info!(
                        booking_id = %booking_id,
                        recipient = %message.to,
                        "Email dispatched"
                    );
                    Ok(())
                },
                Ok(Err(err)) => Err(DispatchError::Transport(err)),
                Err(_) => {
                    tracing::warn!(
                        booking_id = %booking_id,
                        timeout_ms = send_timeout.as_millis(),
                        "Mail transport call timed out"
                    );
                    Err(DispatchError::Timeout(send_timeout))
                },
            }
        })
    }
}
