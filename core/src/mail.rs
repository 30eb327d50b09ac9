//! Outbound email messages and the mail transport abstraction.
//!
//! A [`MailTransport`] accepts a fully composed [`EmailMessage`] and hands it to an
//! external delivery mechanism (an SMTP relay, a console, a test recorder). Success
//! means the transport accepted the message for delivery, not that the recipient
//! received it.
//!
//! # Thread Safety
//!
//! Transports are shared by every concurrent consumer task, so implementations must be
//! `Send + Sync` and either safe for concurrent use or pooled internally.

use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// A plain-text email ready to be handed to a transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmailMessage {
    /// Sender address
    pub from: String,
    /// Recipient address
    pub to: String,
    /// Subject line
    pub subject: String,
    /// Plain-text body
    pub body: String,
}

/// Errors reported by a [`MailTransport`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MailError {
    /// Could not reach the mail server.
    #[error("Mail connection failed: {0}")]
    Connection(String),

    /// The mail server refused our credentials.
    #[error("Mail authentication failed: {0}")]
    Authentication(String),

    /// The mail server refused the recipient.
    #[error("Recipient '{recipient}' rejected: {reason}")]
    RejectedRecipient {
        /// The refused address
        recipient: String,
        /// Server response
        reason: String,
    },

    /// The mail server refused our sender address.
    #[error("Sender '{sender}' rejected: {reason}")]
    RejectedSender {
        /// The refused address
        sender: String,
        /// Server response
        reason: String,
    },

    /// The mail server did not answer in time.
    #[error("Mail transport timed out: {0}")]
    Timeout(String),

    /// The message could not be built from its parts.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Anything else the transport reports.
    #[error("Mail transport error: {0}")]
    Other(String),
}

impl MailError {
    /// Whether retrying the same message can never succeed.
    ///
    /// Authentication failures count as transient: credentials are rotated and
    /// relays have temporary lockouts. A rejected sender is a relay or
    /// configuration problem, not a property of the message, so it is transient too.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::RejectedRecipient { .. } | Self::InvalidMessage(_))
    }
}

/// Something that can hand an email to a delivery mechanism.
///
/// # Dyn Compatibility
///
/// Returns `Pin<Box<dyn Future>>` so transports can be shared as
/// `Arc<dyn MailTransport>`.
pub trait MailTransport: Send + Sync {
    /// Send one message.
    ///
    /// # Errors
    ///
    /// Returns a [`MailError`] describing why the transport did not accept the message.
    fn send(
        &self,
        message: &EmailMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), MailError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_classification() {
        assert!(
            MailError::RejectedRecipient {
                recipient: "x".to_string(),
                reason: "550".to_string(),
            }
            .is_permanent()
        );
        assert!(MailError::InvalidMessage("bad header".to_string()).is_permanent());
        assert!(!MailError::Connection("refused".to_string()).is_permanent());
        assert!(!MailError::Authentication("535".to_string()).is_permanent());
        assert!(
            !MailError::RejectedSender {
                sender: "noreply@x.com".to_string(),
                reason: "553".to_string(),
            }
            .is_permanent()
        );
        assert!(!MailError::Timeout("read".to_string()).is_permanent());
    }
}
