//! The dispatcher capability: turn an event into one outbound email.
//!
//! A [`Dispatcher`] has no broker awareness. It performs the side effect once and
//! reports either success or a single [`DispatchError`]. It never retries; redelivery
//! is entirely the consumer and broker's business.

use crate::event::BookingConfirmationEvent;
use crate::mail::MailError;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Whether a failure may succeed on a later attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Worth retrying: timeouts, refused connections, temporary auth failures.
    Transient,
    /// Retrying cannot help: invalid or rejected recipient, unbuildable message.
    Permanent,
}

impl FailureKind {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
        }
    }
}

/// Errors reported by [`Dispatcher::send`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The event's address is empty or not a syntactically valid mailbox.
    #[error("Invalid recipient address '{address}': {reason}")]
    InvalidRecipient {
        /// Offending address
        address: String,
        /// Why it was refused
        reason: String,
    },

    /// The transport call exceeded the configured bound.
    #[error("Mail transport did not complete within {0:?}")]
    Timeout(Duration),

    /// The transport reported a failure.
    #[error(transparent)]
    Transport(#[from] MailError),
}

impl DispatchError {
    /// Classify this failure.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::InvalidRecipient { .. } => FailureKind::Permanent,
            Self::Timeout(_) => FailureKind::Transient,
            Self::Transport(err) => {
                if err.is_permanent() {
                    FailureKind::Permanent
                } else {
                    FailureKind::Transient
                }
            },
        }
    }
}

/// Sends the confirmation for one event.
///
/// # Dyn Compatibility
///
/// Uses explicit `Pin<Box<dyn Future>>` returns so the consumer can hold an
/// `Arc<dyn Dispatcher>`.
pub trait Dispatcher: Send + Sync {
    /// Send the confirmation email for `event`.
    ///
    /// # Errors
    ///
    /// Returns a [`DispatchError`] if the message could not be built or the
    /// transport did not accept it in time.
    fn send(
        &self,
        event: &BookingConfirmationEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), DispatchError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_failures() {
        let invalid = DispatchError::InvalidRecipient {
            address: String::new(),
            reason: "address is empty".to_string(),
        };
        assert_eq!(invalid.kind(), FailureKind::Permanent);
        assert_eq!(DispatchError::Timeout(Duration::from_secs(1)).kind(), FailureKind::Transient);
        assert_eq!(
            DispatchError::from(MailError::Connection("refused".to_string())).kind(),
            FailureKind::Transient
        );
        assert_eq!(
            DispatchError::from(MailError::RejectedRecipient {
                recipient: "a@x.com".to_string(),
                reason: "550 no such user".to_string(),
            })
            .kind(),
            FailureKind::Permanent
        );
    }
}
