//! Console mail transport for development and testing.

use notifier_core::mail::{EmailMessage, MailError, MailTransport};
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, info};

/// Console mail transport.
///
/// Logs messages instead of sending them. Useful for development where you don't
/// want to send real emails. Always accepts.
#[derive(Clone, Debug, Default)]
pub struct ConsoleMailTransport;

impl ConsoleMailTransport {
    /// Create a new console transport.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl MailTransport for ConsoleMailTransport {
    fn send(
        &self,
        message: &EmailMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), MailError>> + Send + '_>> {
        info!(
            from = %message.from,
            to = %message.to,
            subject = %message.subject,
            "📧 Email (development mode, not sent)"
        );
        debug!(to = %message.to, body = %message.body, "Email body");
        Box::pin(async { Ok(()) })
    }
}
