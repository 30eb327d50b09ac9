//! Mail transports for the booking confirmation notifier.
//!
//! Both transports implement [`MailTransport`](notifier_core::mail::MailTransport):
//!
//! - [`SmtpMailTransport`]: real delivery through an SMTP relay (Lettre, pooled, async)
//! - [`ConsoleMailTransport`]: logs messages instead of sending them
//!
//! SMTP failures are mapped onto [`MailError`](notifier_core::mail::MailError) so the
//! dispatcher can tell a rejected recipient (permanent) from a dropped connection
//! (transient).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod console;
pub mod smtp;

pub use console::ConsoleMailTransport;
pub use smtp::{SmtpConfig, SmtpMailTransport, SmtpSecurity, build_message};
