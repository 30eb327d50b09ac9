//! SMTP mail transport implementation using Lettre.

use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::PoolConfig;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use notifier_core::mail::{EmailMessage, MailError, MailTransport};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// How the connection to the relay is secured.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SmtpSecurity {
    /// Plain connection upgraded with STARTTLS (usually port 587).
    #[default]
    StartTls,
    /// TLS from the first byte (usually port 465).
    Tls,
    /// No encryption. Local relays and test servers only.
    Plaintext,
}

impl std::str::FromStr for SmtpSecurity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "starttls" => Ok(Self::StartTls),
            "tls" | "ssl" => Ok(Self::Tls),
            "plaintext" | "none" => Ok(Self::Plaintext),
            other => Err(format!("unknown SMTP security mode '{other}'")),
        }
    }
}

/// SMTP relay settings.
#[derive(Clone, Debug)]
pub struct SmtpConfig {
    /// Relay host (e.g., "smtp.gmail.com")
    pub host: String,
    /// Relay port
    pub port: u16,
    /// Login, if the relay requires authentication
    pub username: Option<String>,
    /// Password or app password
    pub password: Option<String>,
    /// Connection security
    pub security: SmtpSecurity,
    /// Per-command network timeout
    pub timeout: Duration,
    /// Maximum pooled connections shared by concurrent sends
    pub max_connections: u32,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 587,
            username: None,
            password: None,
            security: SmtpSecurity::StartTls,
            timeout: Duration::from_secs(10),
            max_connections: 10,
        }
    }
}

/// SMTP transport using Lettre's pooled async client.
///
/// One instance is shared by every consumer task; Lettre pools connections
/// internally, so concurrent sends are safe.
///
/// # Examples
///
/// ```ignore
/// use notifier_mail::{SmtpConfig, SmtpMailTransport};
///
/// let transport = SmtpMailTransport::new(&SmtpConfig {
///     host: "smtp.gmail.com".to_string(),
///     username: Some("user@gmail.com".to_string()),
///     password: Some("app_password".to_string()),
///     ..SmtpConfig::default()
/// })?;
/// ```
#[derive(Clone)]
pub struct SmtpMailTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    host: String,
}

impl SmtpMailTransport {
    /// Create a new SMTP transport.
    ///
    /// No connection is opened until the first send.
    ///
    /// # Errors
    ///
    /// Returns [`MailError::Connection`] if the relay's TLS parameters cannot be built.
    pub fn new(config: &SmtpConfig) -> Result<Self, MailError> {
        let builder = match config.security {
            SmtpSecurity::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| MailError::Connection(format!("SMTP relay error: {e}")))?,
            SmtpSecurity::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| MailError::Connection(format!("SMTP relay error: {e}")))?,
            SmtpSecurity::Plaintext => {
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
            },
        };

        let mut builder = builder
            .port(config.port)
            .timeout(Some(config.timeout))
            .pool_config(PoolConfig::new().max_size(config.max_connections));

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        tracing::info!(
            host = %config.host,
            port = config.port,
            security = ?config.security,
            authenticated = config.username.is_some(),
            "SMTP transport configured"
        );

        Ok(Self {
            mailer: builder.build(),
            host: config.host.clone(),
        })
    }

    /// Check that the relay accepts connections.
    ///
    /// # Errors
    ///
    /// Returns [`MailError::Connection`] if the relay is unreachable or refuses us.
    pub async fn verify(&self) -> Result<(), MailError> {
        match self.mailer.test_connection().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(MailError::Connection(format!("{} refused the connection", self.host))),
            Err(e) => Err(classify(&e, "", "")),
        }
    }
}

/// Build a Lettre message from an [`EmailMessage`].
///
/// # Errors
///
/// Returns [`MailError::InvalidMessage`] if an address does not parse or the
/// message cannot be assembled.
pub fn build_message(message: &EmailMessage) -> Result<Message, MailError> {
    let from: Mailbox = message
        .from
        .parse()
        .map_err(|e| MailError::InvalidMessage(format!("Invalid from address: {e}")))?;
    let to: Mailbox = message
        .to
        .parse()
        .map_err(|e| MailError::InvalidMessage(format!("Invalid to address: {e}")))?;

    Message::builder()
        .from(from)
        .to(to)
        .subject(message.subject.clone())
        .header(ContentType::TEXT_PLAIN)
        .body(message.body.clone())
        .map_err(|e| MailError::InvalidMessage(format!("Failed to build email: {e}")))
}

/// Map a Lettre SMTP error onto the transport-neutral [`MailError`].
fn classify(err: &lettre::transport::smtp::Error, sender: &str, recipient: &str) -> MailError {
    if err.is_timeout() {
        return MailError::Timeout(err.to_string());
    }

    let Some(code) = err.status() else {
        return MailError::Connection(err.to_string());
    };

    classify_reply(&code.to_string(), err.is_permanent(), &err.to_string(), sender, recipient)
}

/// Map an SMTP reply code and its text to a [`MailError`].
///
/// 550/551/553 are answers to either MAIL FROM or RCPT TO. Lettre does not say
/// which command failed, so sender-side rejections are recognised from the reply
/// text.
fn classify_reply(code: &str, permanent: bool, detail: &str, sender: &str, recipient: &str) -> MailError {
    match code {
        "530" | "534" | "535" | "454" => MailError::Authentication(detail.to_string()),
        "550" | "551" | "553" if permanent && rejects_sender(detail) => MailError::RejectedSender {
            sender: sender.to_string(),
            reason: detail.to_string(),
        },
        "550" | "551" | "553" if permanent => MailError::RejectedRecipient {
            recipient: recipient.to_string(),
            reason: detail.to_string(),
        },
        "421" => MailError::Connection(detail.to_string()),
        _ => MailError::Other(detail.to_string()),
    }
}

/// Enhanced status codes X.1.7 and X.1.8 (RFC 3463) or reply text naming the sender.
fn rejects_sender(detail: &str) -> bool {
    let detail = detail.to_ascii_lowercase();
    ["5.1.7", "5.1.8", "sender", "mail from"]
        .iter()
        .any(|marker| detail.contains(marker))
}

impl MailTransport for SmtpMailTransport {
    fn send(
        &self,
        message: &EmailMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), MailError>> + Send + '_>> {
        let built = build_message(message);
        let sender = message.from.clone();
        let recipient = message.to.clone();

        Box::pin(async move {
            let email = built?;
            match self.mailer.send(email).await {
                Ok(response) => {
                    tracing::debug!(
                        recipient = %recipient,
                        code = %response.code(),
                        "SMTP relay accepted message"
                    );
                    Ok(())
                },
                Err(e) => {
                    let err = classify(&e, &sender, &recipient);
                    tracing::warn!(recipient = %recipient, error = %err, "SMTP send failed");
                    Err(err)
                },
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn message(to: &str) -> EmailMessage {
        EmailMessage {
            from: "cargounofficial@gmail.com".to_string(),
            to: to.to_string(),
            subject: "Booking Confirmed! ID: B-100".to_string(),
            body: "Hello!".to_string(),
        }
    }

    #[test]
    fn builds_plain_text_message() {
        let built = build_message(&message("a@x.com")).unwrap();
        let raw = String::from_utf8(built.formatted()).unwrap();

        assert!(raw.contains("Subject: Booking Confirmed! ID: B-100"));
        assert!(raw.contains("To: a@x.com"));
        assert!(raw.contains("text/plain"));
    }

    #[test]
    fn unparseable_recipient_is_permanent() {
        let err = build_message(&message("not-an-address")).unwrap_err();
        assert!(matches!(err, MailError::InvalidMessage(_)));
        assert!(err.is_permanent());
    }

    #[test]
    fn mailbox_rejection_names_the_recipient() {
        let err = classify_reply(
            "550",
            true,
            "permanent error (550): 5.1.1 <gone@x.com>: Recipient address rejected: User unknown",
            "noreply@cargo.com",
            "gone@x.com",
        );
        assert!(matches!(err, MailError::RejectedRecipient { ref recipient, .. } if recipient == "gone@x.com"));
        assert!(err.is_permanent());
    }

    #[test]
    fn mail_from_rejection_names_the_sender() {
        for detail in [
            "permanent error (553): 5.1.8 <noreply@cargo.com>: Domain of sender address does not exist",
            "permanent error (550): 5.1.7 Invalid address",
            "permanent error (550): MAIL FROM not permitted for this account",
        ] {
            let err = classify_reply("553", true, detail, "noreply@cargo.com", "a@x.com");
            assert!(
                matches!(err, MailError::RejectedSender { ref sender, .. } if sender == "noreply@cargo.com"),
                "{detail}"
            );
            assert!(!err.is_permanent());
        }
    }

    #[test]
    fn classifies_other_reply_codes() {
        let auth = classify_reply("535", true, "5.7.8 bad credentials", "s@x.com", "a@x.com");
        assert!(matches!(auth, MailError::Authentication(_)));

        let closing = classify_reply("421", false, "service not available", "s@x.com", "a@x.com");
        assert!(matches!(closing, MailError::Connection(_)));

        let transient_mailbox = classify_reply("550", false, "mailbox busy", "s@x.com", "a@x.com");
        assert!(matches!(transient_mailbox, MailError::Other(_)));
    }

    #[test]
    fn parses_security_modes() {
        assert_eq!("starttls".parse(), Ok(SmtpSecurity::StartTls));
        assert_eq!("SSL".parse(), Ok(SmtpSecurity::Tls));
        assert_eq!("none".parse(), Ok(SmtpSecurity::Plaintext));
        assert!("maybe".parse::<SmtpSecurity>().is_err());
    }

    #[tokio::test]
    async fn construction_does_not_connect() {
        let transport = SmtpMailTransport::new(&SmtpConfig {
            host: "smtp.invalid".to_string(),
            security: SmtpSecurity::Plaintext,
            ..SmtpConfig::default()
        });
        assert!(transport.is_ok());
    }
}
