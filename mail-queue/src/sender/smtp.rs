//! SMTP delivery through lettre's async transport.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{info, warn};

use super::{MailSender, SendError};
use crate::config::{ConfigError, SmtpSettings};
use crate::queue::Recipient;

/// Port that speaks TLS from the first byte; every other port upgrades with STARTTLS.
const IMPLICIT_TLS_PORT: u16 = 465;

pub struct SmtpMailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailSender {
    /// Build a pooled transport for `settings`. No connection is made until the
    /// first send.
    pub fn new(settings: &SmtpSettings, timeout: Duration) -> Result<Self, ConfigError> {
        let host = settings
            .host
            .as_deref()
            .ok_or(ConfigError::MissingSmtp("SMTP_HOST"))?;
        let username = settings
            .username
            .clone()
            .ok_or(ConfigError::MissingSmtp("SMTP_USER"))?;
        let password = settings
            .password
            .clone()
            .ok_or(ConfigError::MissingSmtp("SMTP_PASSWORD"))?;
        let from_raw = settings
            .from
            .as_deref()
            .ok_or(ConfigError::MissingSmtp("EMAIL_FROM"))?;

        let from: Mailbox = from_raw.parse().map_err(|_| ConfigError::Unparseable {
            name: "EMAIL_FROM",
            value: from_raw.to_string(),
        })?;

        let invalid_host = |_| ConfigError::Unparseable {
            name: "SMTP_HOST",
            value: host.to_string(),
        };
        let tls_parameters = TlsParameters::new(host.to_string()).map_err(invalid_host)?;
        let tls = if settings.port == IMPLICIT_TLS_PORT {
            Tls::Wrapper(tls_parameters)
        } else {
            Tls::Required(tls_parameters)
        };

        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(host)
            .map_err(invalid_host)?
            .port(settings.port)
            .tls(tls)
            .credentials(Credentials::new(username, password))
            .timeout(Some(timeout))
            .build();

        info!(
            host = %host,
            port = settings.port,
            implicit_tls = settings.port == IMPLICIT_TLS_PORT,
            "smtp_sender_configured"
        );

        Ok(Self { transport, from })
    }

    fn build_message(
        &self,
        recipient: &Recipient,
        subject: &str,
        body: &str,
    ) -> Result<Message, SendError> {
        let address: Address = recipient
            .email
            .parse()
            .map_err(|e| SendError::Permanent(format!("invalid recipient address: {e}")))?;

        Message::builder()
            .from(self.from.clone())
            .to(Mailbox::new(Some(recipient.name.clone()), address))
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| SendError::Permanent(format!("could not build message: {e}")))
    }
}

/// 5xx replies are permanent; connection, TLS, timeout and 4xx errors are worth another try.
fn classify(err: lettre::transport::smtp::Error) -> SendError {
    if err.is_permanent() {
        SendError::Permanent(err.to_string())
    } else {
        SendError::Transient(err.to_string())
    }
}

#[async_trait]
impl MailSender for SmtpMailSender {
    async fn send(&self, recipient: &Recipient, subject: &str, body: &str) -> Result<(), SendError> {
        let message = self.build_message(recipient, subject, body)?;

        match self.transport.send(message).await {
            Ok(response) => {
                info!(
                    recipient = %recipient.email,
                    code = %response.code(),
                    "smtp_send_accepted"
                );
                Ok(())
            }
            Err(e) => {
                let err = classify(e);
                warn!(
                    recipient = %recipient.email,
                    permanent = err.is_permanent(),
                    error = %err,
                    "smtp_send_failed"
                );
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SmtpSettings {
        SmtpSettings {
            host: Some("smtp.example.com".into()),
            port: 587,
            username: Some("bot@example.com".into()),
            password: Some("secret".into()),
            from: Some("LawVriksh <info@example.com>".into()),
        }
    }

    #[tokio::test]
    async fn test_new_requires_every_setting() {
        let mut missing_host = settings();
        missing_host.host = None;
        assert!(matches!(
            SmtpMailSender::new(&missing_host, Duration::from_secs(5)),
            Err(ConfigError::MissingSmtp("SMTP_HOST"))
        ));

        let mut bad_from = settings();
        bad_from.from = Some("not an address".into());
        assert!(matches!(
            SmtpMailSender::new(&bad_from, Duration::from_secs(5)),
            Err(ConfigError::Unparseable { name: "EMAIL_FROM", .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_recipient_is_permanent_without_connecting() {
        let sender = SmtpMailSender::new(&settings(), Duration::from_secs(5)).unwrap();
        let err = sender
            .send(&Recipient::new("not-an-address", "Nobody"), "Hi", "Body")
            .await
            .unwrap_err();
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn test_message_has_recipient_and_subject() {
        let sender = SmtpMailSender::new(&settings(), Duration::from_secs(5)).unwrap();
        let message = sender
            .build_message(&Recipient::new("alice@example.com", "Alice"), "Welcome", "Hello")
            .unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("To: Alice <alice@example.com>"));
        assert!(raw.contains("Subject: Welcome"));
        assert!(raw.contains("From: LawVriksh <info@example.com>"));
    }
}
