//! Outbound mail delivery.
//!
//! The processor only knows the `MailSender` trait. `SmtpMailSender` delivers
//! through an SMTP relay, `DryRunSender` logs and reports success.

pub mod dry_run;
pub mod smtp;

use async_trait::async_trait;

use crate::queue::Recipient;

pub use dry_run::DryRunSender;
pub use smtp::SmtpMailSender;

/// Why a send did not go through.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// Worth retrying: connection trouble, 4xx replies, timeouts.
    #[error("transient: {0}")]
    Transient(String),

    /// Retrying cannot help: rejected mailbox, malformed address, 5xx replies.
    #[error("permanent: {0}")]
    Permanent(String),
}

impl SendError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, SendError::Permanent(_))
    }
}

#[async_trait]
pub trait MailSender: Send + Sync {
    /// Deliver one message to one recipient.
    async fn send(&self, recipient: &Recipient, subject: &str, body: &str) -> Result<(), SendError>;
}
