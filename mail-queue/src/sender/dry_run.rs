use async_trait::async_trait;
use tracing::info;

use super::{MailSender, SendError};
use crate::queue::Recipient;

/// Logs every message instead of sending it.
#[derive(Debug, Clone, Default)]
pub struct DryRunSender;

#[async_trait]
impl MailSender for DryRunSender {
    async fn send(&self, recipient: &Recipient, subject: &str, body: &str) -> Result<(), SendError> {
        info!(
            recipient = %recipient.email,
            subject = %subject,
            body_length = body.len(),
            "dry_run_email_skipped"
        );
        Ok(())
    }
}
