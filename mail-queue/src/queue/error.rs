//! Queue error type.

use super::types::{EmailStatus, EmailType, EntryId};

/// Errors returned by the queue store and repository.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue entry not found: {0}")]
    NotFound(EntryId),

    /// An active entry already exists for this recipient and type.
    #[error("{email_type} already queued for {recipient}")]
    DuplicateEntry {
        recipient: String,
        email_type: EmailType,
    },

    #[error("entry {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: EntryId,
        from: EmailStatus,
        to: EmailStatus,
    },

    #[error("entry {id} is not retryable (current status: {status})")]
    NotRetryable { id: EntryId, status: EmailStatus },

    #[error("campaign {0} has no calendar date configured")]
    CampaignNotScheduled(EmailType),

    #[error("invalid entry: {0}")]
    Validation(String),

    /// A stored row could not be decoded into a `QueueEntry`.
    #[error("corrupt queue row {id}: {reason}")]
    Corrupt { id: i64, reason: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl QueueError {
    /// Errors caused by the caller's request rather than the infrastructure.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, QueueError::Corrupt { .. } | QueueError::Database(_))
    }
}

pub type QueueResult<T> = Result<T, QueueError>;
