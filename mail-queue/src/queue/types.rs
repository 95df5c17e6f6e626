//! Queue entry types.
//!
//! This module defines:
//! - `EmailType`: the closed set of message kinds the queue delivers
//! - `EmailStatus`: the lifecycle states of an entry
//! - `QueueEntry`: one persisted delivery request
//! - `NewEntry`: what a caller hands to `enqueue`

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upper bound accepted for a per-entry retry budget.
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Identifier of a queue entry (the row id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub i64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Email Types
// =============================================================================

/// Kind of email an entry carries.
///
/// `Welcome` is sent as soon as the processor sees it; every other variant is a
/// campaign anchored to a single calendar date shared by all recipients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailType {
    Welcome,
    SearchEngine,
    PortfolioBuilder,
    PlatformComplete,
}

impl EmailType {
    /// Every type, in the order the processor visits them.
    pub const ALL: [EmailType; 4] = [
        EmailType::Welcome,
        EmailType::SearchEngine,
        EmailType::PortfolioBuilder,
        EmailType::PlatformComplete,
    ];

    /// Campaign types only.
    pub const CAMPAIGNS: [EmailType; 3] = [
        EmailType::SearchEngine,
        EmailType::PortfolioBuilder,
        EmailType::PlatformComplete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EmailType::Welcome => "welcome",
            EmailType::SearchEngine => "search_engine",
            EmailType::PortfolioBuilder => "portfolio_builder",
            EmailType::PlatformComplete => "platform_complete",
        }
    }

    pub fn is_campaign(&self) -> bool {
        !matches!(self, EmailType::Welcome)
    }
}

impl fmt::Display for EmailType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown type or status name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseKindError {
    pub kind: &'static str,
    pub value: String,
}

impl FromStr for EmailType {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EmailType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ParseKindError {
                kind: "email type",
                value: s.to_string(),
            })
    }
}

// =============================================================================
// Status
// =============================================================================

/// Lifecycle state of a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailStatus {
    Pending,
    Processing,
    Sent,
    Failed,
    Cancelled,
}

impl EmailStatus {
    pub const ALL: [EmailStatus; 5] = [
        EmailStatus::Pending,
        EmailStatus::Processing,
        EmailStatus::Sent,
        EmailStatus::Failed,
        EmailStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EmailStatus::Pending => "pending",
            EmailStatus::Processing => "processing",
            EmailStatus::Sent => "sent",
            EmailStatus::Failed => "failed",
            EmailStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for EmailStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmailStatus {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EmailStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| ParseKindError {
                kind: "email status",
                value: s.to_string(),
            })
    }
}

// =============================================================================
// Entries
// =============================================================================

/// Destination of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub email: String,
    pub name: String,
}

impl Recipient {
    pub fn new(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: name.into(),
        }
    }
}

/// Request to queue a message.
///
/// `subject` and `body` fall back to the type's template when omitted;
/// `max_retries` falls back to the configured default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEntry {
    pub recipient: Recipient,
    pub email_type: EmailType,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl NewEntry {
    pub fn new(recipient: Recipient, email_type: EmailType) -> Self {
        Self {
            recipient,
            email_type,
            subject: None,
            body: None,
            max_retries: None,
        }
    }

    pub fn with_content(mut self, subject: impl Into<String>, body: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self.body = Some(body.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// One persisted delivery request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: EntryId,
    pub recipient_email: String,
    pub recipient_name: String,
    pub email_type: EmailType,
    pub subject: String,
    pub body: String,
    pub scheduled_time: DateTime<Utc>,
    pub status: EmailStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl QueueEntry {
    pub fn recipient(&self) -> Recipient {
        Recipient::new(self.recipient_email.clone(), self.recipient_name.clone())
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Aggregate queue counts for operators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub total: u64,
    pub by_status: BTreeMap<EmailStatus, u64>,
    pub by_type: BTreeMap<EmailType, BTreeMap<EmailStatus, u64>>,
    /// Earliest `scheduled_time` among pending entries
    pub next_scheduled: Option<DateTime<Utc>>,
    /// Most recent `sent_at`
    pub last_sent: Option<DateTime<Utc>>,
}

impl QueueStats {
    pub fn status_count(&self, status: EmailStatus) -> u64 {
        self.by_status.get(&status).copied().unwrap_or(0)
    }

    pub fn count(&self, email_type: EmailType, status: EmailStatus) -> u64 {
        self.by_type
            .get(&email_type)
            .and_then(|m| m.get(&status))
            .copied()
            .unwrap_or(0)
    }
}

/// Progress of one campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CampaignStatus {
    pub email_type: EmailType,
    /// `None` when the campaign has no calendar anchor configured
    pub scheduled_time: Option<DateTime<Utc>>,
    /// The anchor has been reached; fan-out no longer queues this campaign
    pub is_past_due: bool,
    pub counts: BTreeMap<EmailStatus, u64>,
    pub total: u64,
}
