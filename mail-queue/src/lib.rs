//! Mail queue - database-persisted email delivery with a background worker.
//!
//! This library provides shared modules for the two binaries:
//! - `mailqueue-worker`: background processor that claims due entries and sends them
//! - `mailqueue-admin`: HTTP surface for enqueueing, inspection and operator actions
//!
//! ## Architecture
//!
//! ```text
//! Signup / Admin API → QueueRepository → SQLite ← QueueProcessor → MailSender (SMTP)
//! ```

pub mod config;
pub mod processor;
pub mod queue;
pub mod schedule;
pub mod sender;
pub mod telemetry;
pub mod templates;
pub mod web;

// Re-export commonly used types
pub use config::{Config, ConfigError};
pub use processor::{CycleReport, ProcessorConfig, ProcessorHandle, QueueProcessor};
pub use queue::{
    EmailStatus, EmailType, EntryId, NewEntry, QueueEntry, QueueError, QueueRepository,
    QueueStore, Recipient,
};
pub use schedule::{CampaignCalendar, SchedulingPolicy};
pub use sender::{DryRunSender, MailSender, SendError, SmtpMailSender};
pub use web::AppState;

/// Open the store named by `config`, create the schema and wrap it in a repository.
pub async fn open_repository(config: &Config) -> Result<QueueRepository, QueueError> {
    let store = QueueStore::connect(&config.database_url).await?;
    store.migrate().await?;
    Ok(QueueRepository::new(
        store,
        SchedulingPolicy::new(config.campaign_calendar.clone()),
        config.max_retries,
    ))
}
