//! Queue module for the persisted email queue.
//!
//! This module provides:
//! - Entry, status and statistics types
//! - The state machine entries move through
//! - The SQLite store with atomic claim/update primitives
//! - The repository callers use to enqueue, claim and record outcomes
//!
//! ## Flow
//!
//! ```text
//! enqueue → pending → claim_due → processing → mark_sent / mark_failed_attempt
//! ```

pub mod error;
pub mod repository;
pub mod state;
pub mod store;
pub mod types;

pub use error::{QueueError, QueueResult};
pub use repository::QueueRepository;
pub use store::{FailureMode, QueueStore};
pub use types::{
    CampaignStatus, EmailStatus, EmailType, EntryId, NewEntry, QueueEntry, QueueStats, Recipient,
    MAX_RETRIES_LIMIT,
};
