//! Entry state machine.
//!
//! ```text
//! pending    → processing   claim_due (scheduled_time <= now)
//! processing → sent         mark_sent
//! processing → pending      failed attempt, retry budget left
//! processing → failed       failed attempt, budget exhausted; permanent failure
//! failed     → pending      retry (operator)
//! pending    → cancelled    cancel
//! ```
//!
//! The store enforces these edges with conditional updates and owns the
//! retry budget arithmetic. This module names the edges for the rest of the
//! crate: which source state a rejected request needed, and which states
//! end an entry's run through the processor.

use super::types::EmailStatus;

/// Status the entry leaves from by every edge that ends in `to`.
///
/// Used to tell a caller which state was required when a request is rejected.
pub fn required_source(to: EmailStatus) -> &'static [EmailStatus] {
    use EmailStatus::*;

    match to {
        Processing => &[Pending],
        Sent => &[Processing],
        Pending => &[Processing, Failed],
        Failed => &[Processing],
        Cancelled => &[Pending],
    }
}

/// Terminal states never leave without an explicit operator action.
pub fn is_terminal(status: EmailStatus) -> bool {
    matches!(
        status,
        EmailStatus::Sent | EmailStatus::Failed | EmailStatus::Cancelled
    )
}
